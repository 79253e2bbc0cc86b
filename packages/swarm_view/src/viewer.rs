//! Viewer Session Driver
//!
//! Wires the connection manager's event stream into the session reconciler
//! and publishes a read-only [`Snapshot`] after every handled event. All
//! session mutation happens on this one task, in strict arrival order —
//! selection changes from the UI funnel through the same loop, so nothing
//! needs a lock.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use swarm_protocol::{WorldSettings, decode_event};

use crate::config::ViewerConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::session::{Agent, Session};

/// Read-only view for the presentation layer. Cloned out whole so drawing
/// never races the reconciler.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub roster: Vec<Agent>,
    pub positions: Vec<(f32, f32)>,
    pub settings: WorldSettings,
    pub highlight: Option<String>,
    /// Frames accepted this session.
    pub frame: u64,
    /// Simulated seconds elapsed this session.
    pub sim_time: f32,
    pub connection: ConnectionState,
}

impl Snapshot {
    fn initial() -> Self {
        Self {
            roster: Vec::new(),
            positions: Vec::new(),
            settings: WorldSettings::default(),
            highlight: None,
            frame: 0,
            sim_time: 0.0,
            connection: ConnectionState::Connecting,
        }
    }

    fn of(session: &Session, connection: ConnectionState) -> Self {
        Self {
            roster: session.roster().to_vec(),
            positions: session.positions().to_vec(),
            settings: session.settings().clone(),
            highlight: session.highlight().map(str::to_owned),
            frame: session.frame(),
            sim_time: session.sim_time(),
            connection,
        }
    }
}

/// Handle to a running viewer.
///
/// [`Self::shutdown`] (or dropping the handle) tears the whole client down:
/// the driver loop exits, which drops the connection manager, which cancels
/// any pending reconnect and closes the socket.
#[derive(Debug)]
pub struct ViewerHandle {
    snapshot_rx: watch::Receiver<Snapshot>,
    select_tx: mpsc::UnboundedSender<Option<String>>,
    cancel: CancellationToken,
}

impl ViewerHandle {
    /// Current snapshot, cloned.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch snapshot publications (one per handled event).
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Highlight an agent (or clear the highlight). The reconciler stores
    /// the id without interpreting it; a session reset clears it.
    pub fn select(&self, id: Option<String>) {
        let _ = self.select_tx.send(id);
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start the client: one connection manager, one driver task.
pub fn start_viewer(config: &ViewerConfig) -> ViewerHandle {
    let (manager, events) = ConnectionManager::start(config.url.clone(), config.reconnect_delay);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::initial());
    let (select_tx, select_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    tokio::spawn(drive_session(
        manager,
        events,
        select_rx,
        snapshot_tx,
        cancel.clone(),
    ));

    ViewerHandle {
        snapshot_rx,
        select_tx,
        cancel,
    }
}

async fn drive_session(
    manager: ConnectionManager,
    mut events: mpsc::Receiver<ConnectionEvent>,
    mut select_rx: mpsc::UnboundedReceiver<Option<String>>,
    snapshot_tx: watch::Sender<Snapshot>,
    cancel: CancellationToken,
) {
    let mut session = Session::new();
    let mut state_rx = manager.watch_state();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                apply_connection_event(&mut session, &event);
                snapshot_tx.send_replace(Snapshot::of(&session, manager.state()));
            }
            Some(id) = select_rx.recv() => {
                session.select(id);
                snapshot_tx.send_replace(Snapshot::of(&session, manager.state()));
            }
            changed = state_rx.changed() => {
                // Timer-driven transitions (Disconnected → Reconnecting →
                // Connecting) arrive here rather than as events.
                if changed.is_err() {
                    break;
                }
                snapshot_tx.send_replace(Snapshot::of(&session, manager.state()));
            }
        }
    }

    manager.shutdown();
    debug!("viewer driver ended");
}

/// Fold one connection event into the session. Decode and validation
/// failures are non-fatal: the offending event is dropped, the session is
/// left untouched, and a diagnostic is logged.
fn apply_connection_event(session: &mut Session, event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Opened => {
            // Nothing to do: the publisher opens every session with Clear.
        }
        ConnectionEvent::Message(text) => match decode_event(text) {
            Ok(event) => {
                if let Err(e) = session.apply(event) {
                    warn!(error = %e, "event rejected");
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable event");
            }
        },
        ConnectionEvent::Failed(e) => {
            warn!(error = %e, "transport error");
        }
        ConnectionEvent::Closed => {
            // The prior session's data is void once the publisher is gone.
            session.reset();
        }
    }
}
