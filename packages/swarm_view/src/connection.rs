//! Connection Lifecycle Management
//!
//! Owns the single WebSocket to the publisher and keeps it alive: connect,
//! surface inbound payloads in arrival order, and after every loss retry
//! forever on a fixed delay. Payload decoding is deliberately not this
//! module's job — the consumer gets opaque text frames.
//!
//! The lifecycle is an explicit state machine ([`ConnectionState`] +
//! [`Signal`]) so the reconnect/teardown rules are testable without a
//! socket. The background task merely drives it and reports each state
//! through a watch channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed pause between losing the connection and the next attempt. No
/// backoff growth, no retry cap: reconnection is perpetual until told to
/// stop.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Inbound event channel capacity before backpressure on the socket reader.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the connection currently stands. Drives user-facing status text
/// and the reconnect timer; never feeds into roster data directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

/// Lifecycle input driving [`ConnectionState::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A connect attempt is being made.
    AttemptStarted,
    /// The socket opened.
    Opened,
    /// The socket closed or the attempt failed.
    Closed,
    /// The reconnect timer was armed.
    RetryScheduled,
}

impl ConnectionState {
    /// Pure transition function. Signals that the connection contract rules
    /// out (an `Opened` while already `Connected`, say) leave the state
    /// where it is rather than inventing a transition.
    pub fn step(self, signal: Signal) -> ConnectionState {
        use ConnectionState::*;
        match (self, signal) {
            (Connecting | Reconnecting, Signal::Opened) => Connected,
            (_, Signal::Closed) => Disconnected,
            (Disconnected, Signal::RetryScheduled) => Reconnecting,
            (Disconnected | Reconnecting, Signal::AttemptStarted) => Connecting,
            (state, _) => state,
        }
    }

    /// Status label shown to the user.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What the background task reports to its consumer, in order.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A session opened. The publisher will replay its state from `Clear`.
    Opened,
    /// One inbound text frame, undecoded.
    Message(String),
    /// Transport-level trouble. Diagnostic only — reconnection is gated on
    /// the `Closed` that always follows, not on this.
    Failed(ConnectionError),
    /// The session ended. The manager retries after the configured delay.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Handle to the background connection task.
///
/// Dropping the manager (or calling [`Self::shutdown`]) cancels any pending
/// reconnect timer, closes an open socket, and ends event emission — no
/// connection attempt happens after teardown.
#[derive(Debug)]
pub struct ConnectionManager {
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the connection loop against `url`. The loop is the sole
    /// initiator of attempts, so at most one is ever outstanding.
    ///
    /// Returns the manager plus the ordered event stream. If the receiver
    /// is dropped the loop winds down on its next send.
    pub fn start(url: String, reconnect_delay: Duration) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        tokio::spawn(run_connection_loop(
            url,
            reconnect_delay,
            state_tx,
            event_tx,
            cancel.clone(),
        ));

        (Self { cancel, state_rx }, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch every state transition (for status displays).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Tear down: cancel timers, close the socket, emit nothing further.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a live session ended.
enum SessionEnd {
    /// Connection lost — reconnect.
    Lost,
    /// Teardown requested or consumer gone — exit without further emission.
    Shutdown,
}

async fn run_connection_loop(
    url: String,
    reconnect_delay: Duration,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
) {
    let mut state = ConnectionState::Connecting;
    let advance = |current: &mut ConnectionState, signal| {
        *current = current.step(signal);
        state_tx.send_replace(*current);
    };

    loop {
        if cancel.is_cancelled() {
            break;
        }

        advance(&mut state, Signal::AttemptStarted);
        debug!(%url, "connecting to publisher");

        let attempt = tokio::select! {
            () = cancel.cancelled() => break,
            attempt = connect_async(url.as_str()) => attempt,
        };

        match attempt {
            Ok((stream, _)) => {
                advance(&mut state, Signal::Opened);
                info!(%url, "connected to publisher");
                if event_tx.send(ConnectionEvent::Opened).await.is_err() {
                    break;
                }
                match run_session(stream, &event_tx, &cancel).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost => {}
                }
            }
            Err(e) => {
                warn!(%url, error = %e, "connection attempt failed");
                if event_tx.send(ConnectionEvent::Failed(e.into())).await.is_err() {
                    break;
                }
            }
        }

        // Every non-open outcome converges here: report the close, then
        // hold in Reconnecting until the fixed delay elapses.
        advance(&mut state, Signal::Closed);
        if event_tx.send(ConnectionEvent::Closed).await.is_err() {
            break;
        }
        advance(&mut state, Signal::RetryScheduled);
        debug!(delay_ms = reconnect_delay.as_millis() as u64, "reconnect scheduled");

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    debug!("connection loop ended");
}

/// Pump one open socket until it dies or teardown is requested. Inbound
/// text frames are forwarded in arrival order; nothing is carried over to
/// the next session.
async fn run_session(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Best-effort close frame; the session is over either way.
                let _ = writer.close().await;
                return SessionEnd::Shutdown;
            }
            inbound = reader.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if event_tx
                        .send(ConnectionEvent::Message(text.as_str().to_owned()))
                        .await
                        .is_err()
                    {
                        return SessionEnd::Shutdown;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = writer.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    info!("publisher closed the connection");
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {
                    debug!("ignoring non-text frame");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "websocket error");
                    if event_tx
                        .send(ConnectionEvent::Failed(e.into()))
                        .await
                        .is_err()
                    {
                        return SessionEnd::Shutdown;
                    }
                    return SessionEnd::Lost;
                }
                None => {
                    info!("websocket stream ended");
                    return SessionEnd::Lost;
                }
            }
        }
    }
}
