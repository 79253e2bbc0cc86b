//! Session State Reconciliation
//!
//! Applies the publisher's ordered event stream to an in-memory snapshot of
//! the simulation: the agent roster, the position table aligned with it
//! index-for-index, and the current world settings. A [`Session`] lives for
//! one connection; on disconnect the driver resets it, because the publisher
//! replays a fresh `Clear` + `Spawn` on every new session.

use std::collections::BTreeSet;

use swarm_protocol::{Event, WorldSettings};

/// A live agent reconstructed from the event stream.
///
/// Identity is the opaque `id` the publisher minted; it is never reused
/// within a session. The genome feeds derived display attributes only.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: String,
    pub genome: Vec<f32>,
}

/// Why an event was rejected.
///
/// A rejected event leaves the session exactly as it was — `apply` commits
/// no partial mutation. Rejection is the fail-closed answer to anything
/// that would break the roster/position alignment invariant.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("frame carries {got} positions for {expected} live agents")]
    FrameLengthMismatch { expected: usize, got: usize },

    #[error("kill index {index} out of range for roster of {len}")]
    KillIndexOutOfRange { index: usize, len: usize },

    #[error("roster/position alignment broken: {roster} vs {positions}")]
    AlignmentBroken { roster: usize, positions: usize },
}

/// Authoritative in-memory view of one publisher session.
///
/// Invariant: `roster.len() == positions.len()` at all times, with entry `i`
/// of each referring to the same agent. Every mutation either preserves the
/// invariant or is rejected whole.
#[derive(Debug, Default)]
pub struct Session {
    roster: Vec<Agent>,
    positions: Vec<(f32, f32)>,
    settings: WorldSettings,
    /// UI-local selection. Not part of the synchronized model: the
    /// reconciler stores it opaquely and only ever clears it on reset.
    highlight: Option<String>,
    /// Frames accepted this session. The publisher's own frame numbering is
    /// advisory at best, so the simulated clock derives from this counter.
    frame: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roster(&self) -> &[Agent] {
        &self.roster
    }

    pub fn positions(&self) -> &[(f32, f32)] {
        &self.positions
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn highlight(&self) -> Option<&str> {
        self.highlight.as_deref()
    }

    /// Frames accepted since the last reset.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Simulated seconds elapsed this session.
    pub fn sim_time(&self) -> f32 {
        self.frame as f32 * self.settings.time_step
    }

    /// Record which agent the user has highlighted, if any. Survives every
    /// event except `Clear`.
    pub fn select(&mut self, id: Option<String>) {
        self.highlight = id;
    }

    /// Drop all per-session state. Idempotent; settings survive, since they
    /// describe the world rather than the session.
    pub fn reset(&mut self) {
        self.roster.clear();
        self.positions.clear();
        self.highlight = None;
        self.frame = 0;
    }

    /// Apply one decoded event. Events must arrive in publish order:
    /// `Kill` indices and `Frame` lengths are relative to the roster the
    /// earlier events built.
    pub fn apply(&mut self, event: Event) -> Result<(), ApplyError> {
        match event {
            Event::Clear => self.reset(),
            Event::Spawn(seeds) => self.spawn(seeds),
            Event::Kill(indices) => self.kill(&indices)?,
            Event::Frame(positions) => self.replace_positions(positions)?,
            Event::Settings(settings) => self.settings = settings,
        }
        debug_assert_eq!(self.roster.len(), self.positions.len());
        Ok(())
    }

    fn spawn(&mut self, seeds: Vec<(String, Vec<f32>)>) {
        self.roster.reserve(seeds.len());
        self.positions.reserve(seeds.len());
        for (id, genome) in seeds {
            self.roster.push(Agent { id, genome });
            // Newborns sit at the origin until the next frame places them.
            self.positions.push((0.0, 0.0));
        }
    }

    fn kill(&mut self, indices: &[usize]) -> Result<(), ApplyError> {
        // Removal is a membership test against this set, never a scan over
        // the index list's own positions.
        let doomed: BTreeSet<usize> = indices.iter().copied().collect();

        if let Some(&max) = doomed.last() {
            if max >= self.roster.len() {
                return Err(ApplyError::KillIndexOutOfRange {
                    index: max,
                    len: self.roster.len(),
                });
            }
        } else {
            return Ok(());
        }

        let survivors = self.roster.len() - doomed.len();
        let mut roster = Vec::with_capacity(survivors);
        let mut positions = Vec::with_capacity(survivors);
        for (i, pair) in self.roster.drain(..).zip(self.positions.drain(..)).enumerate() {
            if !doomed.contains(&i) {
                roster.push(pair.0);
                positions.push(pair.1);
            }
        }

        if roster.len() != positions.len() {
            return Err(ApplyError::AlignmentBroken {
                roster: roster.len(),
                positions: positions.len(),
            });
        }
        self.roster = roster;
        self.positions = positions;
        Ok(())
    }

    fn replace_positions(&mut self, positions: Vec<(f32, f32)>) -> Result<(), ApplyError> {
        if positions.len() != self.roster.len() {
            return Err(ApplyError::FrameLengthMismatch {
                expected: self.roster.len(),
                got: positions.len(),
            });
        }
        self.positions = positions;
        self.frame += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: &str) -> (String, Vec<f32>) {
        (id.to_string(), vec![0.5])
    }

    fn session_with(ids: &[&str]) -> Session {
        let mut session = Session::new();
        session
            .apply(Event::Spawn(ids.iter().map(|id| seed(id)).collect()))
            .unwrap();
        session
    }

    fn ids(session: &Session) -> Vec<&str> {
        session.roster().iter().map(|a| a.id.as_str()).collect()
    }

    // ── reset ───────────────────────────────────────────────────────────

    #[test]
    fn reset_is_idempotent() {
        let mut session = session_with(&["a", "b"]);
        session.apply(Event::Frame(vec![(1.0, 1.0), (2.0, 2.0)])).unwrap();
        session.select(Some("a".into()));

        session.apply(Event::Clear).unwrap();
        assert!(session.roster().is_empty());
        assert!(session.positions().is_empty());
        assert!(session.highlight().is_none());
        assert_eq!(session.frame(), 0);

        // Second clear changes nothing.
        session.apply(Event::Clear).unwrap();
        assert!(session.roster().is_empty());
        assert_eq!(session.frame(), 0);
    }

    #[test]
    fn reset_keeps_settings() {
        let mut session = Session::new();
        let settings = WorldSettings {
            title: "Brains".into(),
            ..WorldSettings::default()
        };
        session.apply(Event::Settings(settings.clone())).unwrap();
        session.apply(Event::Clear).unwrap();
        assert_eq!(session.settings(), &settings);
    }

    // ── spawn ───────────────────────────────────────────────────────────

    #[test]
    fn spawn_appends_with_zero_positions() {
        let session = session_with(&["a", "b"]);
        assert_eq!(ids(&session), ["a", "b"]);
        assert_eq!(session.positions(), [(0.0, 0.0), (0.0, 0.0)]);
    }

    #[test]
    fn spawn_preserves_existing_prefix() {
        let mut session = session_with(&["a", "b"]);
        session.apply(Event::Frame(vec![(5.0, 5.0), (6.0, 6.0)])).unwrap();

        session.apply(Event::Spawn(vec![seed("c")])).unwrap();
        assert_eq!(ids(&session), ["a", "b", "c"]);
        assert_eq!(session.positions(), [(5.0, 5.0), (6.0, 6.0), (0.0, 0.0)]);
    }

    // ── kill ────────────────────────────────────────────────────────────

    #[test]
    fn kill_removes_exactly_the_indexed_pairs() {
        let mut session = session_with(&["a0", "a1", "a2", "a3"]);
        session
            .apply(Event::Frame(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]))
            .unwrap();

        session.apply(Event::Kill(vec![1, 3])).unwrap();
        assert_eq!(ids(&session), ["a0", "a2"]);
        assert_eq!(session.positions(), [(0.0, 0.0), (2.0, 2.0)]);
    }

    #[test]
    fn kill_empty_set_is_a_no_op() {
        let mut session = session_with(&["a", "b"]);
        session.apply(Event::Kill(vec![])).unwrap();
        assert_eq!(ids(&session), ["a", "b"]);
    }

    // Regression: index removal must be a membership test against the index
    // set, not a containment scan — with more agents than doomed indices the
    // scan removed the wrong entries.
    #[test]
    fn kill_with_roster_larger_than_index_set() {
        let mut session = session_with(&["a0", "a1", "a2", "a3", "a4", "a5"]);
        session.apply(Event::Kill(vec![5])).unwrap();
        assert_eq!(ids(&session), ["a0", "a1", "a2", "a3", "a4"]);

        session.apply(Event::Kill(vec![0, 1])).unwrap();
        assert_eq!(ids(&session), ["a2", "a3", "a4"]);
    }

    #[test]
    fn kill_duplicate_indices_collapse() {
        let mut session = session_with(&["a", "b", "c"]);
        session.apply(Event::Kill(vec![1, 1, 1])).unwrap();
        assert_eq!(ids(&session), ["a", "c"]);
    }

    #[test]
    fn kill_out_of_range_rejects_whole_event() {
        let mut session = session_with(&["a", "b"]);
        let err = session.apply(Event::Kill(vec![0, 2])).unwrap_err();
        assert_eq!(err, ApplyError::KillIndexOutOfRange { index: 2, len: 2 });
        // Nothing was removed, including the in-range index 0.
        assert_eq!(ids(&session), ["a", "b"]);
    }

    // ── frame ───────────────────────────────────────────────────────────

    #[test]
    fn frame_replaces_the_whole_table() {
        let mut session = session_with(&["a", "b"]);
        session.apply(Event::Frame(vec![(5.0, 5.0), (10.0, 10.0)])).unwrap();
        assert_eq!(session.positions(), [(5.0, 5.0), (10.0, 10.0)]);

        session.apply(Event::Frame(vec![(7.0, 7.0), (8.0, 8.0)])).unwrap();
        assert_eq!(session.positions(), [(7.0, 7.0), (8.0, 8.0)]);
        assert_eq!(session.frame(), 2);
    }

    #[test]
    fn frame_length_mismatch_rejected_table_unchanged() {
        let mut session = session_with(&["a", "b"]);
        session.apply(Event::Frame(vec![(5.0, 5.0), (10.0, 10.0)])).unwrap();

        let err = session.apply(Event::Frame(vec![(1.0, 1.0)])).unwrap_err();
        assert_eq!(err, ApplyError::FrameLengthMismatch { expected: 2, got: 1 });
        assert_eq!(session.positions(), [(5.0, 5.0), (10.0, 10.0)]);
        // Rejected frames don't advance the clock.
        assert_eq!(session.frame(), 1);
    }

    #[test]
    fn sim_time_derives_from_local_counter() {
        let mut session = session_with(&["a"]);
        session
            .apply(Event::Settings(WorldSettings {
                time_step: 0.5,
                ..WorldSettings::default()
            }))
            .unwrap();

        session.apply(Event::Frame(vec![(1.0, 1.0)])).unwrap();
        session.apply(Event::Frame(vec![(2.0, 2.0)])).unwrap();
        assert_eq!(session.frame(), 2);
        assert_eq!(session.sim_time(), 1.0);
    }

    // ── settings ────────────────────────────────────────────────────────

    #[test]
    fn settings_replace_wholesale() {
        let mut session = Session::new();
        session
            .apply(Event::Settings(WorldSettings {
                title: "first".into(),
                zone: Some(swarm_protocol::Zone {
                    x: 0.0,
                    y: 0.0,
                    radius: 10.0,
                }),
                ..WorldSettings::default()
            }))
            .unwrap();

        // A replacement without a zone drops the old zone — no merging.
        session
            .apply(Event::Settings(WorldSettings {
                title: "second".into(),
                ..WorldSettings::default()
            }))
            .unwrap();
        assert_eq!(session.settings().title, "second");
        assert!(session.settings().zone.is_none());
    }

    // ── selection ───────────────────────────────────────────────────────

    #[test]
    fn selection_survives_updates_but_not_reset() {
        let mut session = session_with(&["a", "b"]);
        session.select(Some("b".into()));

        session.apply(Event::Frame(vec![(1.0, 1.0), (2.0, 2.0)])).unwrap();
        session.apply(Event::Spawn(vec![seed("c")])).unwrap();
        session.apply(Event::Kill(vec![0])).unwrap();
        assert_eq!(session.highlight(), Some("b"));

        session.apply(Event::Clear).unwrap();
        assert!(session.highlight().is_none());
    }

    // ── alignment invariant ─────────────────────────────────────────────

    #[test]
    fn alignment_holds_across_mixed_stream() {
        let mut session = Session::new();
        let stream = [
            Event::Clear,
            Event::Spawn(vec![seed("a"), seed("b"), seed("c")]),
            Event::Frame(vec![(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]),
            Event::Kill(vec![1]),
            Event::Spawn(vec![seed("d")]),
            Event::Frame(vec![(4.0, 4.0), (5.0, 5.0), (6.0, 6.0)]),
            Event::Kill(vec![0, 2]),
        ];
        for event in stream {
            session.apply(event).unwrap();
            assert_eq!(session.roster().len(), session.positions().len());
        }
        assert_eq!(ids(&session), ["c"]);
    }

    #[test]
    fn end_to_end_event_sequence() {
        let mut session = Session::new();
        session.apply(Event::Clear).unwrap();
        session
            .apply(Event::Spawn(vec![
                ("a".to_string(), vec![0.1, 0.2]),
                ("b".to_string(), vec![0.3, -0.1]),
            ]))
            .unwrap();
        session.apply(Event::Frame(vec![(5.0, 5.0), (10.0, 10.0)])).unwrap();
        session.apply(Event::Kill(vec![0])).unwrap();
        session.apply(Event::Frame(vec![(20.0, 20.0)])).unwrap();

        assert_eq!(ids(&session), ["b"]);
        assert_eq!(session.roster()[0].genome, vec![0.3, -0.1]);
        assert_eq!(session.positions(), [(20.0, 20.0)]);
    }
}
