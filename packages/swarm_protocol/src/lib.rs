//! Wire Protocol Types
//!
//! Event stream published by the simulation over its WebSocket. Each inbound
//! text frame is one self-describing JSON event in serde's externally tagged
//! form: a bare `"Clear"` string, or a single-key object such as
//! `{"Kill": [1, 3]}`. The stream is one-directional — viewers only receive.

use serde::{Deserialize, Serialize};

/// A single protocol event, in publish order.
///
/// Later events depend on the cumulative effect of earlier ones (`Kill`
/// indices and `Frame` lengths are relative to the roster built up so far),
/// so consumers must apply events in arrival order without coalescing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Drop all roster and position state. Sent at the start of every
    /// session and whenever the simulation restarts a run.
    Clear,
    /// Newly born agents as `(id, genome)` pairs, appended to the roster
    /// in the order given.
    Spawn(Vec<(String, Vec<f32>)>),
    /// Roster indices to remove. A set: order and duplicates carry no
    /// meaning.
    Kill(Vec<usize>),
    /// Full position-table replacement, one `(x, y)` pair per live agent,
    /// in roster order.
    Frame(Vec<(f32, f32)>),
    /// Wholesale replacement of the world's display parameters.
    Settings(WorldSettings),
}

/// Static display parameters of the simulated world.
///
/// No identity and no partial merge: every `Settings` event carries a
/// complete value. Out-of-range values (negative radius, zero time step)
/// are passed through untouched — clamping is the presentation layer's call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSettings {
    pub title: String,
    pub world_radius: f32,
    /// Simulated seconds per frame; drives the displayed simulated clock.
    #[serde(default = "default_time_step")]
    pub time_step: f32,
    /// Wall-clock seconds between published frames.
    #[serde(default = "default_frame_interval")]
    pub frame_interval: f32,
    /// Total simulated seconds in one generation.
    #[serde(default = "default_generation_time")]
    pub generation_time: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<Zone>,
}

/// Circular region of interest within the world. Display data only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

fn default_time_step() -> f32 {
    0.05
}

fn default_frame_interval() -> f32 {
    0.05
}

fn default_generation_time() -> f32 {
    30.0
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            title: String::new(),
            world_radius: 300.0,
            time_step: default_time_step(),
            frame_interval: default_frame_interval(),
            generation_time: default_generation_time(),
            zone: None,
        }
    }
}

/// Decode failure at the protocol boundary. Always non-fatal to the
/// consumer: the offending frame is dropped and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one inbound text frame into an [`Event`].
///
/// Unknown tags and shape mismatches surface as [`ProtocolError::Malformed`].
pub fn decode_event(text: &str) -> Result<Event, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an event to its wire form. The viewer never sends events; this
/// exists for the publisher side and for tests.
pub fn encode_event(event: &Event) -> String {
    serde_json::to_string(event).expect("event serialization is infallible")
}
