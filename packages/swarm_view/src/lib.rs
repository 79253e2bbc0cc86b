// Library interface for swarm_view
// Exposes the connection manager and session reconciler for embedding
// (and for the integration tests); the `swarm` binary is presentation glue.

pub mod config;
pub mod connection;
pub mod session;
pub mod viewer;


pub use config::ViewerConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use session::{Agent, ApplyError, Session};
pub use viewer::{Snapshot, ViewerHandle, start_viewer};
