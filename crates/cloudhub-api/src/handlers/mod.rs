//! HTTP API handlers — exposes session manager state as JSON.

pub mod nodes;
pub mod status;

use std::sync::Arc;

use cloudhub_session::{ConnectionManager, SharedSessionManager};

#[derive(Clone)]
pub struct ApiState {
    pub sessions: SharedSessionManager,
    pub connections: Arc<ConnectionManager>,
    /// Signals daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// Re-export handler functions for use in router setup.
pub use nodes::{handle_connections_sync, handle_node_drop, handle_node_inspect, handle_nodes};
pub use status::{handle_shutdown, handle_status};
