//! Shared application state for the relay server.

use std::sync::Arc;
use tokio::time::Instant;

use crate::config::RelayMode;
use crate::handlers::relay::RelayHub;

/// State shared by every relay connection.
pub struct AppState {
    /// Peer sets and fan-out channels
    pub hub: RelayHub,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(mode: RelayMode) -> Arc<Self> {
        Arc::new(Self {
            hub: RelayHub::new(mode),
            started_at: Instant::now(),
        })
    }

    pub fn mode(&self) -> RelayMode {
        self.hub.mode()
    }
}
