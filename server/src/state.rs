use std::sync::Arc;

use crate::config::RealtimeConfig;
use crate::hub::locations::LocationTable;
use crate::hub::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registry and location table are constructor-injected (never global)
/// so tests can run isolated hub instances in one process.
#[derive(Clone)]
pub struct AppState {
    /// Active WebSocket connections and room memberships
    pub registry: Arc<ConnectionRegistry>,
    /// Latest known position per driver
    pub locations: Arc<LocationTable>,
    /// Hub timing configuration
    pub realtime: RealtimeConfig,
}

impl AppState {
    pub fn new(realtime: RealtimeConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            locations: Arc::new(LocationTable::new()),
            realtime,
        }
    }
}
