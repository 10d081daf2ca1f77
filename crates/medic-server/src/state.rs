use std::sync::Arc;
use std::time::Duration;

use medic_core::audit::AuditStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AuditStore>,
    /// Configured HealingLoop cadence; `/api/health` calls a controller
    /// stale once its last cycle is older than three of these.
    pub cycle_interval: Duration,
}

impl AppState {
    pub fn new(store: Arc<AuditStore>, cycle_interval: Duration) -> Self {
        Self {
            store,
            cycle_interval,
        }
    }
}
