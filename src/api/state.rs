//! API shared state

use std::sync::Arc;

use chrono::Utc;

use crate::Timestamp;
use crate::daemon::DaemonState;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Live entity states and event store
    pub daemon: Arc<DaemonState>,

    pub started_at: Timestamp,
}

impl ApiState {
    pub fn new(daemon: Arc<DaemonState>) -> Self {
        Self {
            daemon,
            started_at: Utc::now(),
        }
    }
}
