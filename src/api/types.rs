//! API request and response bodies

use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::maintenance::PlannedMaintenance;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime_seconds: i64,
    pub entities: usize,
    pub open_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    pub count: usize,
    pub events: Vec<Event>,
}

impl From<Vec<Event>> for EventsResponse {
    fn from(events: Vec<Event>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceResponse {
    pub count: usize,
    pub maintenance: Vec<PlannedMaintenance>,
}

impl From<Vec<PlannedMaintenance>> for MaintenanceResponse {
    fn from(maintenance: Vec<PlannedMaintenance>) -> Self {
        Self {
            count: maintenance.len(),
            maintenance,
        }
    }
}

/// Body of `POST /api/v1/events/{id}/ack`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub note: Option<String>,
}
