use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::maintenance::PmId;
use crate::monitors::{EntityKey, EntityKind, StateValue};

pub type EventId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Open,
    Closed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventStatus::Open => "open",
            EventStatus::Closed => "closed",
        })
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(EventStatus::Open),
            "closed" => Ok(EventStatus::Closed),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Major,
    Critical,
}

impl Severity {
    /// Severity of an entity currently in `state`
    pub fn for_state(kind: EntityKind, state: StateValue) -> Self {
        match (kind, state) {
            (_, StateValue::Up | StateValue::Unknown) => Severity::Info,
            (_, StateValue::Flapping) => Severity::Warning,
            (EntityKind::Reachability, StateValue::Down) => Severity::Critical,
            (_, StateValue::Down) => Severity::Major,
        }
    }
}

/// One annotation in an event's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub message: String,

    /// Operator responsible for the entry; `None` for entries made by the daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub user: String,
    pub note: String,
    pub timestamp: Timestamp,
}

/// A user-visible record of a condition on one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub entity: EntityKey,
    pub kind: EntityKind,
    pub status: EventStatus,
    pub severity: Severity,

    /// Last reported state of the entity
    pub state: StateValue,
    pub description: Option<String>,

    pub opened: Timestamp,
    pub updated: Timestamp,
    pub closed: Option<Timestamp>,

    pub log: Vec<LogEntry>,
    pub ack: Option<Acknowledgement>,

    /// Planned maintenance windows that covered this event while it was open
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintenance: Vec<PmId>,
}

impl Event {
    pub fn is_open(&self) -> bool {
        self.status == EventStatus::Open
    }

    pub(crate) fn append(&mut self, timestamp: Timestamp, message: String, user: Option<String>) {
        self.log.push(LogEntry {
            timestamp,
            message,
            user,
        });
        self.updated = self.updated.max(timestamp);
    }

    pub(crate) fn close(&mut self, timestamp: Timestamp) {
        self.status = EventStatus::Closed;
        self.closed = Some(timestamp);
        self.updated = self.updated.max(timestamp);
    }
}

/// Query over the live event store; every field narrows the result
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventFilter {
    pub device: Option<String>,
    pub kind: Option<EntityKind>,
    pub status: Option<EventStatus>,

    /// Only events still active at or after this time
    pub since: Option<Timestamp>,

    /// Only events opened at or before this time
    pub until: Option<Timestamp>,
}

impl EventFilter {
    pub fn open() -> Self {
        Self {
            status: Some(EventStatus::Open),
            ..Self::default()
        }
    }

    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.device
            .as_deref()
            .is_none_or(|device| event.entity.device == device)
            && self.kind.is_none_or(|kind| event.kind == kind)
            && self.status.is_none_or(|status| event.status == status)
            && self.since.is_none_or(|since| event.updated >= since)
            && self.until.is_none_or(|until| event.opened <= until)
    }
}

/// Broadcast whenever the live store changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventChange {
    Opened(EventId),
    Updated(EventId),
    Closed(EventId),
    Acknowledged(EventId),
    Archived(usize),
}
