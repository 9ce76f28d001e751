//! Planned maintenance
//!
//! A maintenance window covers every entity whose device name matches its
//! pattern, optionally narrowed to one entity kind. Windows are moved
//! through their states by a periodic pass:
//!
//! ```text
//! Scheduled ──start reached──→ Active ──end reached──→ Ended (removed)
//!     └────────end reached (never active)─────────────────↑
//! ```
//!
//! Windows annotate events; they never hold one back. Opening, updating
//! and closing still follow entity state, and the log of a covered event
//! records when its window started and ended.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::Timestamp;
use crate::monitors::{EntityKey, EntityKind};

pub type PmId = u64;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaintenanceError {
    #[error("maintenance {0} not found")]
    NotFound(PmId),

    #[error("maintenance must end after it starts")]
    EmptyWindow,

    #[error("maintenance would already be over")]
    AlreadyEnded,

    #[error("invalid device pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmState {
    Scheduled,
    Active,
    Ended,
}

/// A maintenance window as stored and reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMaintenance {
    pub id: PmId,
    pub start: Timestamp,
    pub end: Timestamp,

    /// Regular expression matched against device names
    pub device_pattern: String,

    /// Only entities of this kind; every kind when `None`
    pub kind: Option<EntityKind>,
    pub description: Option<String>,
    pub state: PmState,
    pub created_by: Option<String>,
}

/// Operator request for a new window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmRequest {
    pub start: Timestamp,
    pub end: Timestamp,
    pub device_pattern: String,
    #[serde(default)]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Broadcast whenever the set of windows changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmChange {
    Added(PmId),
    Started(PmId),
    Ended(PmId),
    Cancelled(PmId),
}

/// A state change produced by [`MaintenanceStore::update_states`]
#[derive(Debug, Clone)]
pub struct PmTransition {
    pub window: PlannedMaintenance,
    pub from: PmState,
    pub to: PmState,
    pattern: Regex,
}

impl PmTransition {
    /// Whether the window covers `entity`; still answers once it has ended
    pub fn covers(&self, entity: &EntityKey) -> bool {
        self.window.kind.is_none_or(|kind| kind == entity.kind)
            && self.pattern.is_match(&entity.device)
    }
}

#[derive(Debug)]
struct Window {
    pm: PlannedMaintenance,
    pattern: Regex,
}

impl Window {
    fn compile(pm: PlannedMaintenance) -> Result<Self, MaintenanceError> {
        let pattern =
            Regex::new(&pm.device_pattern).map_err(|e| MaintenanceError::InvalidPattern {
                pattern: pm.device_pattern.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { pm, pattern })
    }

    fn covers(&self, entity: &EntityKey) -> bool {
        self.pm.kind.is_none_or(|kind| kind == entity.kind)
            && self.pattern.is_match(&entity.device)
    }
}

/// Owns every maintenance window that has not ended yet
#[derive(Debug)]
pub struct MaintenanceStore {
    windows: DashMap<PmId, Window>,
    next_id: AtomicU64,
    changes: broadcast::Sender<PmChange>,
}

impl Default for MaintenanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenanceStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            windows: DashMap::new(),
            next_id: AtomicU64::new(1),
            changes,
        }
    }

    /// Rebuild from snapshot contents; windows that no longer compile are dropped
    pub fn restore(windows: Vec<PlannedMaintenance>) -> Self {
        let store = Self::new();
        let mut max_id = 0;
        for pm in windows {
            max_id = max_id.max(pm.id);
            match Window::compile(pm) {
                Ok(window) => {
                    store.windows.insert(window.pm.id, window);
                }
                Err(e) => warn!("dropping restored maintenance window: {e}"),
            }
        }
        store.next_id.store(max_id + 1, Ordering::SeqCst);
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PmChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: PmChange) {
        let _ = self.changes.send(change);
    }

    /// Register a window; it becomes active on the first pass after `start`
    pub fn add(
        &self,
        request: PmRequest,
        user: Option<&str>,
        now: Timestamp,
    ) -> Result<PlannedMaintenance, MaintenanceError> {
        if request.end <= request.start {
            return Err(MaintenanceError::EmptyWindow);
        }
        if request.end <= now {
            return Err(MaintenanceError::AlreadyEnded);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let window = Window::compile(PlannedMaintenance {
            id,
            start: request.start,
            end: request.end,
            device_pattern: request.device_pattern,
            kind: request.kind,
            description: request.description,
            state: PmState::Scheduled,
            created_by: user.map(str::to_string),
        })?;
        let pm = window.pm.clone();
        self.windows.insert(id, window);

        info!(
            "maintenance {id} scheduled for '{}' from {} to {}",
            pm.device_pattern, pm.start, pm.end
        );
        self.notify(PmChange::Added(id));
        Ok(pm)
    }

    /// Remove a window before it ends on its own
    pub fn cancel(&self, id: PmId) -> Result<PlannedMaintenance, MaintenanceError> {
        let (_, window) = self
            .windows
            .remove(&id)
            .ok_or(MaintenanceError::NotFound(id))?;
        info!("maintenance {id} cancelled");
        self.notify(PmChange::Cancelled(id));
        Ok(window.pm)
    }

    pub fn get(&self, id: PmId) -> Result<PlannedMaintenance, MaintenanceError> {
        self.windows
            .get(&id)
            .map(|window| window.pm.clone())
            .ok_or(MaintenanceError::NotFound(id))
    }

    /// Every window, ordered by id
    pub fn list(&self) -> Vec<PlannedMaintenance> {
        let mut windows: Vec<PlannedMaintenance> =
            self.windows.iter().map(|entry| entry.pm.clone()).collect();
        windows.sort_by_key(|pm| pm.id);
        windows
    }

    pub fn snapshot(&self) -> Vec<PlannedMaintenance> {
        self.list()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Ids of the active windows covering `entity`
    pub fn covering(&self, entity: &EntityKey) -> Vec<PmId> {
        let mut ids: Vec<PmId> = self
            .windows
            .iter()
            .filter(|window| window.pm.state == PmState::Active && window.covers(entity))
            .map(|window| window.pm.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Whether window `id` covers `entity`, regardless of its state
    pub fn covers(&self, id: PmId, entity: &EntityKey) -> bool {
        self.windows
            .get(&id)
            .is_some_and(|window| window.covers(entity))
    }

    /// Move windows along by the clock; ended windows leave the store
    ///
    /// Transitions are returned in id order. A returned ended window is no
    /// longer in the store.
    pub fn update_states(&self, now: Timestamp) -> Vec<PmTransition> {
        let mut transitions = Vec::new();

        for mut window in self.windows.iter_mut() {
            let from = window.pm.state;
            let to = if now >= window.pm.end {
                PmState::Ended
            } else if now >= window.pm.start {
                PmState::Active
            } else {
                PmState::Scheduled
            };
            if to == from {
                continue;
            }
            window.pm.state = to;
            transitions.push(PmTransition {
                window: window.pm.clone(),
                from,
                to,
                pattern: window.pattern.clone(),
            });
        }

        for transition in &transitions {
            let id = transition.window.id;
            match transition.to {
                PmState::Active => {
                    info!("maintenance {id} started");
                    self.notify(PmChange::Started(id));
                }
                PmState::Ended => {
                    self.windows
                        .remove_if(&id, |_, window| window.pm.state == PmState::Ended);
                    info!("maintenance {id} ended");
                    self.notify(PmChange::Ended(id));
                }
                PmState::Scheduled => debug!("maintenance {id} rescheduled"),
            }
        }

        transitions.sort_by_key(|transition| transition.window.id);
        transitions
    }
}
