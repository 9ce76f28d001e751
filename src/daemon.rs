//! Shared monitoring state: the entity state machines, the event store and
//! planned maintenance
//!
//! Poll completions, housekeeping, persistence and the API all work on one
//! [`DaemonState`] behind an `Arc`. Neither half has a global lock; see
//! [`StateEngine`] and [`EventManager`] for their exclusion scopes.
//!
//! ## Snapshot gate
//!
//! Every path that changes entities and events together holds the shared
//! side of a gate. [`DaemonState::snapshot`] takes the exclusive side only
//! while it copies both halves, so a snapshot never shows an entity state
//! without the event that state implies. Serializing and writing the copy
//! happen after the gate is released.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use chrono::TimeDelta;
use tracing::{debug, error, info};

use crate::Timestamp;
use crate::config::Config;
use crate::events::{EventFilter, EventId, EventManager};
use crate::maintenance::{
    MaintenanceError, MaintenanceStore, PlannedMaintenance, PmId, PmRequest, PmState,
};
use crate::monitors::{EntityKey, PollOutcome, StateEngine, StateParams};
use crate::storage::{Snapshot, SnapshotBackend};

#[derive(Debug)]
pub struct DaemonState {
    pub engine: StateEngine,
    pub events: EventManager,
    pub maintenance: MaintenanceStore,
    gate: RwLock<()>,
}

impl DaemonState {
    pub fn new(params: StateParams, retention: TimeDelta) -> Self {
        Self {
            engine: StateEngine::new(params),
            events: EventManager::new(retention),
            maintenance: MaintenanceStore::new(),
            gate: RwLock::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(StateParams::from(&config.state), retention(config))
    }

    pub fn from_snapshot(params: StateParams, retention: TimeDelta, snapshot: Snapshot) -> Self {
        Self {
            engine: StateEngine::restore(params, snapshot.entities),
            events: EventManager::restore(retention, snapshot.events),
            maintenance: MaintenanceStore::restore(snapshot.maintenance),
            gate: RwLock::new(()),
        }
    }

    /// Restore from `backend`, falling back to empty state
    ///
    /// A missing snapshot is a normal cold start. An unreadable one is
    /// logged loudly and otherwise treated the same way.
    pub async fn load_or_cold_start(
        backend: &dyn SnapshotBackend,
        params: StateParams,
        retention: TimeDelta,
    ) -> Self {
        match backend.load().await {
            Ok(Some(snapshot)) => {
                info!(
                    "restored {} events and {} entities from {} (saved {})",
                    snapshot.events.len(),
                    snapshot.entities.len(),
                    backend.describe(),
                    snapshot.saved_at
                );
                Self::from_snapshot(params, retention, snapshot)
            }
            Ok(None) => {
                info!("no snapshot at {}, starting with empty state", backend.describe());
                Self::new(params, retention)
            }
            Err(e) => {
                error!(
                    "could not load snapshot from {}, starting with empty state: {e}",
                    backend.describe()
                );
                Self::new(params, retention)
            }
        }
    }

    /// Consistent point-in-time copy for persistence
    pub fn snapshot(&self, now: Timestamp) -> Snapshot {
        let (events, entities, maintenance) = {
            let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            (
                self.events.snapshot(),
                self.engine.snapshot(),
                self.maintenance.snapshot(),
            )
        };
        Snapshot::new(now, events, entities).with_maintenance(maintenance)
    }

    /// Shared side of the gate; it guards no data, so poisoning is ignored
    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a poll outcome through the state machines and into the event store
    ///
    /// Returns the ids of every event opened, updated or closed. Each change
    /// reaches the event store while its entity is still locked, so the two
    /// halves never disagree about the order of one entity's transitions.
    /// Events of entities under active maintenance are marked as such.
    pub fn apply_poll(&self, device: &str, outcome: PollOutcome, now: Timestamp) -> Vec<EventId> {
        let _shared = self.shared();
        let mut ids = Vec::new();
        self.engine.apply_with(device, outcome, now, &mut |notification| {
            let Some(id) = self.events.on_transition(notification) else {
                return;
            };
            if notification.is_degrading() {
                for pm in self.maintenance.covering(&notification.entity) {
                    let message = format!("under planned maintenance {pm}");
                    self.events
                        .note_maintenance(id, pm, &message, notification.timestamp);
                }
            }
            ids.push(id);
        });
        ids
    }

    /// Move maintenance windows along and annotate the open events they cover
    ///
    /// Returns the number of window transitions.
    pub fn update_maintenance(&self, now: Timestamp) -> usize {
        let _shared = self.shared();
        let transitions = self.maintenance.update_states(now);

        for transition in &transitions {
            let pm = transition.window.id;
            match (transition.from, transition.to) {
                (_, PmState::Active) => {
                    let message = format!("planned maintenance {pm} started");
                    for event in self.events.get(&EventFilter::open()) {
                        if transition.covers(&event.entity) {
                            self.events.note_maintenance(event.id, pm, &message, now);
                        }
                    }
                }
                (PmState::Active, PmState::Ended) => {
                    let ended = self.events.end_maintenance(pm, now);
                    debug!("maintenance {pm} ended on {} open events", ended.len());
                }
                _ => {}
            }
        }
        transitions.len()
    }

    /// Schedule a window; one that has already started takes effect at once
    pub fn add_maintenance(
        &self,
        request: PmRequest,
        user: Option<&str>,
        now: Timestamp,
    ) -> Result<PlannedMaintenance, MaintenanceError> {
        let pm = self.maintenance.add(request, user, now)?;
        self.update_maintenance(now);
        Ok(self.maintenance.get(pm.id).unwrap_or(pm))
    }

    /// Withdraw a window, ending it on the events it covered
    pub fn cancel_maintenance(
        &self,
        id: PmId,
        now: Timestamp,
    ) -> Result<PlannedMaintenance, MaintenanceError> {
        let _shared = self.shared();
        let pm = self.maintenance.cancel(id)?;
        if pm.state == PmState::Active {
            self.events.end_maintenance(id, now);
        }
        Ok(pm)
    }

    /// Settle quiet flapping entities; returns the number of state changes
    pub fn age_flapping(&self, now: Timestamp) -> usize {
        let _shared = self.shared();
        let mut settled = 0;
        self.engine.age_flapping_with(now, &mut |notification| {
            settled += 1;
            self.events.on_transition(notification);
        });
        settled
    }

    /// Drop entities gone for longer than the grace period, closing their events
    pub fn sweep(&self, now: Timestamp) -> Vec<EntityKey> {
        let _shared = self.shared();
        self.engine.sweep_with(now, &mut |key| {
            if let Some(id) = self.events.close_for_removed(key, now) {
                debug!("closed event {id} of dropped entity {key}");
            }
        })
    }
}

/// How long closed events stay in the live store
pub fn retention(config: &Config) -> TimeDelta {
    TimeDelta::try_minutes(i64::try_from(config.archive.grace).unwrap_or(i64::MAX))
        .unwrap_or(TimeDelta::MAX)
}
