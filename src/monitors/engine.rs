use std::collections::{BTreeSet, HashSet};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use super::state::{
    self, CounterData, EntityData, EntityKey, EntityKind, EntityState, Observation, StateChange,
    StateParams, StateValue,
};
use crate::Timestamp;
use crate::snmp::{BgpPeerSample, DevicePoll, InterfaceSample};

/// Emitted for every state change of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub entity: EntityKey,
    pub kind: EntityKind,
    pub old_state: StateValue,
    pub new_state: StateValue,
    pub timestamp: Timestamp,
    pub description: Option<String>,
}

impl Notification {
    fn new(
        entity: &EntityKey,
        change: StateChange,
        timestamp: Timestamp,
        description: Option<String>,
    ) -> Self {
        Self {
            kind: entity.kind,
            entity: entity.clone(),
            old_state: change.from,
            new_state: change.to,
            timestamp,
            description,
        }
    }

    /// Whether the change moves the entity into a state worth an event
    pub fn is_degrading(&self) -> bool {
        self.new_state.is_degraded()
    }

    /// Full recovery to up, as opposed to e.g. flapping settling into down
    pub fn is_recovery(&self) -> bool {
        self.new_state == StateValue::Up
    }
}

/// What one poll produced for a device
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Success(DevicePoll),
    /// Timeout, transport error or any other absence of data
    Failure,
}

/// An entity and its state as stored in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub state: EntityState,
}

/// Callback receiving each state change while its entity is still locked
pub type Sink<'a> = &'a mut dyn FnMut(&Notification);

/// Owns every entity state machine
///
/// Entities live in a sharded map; each update runs under that entity's
/// entry guard, so concurrent completions for the same entity serialize
/// while unrelated entities proceed in parallel. The per-device index is
/// only ever locked on its own, never while an entity guard is held.
///
/// The `*_with` variants hand every change to a sink before the guard is
/// released, so a consumer sees the changes of one entity in order. A sink
/// must not call back into the engine.
#[derive(Debug, Default)]
pub struct StateEngine {
    entities: DashMap<EntityKey, EntityState>,
    by_device: DashMap<String, BTreeSet<EntityKey>>,
    params: StateParams,
}

impl StateEngine {
    pub fn new(params: StateParams) -> Self {
        Self {
            entities: DashMap::new(),
            by_device: DashMap::new(),
            params,
        }
    }

    /// Rebuild an engine from snapshot records
    pub fn restore(params: StateParams, records: Vec<EntityRecord>) -> Self {
        let engine = Self::new(params);
        for record in records {
            engine.index(&record.key);
            engine.entities.insert(record.key, record.state);
        }
        engine
    }

    pub fn params(&self) -> &StateParams {
        &self.params
    }

    /// Copy of every entity, sorted by key
    pub fn snapshot(&self) -> Vec<EntityRecord> {
        let mut records: Vec<EntityRecord> = self
            .entities
            .iter()
            .map(|entry| EntityRecord {
                key: entry.key().clone(),
                state: entry.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    pub fn get(&self, key: &EntityKey) -> Option<EntityState> {
        self.entities.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Keys of all entities belonging to `device`
    pub fn entities_of(&self, device: &str) -> Vec<EntityKey> {
        self.by_device
            .get(device)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn index(&self, key: &EntityKey) {
        self.by_device
            .entry(key.device.clone())
            .or_default()
            .insert(key.clone());
    }

    fn unindex(&self, key: &EntityKey) {
        let now_empty = match self.by_device.get_mut(&key.device) {
            Some(mut keys) => {
                keys.remove(key);
                keys.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_device.remove_if(&key.device, |_, keys| keys.is_empty());
        }
    }

    /// Feed one observation to an entity, creating it when first seen
    fn observe(
        &self,
        key: &EntityKey,
        observation: Observation,
        now: Timestamp,
        refresh: impl FnOnce(&mut EntityState),
        sink: Sink<'_>,
    ) {
        self.index(key);
        let mut entry = self
            .entities
            .entry(key.clone())
            .or_insert_with(|| EntityState::new(now));

        refresh(entry.value_mut());
        let (next, change) =
            state::transition(entry.value(), key.kind, observation, now, &self.params);
        *entry = next;

        let Some(change) = change else {
            return;
        };
        debug!(
            "{key}: {} -> {}",
            change.from.label(key.kind),
            change.to.label(key.kind)
        );
        sink(&Notification::new(key, change, now, entry.description.clone()));
    }

    /// Apply the outcome of one device poll to all its entities
    pub fn apply(&self, device: &str, outcome: PollOutcome, now: Timestamp) -> Vec<Notification> {
        let mut notifications = Vec::new();
        self.apply_with(device, outcome, now, &mut |n| notifications.push(n.clone()));
        notifications
    }

    #[instrument(skip(self, outcome, now, sink))]
    pub fn apply_with(&self, device: &str, outcome: PollOutcome, now: Timestamp, sink: Sink<'_>) {
        let reachability = EntityKey::reachability(device);

        match outcome {
            PollOutcome::Failure => {
                let mut keys = self.entities_of(device);
                if !keys.contains(&reachability) {
                    keys.push(reachability);
                }
                for key in &keys {
                    self.observe(key, Observation::Failure, now, |_| (), &mut *sink);
                }
            }
            PollOutcome::Success(poll) => {
                self.observe(&reachability, Observation::Up, now, |_| (), &mut *sink);

                if let Some(interfaces) = poll.interfaces {
                    self.apply_interfaces(device, interfaces, now, &mut *sink);
                }
                if let Some(peers) = poll.bgp_peers {
                    self.apply_bgp_peers(device, peers, now, sink);
                }
            }
        }
    }

    fn apply_interfaces(
        &self,
        device: &str,
        interfaces: Vec<InterfaceSample>,
        now: Timestamp,
        sink: Sink<'_>,
    ) {
        let mut seen = HashSet::with_capacity(interfaces.len());

        for sample in interfaces {
            let key = EntityKey::interface(device, sample.index);
            let observation = if sample.oper_up {
                Observation::Up
            } else {
                Observation::Down
            };

            let refresh = |entity: &mut EntityState| {
                entity.description = Some(sample.descr);
                entity.data = match (sample.in_octets, sample.out_octets) {
                    (Some(in_octets), Some(out_octets)) => {
                        let previous = match &entity.data {
                            EntityData::Counters(counters) => Some(counters),
                            EntityData::None => None,
                        };
                        EntityData::Counters(state::derive_counters(
                            previous, in_octets, out_octets, now,
                        ))
                    }
                    _ => EntityData::None,
                };
            };
            self.observe(&key, observation, now, refresh, &mut *sink);
            seen.insert(key);
        }

        self.mark_missing(device, EntityKind::Interface, &seen, now);
    }

    fn apply_bgp_peers(
        &self,
        device: &str,
        peers: Vec<BgpPeerSample>,
        now: Timestamp,
        sink: Sink<'_>,
    ) {
        let mut seen = HashSet::with_capacity(peers.len());

        for sample in peers {
            let key = EntityKey::bgp_peer(device, sample.peer);
            let observation = if sample.established {
                Observation::Up
            } else {
                Observation::Down
            };
            let description = format!("peer {}", sample.peer);
            self.observe(
                &key,
                observation,
                now,
                |entity| entity.description = Some(description),
                &mut *sink,
            );
            seen.insert(key);
        }

        self.mark_missing(device, EntityKind::BgpPeer, &seen, now);
    }

    /// Start the disappearance clock for entities absent from this poll
    fn mark_missing(
        &self,
        device: &str,
        kind: EntityKind,
        seen: &HashSet<EntityKey>,
        now: Timestamp,
    ) {
        for key in self.entities_of(device) {
            if key.kind != kind || seen.contains(&key) {
                continue;
            }
            if let Some(mut entity) = self.entities.get_mut(&key) {
                if entity.missing_since.is_none() {
                    trace!("{key} missing from poll response");
                    entity.missing_since = Some(now);
                }
            }
        }
    }

    /// Mark every entity of a device that left the registry as stale
    pub fn mark_device_stale(&self, device: &str, now: Timestamp) -> usize {
        let mut marked = 0;
        for key in self.entities_of(device) {
            if let Some(mut entity) = self.entities.get_mut(&key) {
                if entity.missing_since.is_none() {
                    entity.missing_since = Some(now);
                    marked += 1;
                }
            }
        }
        debug!("marked {marked} entities of {device} stale");
        marked
    }

    /// Stop the disappearance clock of every entity of a device back in the registry
    ///
    /// Entities that vanished from poll responses start over with the next
    /// successful poll.
    pub fn mark_device_present(&self, device: &str) -> usize {
        let mut cleared = 0;
        for key in self.entities_of(device) {
            if let Some(mut entity) = self.entities.get_mut(&key) {
                if entity.missing_since.take().is_some() {
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            debug!("{device} is monitored again, {cleared} entities no longer stale");
        }
        cleared
    }

    /// Drop entities that have been missing for longer than the grace period
    pub fn sweep(&self, now: Timestamp) -> Vec<EntityKey> {
        self.sweep_with(now, &mut |_| ())
    }

    /// As [`sweep`](Self::sweep), calling `on_removed` under the entity guard
    pub fn sweep_with(
        &self,
        now: Timestamp,
        on_removed: &mut dyn FnMut(&EntityKey),
    ) -> Vec<EntityKey> {
        let Some(horizon) = now.checked_sub_signed(self.params.disappearance_grace) else {
            return Vec::new();
        };
        let expired = |state: &EntityState| state.missing_since.is_some_and(|since| since <= horizon);

        let candidates: Vec<EntityKey> = self
            .entities
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for key in candidates {
            let Entry::Occupied(entry) = self.entities.entry(key.clone()) else {
                continue;
            };
            // re-check: the entity may have reappeared since the scan
            if !expired(entry.get()) {
                continue;
            }
            on_removed(&key);
            entry.remove();
            self.unindex(&key);
            debug!("{key} gone for longer than the grace period, dropped");
            removed.push(key);
        }
        removed
    }

    /// Age flap histories and settle quiet flapping entities
    pub fn age_flapping(&self, now: Timestamp) -> Vec<Notification> {
        let mut notifications = Vec::new();
        self.age_flapping_with(now, &mut |n| notifications.push(n.clone()));
        notifications
    }

    pub fn age_flapping_with(&self, now: Timestamp, sink: Sink<'_>) {
        for mut entry in self.entities.iter_mut() {
            if entry.flips.is_empty() {
                continue;
            }
            let (next, change) = state::age(entry.value(), now, &self.params);
            let description = next.description.clone();
            *entry.value_mut() = next;
            if let Some(change) = change {
                debug!("{} settled: {} -> {}", entry.key(), change.from, change.to);
                sink(&Notification::new(entry.key(), change, now, description));
            }
        }
    }

    /// Counter data of an interface entity, if known
    pub fn counters(&self, key: &EntityKey) -> Option<CounterData> {
        match self.entities.get(key)?.data.clone() {
            EntityData::Counters(counters) => Some(counters),
            EntityData::None => None,
        }
    }
}
