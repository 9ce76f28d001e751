use std::sync::atomic::{AtomicU64, Ordering};

use chrono::TimeDelta;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::model::{Acknowledgement, Event, EventChange, EventFilter, EventId, EventStatus, Severity};
use crate::Timestamp;
use crate::maintenance::PmId;
use crate::monitors::{EntityKey, Notification};

/// Capacity of the change broadcast; lagging subscribers only lose wakeups
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event {0} not found")]
    NotFound(EventId),
}

/// Owns the canonical event store
///
/// ## Locking
///
/// Events live in a sharded map keyed by id, with a second sharded map
/// indexing the single open event of every entity. The entity key already
/// carries its kind, so the index key is the (entity, kind) pair.
///
/// Any path that touches both maps locks the index entry first and the
/// event second. Paths touching only closed events (expiry, ack of a
/// closed event) never take an index lock.
#[derive(Debug)]
pub struct EventManager {
    events: DashMap<EventId, Event>,
    open_index: DashMap<EntityKey, EventId>,
    next_id: AtomicU64,
    retention: TimeDelta,
    changes: broadcast::Sender<EventChange>,
}

impl EventManager {
    /// Empty store; closed events are kept live for `retention`
    pub fn new(retention: TimeDelta) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            events: DashMap::new(),
            open_index: DashMap::new(),
            next_id: AtomicU64::new(1),
            retention,
            changes,
        }
    }

    /// Rebuild the store from snapshot contents
    ///
    /// Should the snapshot hold more than one open event for an entity,
    /// the newest stays open and the others are closed.
    pub fn restore(retention: TimeDelta, mut events: Vec<Event>) -> Self {
        let manager = Self::new(retention);
        events.sort_by_key(|event| std::cmp::Reverse(event.id));

        let mut max_id = 0;
        for mut event in events {
            max_id = max_id.max(event.id);
            if event.is_open() {
                match manager.open_index.entry(event.entity.clone()) {
                    Entry::Occupied(existing) => {
                        warn!(
                            "snapshot holds a second open event {} for {} (kept {}), closing it",
                            event.id,
                            event.entity,
                            existing.get()
                        );
                        let updated = event.updated;
                        event.close(updated);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(event.id);
                    }
                }
            }
            manager.events.insert(event.id, event);
        }
        manager.next_id.store(max_id + 1, Ordering::SeqCst);
        manager
    }

    /// Receive a wakeup whenever the store changes
    pub fn subscribe(&self) -> broadcast::Receiver<EventChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: EventChange) {
        // no subscribers is fine
        let _ = self.changes.send(change);
    }

    fn allocate_id(&self) -> EventId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Fold one state change into the store
    ///
    /// Returns the id of the event that was opened, updated or closed.
    pub fn on_transition(&self, notification: &Notification) -> Option<EventId> {
        let entity = &notification.entity;
        let message = format!(
            "{} changed from {} to {}",
            entity,
            notification.old_state.label(notification.kind),
            notification.new_state.label(notification.kind)
        );

        match self.open_index.entry(entity.clone()) {
            Entry::Occupied(slot) => {
                let id = *slot.get();
                let Some(mut event) = self.events.get_mut(&id) else {
                    warn!("open index points at missing event {id}, dropping index entry");
                    slot.remove();
                    return None;
                };

                event.append(notification.timestamp, message, None);
                event.state = notification.new_state;
                if notification.description.is_some() {
                    event.description = notification.description.clone();
                }

                if notification.is_recovery() {
                    event.close(notification.timestamp);
                    drop(event);
                    slot.remove();
                    info!("event {id} closed: {entity} recovered");
                    self.notify(EventChange::Closed(id));
                } else {
                    let severity = Severity::for_state(notification.kind, notification.new_state);
                    // severity never drops while the condition is unresolved
                    event.severity = event.severity.max(severity);
                    debug!("event {id} updated: {entity} is {}", notification.new_state);
                    self.notify(EventChange::Updated(id));
                }
                Some(id)
            }
            Entry::Vacant(slot) => {
                if !notification.is_degrading() {
                    return None;
                }

                let id = self.allocate_id();
                let mut event = Event {
                    id,
                    entity: entity.clone(),
                    kind: notification.kind,
                    status: EventStatus::Open,
                    severity: Severity::for_state(notification.kind, notification.new_state),
                    state: notification.new_state,
                    description: notification.description.clone(),
                    opened: notification.timestamp,
                    updated: notification.timestamp,
                    closed: None,
                    log: Vec::new(),
                    ack: None,
                    maintenance: Vec::new(),
                };
                event.append(notification.timestamp, message, None);

                self.events.insert(id, event);
                slot.insert(id);
                info!("event {id} opened: {entity} is {}", notification.new_state);
                self.notify(EventChange::Opened(id));
                Some(id)
            }
        }
    }

    /// Events matching `filter`, ordered by id
    pub fn get(&self, filter: &EventFilter) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by_key(|event| event.id);
        events
    }

    pub fn get_by_id(&self, id: EventId) -> Result<Event, EventError> {
        self.events
            .get(&id)
            .map(|event| event.value().clone())
            .ok_or(EventError::NotFound(id))
    }

    /// The open event of an entity, if any
    pub fn open_event_for(&self, entity: &EntityKey) -> Option<Event> {
        let id = *self.open_index.get(entity)?;
        self.events.get(&id).map(|event| event.value().clone())
    }

    /// Attach an operator acknowledgement to an event
    pub fn ack(
        &self,
        id: EventId,
        user: &str,
        note: &str,
        now: Timestamp,
    ) -> Result<Event, EventError> {
        let mut event = self.events.get_mut(&id).ok_or(EventError::NotFound(id))?;
        event.ack = Some(Acknowledgement {
            user: user.to_string(),
            note: note.to_string(),
            timestamp: now,
        });
        let message = if note.is_empty() {
            "acknowledged".to_string()
        } else {
            format!("acknowledged: {note}")
        };
        event.append(now, message, Some(user.to_string()));
        let snapshot = event.value().clone();
        drop(event);

        info!("event {id} acknowledged by {user}");
        self.notify(EventChange::Acknowledged(id));
        Ok(snapshot)
    }

    /// Operator-initiated close; clearing a closed event changes nothing
    pub fn clear(&self, id: EventId, user: &str, now: Timestamp) -> Result<Event, EventError> {
        let entity = {
            let event = self.events.get(&id).ok_or(EventError::NotFound(id))?;
            if !event.is_open() {
                return Ok(event.value().clone());
            }
            event.entity.clone()
        };

        // index before event, as everywhere else
        let slot = self.open_index.entry(entity);
        let mut event = self.events.get_mut(&id).ok_or(EventError::NotFound(id))?;
        if !event.is_open() {
            return Ok(event.value().clone());
        }

        event.append(now, "cleared by operator".to_string(), Some(user.to_string()));
        event.close(now);
        let snapshot = event.value().clone();
        drop(event);

        if let Entry::Occupied(slot) = slot {
            if *slot.get() == id {
                slot.remove();
            }
        }

        info!("event {id} cleared by {user}");
        self.notify(EventChange::Closed(id));
        Ok(snapshot)
    }

    /// Close the open event of an entity that is no longer monitored
    pub fn close_for_removed(&self, entity: &EntityKey, now: Timestamp) -> Option<EventId> {
        let Entry::Occupied(slot) = self.open_index.entry(entity.clone()) else {
            return None;
        };
        let id = *slot.get();
        if let Some(mut event) = self.events.get_mut(&id) {
            event.append(now, format!("{entity} is no longer monitored"), None);
            event.close(now);
        }
        slot.remove();
        info!("event {id} closed: {entity} removed");
        self.notify(EventChange::Closed(id));
        Some(id)
    }

    /// Record that maintenance window `pm` covers open event `id`
    ///
    /// Logs `message` the first time a window is recorded; returns whether
    /// anything changed.
    pub fn note_maintenance(&self, id: EventId, pm: PmId, message: &str, now: Timestamp) -> bool {
        let Some(mut event) = self.events.get_mut(&id) else {
            return false;
        };
        if !event.is_open() || event.maintenance.contains(&pm) {
            return false;
        }
        event.maintenance.push(pm);
        event.append(now, message.to_string(), None);
        drop(event);

        debug!("event {id} under planned maintenance {pm}");
        self.notify(EventChange::Updated(id));
        true
    }

    /// Log the end of window `pm` on every open event it covered
    pub fn end_maintenance(&self, pm: PmId, now: Timestamp) -> Vec<EventId> {
        let mut ended = Vec::new();
        for mut event in self.events.iter_mut() {
            if event.is_open() && event.maintenance.contains(&pm) {
                event.append(now, format!("planned maintenance {pm} ended"), None);
                ended.push(event.id);
            }
        }
        ended.sort_unstable();
        for id in &ended {
            self.notify(EventChange::Updated(*id));
        }
        ended
    }

    /// Remove closed events older than the retention period
    ///
    /// Returned events are expected to go to an archive sink.
    pub fn expire(&self, now: Timestamp) -> Vec<Event> {
        let Some(horizon) = now.checked_sub_signed(self.retention) else {
            return Vec::new();
        };
        let expired =
            |event: &Event| !event.is_open() && event.closed.is_some_and(|closed| closed <= horizon);

        let candidates: Vec<EventId> = self
            .events
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut removed: Vec<Event> = candidates
            .into_iter()
            .filter_map(|id| self.events.remove_if(&id, |_, event| expired(event)))
            .map(|(_, event)| event)
            .collect();
        removed.sort_by_key(|event| event.id);

        if !removed.is_empty() {
            debug!("expired {} closed events", removed.len());
            self.notify(EventChange::Archived(removed.len()));
        }
        removed
    }

    /// Put events back, e.g. after a failed archive write
    pub fn reinstate(&self, events: Vec<Event>) {
        for event in events {
            self.events.entry(event.id).or_insert(event);
        }
    }

    /// Copy of every event, ordered by id
    pub fn snapshot(&self) -> Vec<Event> {
        self.get(&EventFilter::default())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.open_index.len()
    }
}
