//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Replies**: oneshot channels carry results back to the handle

use tokio::sync::oneshot;

use crate::Timestamp;
use crate::devices::{Registry, RegistryDiff};
use crate::events::EventId;

/// How a dispatched poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Success,

    /// The device answered with an error or not at all
    Failed,

    /// The poll was abandoned at the scheduler's timeout
    TimedOut,

    /// The device left the registry while the poll was in flight
    Discarded,
}

/// Published by the scheduler after every completed poll
///
/// Slow subscribers may lag and lose events; nothing in the core depends
/// on receiving every one of them.
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub device: String,
    pub status: PollStatus,
    pub completed: Timestamp,

    /// Events opened, updated or closed by this poll
    pub events: Vec<EventId>,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Poll a device right away; answered when that poll completes
    PollNow {
        device: String,
        respond_to: oneshot::Sender<anyhow::Result<PollStatus>>,
    },

    /// Replace the registry; answered with the applied difference
    UpdateRegistry {
        registry: Registry,
        respond_to: oneshot::Sender<RegistryDiff>,
    },

    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },

    /// Stop dispatching; in-flight polls are abandoned
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub devices: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub polls_succeeded: u64,
    pub polls_failed: u64,
    pub polls_timed_out: u64,
    pub polls_discarded: u64,
}

/// Commands that can be sent to the PersistenceActor
#[derive(Debug)]
pub enum PersistenceCommand {
    /// Save a snapshot immediately
    SaveNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    GetStats {
        respond_to: oneshot::Sender<PersistenceStats>,
    },

    /// Save one last time, then stop; answered once the final save is done
    Shutdown { respond_to: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub save_count: u64,
    pub failed_saves: u64,
    pub last_save: Option<Timestamp>,
}

/// Commands that can be sent to the PollfileActor
#[derive(Debug)]
pub enum PollfileCommand {
    /// Re-read the pollfile now; answers whether a new registry was applied
    CheckNow {
        respond_to: oneshot::Sender<anyhow::Result<bool>>,
    },

    Shutdown,
}

/// Commands that can be sent to the HousekeepingActor
#[derive(Debug)]
pub enum HousekeepingCommand {
    /// Run flap aging, the entity sweep and event expiry once
    RunNow {
        respond_to: oneshot::Sender<HousekeepingReport>,
    },

    Shutdown,
}

/// Outcome of one housekeeping pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Flapping entities that settled
    pub settled: usize,

    /// Entities dropped after the disappearance grace period
    pub dropped: usize,

    /// Closed events handed to the archive sink
    pub archived: usize,

    /// Planned maintenance windows that started or ended
    pub maintenance: usize,
}
