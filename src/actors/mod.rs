//! Actor-based runtime of the daemon
//!
//! Each actor runs as an independent async task, controlled through a
//! cloneable handle that talks to it over Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   PollfileActor ──Registry──▶ SchedulerActor ──spawns──▶ poll tasks (≤ max_in_flight)
//!                                     │                         │
//!                                     │ PollEvent (broadcast)   │ apply
//!                                     ▼                         ▼
//!                                subscribers            DaemonState { StateEngine, EventManager }
//!                                                               ▲          │ EventChange (broadcast)
//!                            HousekeepingActor ── age / sweep ──┤          ▼
//!                                     │                         └──── PersistenceActor ──▶ SnapshotBackend
//!                                     └──▶ ArchiveSink
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: owns the ready queue and dispatches polls
//! - **PollfileActor**: re-reads the pollfile and hands new registries over
//! - **PersistenceActor**: periodic and commit-triggered snapshots
//! - **HousekeepingActor**: maintenance windows, flap aging, entity sweep, event expiry
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Broadcast channels for fan-out (poll completions, store changes)
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod housekeeping;
pub mod messages;
pub mod persistence;
pub mod pollfile;
pub mod scheduler;

pub use housekeeping::HousekeepingHandle;
pub use messages::{PollEvent, PollStatus};
pub use persistence::PersistenceHandle;
pub use pollfile::PollfileHandle;
pub use scheduler::{SchedulerHandle, SchedulerSettings};
