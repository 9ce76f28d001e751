//! Event Manager
//!
//! Opens, updates and closes events from state-change notifications,
//! answers operator queries and commands, and hands expired events to an
//! [`ArchiveSink`].

pub mod archive;
pub mod manager;
pub mod model;

pub use archive::{ArchiveSink, JsonLinesArchive, MemoryArchive};
pub use manager::{EventError, EventManager};
pub use model::{
    Acknowledgement, Event, EventChange, EventFilter, EventId, EventStatus, LogEntry, Severity,
};
