//! On-disk snapshot schema
//!
//! ## Versioning
//!
//! Every snapshot carries a `version` field. A loader compares it against
//! [`SNAPSHOT_VERSION`] before touching the rest of the document, so an
//! incompatible file is rejected as a whole instead of being half-read.
//!
//! When the layout changes:
//! 1. bump [`SNAPSHOT_VERSION`]
//! 2. teach [`Snapshot::from_json`] to migrate the previous version, or
//!    leave it rejected (the daemon then cold-starts)

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::Timestamp;
use crate::events::Event;
use crate::maintenance::PlannedMaintenance;
use crate::monitors::EntityRecord;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Complete durable state: every live event and every entity state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: Timestamp,
    pub events: Vec<Event>,
    pub entities: Vec<EntityRecord>,

    /// Maintenance windows that had not ended; absent in older snapshots
    #[serde(default)]
    pub maintenance: Vec<PlannedMaintenance>,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

impl Snapshot {
    pub fn new(saved_at: Timestamp, events: Vec<Event>, entities: Vec<EntityRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            events,
            entities,
            maintenance: Vec::new(),
        }
    }

    pub fn with_maintenance(mut self, maintenance: Vec<PlannedMaintenance>) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn to_json(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> StorageResult<Self> {
        let header: VersionHeader = serde_json::from_slice(bytes)?;
        if header.version != SNAPSHOT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: header.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
