//! In-memory snapshot backend (no persistence)
//!
//! Useful for tests and for running the daemon without a state file; the
//! stored copy is lost with the process.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::SnapshotBackend;
use super::error::StorageResult;
use super::schema::Snapshot;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Serialized form, so `load` exercises the same decode path as files
    stored: RwLock<Option<Vec<u8>>>,
    saves: RwLock<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far
    pub async fn save_count(&self) -> usize {
        *self.saves.read().await
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn save(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let bytes = snapshot.to_json()?;
        *self.stored.write().await = Some(bytes);
        *self.saves.write().await += 1;
        debug!(
            "in-memory backend: stored {} events, {} entities",
            snapshot.events.len(),
            snapshot.entities.len()
        );
        Ok(())
    }

    async fn load(&self) -> StorageResult<Option<Snapshot>> {
        match self.stored.read().await.as_deref() {
            Some(bytes) => Ok(Some(Snapshot::from_json(bytes)?)),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
