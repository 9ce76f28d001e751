//! Archive sinks for expired events
//!
//! Expired events leave the live store for good, so a sink must either
//! durably accept the whole batch or fail; the housekeeping task puts a
//! failed batch back into the store and retries on its next sweep.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::model::Event;
use crate::storage::{StorageError, StorageResult};

#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn archive(&self, events: &[Event]) -> StorageResult<()>;
}

/// Appends one JSON document per event to a file
#[derive(Debug, Clone)]
pub struct JsonLinesArchive {
    path: PathBuf,
}

impl JsonLinesArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every archived event back, oldest first
    pub async fn read_all(&self) -> StorageResult<Vec<Event>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }
}

#[async_trait]
impl ArchiveSink for JsonLinesArchive {
    async fn archive(&self, events: &[Event]) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        let start = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(&self.path, e))?
            .len();

        let written = async {
            file.write_all(&buffer).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            // the batch is retried as a whole, so no part of it may stay behind
            if let Err(undo) = truncate_to(&mut file, start).await {
                warn!("could not roll back {}: {undo}", self.path.display());
            }
            return Err(StorageError::io(&self.path, e));
        }

        debug!("archived {} events to {}", events.len(), self.path.display());
        Ok(())
    }
}

async fn truncate_to(file: &mut File, len: u64) -> std::io::Result<()> {
    file.set_len(len).await?;
    file.sync_data().await
}

/// Keeps archived events in memory; for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryArchive {
    events: Mutex<Vec<Event>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn archive(&self, events: &[Event]) -> StorageResult<()> {
        self.events
            .lock()
            .map_err(|_| StorageError::Backend("archive lock poisoned".to_string()))?
            .extend_from_slice(events);
        Ok(())
    }
}
