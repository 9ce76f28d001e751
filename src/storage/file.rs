//! File snapshot backend
//!
//! ## Atomic publish
//!
//! ```text
//! serialize → <file>.tmp → fsync → rename(<file>.tmp, <file>) → fsync(dir)
//! ```
//!
//! A crash before the rename leaves a stray `.tmp` that `load` never
//! reads; a crash after it leaves the new snapshot fully in place.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::backend::SnapshotBackend;
use super::error::{StorageError, StorageResult};
use super::schema::Snapshot;

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staging file next to the snapshot, so the rename stays on one filesystem
    pub fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("snapshot"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn sync_parent(&self) -> StorageResult<()> {
        #[cfg(unix)]
        {
            let parent = match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let dir = tokio::fs::File::open(&parent)
                .await
                .map_err(|e| StorageError::io(&parent, e))?;
            dir.sync_all()
                .await
                .map_err(|e| StorageError::io(&parent, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    #[instrument(skip(self, snapshot), fields(path = %self.path.display()))]
    async fn save(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let bytes = snapshot.to_json()?;
        let staging = self.staging_path();

        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|e| StorageError::io(&staging, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StorageError::io(&staging, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&staging, e))?;
        drop(file);

        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        self.sync_parent().await?;

        debug!(
            "saved snapshot: {} events, {} entities, {} bytes",
            snapshot.events.len(),
            snapshot.entities.len(),
            bytes.len()
        );
        Ok(())
    }

    async fn load(&self) -> StorageResult<Option<Snapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        Snapshot::from_json(&bytes).map(Some)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
