//! Snapshot backend trait definition

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::Snapshot;

/// Durable home of the daemon's snapshot
///
/// ## Contract
///
/// - `save` publishes atomically: a concurrent or later `load` sees either
///   the previous snapshot or the new one, never a mix
/// - `load` returns `Ok(None)` when nothing was ever saved
/// - a failed `save` leaves the previously published snapshot intact
///
/// Implementations must be `Send + Sync`; the persistence actor shares
/// them with the shutdown path.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> StorageResult<()>;

    async fn load(&self) -> StorageResult<Option<Snapshot>>;

    /// Human-readable description for logs (e.g. the file path)
    fn describe(&self) -> String;
}
