//! Persistence backends for the daemon snapshot
//!
//! ## Design
//!
//! - **Trait-based**: [`SnapshotBackend`] allows swapping implementations
//! - **Async**: all operations are async for use from Tokio actors
//! - **Whole-state**: one snapshot holds every event and entity; there is
//!   no incremental write path
//!
//! ## Backends
//!
//! - **File** (default): JSON document published with write + rename
//! - **In-Memory**: no persistence, for tests
//!
//! ## Usage
//!
//! ```no_run
//! use zino::storage::{FileBackend, SnapshotBackend};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = FileBackend::new("./zino-state.json");
//! let snapshot = backend.load().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod schema;

pub use backend::SnapshotBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use schema::{SNAPSHOT_VERSION, Snapshot};
