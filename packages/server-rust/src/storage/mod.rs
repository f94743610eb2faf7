//! Persistence layer: the per-store SQLite engine and the snapshot
//! upload boundary.

pub mod engine;
pub mod uploader;

pub use engine::{PendingEmbedding, StoreEngine, DEFAULT_DELTA_LIMIT};
pub use uploader::{NullUploader, SnapshotUploader};
