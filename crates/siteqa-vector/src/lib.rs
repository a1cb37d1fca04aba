//! In-memory vector index with hot-swappable snapshots, persisted per version
//! as LanceDB tables.
pub mod error;
pub mod index;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use error::{IndexError, StoreError, StoreResult};
pub use index::VectorIndex;
pub use snapshot::{content_hash, IndexEntry, IndexSnapshot};
pub use store::{Expected, SnapshotManifest, SnapshotStore};
