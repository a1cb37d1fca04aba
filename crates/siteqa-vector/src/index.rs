//! The live vector index: an atomically swappable pointer to an immutable
//! [`IndexSnapshot`].
//!
//! Searches clone the current `Arc` under a brief read lock and run with no
//! lock held, so a concurrent insert or rebuild never blocks them and never
//! exposes a half-built snapshot. Writers are serialized by `writer`.
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info};

use siteqa_core::types::{Candidate, Chunk, Metric};

use crate::error::IndexError;
use crate::snapshot::IndexSnapshot;

pub struct VectorIndex {
    live: RwLock<Option<Arc<IndexSnapshot>>>,
    writer: Mutex<()>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::unloaded()
    }
}

impl VectorIndex {
    /// An index with no snapshot. Searches fail with [`IndexError::Unavailable`]
    /// until one is installed.
    pub fn unloaded() -> Self {
        Self { live: RwLock::new(None), writer: Mutex::new(()) }
    }

    pub fn empty(metric: Metric, dim: usize, embedder_id: impl Into<String>) -> Self {
        Self::from_snapshot(IndexSnapshot::empty(metric, dim, embedder_id))
    }

    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self { live: RwLock::new(Some(Arc::new(snapshot))), writer: Mutex::new(()) }
    }

    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>, IndexError> {
        let guard = self.live.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(Arc::clone).ok_or(IndexError::Unavailable)
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_ok()
    }

    pub fn version(&self) -> Option<u64> {
        self.snapshot().ok().map(|s| s.version())
    }

    pub fn len(&self) -> usize {
        self.snapshot().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version a freshly built snapshot must carry to be installable.
    pub fn next_version(&self) -> u64 {
        self.version().map_or(1, |v| v + 1)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>, IndexError> {
        let snapshot = self.snapshot()?;
        let hits = snapshot.search(query, k)?;
        debug!("Index v{} returned {} of {} requested", snapshot.version(), hits.len(), k);
        Ok(hits)
    }

    pub fn insert(&self, chunk: Chunk, embedding: Vec<f32>) -> Result<u64, IndexError> {
        self.insert_many(vec![(chunk, embedding)])
    }

    /// Add or replace chunks by id, publishing one new snapshot. Returns its version.
    pub fn insert_many(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<u64, IndexError> {
        let _writer = self.lock_writer();
        let current = self.snapshot()?;
        let next = current.with_upserts(current.version() + 1, items)?;
        let (version, len) = (next.version(), next.len());
        self.swap(next);
        debug!("Inserted into index, now v{} with {} chunks", version, len);
        Ok(version)
    }

    /// Build a complete replacement snapshot without touching the live one.
    pub fn build_next(
        &self,
        metric: Metric,
        dim: usize,
        embedder_id: impl Into<String>,
        items: impl IntoIterator<Item = (Chunk, Vec<f32>)>,
    ) -> Result<IndexSnapshot, IndexError> {
        IndexSnapshot::build(self.next_version(), metric, dim, embedder_id, items)
    }

    /// Publish a prebuilt snapshot. Rejected unless its version is newer than
    /// the live one.
    pub fn install(&self, snapshot: IndexSnapshot) -> Result<u64, IndexError> {
        let _writer = self.lock_writer();
        if let Some(live) = self.version() {
            if snapshot.version() <= live {
                return Err(IndexError::StaleSnapshot { offered: snapshot.version(), live });
            }
        }
        let version = snapshot.version();
        let len = snapshot.len();
        self.swap(snapshot);
        info!("Installed index snapshot v{} ({} chunks)", version, len);
        Ok(version)
    }

    /// Replace the whole index content in one swap.
    pub fn rebuild(
        &self,
        metric: Metric,
        dim: usize,
        embedder_id: impl Into<String>,
        items: impl IntoIterator<Item = (Chunk, Vec<f32>)>,
    ) -> Result<u64, IndexError> {
        let _writer = self.lock_writer();
        let mut next = IndexSnapshot::build(0, metric, dim, embedder_id, items)?;
        next.set_version(self.next_version());
        let version = next.version();
        let len = next.len();
        self.swap(next);
        info!("Rebuilt index as v{} ({} chunks)", version, len);
        Ok(version)
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn swap(&self, snapshot: IndexSnapshot) {
        let mut guard = self.live.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(snapshot));
    }
}
