//! Turns chunk records into index snapshots.
//!
//! Writes are serialized: one ingest or rebuild at a time builds its snapshot
//! off to the side, persists it (when a store is configured) and only then
//! installs it, so searches never see an unpersisted version.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use siteqa_core::config::Settings;
use siteqa_core::ingest::ChunkRecord;
use siteqa_core::types::{Chunk, Metric};
use siteqa_vector::{content_hash, Expected, IndexSnapshot, SnapshotStore, StoreResult, VectorIndex};

use crate::error::{IndexingError, IndexingResult};
use crate::gateway::EmbeddingGateway;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub version: u64,
    pub chunks: usize,
    /// Chunks sent to the embedding model.
    pub embedded: usize,
    /// Chunks whose vectors were reused from the live snapshot.
    pub reused: usize,
    /// Records skipped for having no text.
    pub skipped: usize,
}

pub type Progress<'a> = &'a (dyn Fn(usize) + Send + Sync);

pub struct Indexer {
    index: Arc<VectorIndex>,
    store: Option<SnapshotStore>,
    embedder: EmbeddingGateway,
    metric: Metric,
    dim: usize,
    batch_size: usize,
    write_lock: Mutex<()>,
}

impl Indexer {
    pub fn new(index: Arc<VectorIndex>, store: Option<SnapshotStore>, embedder: EmbeddingGateway, settings: &Settings) -> Self {
        Self {
            index,
            store,
            embedder,
            metric: settings.index.metric,
            dim: settings.index.dimension,
            batch_size: settings.embedding.batch_size.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }

    /// Add or replace `records` on top of the live snapshot.
    ///
    /// Fails with [`IndexingError::EmbedderChanged`] when the live snapshot
    /// holds vectors from another embedder; those need a [`rebuild`].
    ///
    /// [`rebuild`]: Indexer::rebuild
    pub async fn ingest(&self, records: Vec<ChunkRecord>, progress: Option<Progress<'_>>) -> IndexingResult<IndexReport> {
        let _guard = self.write_lock.lock().await;
        let live = self.index.snapshot().ok();
        if let Some(live) = live.as_deref().filter(|s| !s.is_empty()) {
            if live.embedder_id() != self.embedder.model_id() {
                warn!("Refusing to ingest into v{} built by {}", live.version(), live.embedder_id());
                return Err(IndexingError::EmbedderChanged {
                    live: live.embedder_id().to_string(),
                    configured: self.embedder.model_id().to_string(),
                });
            }
        }
        let (items, mut report) = self.embed_records(records, live.as_deref(), progress).await?;
        let version = self.index.next_version();
        let next = match live.as_deref() {
            Some(live) if !live.is_empty() => live.with_upserts(version, items)?,
            _ => IndexSnapshot::build(version, self.metric, self.dim, self.embedder.model_id(), items)?,
        };
        report.chunks = next.len();
        self.publish(next, &mut report).await?;
        Ok(report)
    }

    /// Replace the whole index with `records`.
    pub async fn rebuild(&self, records: Vec<ChunkRecord>, progress: Option<Progress<'_>>) -> IndexingResult<IndexReport> {
        let _guard = self.write_lock.lock().await;
        let live = self.index.snapshot().ok();
        let (items, mut report) = self.embed_records(records, live.as_deref(), progress).await?;
        let next = self.index.build_next(self.metric, self.dim, self.embedder.model_id(), items)?;
        report.chunks = next.len();
        self.publish(next, &mut report).await?;
        Ok(report)
    }

    async fn publish(&self, next: IndexSnapshot, report: &mut IndexReport) -> IndexingResult<()> {
        if let Some(store) = &self.store {
            store.save(&next).await?;
        }
        report.version = self.index.install(next)?;
        info!(
            "Index v{} live: {} chunks ({} embedded, {} reused, {} skipped)",
            report.version, report.chunks, report.embedded, report.reused, report.skipped
        );
        Ok(())
    }

    /// Embed records in batches, reusing vectors (and creation times) of
    /// chunks whose text is unchanged in `live`.
    async fn embed_records(
        &self,
        records: Vec<ChunkRecord>,
        live: Option<&IndexSnapshot>,
        progress: Option<Progress<'_>>,
    ) -> IndexingResult<(Vec<(Chunk, Vec<f32>)>, IndexReport)> {
        let mut report = IndexReport::default();
        let reusable: HashMap<String, Arc<[f32]>> = match live {
            Some(s) if s.embedder_id() == self.embedder.model_id() && s.dim() == self.dim => s.vectors_by_content_hash(),
            _ => HashMap::new(),
        };

        let mut items = Vec::with_capacity(records.len());
        let mut to_embed: Vec<Chunk> = Vec::new();
        for record in records {
            if record.text.trim().is_empty() {
                report.skipped += 1;
                continue;
            }
            let mut chunk = record.into_chunk();
            if let Some(previous) = live.and_then(|s| s.get(&chunk.id)).filter(|e| e.chunk.text == chunk.text) {
                chunk.created_at = previous.chunk.created_at;
            }
            match reusable.get(&content_hash(&chunk.text)) {
                Some(vector) => {
                    items.push((chunk, vector.to_vec()));
                    report.reused += 1;
                }
                None => to_embed.push(chunk),
            }
        }
        if let Some(report_progress) = progress {
            report_progress(report.reused + report.skipped);
        }

        for batch in to_embed.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            items.extend(batch.iter().cloned().zip(vectors));
            report.embedded += batch.len();
            debug!("Embedded {}/{} chunks", report.embedded, to_embed.len());
            if let Some(report_progress) = progress {
                report_progress(batch.len());
            }
        }
        Ok((items, report))
    }
}

/// Open the persisted index under `settings.index.dir`.
///
/// With no snapshot on disk the index starts empty. A snapshot that cannot be
/// read, or that was built with a different metric, dimension or embedder, is
/// an error.
pub async fn open_index(settings: &Settings, embedder_id: &str) -> StoreResult<(Arc<VectorIndex>, SnapshotStore)> {
    let store = SnapshotStore::new(settings.index_dir(), settings.index.keep_versions);
    let expected = Expected { metric: settings.index.metric, dimension: settings.index.dimension, embedder_id };
    let index = match store.load_current(&expected).await? {
        Some(snapshot) => VectorIndex::from_snapshot(snapshot),
        None => {
            info!("No index snapshot under {}; starting empty", store.root().display());
            VectorIndex::empty(settings.index.metric, settings.index.dimension, embedder_id)
        }
    };
    Ok((Arc::new(index), store))
}
