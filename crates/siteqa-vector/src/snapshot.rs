//! Immutable index snapshots and exact nearest-neighbour search over them.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use siteqa_core::types::{Candidate, Chunk, Metric};

use crate::error::IndexError;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Arc<Chunk>,
    pub vector: Arc<[f32]>,
    norm: f32,
}

impl IndexEntry {
    fn new(chunk: Arc<Chunk>, vector: Arc<[f32]>) -> Self {
        let norm = l2_norm(&vector);
        Self { chunk, vector, norm }
    }
}

/// One consistent, never-mutated view of the index.
///
/// Entries are kept sorted by chunk id so that two snapshots built from the
/// same input are identical regardless of insertion order.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    version: u64,
    metric: Metric,
    dim: usize,
    embedder_id: String,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl IndexSnapshot {
    pub fn empty(metric: Metric, dim: usize, embedder_id: impl Into<String>) -> Self {
        Self { version: 0, metric, dim, embedder_id: embedder_id.into(), entries: Vec::new(), positions: HashMap::new() }
    }

    /// Build a snapshot from `(chunk, embedding)` pairs. Later duplicates of an
    /// id replace earlier ones.
    pub fn build(
        version: u64,
        metric: Metric,
        dim: usize,
        embedder_id: impl Into<String>,
        items: impl IntoIterator<Item = (Chunk, Vec<f32>)>,
    ) -> Result<Self, IndexError> {
        let mut by_id: HashMap<String, IndexEntry> = HashMap::new();
        for (chunk, vector) in items {
            validate_vector(&chunk.id, &vector, dim)?;
            by_id.insert(chunk.id.clone(), IndexEntry::new(Arc::new(chunk), Arc::from(vector)));
        }
        Ok(Self::from_entries(version, metric, dim, embedder_id.into(), by_id.into_values().collect()))
    }

    fn from_entries(version: u64, metric: Metric, dim: usize, embedder_id: String, mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
        let positions = entries.iter().enumerate().map(|(i, e)| (e.chunk.id.clone(), i)).collect();
        Self { version, metric, dim, embedder_id, entries, positions }
    }

    /// A copy of this snapshot with `items` added or replaced, at `version`.
    /// Unchanged entries share their chunk and vector allocations.
    pub fn with_upserts(&self, version: u64, items: Vec<(Chunk, Vec<f32>)>) -> Result<Self, IndexError> {
        for (chunk, vector) in &items {
            validate_vector(&chunk.id, vector, self.dim)?;
        }
        let mut entries = self.entries.clone();
        let mut positions = self.positions.clone();
        for (chunk, vector) in items {
            let entry = IndexEntry::new(Arc::new(chunk), Arc::from(vector));
            match positions.get(&entry.chunk.id) {
                Some(&i) => entries[i] = entry,
                None => {
                    positions.insert(entry.chunk.id.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }
        Ok(Self::from_entries(version, self.metric, self.dim, self.embedder_id.clone(), entries))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Vectors keyed by blake3 hash of chunk text, for reuse when re-indexing
    /// with the same embedder.
    pub fn vectors_by_content_hash(&self) -> HashMap<String, Arc<[f32]>> {
        self.entries.iter().map(|e| (content_hash(&e.chunk.text), Arc::clone(&e.vector))).collect()
    }

    /// Up to `k` chunks ordered by descending similarity, ties by id ascending.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch { expected: self.dim, got: query.len() });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFinite("<query>".to_string()));
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let query_norm = l2_norm(query);
        let mut scored: Vec<(f32, usize)> =
            self.entries.iter().enumerate().map(|(i, e)| (self.similarity(query, query_norm, e), i)).collect();
        let order = |a: &(f32, usize), b: &(f32, usize)| -> Ordering {
            b.0.total_cmp(&a.0).then_with(|| self.entries[a.1].chunk.id.cmp(&self.entries[b.1].chunk.id))
        };
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, order);
            scored.truncate(k);
        }
        scored.sort_by(order);
        Ok(scored
            .into_iter()
            .map(|(similarity, i)| Candidate { chunk: Arc::clone(&self.entries[i].chunk), similarity })
            .collect())
    }

    fn similarity(&self, query: &[f32], query_norm: f32, entry: &IndexEntry) -> f32 {
        let dot = dot(query, &entry.vector);
        match self.metric {
            Metric::Dot => dot,
            Metric::Cosine => {
                if query_norm == 0.0 || entry.norm == 0.0 {
                    0.0
                } else {
                    (dot / (query_norm * entry.norm)).clamp(-1.0, 1.0)
                }
            }
        }
    }
}

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn validate_vector(id: &str, vector: &[f32], dim: usize) -> Result<(), IndexError> {
    if vector.len() != dim {
        return Err(IndexError::DimensionMismatch { expected: dim, got: vector.len() });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(IndexError::NonFinite(id.to_string()));
    }
    Ok(())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}
