use std::sync::Arc;

use tracing::debug;

use siteqa_core::types::{Candidate, Chunk};
use siteqa_vector::{IndexError, VectorIndex};

/// Metadata constraints on retrieved chunks. Matching is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MetadataFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub language: Option<String>,
}

impl MetadataFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self { category: Some(category.into()), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.tag.is_none() && self.language.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        let eq = |want: &Option<String>, have: &str| want.as_ref().map_or(true, |w| w.eq_ignore_ascii_case(have));
        eq(&self.category, &chunk.category)
            && self.tag.as_ref().map_or(true, |t| chunk.tags.iter().any(|have| have.eq_ignore_ascii_case(t)))
            && self
                .language
                .as_ref()
                .map_or(true, |l| chunk.language.as_deref().is_some_and(|have| have.eq_ignore_ascii_case(l)))
    }
}

#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    oversample: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, oversample: usize) -> Self {
        Self { index, oversample: oversample.max(1) }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Up to `k` candidates in index order. With an active filter the index is
    /// asked for `k * oversample` hits, which are filtered without re-sorting.
    pub fn retrieve(&self, query_embedding: &[f32], k: usize, filter: &MetadataFilter) -> Result<Vec<Candidate>, IndexError> {
        if filter.is_empty() {
            return self.index.search(query_embedding, k);
        }
        let fetch = k.saturating_mul(self.oversample);
        let mut hits = self.index.search(query_embedding, fetch)?;
        let fetched = hits.len();
        hits.retain(|c| filter.matches(&c.chunk));
        hits.truncate(k);
        debug!("Filter kept {} of {} over-fetched candidates", hits.len(), fetched);
        Ok(hits)
    }
}
