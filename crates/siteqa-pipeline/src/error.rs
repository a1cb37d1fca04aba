use thiserror::Error;

use siteqa_core::error::ModelError;
use siteqa_vector::{IndexError, StoreError};

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ModelError),

    #[error("index was built by embedder {live}, not {configured}; rebuild it")]
    EmbedderChanged { live: String, configured: String },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type IndexingResult<T> = std::result::Result<T, IndexingError>;
