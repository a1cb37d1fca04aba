//! Embedding models behind the `siteqa_core::traits::Embedder` capability.
//!
//! - [`HashEmbedder`]: deterministic feature hashing, no model files needed.
//!   Texts sharing vocabulary land close together, which is enough for offline
//!   use and for tests.
//! - [`BgeEmbedder`]: BGE-M3 run locally with candle.
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use siteqa_core::config::{expand_path, EmbeddingProvider, EmbeddingSettings};
use siteqa_core::traits::Embedder;

pub mod bge;
pub mod hash;
pub mod pool;

pub use bge::{BgeEmbedder, BGE_M3_DIM};
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;

/// Build the embedder selected by configuration.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hash embedder regardless of the
/// configured provider, for fast deterministic runs.
pub fn default_embedder(settings: &EmbeddingSettings, dim: usize) -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake || settings.provider == EmbeddingProvider::Hash {
        debug!("Using hash embedder (d={})", dim);
        return Ok(Box::new(HashEmbedder::new(dim)));
    }
    if dim != BGE_M3_DIM {
        return Err(anyhow!("index.dimension is {dim} but BGE-M3 produces {BGE_M3_DIM}-d vectors"));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Box::new(BgeEmbedder::load(&dir)?))
}

/// Configured directory, then `APP_MODEL_DIR`, then `./models/bge-m3`.
fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        let p = expand_path(dir);
        if p.exists() {
            return Ok(p);
        }
        warn!("Configured model dir {} does not exist", p.display());
    }
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Ok(p);
        }
    }
    let fallback = Path::new("models/bge-m3");
    if fallback.exists() {
        return Ok(fallback.to_path_buf());
    }
    Err(anyhow!("Could not locate the BGE-M3 model directory (set embedding.model_dir or APP_MODEL_DIR)"))
}
