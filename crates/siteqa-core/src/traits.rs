//! Model capabilities consumed by the pipeline.
//!
//! Every capability is a single synchronous call with a fixed failure type.
//! Gateways in `siteqa-pipeline` add input validation and timeouts around them,
//! so implementations may block and need not guard their own latency.

use crate::error::ModelError;
use crate::types::Intent;

pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `hash:d384`, `bge-m3:d1024`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Cross-encoder style scorer over `(query, passage)` pairs.
///
/// Returns one entry per passage. `None` marks a pair the model failed to score;
/// an `Err` fails the whole batch.
pub trait RelevanceScorer: Send + Sync {
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<Option<f32>>, ModelError>;
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

pub trait IntentModel: Send + Sync {
    fn classify(&self, query: &str) -> Result<Intent, ModelError>;
}
