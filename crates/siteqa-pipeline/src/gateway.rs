//! Bounded-latency wrappers around the synchronous model capabilities.
//!
//! Each call validates its input, runs the model on the blocking pool under a
//! timeout and reports failures as [`ModelError`]. Gateways never retry.
//! If the caller stops waiting, the blocking call runs to completion in the
//! background and its result is dropped.
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use siteqa_core::config::{EmbeddingSettings, GenerationSettings};
use siteqa_core::error::ModelError;
use siteqa_core::traits::{Embedder, TextGenerator};

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn prepare(text: &str, max_chars: usize) -> Result<String, ModelError> {
    if text.trim().is_empty() {
        return Err(ModelError::InvalidInput("empty text".to_string()));
    }
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        debug!("Truncated model input from {} to {} bytes", text.len(), cut.len());
    }
    Ok(cut.to_string())
}

/// Run `call` on the blocking pool, giving up after `timeout`.
pub(crate) async fn call_blocking<T, F>(timeout: Duration, call: F) -> Result<T, ModelError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ModelError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ModelError::Unavailable(format!("model task aborted: {join_err}"))),
        Err(_) => Err(ModelError::Timeout(timeout)),
    }
}

#[derive(Clone)]
pub struct EmbeddingGateway {
    embedder: Arc<dyn Embedder>,
    max_input_chars: usize,
    timeout: Duration,
}

impl EmbeddingGateway {
    pub fn new(embedder: Arc<dyn Embedder>, settings: &EmbeddingSettings) -> Self {
        Self { embedder, max_input_chars: settings.max_input_chars, timeout: settings.timeout() }
    }

    pub fn model_id(&self) -> &str {
        self.embedder.id()
    }

    pub fn dim(&self) -> usize {
        self.embedder.dim()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ModelError::Unavailable("embedder returned no vector".to_string()))
    }

    /// Embed `texts` in one model call. Output is checked for count,
    /// dimensionality and finiteness.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let inputs = texts.iter().map(|t| prepare(t, self.max_input_chars)).collect::<Result<Vec<_>, _>>()?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let expected = inputs.len();
        let embedder = Arc::clone(&self.embedder);
        let vectors = call_blocking(self.timeout, move || embedder.embed_batch(&inputs)).await?;
        if vectors.len() != expected {
            return Err(ModelError::Unavailable(format!("embedder returned {} vectors for {} inputs", vectors.len(), expected)));
        }
        let dim = self.embedder.dim();
        for v in &vectors {
            if v.len() != dim {
                return Err(ModelError::Unavailable(format!("embedder returned {} dims, expected {}", v.len(), dim)));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(ModelError::Unavailable("embedder returned non-finite values".to_string()));
            }
        }
        Ok(vectors)
    }
}

#[derive(Clone)]
pub struct GenerationGateway {
    generator: Arc<dyn TextGenerator>,
    max_input_chars: usize,
    timeout: Duration,
}

impl GenerationGateway {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: &GenerationSettings) -> Self {
        Self { generator, max_input_chars: settings.max_input_chars, timeout: settings.timeout() }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let prompt = prepare(prompt, self.max_input_chars)?;
        let generator = Arc::clone(&self.generator);
        let text = call_blocking(self.timeout, move || generator.generate(&prompt)).await?;
        if text.trim().is_empty() {
            return Err(ModelError::Unavailable("generator returned empty text".to_string()));
        }
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn blank_input_is_rejected() {
        assert!(matches!(prepare("   \n", 10), Err(ModelError::InvalidInput(_))));
        assert_eq!(prepare("abcdef", 3).unwrap(), "abc");
    }
}
