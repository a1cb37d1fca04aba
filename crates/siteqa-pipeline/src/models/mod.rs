//! Concrete capability implementations and their selection from settings.
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use siteqa_core::config::{GenerationProvider, Settings};
use siteqa_core::traits::{Embedder, IntentModel, RelevanceScorer, TextGenerator};

use crate::intent::KeywordIntentModel;

pub mod generator;
pub mod scorer;

pub use generator::{ExtractiveGenerator, OllamaGenerator};
pub use scorer::LexicalScorer;

/// The four capabilities a pipeline needs.
#[derive(Clone)]
pub struct Models {
    pub embedder: Arc<dyn Embedder>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub generator: Arc<dyn TextGenerator>,
    pub intent: Arc<dyn IntentModel>,
}

impl Models {
    /// Models selected by configuration. Loading a local embedding model can
    /// take a while and fails if its files are missing.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let embedder: Arc<dyn Embedder> =
            Arc::from(siteqa_embed::default_embedder(&settings.embedding, settings.index.dimension)?);
        let generator: Arc<dyn TextGenerator> = match settings.generation.provider {
            GenerationProvider::Extractive => {
                Arc::new(ExtractiveGenerator::new(settings.responses.insufficient_context.clone()))
            }
            GenerationProvider::Ollama => Arc::new(OllamaGenerator::new(&settings.generation)),
        };
        info!(
            "Models: embedder={}, scorer=lexical, generator={:?}, intent=keywords",
            embedder.id(),
            settings.generation.provider
        );
        Ok(Self { embedder, scorer: Arc::new(LexicalScorer::new()), generator, intent: Arc::new(KeywordIntentModel::new()) })
    }
}
