#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use siteqa_core::config::{FallbackMode, Settings};
use siteqa_core::error::ModelError;
use siteqa_core::ingest::ChunkRecord;
use siteqa_core::traits::{Embedder, RelevanceScorer, TextGenerator};
use siteqa_core::types::{Candidate, Chunk};
use siteqa_pipeline::models::{ExtractiveGenerator, LexicalScorer};
use siteqa_pipeline::{KeywordIntentModel, Models};

pub const DIM: usize = 2;
pub const QUERY: &str = "Do you build mobile apps?";
pub const C1: &str = "We build mobile apps";
pub const C2: &str = "Unrelated cooking recipe";

/// Embedder with fixed vectors per text; unknown texts embed to zero.
/// Counts texts embedded and can be switched to fail.
pub struct ScriptedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    pub texts_embedded: AtomicUsize,
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl ScriptedEmbedder {
    pub fn new(pairs: &[(&str, [f32; DIM])]) -> Self {
        Self {
            vectors: pairs.iter().map(|(t, v)| (t.to_string(), v.to_vec())).collect(),
            texts_embedded: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// `QUERY` has cosine 0.9 with `C1` and ~0.44 with `C2`.
    pub fn mobile_apps() -> Self {
        let off_axis = (1.0f32 - 0.81).sqrt();
        Self::new(&[(QUERY, [0.9, off_axis]), (C1, [1.0, 0.0]), (C2, [0.0, 1.0])])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for ScriptedEmbedder {
    fn id(&self) -> &str {
        "scripted"
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ModelError::Unavailable("embedder down".to_string()));
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| vec![0.0; DIM])).collect())
    }
}

/// Lexical scorer that counts batches.
#[derive(Default)]
pub struct CountingScorer {
    inner: LexicalScorer,
    pub calls: AtomicUsize,
}

impl RelevanceScorer for CountingScorer {
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<Option<f32>>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.score_batch(query, passages)
    }
}

/// The question line that ends every prompt.
pub fn asked(prompt_text: &str) -> &str {
    prompt_text.rsplit_once("Question: ").and_then(|(_, rest)| rest.lines().next()).unwrap_or_default().trim()
}

/// Keeps every prompt it receives and answers from the first source.
#[derive(Default)]
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<String>>,
}

impl TextGenerator for RecordingGenerator {
    fn generate(&self, prompt_text: &str) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt_text.to_string());
        Ok("We do [1]".to_string())
    }
}

/// Echoes the question after a delay: long for questions containing "slow".
pub struct SlowGenerator {
    pub slow: Duration,
    pub fast: Duration,
}

impl TextGenerator for SlowGenerator {
    fn generate(&self, prompt_text: &str) -> Result<String, ModelError> {
        let question = asked(prompt_text).to_string();
        std::thread::sleep(if question.contains("slow") { self.slow } else { self.fast });
        Ok(format!("echo: {question}"))
    }
}

/// Always unavailable; counts attempts.
#[derive(Default)]
pub struct FailingGenerator {
    pub attempts: AtomicUsize,
}

impl TextGenerator for FailingGenerator {
    fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ModelError::Unavailable("connection refused to 10.0.0.7:11434".to_string()))
    }
}

pub fn settings() -> Settings {
    let mut s = Settings::default();
    s.index.dimension = DIM;
    s.gate.threshold = 0.5;
    s.retry.backoff_ms = 1;
    s.fallback.mode = FallbackMode::Canned;
    s.validate().expect("test settings are valid");
    s
}

pub fn models(embedder: Arc<ScriptedEmbedder>, scorer: Arc<CountingScorer>, generator: Arc<dyn TextGenerator>) -> Models {
    Models { embedder, scorer, generator, intent: Arc::new(KeywordIntentModel::new()) }
}

pub fn extractive() -> Arc<dyn TextGenerator> {
    Arc::new(ExtractiveGenerator::new("nothing relevant"))
}

pub fn record(id: &str, text: &str) -> ChunkRecord {
    let mut r = ChunkRecord::new(id, text);
    r.source_url = format!("https://example.com/{id}");
    r.title = format!("Page {id}");
    r
}

pub fn candidate(id: &str, text: &str, similarity: f32) -> Candidate {
    let chunk = Chunk {
        id: id.to_string(),
        text: text.to_string(),
        source_url: format!("https://example.com/{id}"),
        title: id.to_string(),
        category: "General".to_string(),
        tags: vec![],
        topic: None,
        language: None,
        created_at: Utc::now(),
    };
    Candidate { chunk: Arc::new(chunk), similarity }
}

/// Shared completion log for ordering tests.
#[derive(Clone, Default)]
pub struct Log(pub Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, s: &str) {
        self.0.lock().unwrap().push(s.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
