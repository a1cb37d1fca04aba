//! Domain types shared by the index, the pipeline stages and the query surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

pub type ChunkId = String;

/// An immutable, independently retrievable unit of indexed website content.
///
/// - `id`: stable chunk identifier, unique within an index snapshot
/// - `source_url`/`title`: the page the text was cut from
/// - `category`/`tags`: preprocessor facets, usable as retrieval filters
/// - `topic`/`language`: optional preprocessor annotations
/// - `created_at`: when the chunk entered the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub source_url: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Similarity metric fixed when an index is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieval hit. Holds the chunk from the snapshot that served the search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Arc<Chunk>,
    pub similarity: f32,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub rerank_score: f32,
}

impl RankedCandidate {
    pub fn id(&self) -> &str {
        self.candidate.id()
    }

    pub fn chunk(&self) -> &Chunk {
        &self.candidate.chunk
    }

    pub fn similarity(&self) -> f32 {
        self.candidate.similarity
    }
}

/// Total order over ranked candidates: re-rank score descending, then
/// similarity descending, then chunk id ascending.
pub fn rank_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.rerank_score
        .total_cmp(&a.rerank_score)
        .then_with(|| b.similarity().total_cmp(&a.similarity()))
        .then_with(|| a.id().cmp(b.id()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Informational,
    Contact,
    Greeting,
    OutOfScope,
}

impl Intent {
    /// Whether this intent is answered by the retrieval branch.
    pub fn needs_retrieval(self) -> bool {
        matches!(self, Intent::Informational | Intent::Contact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ok,
    InsufficientContext,
}

/// Orchestrator states for a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Classified,
    Retrieved,
    Reranked,
    Gated,
    Generated,
    Fallback,
    Completed,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed: Duration,
}

/// Per-request aggregate handed from stage to stage.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: String,
    pub session_id: Option<String>,
    pub intent: Option<Intent>,
    pub candidates: Vec<RankedCandidate>,
    pub verdict: Option<Verdict>,
    pub rerank_failures: usize,
    pub stage: Stage,
    pub timings: Vec<StageTiming>,
    started: Instant,
    last_mark: Instant,
}

impl QueryContext {
    pub fn new(query: impl Into<String>, session_id: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            query: query.into(),
            session_id,
            intent: None,
            candidates: Vec::new(),
            verdict: None,
            rerank_failures: 0,
            stage: Stage::Received,
            timings: Vec::new(),
            started: now,
            last_mark: now,
        }
    }

    /// Move to `stage`, recording the time spent since the previous transition.
    pub fn advance(&mut self, stage: Stage) {
        debug_assert!(!self.stage.is_terminal(), "query already ended in {:?}", self.stage);
        let now = Instant::now();
        self.timings.push(StageTiming { stage, elapsed: now - self.last_mark });
        self.last_mark = now;
        self.stage = stage;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedChunk {
    pub id: ChunkId,
    pub source_url: String,
    pub title: String,
    pub score: f32,
}

impl From<&RankedCandidate> for CitedChunk {
    fn from(rc: &RankedCandidate) -> Self {
        Self {
            id: rc.id().to_string(),
            source_url: rc.chunk().source_url.clone(),
            title: rc.chunk().title.clone(),
            score: rc.rerank_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerError {
    pub error_kind: ErrorKind,
    pub message: String,
}

/// What the query surface hands back. Never carries a raw model error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub response_text: String,
    pub cited_chunks: Vec<CitedChunk>,
    pub verdict: Option<Verdict>,
    pub intent: Option<Intent>,
    /// False whenever the text was produced without retrieved context.
    pub grounded: bool,
    pub cached: bool,
    pub rerank_failures: usize,
    pub latency_ms: u64,
    pub error: Option<AnswerError>,
}

impl Answer {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
