//! Query orchestration.
//!
//! ```text
//! Received -> Classified -> Retrieved -> Reranked -> Gated -> Generated -> Completed
//!                 |                                    |
//!                 +-> Completed (canned)               +-> Fallback -> Completed
//! any step -> Error
//! ```
//!
//! Shared state (caches, sessions) is written only after a stage's awaits have
//! finished, so dropping an in-flight `answer` future leaves it untouched.
//! Cache writes carry the cache generation read when the query started, so a
//! re-index that lands mid-query discards its results.
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use siteqa_core::config::{FallbackMode, Settings};
use siteqa_core::error::{ErrorKind, ModelError};
use siteqa_core::ingest::ChunkRecord;
use siteqa_core::types::{Answer, AnswerError, Candidate, CitedChunk, Intent, QueryContext, Stage, Verdict};
use siteqa_vector::{IndexError, SnapshotStore, VectorIndex};

use crate::cache::{normalize_query, response_key, TtlCache};
use crate::error::IndexingResult;
use crate::gate;
use crate::gateway::{EmbeddingGateway, GenerationGateway};
use crate::indexer::{IndexReport, Indexer, Progress};
use crate::intent::IntentClassifier;
use crate::models::Models;
use crate::prompt;
use crate::rerank::Reranker;
use crate::retriever::{MetadataFilter, Retriever};
use crate::session::{SessionStore, Turn};

pub struct Orchestrator {
    settings: Arc<Settings>,
    classifier: IntentClassifier,
    embedder: EmbeddingGateway,
    retriever: Retriever,
    reranker: Reranker,
    generator: GenerationGateway,
    indexer: Indexer,
    sessions: SessionStore,
    responses: TtlCache<Answer>,
    retrievals: TtlCache<Vec<Candidate>>,
}

/// Why a query ended in `Error`. The detail is logged, never returned.
struct Failure {
    kind: ErrorKind,
    detail: String,
}

impl Failure {
    fn new(kind: ErrorKind, detail: impl ToString) -> Self {
        Self { kind, detail: detail.to_string() }
    }
}

impl Orchestrator {
    /// Build a pipeline over `index`. With a `store`, re-indexing persists each
    /// new snapshot before it goes live.
    pub fn new(settings: Settings, index: Arc<VectorIndex>, store: Option<SnapshotStore>, models: Models) -> Self {
        let settings = Arc::new(settings);
        let embedder = EmbeddingGateway::new(models.embedder, &settings.embedding);
        let cache_ttl = Duration::from_secs(settings.cache.ttl_secs);
        Self {
            classifier: IntentClassifier::new(models.intent, settings.intent.timeout()),
            retriever: Retriever::new(Arc::clone(&index), settings.retrieval.oversample),
            reranker: Reranker::new(models.scorer, settings.rerank.clone()),
            generator: GenerationGateway::new(models.generator, &settings.generation),
            indexer: Indexer::new(index, store, embedder.clone(), &settings),
            embedder,
            sessions: SessionStore::new(
                settings.session.max_turns,
                Duration::from_secs(settings.session.idle_timeout_secs),
            ),
            responses: TtlCache::new(cache_ttl, settings.cache.max_entries),
            retrievals: TtlCache::new(cache_ttl, settings.cache.max_entries),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        self.retriever.index()
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn cached_responses(&self) -> usize {
        self.responses.len()
    }

    /// Answer `query`, optionally within a conversation session.
    ///
    /// Never fails: errors come back as an apology with `error` set. Queries
    /// on the same session are answered one at a time, in arrival order.
    #[instrument(skip(self, query), fields(session = session_id.unwrap_or("-")))]
    pub async fn answer(&self, query: &str, session_id: Option<&str>) -> Answer {
        let mut ctx = QueryContext::new(query, session_id.map(str::to_string));
        if query.trim().is_empty() {
            warn!("Rejected empty query");
            return self.finish_error(
                &mut ctx,
                Failure::new(ErrorKind::InvalidInput, "empty query"),
                &self.settings.responses.invalid_input,
            );
        }
        match session_id {
            Some(id) => {
                let handle = self.sessions.handle(id);
                let mut session = handle.lock().await;
                session.touch();
                let history = session.recent(self.settings.session.history_turns);
                let answer = self.run(&mut ctx, &history).await;
                session.record(query.trim(), answer.response_text.clone());
                answer
            }
            None => self.run(&mut ctx, &[]).await,
        }
    }

    async fn run(&self, ctx: &mut QueryContext, history: &[Turn]) -> Answer {
        let (response_generation, retrieval_generation) = (self.responses.generation(), self.retrievals.generation());
        let normalized = normalize_query(&ctx.query);
        let response_key = response_key(&normalized, ctx.session_id.as_deref(), self.settings.cache.scope_by_session);
        if self.settings.cache.enabled {
            if let Some(mut hit) = self.responses.get(&response_key) {
                debug!("Response cache hit");
                ctx.advance(Stage::Completed);
                hit.cached = true;
                hit.latency_ms = ctx.elapsed().as_millis() as u64;
                return hit;
            }
        }

        let intent = self.classifier.classify(&ctx.query).await;
        ctx.intent = Some(intent);
        ctx.advance(Stage::Classified);
        if !intent.needs_retrieval() {
            let responses = &self.settings.responses;
            let text = if intent == Intent::Greeting { &responses.greeting } else { &responses.out_of_scope };
            return self.finish_canned(ctx, text);
        }

        let filter = match (intent, &self.settings.intent.contact_category) {
            (Intent::Contact, Some(category)) => MetadataFilter::category(category.clone()),
            _ => MetadataFilter::default(),
        };
        let retrieval_key = format!("{intent:?}\u{1f}{normalized}");
        let candidates = match self.retrieve(&ctx.query, &filter).await {
            Ok(candidates) => {
                if self.settings.cache.enabled {
                    self.retrievals.insert_for(retrieval_generation, retrieval_key, candidates.clone());
                }
                candidates
            }
            Err(failure) => match self.retrievals.get(&retrieval_key).filter(|_| self.settings.cache.enabled) {
                Some(cached) => {
                    warn!("Retrieval failed ({}); serving cached retrieval", failure.detail);
                    cached
                }
                None => return self.finish_error(ctx, failure, &self.settings.responses.apology),
            },
        };
        ctx.advance(Stage::Retrieved);
        debug!("Retrieved {} candidates", candidates.len());

        let outcome = self.reranker.rerank(&ctx.query, candidates).await;
        ctx.rerank_failures = outcome.failures;
        ctx.advance(Stage::Reranked);

        let (kept, verdict) = gate::accept(outcome.ranked, self.settings.gate.threshold);
        ctx.candidates = kept;
        ctx.verdict = Some(verdict);
        ctx.advance(Stage::Gated);
        debug!("Gate kept {} candidates: {:?}", ctx.candidates.len(), verdict);

        match verdict {
            Verdict::Ok => {
                let answer = self.generate_grounded(ctx, history).await;
                if self.settings.cache.enabled
                    && !answer.is_error()
                    && answer.grounded
                    && !self.responses.insert_for(response_generation, response_key, answer.clone())
                {
                    debug!("Index changed while answering; answer not cached");
                }
                answer
            }
            Verdict::InsufficientContext => self.fallback(ctx, history).await,
        }
    }

    async fn retrieve(&self, query: &str, filter: &MetadataFilter) -> Result<Vec<Candidate>, Failure> {
        let embedding = self
            .with_retry("embedding", || self.embedder.embed(query))
            .await
            .map_err(|e| Failure::new(ErrorKind::RetrievalFailed, e))?;
        let (retriever, filter, k) = (self.retriever.clone(), filter.clone(), self.settings.retrieval.candidate_k);
        tokio::task::spawn_blocking(move || retriever.retrieve(&embedding, k, &filter))
            .await
            .map_err(|e| Failure::new(ErrorKind::RetrievalFailed, format!("search task failed: {e}")))?
            .map_err(|e| match e {
                IndexError::Unavailable => Failure::new(ErrorKind::IndexUnavailable, e),
                other => Failure::new(ErrorKind::RetrievalFailed, other),
            })
    }

    async fn generate_grounded(&self, ctx: &mut QueryContext, history: &[Turn]) -> Answer {
        let limit = self.settings.generation.max_input_chars;
        let built = prompt::grounded(&self.settings.prompt, limit, &ctx.query, history, &ctx.candidates);
        match self.with_retry("generation", || self.generator.generate(&built.text)).await {
            Ok(text) => {
                ctx.advance(Stage::Generated);
                let cited: Vec<CitedChunk> = ctx.candidates[..built.sources_used].iter().map(CitedChunk::from).collect();
                self.finish(ctx, text, cited, true)
            }
            Err(e) => self.finish_error(ctx, Failure::new(ErrorKind::GenerationFailed, e), &self.settings.responses.apology),
        }
    }

    async fn fallback(&self, ctx: &mut QueryContext, history: &[Turn]) -> Answer {
        ctx.advance(Stage::Fallback);
        let responses = &self.settings.responses;
        match self.settings.fallback.mode {
            FallbackMode::Canned => self.finish(ctx, responses.insufficient_context.clone(), Vec::new(), false),
            FallbackMode::Generate => {
                let limit = self.settings.generation.max_input_chars;
                let text = prompt::ungrounded(&self.settings.prompt, limit, &ctx.query, history);
                match self.with_retry("generation", || self.generator.generate(&text)).await {
                    Ok(generated) => {
                        ctx.advance(Stage::Generated);
                        let text = format!("{}\n\n{}", generated, responses.ungrounded_notice);
                        self.finish(ctx, text, Vec::new(), false)
                    }
                    Err(e) => self.finish_error(ctx, Failure::new(ErrorKind::GenerationFailed, e), &responses.apology),
                }
            }
        }
    }

    /// Run `call`, retrying retryable failures up to `retry.max_attempts` in
    /// total with linear backoff.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!("{} attempt {}/{} failed: {}", what, attempt, max_attempts, e);
                    tokio::time::sleep(Duration::from_millis(self.settings.retry.backoff_ms * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn finish_canned(&self, ctx: &mut QueryContext, text: &str) -> Answer {
        debug!("Answering {:?} with canned text", ctx.intent);
        self.finish(ctx, text.to_string(), Vec::new(), false)
    }

    fn finish(&self, ctx: &mut QueryContext, response_text: String, cited_chunks: Vec<CitedChunk>, grounded: bool) -> Answer {
        ctx.advance(Stage::Completed);
        let answer = Answer {
            response_text,
            cited_chunks,
            verdict: ctx.verdict,
            intent: ctx.intent,
            grounded,
            cached: false,
            rerank_failures: ctx.rerank_failures,
            latency_ms: ctx.elapsed().as_millis() as u64,
            error: None,
        };
        info!(
            intent = ?answer.intent,
            verdict = ?answer.verdict,
            grounded = answer.grounded,
            citations = answer.cited_chunks.len(),
            latency_ms = answer.latency_ms,
            "Query completed"
        );
        log_timings(ctx);
        answer
    }

    fn finish_error(&self, ctx: &mut QueryContext, failure: Failure, response_text: &str) -> Answer {
        let failed_at = ctx.stage;
        ctx.advance(Stage::Error);
        match failure.kind {
            ErrorKind::InvalidInput => warn!("Query rejected: {}", failure.detail),
            kind => error!("Query failed after {:?} with {}: {}", failed_at, kind, failure.detail),
        }
        log_timings(ctx);
        Answer {
            response_text: response_text.to_string(),
            cited_chunks: Vec::new(),
            verdict: ctx.verdict,
            intent: ctx.intent,
            grounded: false,
            cached: false,
            rerank_failures: ctx.rerank_failures,
            latency_ms: ctx.elapsed().as_millis() as u64,
            error: Some(AnswerError { error_kind: failure.kind, message: user_message(failure.kind).to_string() }),
        }
    }

    /// Add or replace chunks, then drop cached answers and retrievals.
    pub async fn ingest(&self, records: Vec<ChunkRecord>, progress: Option<Progress<'_>>) -> IndexingResult<IndexReport> {
        let report = self.indexer.ingest(records, progress).await?;
        self.invalidate_caches();
        Ok(report)
    }

    /// Replace the whole index, then drop cached answers and retrievals.
    pub async fn rebuild(&self, records: Vec<ChunkRecord>, progress: Option<Progress<'_>>) -> IndexingResult<IndexReport> {
        let report = self.indexer.rebuild(records, progress).await?;
        self.invalidate_caches();
        Ok(report)
    }

    pub fn invalidate_caches(&self) {
        self.responses.clear();
        self.retrievals.clear();
        debug!("Caches cleared");
    }

    pub fn evict_idle(&self) -> usize {
        self.sessions.evict_idle()
    }

    /// Evict idle sessions every `every` until the orchestrator is dropped.
    pub fn spawn_session_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(orchestrator) = weak.upgrade() else { break };
                orchestrator.evict_idle();
            }
        })
    }
}

fn log_timings(ctx: &QueryContext) {
    let stages: Vec<String> =
        ctx.timings.iter().map(|t| format!("{:?}={}ms", t.stage, t.elapsed.as_millis())).collect();
    debug!(stages = %stages.join(" "), "Stage timings");
}

fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "the query was empty",
        ErrorKind::RetrievalFailed => "search is temporarily unavailable",
        ErrorKind::RerankFailed => "ranking is temporarily unavailable",
        ErrorKind::GenerationFailed => "answer generation is temporarily unavailable",
        ErrorKind::IndexUnavailable => "the search index is not loaded yet",
    }
}
