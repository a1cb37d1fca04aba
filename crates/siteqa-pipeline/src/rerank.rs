//! Second-pass relevance scoring of retrieved candidates.
use std::sync::Arc;

use tracing::{debug, warn};

use siteqa_core::config::RerankSettings;
use siteqa_core::traits::RelevanceScorer;
use siteqa_core::types::{rank_order, Candidate, RankedCandidate};

use crate::gateway::call_blocking;

#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    pub ranked: Vec<RankedCandidate>,
    /// Candidates dropped because they could not be scored.
    pub failures: usize,
}

#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    settings: RerankSettings,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, settings: RerankSettings) -> Self {
        Self { scorer, settings }
    }

    /// Score every candidate against `query`, drop the ones that fail, and
    /// return the best `top_k` in rank order.
    ///
    /// Candidates go to the scorer in sequential batches of `batch_size`. A
    /// batch that errors or times out loses all of its candidates; a missing,
    /// non-finite or out-of-range score loses just that one.
    pub async fn rerank(&self, query: &str, candidates: Vec<Candidate>) -> RerankOutcome {
        let mut outcome = RerankOutcome { ranked: Vec::with_capacity(candidates.len()), failures: 0 };
        let batch_size = self.settings.batch_size.max(1);
        let mut pending = candidates.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<Candidate> = pending.by_ref().take(batch_size).collect();
            self.score_batch(query, batch, &mut outcome).await;
        }
        outcome.ranked.sort_by(rank_order);
        outcome.ranked.truncate(self.settings.top_k);
        if outcome.failures > 0 {
            warn!("Re-ranking dropped {} candidates", outcome.failures);
        }
        outcome
    }

    async fn score_batch(&self, query: &str, batch: Vec<Candidate>, outcome: &mut RerankOutcome) {
        let passages: Vec<String> = batch.iter().map(|c| c.chunk.text.clone()).collect();
        let scorer = Arc::clone(&self.scorer);
        let query = query.to_string();
        let scores = match call_blocking(self.settings.timeout(), move || scorer.score_batch(&query, &passages)).await {
            Ok(scores) if scores.len() == batch.len() => scores,
            Ok(scores) => {
                warn!("Scorer returned {} scores for {} passages; dropping batch", scores.len(), batch.len());
                outcome.failures += batch.len();
                return;
            }
            Err(e) => {
                warn!("Scoring batch of {} failed: {}", batch.len(), e);
                outcome.failures += batch.len();
                return;
            }
        };
        for (candidate, score) in batch.into_iter().zip(scores) {
            match score {
                Some(s) if self.settings.contains(s) => outcome.ranked.push(RankedCandidate { candidate, rerank_score: s }),
                other => {
                    debug!("Dropping candidate {} with unusable score {:?}", candidate.id(), other);
                    outcome.failures += 1;
                }
            }
        }
    }
}
