mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use siteqa_core::config::RerankSettings;
use siteqa_core::error::ModelError;
use siteqa_core::traits::{IntentModel, RelevanceScorer};
use siteqa_core::types::{Candidate, Chunk, Intent, Metric, Verdict};
use siteqa_pipeline::gate;
use siteqa_pipeline::{IntentClassifier, MetadataFilter, Reranker, Retriever};
use siteqa_vector::VectorIndex;

use common::candidate;

/// Scores passages from a fixed table. Any batch containing "boom" errors.
struct TableScorer(HashMap<&'static str, Option<f32>>);

impl RelevanceScorer for TableScorer {
    fn score_batch(&self, _query: &str, passages: &[String]) -> Result<Vec<Option<f32>>, ModelError> {
        if passages.iter().any(|p| p == "boom") {
            return Err(ModelError::Unavailable("scorer crashed".to_string()));
        }
        Ok(passages.iter().map(|p| self.0.get(p.as_str()).copied().flatten()).collect())
    }
}

fn reranker(table: &[(&'static str, Option<f32>)], batch_size: usize, top_k: usize) -> Reranker {
    let scorer = TableScorer(table.iter().copied().collect());
    Reranker::new(Arc::new(scorer), RerankSettings { top_k, batch_size, ..RerankSettings::default() })
}

fn ids(ranked: &[siteqa_core::types::RankedCandidate]) -> Vec<&str> {
    ranked.iter().map(|rc| rc.id()).collect()
}

#[tokio::test]
async fn ties_break_on_similarity_then_id() {
    let rr = reranker(&[("a", Some(0.8)), ("b", Some(0.8)), ("c", Some(0.8)), ("d", Some(0.9))], 16, 10);
    let candidates = vec![
        candidate("z", "a", 0.5),
        candidate("y", "b", 0.7),
        candidate("x", "c", 0.5),
        candidate("w", "d", 0.1),
    ];
    let outcome = rr.rerank("q", candidates.clone()).await;
    assert_eq!(ids(&outcome.ranked), ["w", "y", "x", "z"]);

    let mut reversed = candidates;
    reversed.reverse();
    assert_eq!(ids(&rr.rerank("q", reversed).await.ranked), ["w", "y", "x", "z"]);
}

#[tokio::test]
async fn unusable_scores_are_dropped_and_counted() {
    let rr = reranker(&[("ok", Some(0.4)), ("none", None), ("nan", Some(f32::NAN)), ("high", Some(1.5))], 16, 10);
    let outcome = rr
        .rerank(
            "q",
            vec![candidate("1", "ok", 0.9), candidate("2", "none", 0.9), candidate("3", "nan", 0.9), candidate("4", "high", 0.9)],
        )
        .await;
    assert_eq!(ids(&outcome.ranked), ["1"]);
    assert_eq!(outcome.failures, 3);
}

#[tokio::test]
async fn a_failing_batch_loses_only_its_own_candidates() {
    let rr = reranker(&[("good", Some(0.6)), ("fine", Some(0.7))], 2, 10);
    let candidates = vec![
        candidate("1", "good", 0.9),
        candidate("2", "boom", 0.8),
        candidate("3", "fine", 0.7),
        candidate("4", "good", 0.6),
    ];
    let outcome = rr.rerank("q", candidates).await;
    assert_eq!(ids(&outcome.ranked), ["3", "4"]);
    assert_eq!(outcome.failures, 2);
}

#[tokio::test]
async fn batch_size_does_not_change_the_ranking() {
    let table: Vec<(&'static str, Option<f32>)> =
        vec![("p0", Some(0.1)), ("p1", Some(0.9)), ("p2", Some(0.5)), ("p3", Some(0.5)), ("p4", Some(0.7)), ("p5", None)];
    let candidates: Vec<Candidate> = table
        .iter()
        .enumerate()
        .map(|(i, (text, _))| candidate(&format!("c{i}"), text, 1.0 - i as f32 * 0.1))
        .collect();

    let baseline = reranker(&table, candidates.len(), 10).rerank("q", candidates.clone()).await;
    for batch_size in 1..=candidates.len() {
        let outcome = reranker(&table, batch_size, 10).rerank("q", candidates.clone()).await;
        assert_eq!(ids(&outcome.ranked), ids(&baseline.ranked), "batch size {batch_size}");
        assert_eq!(outcome.failures, 1);
    }
    assert_eq!(ids(&baseline.ranked), ["c1", "c4", "c2", "c3", "c0"]);
}

#[tokio::test]
async fn ranking_is_truncated_to_top_k() {
    let rr = reranker(&[("a", Some(0.2)), ("b", Some(0.9)), ("c", Some(0.5))], 16, 2);
    let outcome = rr.rerank("q", vec![candidate("1", "a", 0.1), candidate("2", "b", 0.1), candidate("3", "c", 0.1)]).await;
    assert_eq!(ids(&outcome.ranked), ["2", "3"]);
    assert_eq!(outcome.failures, 0);
}

#[tokio::test]
async fn gate_keeps_the_prefix_at_or_above_threshold() {
    let rr = reranker(&[("a", Some(0.9)), ("b", Some(0.5)), ("c", Some(0.49)), ("d", Some(0.1))], 16, 10);
    let ranked = rr
        .rerank("q", vec![candidate("a", "a", 0.1), candidate("b", "b", 0.1), candidate("c", "c", 0.1), candidate("d", "d", 0.1)])
        .await
        .ranked;

    let (kept, verdict) = gate::accept(ranked.clone(), 0.5);
    assert_eq!(ids(&kept), ["a", "b"]);
    assert_eq!(verdict, Verdict::Ok);
    assert!(kept.iter().all(|rc| rc.rerank_score >= 0.5));

    let (kept, verdict) = gate::accept(ranked, 0.95);
    assert!(kept.is_empty());
    assert_eq!(verdict, Verdict::InsufficientContext);

    let (kept, verdict) = gate::accept(Vec::new(), 0.0);
    assert!(kept.is_empty());
    assert_eq!(verdict, Verdict::InsufficientContext);
}

fn chunk(id: &str, category: &str, tags: &[&str]) -> Chunk {
    let mut c = (*candidate(id, id, 0.0).chunk).clone();
    c.category = category.to_string();
    c.tags = tags.iter().map(|t| t.to_string()).collect();
    c
}

#[test]
fn filtered_retrieval_over_fetches_then_keeps_index_order() {
    let index = Arc::new(VectorIndex::empty(Metric::Cosine, 2, "test"));
    let items = vec![
        (chunk("a", "Services", &[]), vec![1.0, 0.0]),
        (chunk("b", "Services", &[]), vec![0.99, 0.1]),
        (chunk("c", "Contact", &["office"]), vec![0.9, 0.4]),
        (chunk("d", "Services", &[]), vec![0.8, 0.6]),
        (chunk("e", "contact", &[]), vec![0.0, 1.0]),
    ];
    index.insert_many(items).unwrap();

    let query = [1.0, 0.0];
    let retriever = Retriever::new(Arc::clone(&index), 4);
    let unfiltered = retriever.retrieve(&query, 2, &MetadataFilter::default()).unwrap();
    assert_eq!(unfiltered.iter().map(|c| c.id()).collect::<Vec<_>>(), ["a", "b"]);

    let contact = retriever.retrieve(&query, 2, &MetadataFilter::category("CONTACT")).unwrap();
    assert_eq!(contact.iter().map(|c| c.id()).collect::<Vec<_>>(), ["c", "e"]);

    let tagged = MetadataFilter { tag: Some("Office".to_string()), ..MetadataFilter::default() };
    assert_eq!(retriever.retrieve(&query, 2, &tagged).unwrap().iter().map(|c| c.id()).collect::<Vec<_>>(), ["c"]);

    let narrow = Retriever::new(index, 1);
    assert!(narrow.retrieve(&query, 2, &MetadataFilter::category("Contact")).unwrap().is_empty());
}

struct StuckModel;

impl IntentModel for StuckModel {
    fn classify(&self, _query: &str) -> Result<Intent, ModelError> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(Intent::OutOfScope)
    }
}

struct BrokenModel;

impl IntentModel for BrokenModel {
    fn classify(&self, _query: &str) -> Result<Intent, ModelError> {
        Err(ModelError::Unavailable("no model".to_string()))
    }
}

#[tokio::test]
async fn intent_defaults_to_informational_when_the_model_cannot_answer() {
    let stuck = IntentClassifier::new(Arc::new(StuckModel), Duration::from_millis(20));
    assert_eq!(stuck.classify("what's the weather").await, Intent::Informational);

    let broken = IntentClassifier::new(Arc::new(BrokenModel), Duration::from_secs(1));
    assert_eq!(broken.classify("hello").await, Intent::Informational);
}
