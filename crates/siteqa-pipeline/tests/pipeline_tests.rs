mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use siteqa_core::config::FallbackMode;
use siteqa_core::error::ErrorKind;
use siteqa_core::types::{Intent, Metric, Verdict};
use siteqa_pipeline::Orchestrator;
use siteqa_vector::VectorIndex;

use common::*;

struct Fixture {
    orchestrator: Arc<Orchestrator>,
    embedder: Arc<ScriptedEmbedder>,
    scorer: Arc<CountingScorer>,
}

async fn fixture_with(settings: siteqa_core::config::Settings, generator: Arc<dyn siteqa_core::traits::TextGenerator>, seed: bool) -> Fixture {
    fixture_from(settings, ScriptedEmbedder::mobile_apps(), generator, seed).await
}

async fn fixture_from(
    settings: siteqa_core::config::Settings,
    embedder: ScriptedEmbedder,
    generator: Arc<dyn siteqa_core::traits::TextGenerator>,
    seed: bool,
) -> Fixture {
    let embedder = Arc::new(embedder);
    let scorer = Arc::new(CountingScorer::default());
    let index = Arc::new(VectorIndex::empty(Metric::Cosine, DIM, "scripted"));
    let orchestrator =
        Arc::new(Orchestrator::new(settings, index, None, models(Arc::clone(&embedder), Arc::clone(&scorer), generator)));
    if seed {
        orchestrator.ingest(vec![record("c1", C1), record("c2", C2)], None).await.expect("ingest");
    }
    Fixture { orchestrator, embedder, scorer }
}

async fn fixture() -> Fixture {
    fixture_with(settings(), extractive(), true).await
}

#[tokio::test]
async fn grounded_answer_cites_the_relevant_chunk_only() {
    let f = fixture().await;
    let answer = f.orchestrator.answer(QUERY, None).await;

    assert!(answer.error.is_none(), "{:?}", answer.error);
    assert_eq!(answer.verdict, Some(Verdict::Ok));
    assert_eq!(answer.intent, Some(Intent::Informational));
    assert!(answer.grounded);
    assert!(!answer.cached);
    let cited: Vec<&str> = answer.cited_chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(cited, ["c1"]);
    assert_eq!(answer.cited_chunks[0].source_url, "https://example.com/c1");
    assert!(answer.response_text.contains(C1));
    assert!(answer.response_text.contains("[1]"));
}

#[tokio::test]
async fn empty_index_falls_back_ungrounded() {
    let f = fixture_with(settings(), extractive(), false).await;
    let answer = f.orchestrator.answer(QUERY, None).await;

    assert!(answer.error.is_none());
    assert_eq!(answer.verdict, Some(Verdict::InsufficientContext));
    assert!(!answer.grounded);
    assert!(answer.cited_chunks.is_empty());
    assert_eq!(answer.response_text, f.orchestrator.settings().responses.insufficient_context);
    assert_eq!(f.orchestrator.cached_responses(), 0);
}

#[tokio::test]
async fn generate_fallback_marks_the_answer_ungrounded() {
    let mut s = settings();
    s.fallback.mode = FallbackMode::Generate;
    let f = fixture_with(s, extractive(), false).await;
    let answer = f.orchestrator.answer(QUERY, None).await;

    assert_eq!(answer.verdict, Some(Verdict::InsufficientContext));
    assert!(!answer.grounded);
    assert!(answer.response_text.starts_with("nothing relevant"));
    assert!(answer.response_text.ends_with(&f.orchestrator.settings().responses.ungrounded_notice));
}

#[tokio::test]
async fn out_of_scope_and_greetings_skip_retrieval() {
    let f = fixture().await;
    let calls_after_ingest = f.embedder.calls();

    let off_topic = f.orchestrator.answer("What's the weather like tomorrow?", None).await;
    assert_eq!(off_topic.intent, Some(Intent::OutOfScope));
    assert_eq!(off_topic.response_text, f.orchestrator.settings().responses.out_of_scope);
    assert!(!off_topic.grounded);

    let hello = f.orchestrator.answer("Hello!", None).await;
    assert_eq!(hello.intent, Some(Intent::Greeting));
    assert_eq!(hello.response_text, f.orchestrator.settings().responses.greeting);

    assert_eq!(f.embedder.calls(), calls_after_ingest, "no embedding call");
    assert_eq!(f.scorer.calls.load(Ordering::SeqCst), 0, "no rerank call");
}

#[tokio::test]
async fn blank_query_is_rejected_before_any_model_call() {
    let f = fixture().await;
    let before = f.embedder.calls();
    let answer = f.orchestrator.answer("   \t", Some("s")).await;
    assert_eq!(answer.error.map(|e| e.error_kind), Some(ErrorKind::InvalidInput));
    assert_eq!(answer.response_text, f.orchestrator.settings().responses.invalid_input);
    assert_eq!(f.embedder.calls(), before);
}

#[tokio::test]
async fn unloaded_index_reports_index_unavailable() {
    let embedder = Arc::new(ScriptedEmbedder::mobile_apps());
    let orchestrator = Orchestrator::new(
        settings(),
        Arc::new(VectorIndex::unloaded()),
        None,
        models(embedder, Arc::new(CountingScorer::default()), extractive()),
    );
    let answer = orchestrator.answer(QUERY, None).await;
    let error = answer.error.expect("error");
    assert_eq!(error.error_kind, ErrorKind::IndexUnavailable);
    assert_eq!(answer.response_text, orchestrator.settings().responses.apology);
}

#[tokio::test]
async fn generation_failures_are_retried_then_apologized_for() {
    let generator = Arc::new(FailingGenerator::default());
    let mut s = settings();
    s.retry.max_attempts = 3;
    let f = fixture_with(s, Arc::clone(&generator) as Arc<dyn siteqa_core::traits::TextGenerator>, true).await;

    let answer = f.orchestrator.answer(QUERY, None).await;
    assert_eq!(generator.attempts.load(Ordering::SeqCst), 3);
    let error = answer.error.expect("error");
    assert_eq!(error.error_kind, ErrorKind::GenerationFailed);
    assert!(!error.message.contains("10.0.0.7"));
    assert!(!answer.response_text.contains("10.0.0.7"));
    assert_eq!(answer.response_text, f.orchestrator.settings().responses.apology);
    assert_eq!(f.orchestrator.cached_responses(), 0);
}

#[tokio::test]
async fn repeated_questions_hit_the_cache_until_reindex() {
    let f = fixture().await;
    let first = f.orchestrator.answer(QUERY, None).await;
    let calls = f.embedder.calls();

    let second = f.orchestrator.answer("  do you build MOBILE apps ", None).await;
    assert!(second.cached);
    assert_eq!(second.cited_chunks, first.cited_chunks);
    assert_eq!(f.embedder.calls(), calls);

    f.orchestrator.ingest(vec![record("c3", "Our offices are in Lisbon")], None).await.unwrap();
    assert_eq!(f.orchestrator.cached_responses(), 0);
    let third = f.orchestrator.answer(QUERY, None).await;
    assert!(!third.cached);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn answer_in_flight_during_a_rebuild_is_not_cached() {
    let generator = Arc::new(SlowGenerator { slow: Duration::from_millis(300), fast: Duration::from_millis(300) });
    let f = fixture_with(settings(), generator, true).await;

    let orchestrator = Arc::clone(&f.orchestrator);
    let in_flight = tokio::spawn(async move { orchestrator.answer(QUERY, None).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.orchestrator.rebuild(vec![record("c2", C2)], None).await.unwrap();

    let stale = in_flight.await.unwrap();
    assert_eq!(stale.cited_chunks[0].id, "c1");
    assert_eq!(f.orchestrator.cached_responses(), 0);

    let fresh = f.orchestrator.answer(QUERY, None).await;
    assert!(!fresh.cached);
    assert!(!f.orchestrator.index().snapshot().unwrap().contains("c1"));
    assert!(fresh.cited_chunks.iter().all(|c| c.id != "c1"), "{:?}", fresh.cited_chunks);
}

#[tokio::test]
async fn questions_differing_only_in_symbols_are_cached_apart() {
    const PLUS: &str = "Do you build mobile apps in C++?";
    const PLAIN: &str = "Do you build mobile apps in C?";
    let off_axis = (1.0f32 - 0.81).sqrt();
    let embedder = ScriptedEmbedder::new(&[
        (PLUS, [0.9, off_axis]),
        (PLAIN, [0.9, off_axis]),
        (C1, [1.0, 0.0]),
        (C2, [0.0, 1.0]),
    ]);
    let f = fixture_from(settings(), embedder, extractive(), true).await;

    let first = f.orchestrator.answer(PLUS, None).await;
    assert!(first.grounded, "{:?}", first.verdict);
    assert_eq!(f.orchestrator.cached_responses(), 1);

    let second = f.orchestrator.answer(PLAIN, None).await;
    assert!(!second.cached);
    assert_eq!(f.orchestrator.cached_responses(), 2);

    let again = f.orchestrator.answer("do you build mobile apps in c++", None).await;
    assert!(again.cached);
}

#[tokio::test]
async fn oversized_question_still_ends_the_generation_prompt() {
    let generator = Arc::new(RecordingGenerator::default());
    let f = fixture_with(settings(), Arc::clone(&generator) as Arc<dyn siteqa_core::traits::TextGenerator>, true).await;
    let query = format!("{QUERY} {}", "please ".repeat(2_600));
    assert!(query.chars().count() > f.orchestrator.settings().generation.max_input_chars);

    let answer = f.orchestrator.answer(&query, Some("long")).await;
    assert!(answer.error.is_none(), "{:?}", answer.error);
    assert_eq!(answer.cited_chunks[0].id, "c1");

    let prompts = generator.prompts.lock().unwrap();
    let sent = prompts.last().expect("generator was called");
    let limit = f.orchestrator.settings().generation.max_input_chars;
    assert!(sent.chars().count() <= limit, "{} > {limit}", sent.chars().count());
    assert!(sent.ends_with("\nAnswer:"));
    assert!(asked(sent).starts_with(QUERY));
    assert!(sent.contains(C1));
}

#[tokio::test]
async fn cached_retrieval_covers_an_embedding_outage() {
    let f = fixture().await;
    let warm = f.orchestrator.answer(QUERY, Some("a")).await;
    assert_eq!(warm.verdict, Some(Verdict::Ok));

    f.embedder.failing.store(true, Ordering::SeqCst);
    let degraded = f.orchestrator.answer(QUERY, Some("b")).await;
    assert!(degraded.error.is_none(), "{:?}", degraded.error);
    assert!(!degraded.cached);
    assert_eq!(degraded.cited_chunks[0].id, "c1");

    let cold = f.orchestrator.answer("Do you design websites?", Some("b")).await;
    assert_eq!(cold.error.map(|e| e.error_kind), Some(ErrorKind::RetrievalFailed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_session_queries_complete_in_submission_order() {
    let mut s = settings();
    s.fallback.mode = FallbackMode::Generate;
    let generator = Arc::new(SlowGenerator { slow: Duration::from_millis(300), fast: Duration::from_millis(5) });
    let f = fixture_with(s, generator, false).await;
    let log = Log::default();

    let spawn = |query: &'static str| {
        let (orchestrator, log) = (Arc::clone(&f.orchestrator), log.clone());
        tokio::spawn(async move {
            orchestrator.answer(query, Some("shared")).await;
            log.push(query);
        })
    };
    let first = spawn("a slow question");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = spawn("a quick question");
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(log.entries(), ["a slow question", "a quick question"]);
    let handle = f.orchestrator.sessions().get("shared").unwrap();
    assert_eq!(handle.lock().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_sessions_do_not_wait_for_each_other() {
    let mut s = settings();
    s.fallback.mode = FallbackMode::Generate;
    let generator = Arc::new(SlowGenerator { slow: Duration::from_millis(400), fast: Duration::from_millis(5) });
    let f = fixture_with(s, generator, false).await;
    let log = Log::default();

    let spawn = |query: &'static str, session: &'static str| {
        let (orchestrator, log) = (Arc::clone(&f.orchestrator), log.clone());
        tokio::spawn(async move {
            orchestrator.answer(query, Some(session)).await;
            log.push(query);
        })
    };
    let slow = spawn("a slow question", "one");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let quick = spawn("a quick question", "two");
    quick.await.unwrap();
    slow.await.unwrap();

    assert_eq!(log.entries(), ["a quick question", "a slow question"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_queries_leave_no_trace() {
    let generator = Arc::new(SlowGenerator { slow: Duration::from_millis(400), fast: Duration::from_millis(400) });
    let f = fixture_with(settings(), generator, true).await;

    let gave_up = tokio::time::timeout(Duration::from_millis(50), f.orchestrator.answer(QUERY, Some("s"))).await;
    assert!(gave_up.is_err());
    assert_eq!(f.orchestrator.cached_responses(), 0);
    let handle = f.orchestrator.sessions().get("s").expect("session exists");
    assert!(handle.lock().await.is_empty());
    drop(handle);

    let answer = f.orchestrator.answer(QUERY, Some("s")).await;
    assert!(answer.error.is_none());
    assert_eq!(f.orchestrator.sessions().get("s").unwrap().lock().await.len(), 1);
}

#[tokio::test]
async fn each_turn_is_recorded_on_its_session() {
    let mut s = settings();
    s.fallback.mode = FallbackMode::Generate;
    let generator = Arc::new(SlowGenerator { slow: Duration::ZERO, fast: Duration::ZERO });
    let f = fixture_with(s, generator, false).await;

    let first = f.orchestrator.answer("Tell me about pricing", Some("h")).await;
    assert!(first.response_text.starts_with("echo: Tell me about pricing"));
    f.orchestrator.answer("And for startups?", Some("h")).await;

    let handle = f.orchestrator.sessions().get("h").unwrap();
    let session = handle.lock().await;
    let turns = session.recent(5);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].query, "Tell me about pricing");
}

#[tokio::test]
async fn idle_sessions_are_swept() {
    let mut s = settings();
    s.session.idle_timeout_secs = 0;
    let f = fixture_with(s, extractive(), true).await;
    f.orchestrator.answer("Hello", Some("gone")).await;
    assert_eq!(f.orchestrator.sessions().len(), 1);

    let sweeper = f.orchestrator.spawn_session_sweeper(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(f.orchestrator.sessions().is_empty());
    sweeper.abort();
}
