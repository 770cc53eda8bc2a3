//! End-to-end pipeline scenarios against fake providers.

use adlens_common::config::AdlensConfig;
use adlens_common::models::{AnswerChunk, ChatMessage};
use adlensd::cache::AnswerCache;
use adlensd::classifier::Classifier;
use adlensd::embedding_client::EmbeddingProvider;
use adlensd::generation_client::{GenerationProvider, StreamEnd};
use adlensd::pipeline::AnswerPipeline;
use adlensd::store::MetricsStore;
use anyhow::Result;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Scripted SQL replies for generate(); canned streamed answer for
/// generate_stream(). Counts and records everything for assertions.
struct FakeGeneration {
    sql_replies: Mutex<VecDeque<String>>,
    sql_calls: AtomicUsize,
    stream_prompts: Mutex<Vec<String>>,
}

impl FakeGeneration {
    fn new(sql_replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            sql_replies: Mutex::new(sql_replies.iter().map(|s| s.to_string()).collect()),
            sql_calls: AtomicUsize::new(0),
            stream_prompts: Mutex::new(Vec::new()),
        })
    }

    fn sql_call_count(&self) -> usize {
        self.sql_calls.load(Ordering::SeqCst)
    }

    fn stream_prompts(&self) -> Vec<String> {
        self.stream_prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GenerationProvider for FakeGeneration {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.sql_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .sql_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        tx: &mpsc::Sender<String>,
    ) -> Result<StreamEnd> {
        self.stream_prompts.lock().unwrap().push(prompt.to_string());
        let answer = "Based on your data, here is what I found.";
        if tx.send(answer.to_string()).await.is_err() {
            return Ok(StreamEnd::Cancelled(String::new()));
        }
        Ok(StreamEnd::Complete(answer.to_string()))
    }
}

/// Every text embeds to the same vector, so anything indexed scores 1.0
struct FakeEmbeddings;

#[async_trait::async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

fn seeded_store() -> MetricsStore {
    let store = MetricsStore::open_in_memory().unwrap();
    store
        .insert_campaign("t1", "c-1", "Spring Sale", "amazon")
        .unwrap();
    store
        .insert_metric_row("t1", "c-1", "amazon", "2026-08-24", 1000, 50, 25.0, 5)
        .unwrap();
    store
}

async fn collect(rx: &mut mpsc::Receiver<AnswerChunk>) -> (String, usize) {
    let mut text = String::new();
    let mut done_markers = 0;
    while let Some(chunk) = rx.recv().await {
        match chunk {
            AnswerChunk::Text(t) => text.push_str(&t),
            AnswerChunk::Done => done_markers += 1,
        }
    }
    (text, done_markers)
}

const QUESTION: &str = "How many clicks did my Amazon campaigns get last week?";

#[tokio::test]
async fn scenario_a_full_slow_path_then_cached() {
    let generation = FakeGeneration::new(&[
        "SELECT campaign_id, clicks FROM campaign_metrics WHERE platform = 'amazon'",
    ]);
    let store = seeded_store();
    let pipeline = AnswerPipeline::new(
        &AdlensConfig::default(),
        store.clone(),
        generation.clone(),
        Arc::new(FakeEmbeddings),
    );
    pipeline
        .retriever()
        .index_campaign("t1", "c-1", "Spring Sale", "amazon")
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(32);
    let outcome = pipeline.answer("t1", QUESTION, &tx).await.unwrap();
    drop(tx);
    let (text, done_markers) = collect(&mut rx).await;

    assert!(outcome.grounded);
    assert!(!outcome.from_cache);
    assert!(!outcome.fallback_used);
    assert_eq!(generation.sql_call_count(), 1);
    assert_eq!(done_markers, 1);
    assert_eq!(text, "Based on your data, here is what I found.");

    // The slow-path answer was cached for this tenant
    let cache = AnswerCache::new(store, 24);
    let payload = cache.get("t1", QUESTION, &Classifier::new()).unwrap();
    assert_eq!(payload.rows.len(), 1);
    assert!(!payload.fallback_used);

    // The context handed to the response generator carries data, not SQL
    let prompts = generation.stream_prompts();
    assert!(prompts[0].contains("clicks 50"));
    assert!(!prompts[0].to_lowercase().contains("select"));
}

#[tokio::test]
async fn scenario_b_repeat_question_hits_cache() {
    let generation = FakeGeneration::new(&[
        "SELECT campaign_id, clicks FROM campaign_metrics WHERE platform = 'amazon'",
    ]);
    let pipeline = AnswerPipeline::new(
        &AdlensConfig::default(),
        seeded_store(),
        generation.clone(),
        Arc::new(FakeEmbeddings),
    );
    pipeline
        .retriever()
        .index_campaign("t1", "c-1", "Spring Sale", "amazon")
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(32);
    pipeline.answer("t1", QUESTION, &tx).await.unwrap();
    drop(tx);
    collect(&mut rx).await;
    assert_eq!(generation.sql_call_count(), 1);

    // Same question, different casing and punctuation: still a cache hit
    let (tx, mut rx) = mpsc::channel(32);
    let outcome = pipeline
        .answer("t1", "how many clicks did my amazon campaigns get last week", &tx)
        .await
        .unwrap();
    drop(tx);
    let (_, done_markers) = collect(&mut rx).await;

    assert!(outcome.from_cache);
    assert!(outcome.grounded);
    assert_eq!(done_markers, 1);
    // Zero further generator or executor work
    assert_eq!(generation.sql_call_count(), 1);
}

#[tokio::test]
async fn scenario_c_prose_retry_then_hardcoded_fallback() {
    let generation = FakeGeneration::new(&[
        "Here is my analysis of your campaigns...",
        "I still cannot write a statement, sorry.",
    ]);
    let store = seeded_store();
    // Prior conversation enables the corrective retry
    for (role, content) in [("user", "how are my ads"), ("assistant", "doing fine")] {
        store
            .insert_message(&ChatMessage {
                id: format!("m-{}", role),
                tenant_id: "t1".to_string(),
                role: role.to_string(),
                content: content.to_string(),
                complete: true,
                created_at: Utc::now(),
            })
            .unwrap();
    }
    let pipeline = AnswerPipeline::new(
        &AdlensConfig::default(),
        store,
        generation.clone(),
        Arc::new(FakeEmbeddings),
    );
    pipeline
        .retriever()
        .index_campaign("t1", "c-1", "Spring Sale", "amazon")
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(32);
    let outcome = pipeline.answer("t1", QUESTION, &tx).await.unwrap();
    drop(tx);
    let (text, done_markers) = collect(&mut rx).await;

    assert!(outcome.fallback_used);
    assert!(outcome.grounded);
    assert_eq!(done_markers, 1);
    assert!(!text.is_empty());
    // Bounded ladder: primary + one corrective retry, no more
    assert_eq!(generation.sql_call_count(), 2);
}

#[tokio::test]
async fn scenario_d_zero_hits_skips_generation() {
    let generation = FakeGeneration::new(&[]);
    // Data exists but nothing is indexed, so retrieval returns no hits
    let pipeline = AnswerPipeline::new(
        &AdlensConfig::default(),
        seeded_store(),
        generation.clone(),
        Arc::new(FakeEmbeddings),
    );

    let (tx, mut rx) = mpsc::channel(32);
    let outcome = pipeline.answer("t1", QUESTION, &tx).await.unwrap();
    drop(tx);
    let (_, done_markers) = collect(&mut rx).await;

    assert!(!outcome.grounded);
    assert_eq!(done_markers, 1);
    // The query generator is never consulted
    assert_eq!(generation.sql_call_count(), 0);

    let prompts = generation.stream_prompts();
    assert!(prompts[0].contains("not based on the user's own campaign data"));
}

#[tokio::test]
async fn non_data_question_gets_conversational_reply() {
    let generation = FakeGeneration::new(&[]);
    let pipeline = AnswerPipeline::new(
        &AdlensConfig::default(),
        seeded_store(),
        generation.clone(),
        Arc::new(FakeEmbeddings),
    );

    let (tx, mut rx) = mpsc::channel(32);
    let outcome = pipeline.answer("t1", "hello there", &tx).await.unwrap();
    drop(tx);
    let (_, done_markers) = collect(&mut rx).await;

    assert!(!outcome.grounded);
    assert_eq!(done_markers, 1);
    assert_eq!(generation.sql_call_count(), 0);
}

#[tokio::test]
async fn cross_tenant_questions_never_share_cache() {
    let generation = FakeGeneration::new(&[
        "SELECT campaign_id, clicks FROM campaign_metrics WHERE platform = 'amazon'",
        "SELECT campaign_id, clicks FROM campaign_metrics WHERE platform = 'amazon'",
    ]);
    let store = seeded_store();
    store
        .insert_campaign("t2", "c-9", "Other Tenant", "amazon")
        .unwrap();
    store
        .insert_metric_row("t2", "c-9", "amazon", "2026-08-24", 10, 1, 0.5, 0)
        .unwrap();

    let pipeline = AnswerPipeline::new(
        &AdlensConfig::default(),
        store,
        generation.clone(),
        Arc::new(FakeEmbeddings),
    );
    pipeline
        .retriever()
        .index_campaign("t1", "c-1", "Spring Sale", "amazon")
        .await
        .unwrap();
    pipeline
        .retriever()
        .index_campaign("t2", "c-9", "Other Tenant", "amazon")
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(32);
    pipeline.answer("t1", QUESTION, &tx).await.unwrap();
    drop(tx);
    collect(&mut rx).await;
    assert_eq!(generation.sql_call_count(), 1);

    // Same question from another tenant misses t1's cache entry
    let (tx, mut rx) = mpsc::channel(32);
    let outcome = pipeline.answer("t2", QUESTION, &tx).await.unwrap();
    drop(tx);
    collect(&mut rx).await;

    assert!(!outcome.from_cache);
    assert_eq!(generation.sql_call_count(), 2);
}
