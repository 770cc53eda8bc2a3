//! Embedding provider client.
//!
//! Batched texts in, fixed-dimension vectors out, in input order. The Ollama
//! implementation spaces calls by a configured minimum interval and retries
//! transient failures a bounded number of times with exponential backoff.

use adlens_common::config::{LlmConfig, RetrievalConfig};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Seam for embedding backends; fakes implement this in tests
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. The returned vectors are in input order; any
    /// implementation over a provider that reorders responses must restore
    /// order before returning.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("Provider returned no vectors"))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Backoff delay before the given retry attempt (1-based)
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(250u64.saturating_mul(1 << attempt.min(6)))
}

/// Ollama-backed embedding client
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    api_base: String,
    model: String,
    min_interval: Duration,
    max_retries: u32,
    batch_size: usize,
    last_call: Mutex<Option<Instant>>,
}

impl OllamaEmbeddings {
    pub fn new(llm: &LlmConfig, retrieval: &RetrievalConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.embedding_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: llm.api_base.clone(),
            model: llm.embedding_model.clone(),
            min_interval: Duration::from_millis(retrieval.min_call_interval_ms),
            max_retries: retrieval.embed_max_retries,
            batch_size: retrieval.embed_batch_size.max(1),
            last_call: Mutex::new(None),
        })
    }

    /// Enforce the minimum spacing between provider calls
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.api_base))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Embedding request failed: {}", response.status()));
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Provider returned {} vectors for {} texts",
                parsed.embeddings.len(),
                texts.len()
            ));
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Oversized input goes to the provider in capped batches, in order
        let mut all: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let mut attempt = 0u32;
            let vectors = loop {
                self.pace().await;

                match self.request_once(chunk).await {
                    Ok(vectors) => break vectors,
                    Err(e) if attempt < self.max_retries => {
                        attempt += 1;
                        let delay = backoff_delay(attempt);
                        warn!(
                            "Embedding attempt {} failed ({}), retrying in {:?}",
                            attempt, e, delay
                        );
                        sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            };
            all.extend(vectors);
        }

        debug!("Embedded {} texts", all.len());
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        // Capped exponent: large attempts never overflow
        assert_eq!(backoff_delay(40), backoff_delay(6));
    }

    #[test]
    fn test_request_body_shape() {
        let texts = vec!["clicks last week".to_string()];
        let body = EmbedRequest {
            model: "nomic-embed-text",
            input: &texts,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"model\":\"nomic-embed-text\""));
        assert!(json.contains("\"input\":[\"clicks last week\"]"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_free() {
        let llm = LlmConfig::default();
        let retrieval = RetrievalConfig::default();
        let client = OllamaEmbeddings::new(&llm, &retrieval).unwrap();
        // No provider call happens for an empty batch
        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
    }
}
