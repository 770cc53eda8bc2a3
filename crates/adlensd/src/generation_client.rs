//! Text-generation provider client.
//!
//! One trait for the pipeline's two generation uses (SQL generation is
//! non-streamed, the final response is streamed). The Ollama implementation
//! talks NDJSON to /api/generate with a bounded request timeout. Dropping
//! the chunk receiver cancels a stream: the HTTP response is dropped, which
//! aborts the provider call.

use adlens_common::config::LlmConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// How a streamed generation ended
#[derive(Debug)]
pub enum StreamEnd {
    /// Provider finished; full concatenated text
    Complete(String),
    /// Caller went away mid-stream; the text streamed so far
    Cancelled(String),
}

/// Seam for generation backends; fakes implement this in tests
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// One-shot generation
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Streamed generation. Chunks are sent through `tx` in order; the
    /// implementation stops generating as soon as the receiver is dropped.
    async fn generate_stream(&self, prompt: &str, tx: &mpsc::Sender<String>) -> Result<StreamEnd>;
}

/// Extract the text piece and the done flag from one NDJSON stream line
fn parse_stream_line(line: &str) -> Option<(String, bool)> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let piece = value.get("response")?.as_str()?.to_string();
    let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Some((piece, done))
}

/// Ollama-backed generation client
pub struct OllamaClient {
    client: reqwest::Client,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaClient {
    pub fn new(llm: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.generation_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: llm.api_base.clone(),
            model: llm.generation_model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            }
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Generation request, payload {} bytes", prompt.len());

        let response = self
            .client
            .post(format!("{}/api/generate", self.api_base))
            .json(&self.request_body(prompt, false))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Generation request failed: {}", response.status()));
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();

        Ok(text)
    }

    async fn generate_stream(&self, prompt: &str, tx: &mpsc::Sender<String>) -> Result<StreamEnd> {
        let mut response = self
            .client
            .post(format!("{}/api/generate", self.api_base))
            .json(&self.request_body(prompt, true))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Generation request failed: {}", response.status()));
        }

        let mut full = String::new();
        let mut buffer = String::new();

        while let Some(bytes) = response.chunk().await? {
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].to_string();
                buffer.drain(..=newline);

                let Some((piece, done)) = parse_stream_line(&line) else {
                    continue;
                };

                if !piece.is_empty() {
                    full.push_str(&piece);
                    if tx.send(piece).await.is_err() {
                        // Receiver dropped: dropping `response` aborts the call
                        info!("Caller disconnected mid-stream, aborting generation");
                        return Ok(StreamEnd::Cancelled(full));
                    }
                }

                if done {
                    return Ok(StreamEnd::Complete(full));
                }
            }
        }

        // Stream ended without a done marker; treat what we have as complete
        Ok(StreamEnd::Complete(full))
    }
}
