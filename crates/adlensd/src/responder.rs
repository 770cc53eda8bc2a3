//! Final answer delivery: stream chunks to the caller, persist the message.
//!
//! Contract with the caller: text chunks in order, then exactly one Done
//! marker. If the caller disconnects mid-stream, whatever was streamed is
//! persisted tagged incomplete, never as a finished message.

use adlens_common::models::{AnswerChunk, ChatMessage};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::generation_client::{GenerationProvider, StreamEnd};
use crate::store::MetricsStore;

pub struct Responder {
    provider: Arc<dyn GenerationProvider>,
    store: MetricsStore,
}

/// What respond() observed about delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub text: String,
    pub complete: bool,
}

impl Responder {
    pub fn new(provider: Arc<dyn GenerationProvider>, store: MetricsStore) -> Self {
        Self { provider, store }
    }

    /// Record the user's question before answering
    pub fn record_question(&self, tenant_id: &str, question: &str) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            role: "user".to_string(),
            content: question.to_string(),
            complete: true,
            created_at: Utc::now(),
        };
        self.store.insert_message(&message)?;
        Ok(message)
    }

    /// Stream a generated answer for `context` and persist the result
    pub async fn respond(
        &self,
        tenant_id: &str,
        context: &str,
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<Delivery> {
        let (text_tx, mut text_rx) = mpsc::channel::<String>(32);

        let generation = async move {
            let end = self.provider.generate_stream(context, &text_tx).await;
            drop(text_tx);
            end
        };

        let forwarding = async {
            while let Some(chunk) = text_rx.recv().await {
                if tx.send(AnswerChunk::Text(chunk)).await.is_err() {
                    debug!("caller went away mid-stream");
                    // Closing wakes a provider blocked on send, so it sees
                    // the cancellation instead of filling the buffer.
                    text_rx.close();
                    while text_rx.recv().await.is_some() {}
                    break;
                }
            }
        };

        let (end, ()) = tokio::join!(generation, forwarding);

        let delivery = match end? {
            StreamEnd::Complete(text) => {
                // Done may fail if the caller left between the last chunk
                // and the marker; the answer itself still finished.
                let _ = tx.send(AnswerChunk::Done).await;
                Delivery {
                    text,
                    complete: true,
                }
            }
            StreamEnd::Cancelled(partial) => {
                warn!("generation cancelled after {} bytes", partial.len());
                Delivery {
                    text: partial,
                    complete: false,
                }
            }
        };

        if !delivery.text.is_empty() {
            self.persist_answer(tenant_id, &delivery)?;
        }
        Ok(delivery)
    }

    /// Deliver an already-known answer (cache hits) over the same contract
    pub async fn respond_static(
        &self,
        tenant_id: &str,
        text: &str,
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<Delivery> {
        let sent = tx.send(AnswerChunk::Text(text.to_string())).await.is_ok();
        if sent {
            let _ = tx.send(AnswerChunk::Done).await;
        }
        let delivery = Delivery {
            text: text.to_string(),
            complete: sent,
        };
        if !delivery.text.is_empty() {
            self.persist_answer(tenant_id, &delivery)?;
        }
        Ok(delivery)
    }

    fn persist_answer(&self, tenant_id: &str, delivery: &Delivery) -> Result<()> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            role: "assistant".to_string(),
            content: delivery.text.clone(),
            complete: delivery.complete,
            created_at: Utc::now(),
        };
        self.store.insert_message(&message)?;
        Ok(())
    }
}
