//! End-to-end orchestration for one question.
//!
//! Fast paths first (cache, summaries), slow path last (retrieval,
//! generation, execution). Every collaborator is injected at construction;
//! there are no process-wide singletons, which is what lets the scenario
//! tests run the whole pipeline against fakes.

use adlens_common::config::AdlensConfig;
use adlens_common::error::{PipelineError, USER_SAFE_FAILURE};
use adlens_common::models::{
    AnswerChunk, AnswerOutcome, AnswerPayload, ChatMessage, QueryOrigin, ResultRow, SummaryRow,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::AnswerCache;
use crate::classifier::Classifier;
use crate::context::ContextAssembler;
use crate::embedding_client::EmbeddingProvider;
use crate::executor::QueryExecutor;
use crate::fallback::FallbackLadder;
use crate::generation_client::GenerationProvider;
use crate::insights;
use crate::responder::Responder;
use crate::retriever::{EmbeddingIndex, Retriever};
use crate::sql_generator::SqlGenerator;
use crate::store::MetricsStore;
use crate::summary::SummaryStore;

/// How many prior messages feed conversation context
const CONVERSATION_DEPTH: usize = 6;

const GENERAL_PROMPT: &str = "\
You are an assistant for advertising campaign questions. \
Answer the question below conversationally and briefly.";

pub struct AnswerPipeline {
    classifier: Classifier,
    cache: AnswerCache,
    summaries: SummaryStore,
    retriever: Retriever,
    generator: SqlGenerator,
    executor: QueryExecutor,
    assembler: ContextAssembler,
    responder: Responder,
    store: MetricsStore,
}

impl AnswerPipeline {
    pub fn new(
        config: &AdlensConfig,
        store: MetricsStore,
        generation: Arc<dyn GenerationProvider>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            classifier: Classifier::new(),
            cache: AnswerCache::new(store.clone(), config.cache.ttl_hours),
            summaries: SummaryStore::new(store.clone()),
            retriever: Retriever::new(
                embeddings,
                EmbeddingIndex::new(store.clone()),
                config.retrieval.clone(),
            ),
            generator: SqlGenerator::new(generation.clone()),
            executor: QueryExecutor::new(store.clone(), config.context.max_rows),
            assembler: ContextAssembler::new(config.context.clone()),
            responder: Responder::new(generation, store.clone()),
            store,
        }
    }

    /// Access to the shared retriever, for the indexing path
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer one question, streaming chunks to `tx`
    pub async fn answer(
        &self,
        tenant_id: &str,
        question: &str,
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<AnswerOutcome> {
        let prior = self.recent_conversation(tenant_id);
        let recorded = self.responder.record_question(tenant_id, question)?;
        let outcome = self.dispatch(tenant_id, question, &prior, tx).await?;
        // Indexed after answering so retrieval for this question never
        // matches the question itself
        if let Err(e) = self
            .retriever
            .index_message(tenant_id, &recorded.id, question)
            .await
        {
            warn!("could not index question for retrieval: {}", e);
        }
        Ok(outcome)
    }

    async fn dispatch(
        &self,
        tenant_id: &str,
        question: &str,
        prior: &[ChatMessage],
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<AnswerOutcome> {
        if !self.classifier.is_data_question(question) {
            debug!("not a data question, answering conversationally");
            return self.general_reply(tenant_id, question, tx).await;
        }

        let complex = self.classifier.is_complex_question(question);

        if !complex {
            if let Some(payload) = self.cache.get(tenant_id, question, &self.classifier) {
                info!("cache hit, skipping generation and execution");
                return self.answer_from_payload(tenant_id, question, &payload, true, tx).await;
            }
        }

        let params = self.classifier.extract_query_params(question);

        if !complex && self.classifier.contains_metric_terms(question) {
            let windows = self.classifier.detect_time_windows(question);
            match self.summaries.lookup(tenant_id, &windows) {
                Ok(summaries) if !summaries.is_empty() => {
                    info!("summary hit for {:?}, short-circuiting", windows);
                    let rows: Vec<ResultRow> =
                        summaries.iter().map(summary_to_row).collect();
                    let report = insights::extract(&rows);
                    let context = self.assembler.assemble_from_summaries(
                        question, &params, &summaries, &report,
                    );
                    let payload = AnswerPayload {
                        rows,
                        sql: String::new(),
                        origin: QueryOrigin::Primary,
                        fallback_used: false,
                        insight_sentences: report.sentences,
                    };
                    if let Err(e) = self.cache.put(tenant_id, question, &payload) {
                        warn!("failed to cache summary answer: {}", e);
                    }
                    let delivery = self.responder.respond(tenant_id, &context, tx).await?;
                    return Ok(AnswerOutcome {
                        text: delivery.text,
                        from_cache: false,
                        fallback_used: false,
                        grounded: true,
                    });
                }
                Ok(_) => debug!("summary miss"),
                Err(e) => warn!("summary store unavailable, treating as miss: {}", e),
            }
        }

        let hits = self.retriever.retrieve(tenant_id, question).await;
        if hits.is_empty() {
            info!("no grounding data above threshold, general-knowledge reply");
            let context = self.assembler.no_data(question);
            let delivery = self.responder.respond(tenant_id, &context, tx).await?;
            return Ok(AnswerOutcome {
                text: delivery.text,
                from_cache: false,
                fallback_used: false,
                grounded: false,
            });
        }

        let conversation = render_conversation(&prior);
        let ladder = FallbackLadder::new(&self.generator, &self.executor);
        let result = match ladder
            .run(
                question,
                tenant_id,
                &params,
                if conversation.is_empty() {
                    None
                } else {
                    Some(&conversation)
                },
                !prior.is_empty(),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => return self.safe_failure(tenant_id, e, tx).await,
        };

        let report = insights::extract(&result.rows);
        let context = self
            .assembler
            .assemble(question, &params, &result.rows, &report, &hits);

        if !result.rows.is_empty() && !complex {
            let payload = AnswerPayload {
                rows: result.rows.clone(),
                sql: result.sql.clone(),
                origin: result.origin,
                fallback_used: result.fallback_used,
                insight_sentences: report.sentences.clone(),
            };
            if let Err(e) = self.cache.put(tenant_id, question, &payload) {
                warn!("failed to cache answer: {}", e);
            }
        }

        let delivery = self.responder.respond(tenant_id, &context, tx).await?;
        Ok(AnswerOutcome {
            text: delivery.text,
            from_cache: false,
            fallback_used: result.fallback_used,
            grounded: true,
        })
    }

    /// Rebuild a response from a cached payload without generating or
    /// executing any query
    async fn answer_from_payload(
        &self,
        tenant_id: &str,
        question: &str,
        payload: &AnswerPayload,
        from_cache: bool,
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<AnswerOutcome> {
        let params = self.classifier.extract_query_params(question);
        let report = insights::extract(&payload.rows);
        let context = self
            .assembler
            .assemble(question, &params, &payload.rows, &report, &[]);
        let delivery = self.responder.respond(tenant_id, &context, tx).await?;
        Ok(AnswerOutcome {
            text: delivery.text,
            from_cache,
            fallback_used: payload.fallback_used,
            grounded: true,
        })
    }

    async fn general_reply(
        &self,
        tenant_id: &str,
        question: &str,
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<AnswerOutcome> {
        let prompt = format!("{}\n\nQuestion: {}", GENERAL_PROMPT, question);
        let delivery = self.responder.respond(tenant_id, &prompt, tx).await?;
        Ok(AnswerOutcome {
            text: delivery.text,
            from_cache: false,
            fallback_used: false,
            grounded: false,
        })
    }

    /// Ladder exhaustion: deliver the generic failure text, never internals
    async fn safe_failure(
        &self,
        tenant_id: &str,
        error: PipelineError,
        tx: &mpsc::Sender<AnswerChunk>,
    ) -> Result<AnswerOutcome> {
        warn!("pipeline exhausted recovery: {}", error);
        let delivery = self
            .responder
            .respond_static(tenant_id, USER_SAFE_FAILURE, tx)
            .await?;
        Ok(AnswerOutcome {
            text: delivery.text,
            from_cache: false,
            fallback_used: true,
            grounded: false,
        })
    }

    fn recent_conversation(&self, tenant_id: &str) -> Vec<ChatMessage> {
        match self.store.recent_messages(tenant_id, CONVERSATION_DEPTH) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("could not load conversation history: {}", e);
                Vec::new()
            }
        }
    }
}

fn render_conversation(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten a summary row for insight extraction and caching
fn summary_to_row(summary: &SummaryRow) -> ResultRow {
    let mut row = ResultRow::new();
    row.insert("name".to_string(), summary.campaign_name.clone().into());
    row.insert("platform".to_string(), summary.platform.clone().into());
    row.insert(
        "impressions".to_string(),
        summary.total_impressions.into(),
    );
    row.insert("clicks".to_string(), summary.total_clicks.into());
    row.insert("cost".to_string(), summary.total_cost.into());
    row.insert(
        "conversions".to_string(),
        summary.total_conversions.into(),
    );
    row.insert("ctr".to_string(), summary.avg_ctr.into());
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlens_common::models::TimeWindow;
    use chrono::Utc;

    #[test]
    fn test_summary_flattens_with_label_first() {
        let summary = SummaryRow {
            tenant_id: "t1".to_string(),
            campaign_id: "c-1".to_string(),
            campaign_name: "Spring Sale".to_string(),
            platform: "google".to_string(),
            window: TimeWindow::Weekly,
            total_impressions: 1000,
            total_clicks: 50,
            total_cost: 25.0,
            total_conversions: 5,
            avg_ctr: 0.05,
            refreshed_at: Utc::now(),
        };
        let row = summary_to_row(&summary);
        assert_eq!(row["name"], "Spring Sale");
        assert_eq!(row["clicks"], 50);
        assert_eq!(row["ctr"], 0.05);
    }

    #[test]
    fn test_conversation_rendering() {
        let message = |role: &str, content: &str| ChatMessage {
            id: "m".to_string(),
            tenant_id: "t".to_string(),
            role: role.to_string(),
            content: content.to_string(),
            complete: true,
            created_at: Utc::now(),
        };
        let rendered = render_conversation(&[
            message("user", "how are my ads"),
            message("assistant", "they are fine"),
        ]);
        assert_eq!(rendered, "user: how are my ads\nassistant: they are fine");
        assert_eq!(render_conversation(&[]), "");
    }
}
