//! Semantic retrieval over indexed embeddings.
//!
//! Records live in the embeddings table; similarity is cosine, ranked in
//! process. The search filter always includes the requesting tenant id in
//! the SQL itself, so another tenant's records are never even candidates,
//! regardless of how well they score.

use adlens_common::config::RetrievalConfig;
use adlens_common::models::{EmbeddingRecord, EntityType, RetrievalHit};
use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding_client::EmbeddingProvider;
use crate::store::MetricsStore;

/// Cosine similarity between two vectors. Zero for mismatched lengths or
/// zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        0.0
    } else {
        dot_product / (magnitude_a * magnitude_b)
    }
}

/// SQLite-backed vector index
pub struct EmbeddingIndex {
    store: MetricsStore,
}

impl EmbeddingIndex {
    pub fn new(store: MetricsStore) -> Self {
        Self { store }
    }

    /// Store one embedding record. Re-indexing the same source replaces the
    /// previous record wholesale; records are never partially mutated.
    pub fn index(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
        source_id: &str,
        content: &str,
        vector: &[f32],
        metadata: serde_json::Value,
    ) -> Result<()> {
        let conn = self.store.lock();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings
             (id, tenant_id, entity_type, source_id, vector, content, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                uuid::Uuid::new_v4().to_string(),
                tenant_id,
                entity_type.as_str(),
                source_id,
                serde_json::to_string(vector)?,
                content,
                metadata.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Index a campaign for retrieval
    pub fn index_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        name: &str,
        platform: &str,
        vector: &[f32],
    ) -> Result<()> {
        let content = format!("{} campaign on {}", name, platform);
        let metadata = serde_json::json!({ "name": name, "platform": platform });
        self.index(
            tenant_id,
            EntityType::Campaign,
            campaign_id,
            &content,
            vector,
            metadata,
        )
    }

    /// Index a chat message for retrieval
    pub fn index_message(
        &self,
        tenant_id: &str,
        message_id: &str,
        content: &str,
        vector: &[f32],
    ) -> Result<()> {
        self.index(
            tenant_id,
            EntityType::ChatMessage,
            message_id,
            content,
            vector,
            serde_json::json!({}),
        )
    }

    /// Top-k most similar records for this tenant, strictly above min_score.
    /// Results below the floor are dropped even when top-k is not filled.
    pub fn search(
        &self,
        tenant_id: &str,
        vector: &[f32],
        entity_types: &[EntityType],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalHit>> {
        let conn = self.store.lock();
        let mut hits: Vec<RetrievalHit> = Vec::new();

        for entity_type in entity_types {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, entity_type, source_id, vector, content, metadata, created_at
                 FROM embeddings WHERE tenant_id = ? AND entity_type = ?",
            )?;

            let records = stmt.query_map(params![tenant_id, entity_type.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;

            for record in records {
                let (id, tenant, etype, source_id, vector_json, content, metadata, created_at) =
                    record?;
                let stored: Vec<f32> = serde_json::from_str(&vector_json)?;
                let score = cosine_similarity(vector, &stored);
                if score < min_score {
                    continue;
                }

                hits.push(RetrievalHit {
                    record: EmbeddingRecord {
                        id,
                        tenant_id: tenant,
                        entity_type: EntityType::parse(&etype).unwrap_or(EntityType::Campaign),
                        source_id,
                        vector: stored,
                        content,
                        metadata: serde_json::from_str(&metadata)
                            .unwrap_or(serde_json::Value::Null),
                        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    },
                    score,
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Embeds the question and searches the index. Provider or index failure
/// degrades to an empty result; retrieval never fails a request.
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    index: EmbeddingIndex,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, index: EmbeddingIndex, config: RetrievalConfig) -> Self {
        Self {
            provider,
            index,
            config,
        }
    }

    /// Grounding hits for a question: campaigns and prior messages
    pub async fn retrieve(&self, tenant_id: &str, question: &str) -> Vec<RetrievalHit> {
        let vector = match self.provider.embed(question).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Embedding provider unavailable, degrading to no grounding: {}", e);
                return vec![];
            }
        };

        match self.index.search(
            tenant_id,
            &vector,
            &[EntityType::Campaign, EntityType::ChatMessage],
            self.config.top_k,
            self.config.min_score,
        ) {
            Ok(hits) => {
                debug!("Retrieved {} grounding hits", hits.len());
                hits
            }
            Err(e) => {
                warn!("Vector search failed, degrading to no grounding: {}", e);
                vec![]
            }
        }
    }

    /// Embed and index a persisted chat message
    pub async fn index_message(
        &self,
        tenant_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let vector = self.provider.embed(content).await?;
        self.index.index_message(tenant_id, message_id, content, &vector)
    }

    /// Embed and index a campaign; used by the indexing path, not retrieval
    pub async fn index_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        name: &str,
        platform: &str,
    ) -> Result<()> {
        let content = format!("{} campaign on {}", name, platform);
        let vector = self.provider.embed(&content).await?;
        self.index
            .index_campaign(tenant_id, campaign_id, name, platform, &vector)
    }
}
