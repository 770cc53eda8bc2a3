//! Answer cache keyed by a digest of (tenant, normalized question).
//!
//! The tenant id is part of the hashed input, not merely a lookup filter, so
//! two tenants asking the identical question can never share an entry even
//! under a lookup bug. A store failure is logged and treated as a miss; the
//! cache is never allowed to fail a request.

use adlens_common::models::AnswerPayload;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::classifier::Classifier;
use crate::normalizer::normalize;
use crate::store::MetricsStore;

/// Deterministic one-way digest over tenant id and normalized question
pub fn question_hash(tenant_id: &str, normalized_question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized_question.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct AnswerCache {
    store: MetricsStore,
    ttl: Duration,
}

impl AnswerCache {
    pub fn new(store: MetricsStore, ttl_hours: i64) -> Self {
        Self {
            store,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Look up a cached answer. Complex questions always miss: correctness
    /// over speed. A hit increments the entry's hit count.
    pub fn get(
        &self,
        tenant_id: &str,
        question: &str,
        classifier: &Classifier,
    ) -> Option<AnswerPayload> {
        if classifier.is_complex_question(question) {
            debug!("Cache bypassed for complex question");
            return None;
        }

        let normalized = normalize(question);
        let hash = question_hash(tenant_id, &normalized);

        match self.lookup(tenant_id, &hash) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Answer cache unavailable, treating as miss: {}", e);
                None
            }
        }
    }

    fn lookup(&self, tenant_id: &str, hash: &str) -> Result<Option<AnswerPayload>> {
        let conn = self.store.lock();

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT payload, expires_at FROM answer_cache
                 WHERE question_hash = ? AND tenant_id = ?",
                params![hash, tenant_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload_json, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = expires_at.parse()?;
        if Utc::now() > expires_at {
            // Logically evicted; purge_expired deletes it later
            return Ok(None);
        }

        conn.execute(
            "UPDATE answer_cache SET hit_count = hit_count + 1 WHERE question_hash = ?",
            params![hash],
        )?;

        let payload: AnswerPayload = serde_json::from_str(&payload_json)?;
        Ok(Some(payload))
    }

    /// Store a computed answer. Upsert is atomic on the hash key; concurrent
    /// identical requests may both write and last-write-wins is fine since
    /// the payload is idempotent.
    pub fn put(&self, tenant_id: &str, question: &str, payload: &AnswerPayload) -> Result<()> {
        let normalized = normalize(question);
        let hash = question_hash(tenant_id, &normalized);
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let payload_json = serde_json::to_string(payload)?;
        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO answer_cache
             (question_hash, tenant_id, normalized_question, payload, created_at, expires_at, hit_count)
             VALUES (?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(question_hash) DO UPDATE SET
                 payload = excluded.payload,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at",
            params![
                hash,
                tenant_id,
                normalized,
                payload_json,
                now.to_rfc3339(),
                expires_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Delete entries past their expiry. Reads already ignore them; this
    /// keeps the table from growing without bound.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.store.lock();
        let deleted = conn.execute(
            "DELETE FROM answer_cache WHERE expires_at < ?",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(deleted)
    }
}
