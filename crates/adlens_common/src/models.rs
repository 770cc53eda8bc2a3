//! Value types shared across the pipeline.
//!
//! Everything that crosses a component boundary is an owned, typed struct:
//! cache entries, summary rows, embedding records, classifier output,
//! generated statements, insights, and the answer stream items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation window for precomputed performance summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
        };
        write!(f, "{}", s)
    }
}

impl TimeWindow {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            _ => None,
        }
    }
}

/// Which attempt produced an executed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    Primary,
    RetryNonSelect,
    RetrySyntax,
    HardcodedFallback,
}

impl std::fmt::Display for QueryOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Primary => "primary",
            Self::RetryNonSelect => "retry_non_select",
            Self::RetrySyntax => "retry_syntax",
            Self::HardcodedFallback => "hardcoded_fallback",
        };
        write!(f, "{}", s)
    }
}

/// Generated statement, alive only within one pipeline invocation
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub text: String,
    pub attempt: u8,
    pub origin: QueryOrigin,
}

/// Relative time range extracted from the question ("last 7 days")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub value: u32,
    pub unit: String,
}

/// Classifier output, recomputed on every call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    /// Metric vocabulary tokens found in the question
    pub metrics: Vec<String>,
    /// Explicit relative range, if one was phrased
    pub timeframe: Option<Timeframe>,
    /// Platform names found in the question
    pub platforms: Vec<String>,
    /// Comparison or superlative phrasing present
    pub comparison: bool,
    /// Campaign the question names, if any
    pub specific_entity: Option<String>,
}

/// One row from the executor, column name to JSON value
pub type ResultRow = serde_json::Map<String, serde_json::Value>;

/// Payload stored per (tenant, question hash) on a successful slow-path answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub rows: Vec<ResultRow>,
    /// The statement that produced the rows
    pub sql: String,
    pub origin: QueryOrigin,
    pub fallback_used: bool,
    pub insight_sentences: Vec<String>,
}

/// A cached answer row. Immutable except hit_count once written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub tenant_id: String,
    pub question_hash: String,
    pub normalized_question: String,
    pub payload: AnswerPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
}

impl CacheEntry {
    /// Logical eviction: expired entries are ignored, not necessarily deleted
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Precomputed per-tenant aggregate, refreshed out-of-band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub tenant_id: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub platform: String,
    pub window: TimeWindow,
    pub total_impressions: i64,
    pub total_clicks: i64,
    pub total_cost: f64,
    pub total_conversions: i64,
    /// Click-through rate derived at refresh time, 0.0 when no impressions
    pub avg_ctr: f64,
    pub refreshed_at: DateTime<Utc>,
}

/// What kind of entity an embedding record indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    ChatMessage,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::ChatMessage => "chat_message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "campaign" => Some(Self::Campaign),
            "chat_message" => Some(Self::ChatMessage),
            _ => None,
        }
    }
}

/// Immutable indexed embedding, looked up by similarity only
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: String,
    pub tenant_id: String,
    pub entity_type: EntityType,
    pub source_id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A ranked retrieval result above the similarity threshold
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub record: EmbeddingRecord,
    pub score: f32,
}

/// Aggregate statistics for one numeric metric column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub metric: String,
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub total: f64,
}

/// Stats plus rendered comparative observations, recomputed per call
#[derive(Debug, Clone, Default)]
pub struct InsightReport {
    pub stats: Vec<MetricStats>,
    pub sentences: Vec<String>,
}

/// Persisted assistant/user message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub tenant_id: String,
    pub role: String,
    pub content: String,
    /// False when the caller disconnected mid-stream
    pub complete: bool,
    pub created_at: DateTime<Utc>,
}

/// Items emitted on the caller-facing stream: text chunks in order,
/// terminated by exactly one Done marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerChunk {
    Text(String),
    Done,
}

/// Final outcome for one answered question
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub text: String,
    pub from_cache: bool,
    pub fallback_used: bool,
    /// False when the answer came from general knowledge with no data backing
    pub grounded: bool,
}
