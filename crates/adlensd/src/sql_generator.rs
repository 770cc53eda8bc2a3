//! Natural-language-to-SQL generation.
//!
//! Pure text-to-text: builds one generation request under a strict output
//! contract, then cleans the raw reply (fences, leading prose, trailing
//! semicolon). Never executes anything; the guard decides what runs.

use adlens_common::models::{GeneratedQuery, QueryOrigin, QueryParams};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::generation_client::GenerationProvider;

/// Fixed schema block shown to the model. Only these two tables are ever
/// queryable; the guard enforces the same allowlist.
const SCHEMA_DESCRIPTION: &str = "\
Tables:
  campaigns(id TEXT, tenant_id TEXT, name TEXT, platform TEXT, status TEXT, created_at TEXT)
  campaign_metrics(id INTEGER, tenant_id TEXT, campaign_id TEXT, platform TEXT, date TEXT,
                   impressions INTEGER, clicks INTEGER, cost REAL, conversions INTEGER)
Dates are ISO strings (YYYY-MM-DD). Dialect is SQLite.";

/// Which corrective instruction a retry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corrective {
    None,
    NonSelect,
    Syntax,
}

impl Corrective {
    pub fn origin(self) -> QueryOrigin {
        match self {
            Self::None => QueryOrigin::Primary,
            Self::NonSelect => QueryOrigin::RetryNonSelect,
            Self::Syntax => QueryOrigin::RetrySyntax,
        }
    }
}

/// Strip fences and prose around the statement the model was asked for
pub fn clean_generated_sql(raw: &str) -> String {
    let mut text = raw.trim();

    // Markdown code fence, with or without a language tag
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("sql").or(after.strip_prefix("SQL")).unwrap_or(after);
        if let Some(end) = after.find("```") {
            text = after[..end].trim();
        } else {
            text = after.trim();
        }
    }

    // Discard prose before the first SELECT
    let lowered = text.to_lowercase();
    if let Some(pos) = lowered.find("select") {
        text = &text[pos..];
    }

    text.trim().trim_end_matches(';').trim().to_string()
}

/// Builds generation requests and post-processes replies
pub struct SqlGenerator {
    provider: Arc<dyn GenerationProvider>,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// Assemble the full request text
    pub fn build_prompt(
        &self,
        question: &str,
        tenant_id: &str,
        params: &QueryParams,
        conversation: Option<&str>,
        corrective: Corrective,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("Translate the question into one SQLite SELECT statement.\n\n");
        prompt.push_str(SCHEMA_DESCRIPTION);
        prompt.push_str("\n\nRules:\n");
        prompt.push_str("- Output only the SQL statement. No prose, no markdown.\n");
        prompt.push_str("- Exactly one SELECT. Never modify data.\n");
        prompt.push_str(&format!(
            "- Always filter with tenant_id = '{}'.\n",
            tenant_id
        ));
        prompt.push_str("- No subqueries, no CTEs, no UNION. Query a single table.\n");

        if !params.metrics.is_empty() {
            prompt.push_str(&format!(
                "\nMetrics mentioned: {}.",
                params.metrics.join(", ")
            ));
        }
        if !params.platforms.is_empty() {
            prompt.push_str(&format!(
                "\nPlatforms mentioned: {}.",
                params.platforms.join(", ")
            ));
        }
        if let Some(tf) = &params.timeframe {
            prompt.push_str(&format!("\nTime range: last {} {}s.", tf.value, tf.unit));
        }

        if let Some(context) = conversation {
            if !context.is_empty() {
                prompt.push_str("\n\nConversation so far:\n");
                prompt.push_str(context);
            }
        }

        match corrective {
            Corrective::None => {}
            Corrective::NonSelect => {
                prompt.push_str(
                    "\n\nYour previous reply was not a SELECT statement. \
                     Reply with exactly one SELECT statement and nothing else.",
                );
            }
            Corrective::Syntax => {
                prompt.push_str(
                    "\n\nYour previous statement failed with a syntax error. \
                     Reply with one syntactically valid SQLite SELECT statement and nothing else.",
                );
            }
        }

        prompt.push_str(&format!("\n\nQuestion: {}", question));
        prompt
    }

    /// One generation attempt: request, clean, tag with origin
    pub async fn generate(
        &self,
        question: &str,
        tenant_id: &str,
        params: &QueryParams,
        conversation: Option<&str>,
        corrective: Corrective,
        attempt: u8,
    ) -> Result<GeneratedQuery> {
        let prompt = self.build_prompt(question, tenant_id, params, conversation, corrective);
        debug!(
            "SQL generation attempt {} ({:?}), payload {} bytes",
            attempt,
            corrective,
            prompt.len()
        );

        let raw = self.provider.generate(&prompt).await?;
        let text = clean_generated_sql(&raw);

        Ok(GeneratedQuery {
            text,
            attempt,
            origin: corrective.origin(),
        })
    }
}
