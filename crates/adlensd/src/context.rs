//! Prompt assembly for the final response generation.
//!
//! This is the only surface the response generator ever sees: question,
//! extracted parameters, formatted rows, insight sentences, retrieval
//! snippets, instruction block. Raw SQL and internal error detail never
//! pass through here.

use adlens_common::config::ContextConfig;
use adlens_common::models::{InsightReport, QueryParams, ResultRow, RetrievalHit, SummaryRow};
use serde_json::Value;
use tracing::debug;

const INSTRUCTIONS: &str = "\
Answer the question using only the data above. \
Be concise and concrete, citing the numbers that support each claim. \
If the data above is insufficient to answer, say so plainly instead of guessing.";

const NO_DATA_INSTRUCTIONS: &str = "\
No account data matched this question. \
Answer from general advertising knowledge, and state clearly that the answer \
is not based on the user's own campaign data.";

pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Build the full grounded context block
    pub fn assemble(
        &self,
        question: &str,
        params: &QueryParams,
        rows: &[ResultRow],
        insights: &InsightReport,
        hits: &[RetrievalHit],
    ) -> String {
        let shown = rows.len().min(self.config.max_rows);
        let mut row_lines: Vec<String> = rows[..shown].iter().map(format_row).collect();
        if rows.len() > shown {
            row_lines.push(format!("(showing first {} of {} rows)", shown, rows.len()));
        }

        loop {
            let block = self.render(question, params, &row_lines, insights, hits);
            if block.len() <= self.config.max_bytes || row_lines.is_empty() {
                if block.len() > self.config.max_bytes {
                    debug!("context still over budget with no rows left to drop");
                }
                return block;
            }
            row_lines.pop();
        }
    }

    /// Context for a summary-store hit. Summaries are already aggregated,
    /// so each row renders as one labelled line.
    pub fn assemble_from_summaries(
        &self,
        question: &str,
        params: &QueryParams,
        summaries: &[SummaryRow],
        insights: &InsightReport,
    ) -> String {
        let lines: Vec<String> = summaries
            .iter()
            .take(self.config.max_rows)
            .map(|s| {
                format!(
                    "- {} ({}, {}): impressions {}, clicks {}, cost {}, ctr {}",
                    s.campaign_name,
                    s.platform,
                    s.window,
                    s.total_impressions,
                    s.total_clicks,
                    format_currency(s.total_cost),
                    format_percent(s.avg_ctr),
                )
            })
            .collect();
        self.render(question, params, &lines, insights, &[])
    }

    /// Context when retrieval found nothing above threshold
    pub fn no_data(&self, question: &str) -> String {
        format!("Question: {}\n\n{}", question, NO_DATA_INSTRUCTIONS)
    }

    fn render(
        &self,
        question: &str,
        params: &QueryParams,
        row_lines: &[String],
        insights: &InsightReport,
        hits: &[RetrievalHit],
    ) -> String {
        let mut block = String::new();
        block.push_str(&format!("Question: {}\n", question));

        if !params.metrics.is_empty() || !params.platforms.is_empty() || params.timeframe.is_some()
        {
            block.push_str("Detected: ");
            let mut parts: Vec<String> = Vec::new();
            if !params.metrics.is_empty() {
                parts.push(format!("metrics [{}]", params.metrics.join(", ")));
            }
            if !params.platforms.is_empty() {
                parts.push(format!("platforms [{}]", params.platforms.join(", ")));
            }
            if let Some(tf) = &params.timeframe {
                parts.push(format!("last {} {}s", tf.value, tf.unit));
            }
            if params.comparison {
                parts.push("comparison".to_string());
            }
            block.push_str(&parts.join(", "));
            block.push('\n');
        }

        if !row_lines.is_empty() {
            block.push_str("\nData:\n");
            for line in row_lines {
                block.push_str(line);
                block.push('\n');
            }
        }

        if !insights.sentences.is_empty() {
            block.push_str("\nObservations:\n");
            for sentence in &insights.sentences {
                block.push_str("- ");
                block.push_str(sentence);
                block.push('\n');
            }
        }

        if !hits.is_empty() {
            block.push_str("\nRelated context:\n");
            for hit in hits.iter().take(3) {
                block.push_str(&format!("- {}\n", hit.record.content));
            }
        }

        block.push('\n');
        block.push_str(INSTRUCTIONS);
        block
    }
}

/// One result row as a labelled, unit-formatted line
fn format_row(row: &ResultRow) -> String {
    let label = ["name", "campaign_name", "campaign_id", "platform"]
        .iter()
        .find_map(|key| match row.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        });

    let mut parts: Vec<String> = Vec::new();
    for (key, value) in row {
        if label.as_deref() == value.as_str() {
            continue;
        }
        let rendered = match value {
            Value::Number(_) => format_metric(key, value.as_f64().unwrap_or(0.0)),
            Value::String(s) => s.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        parts.push(format!("{} {}", key, rendered));
    }

    match label {
        Some(label) => format!("- {}: {}", label, parts.join(", ")),
        None => format!("- {}", parts.join(", ")),
    }
}

/// Unit formatting by column name: currency 2dp, rates as percent 1dp,
/// ratios with an "x" suffix, counts as plain integers.
fn format_metric(key: &str, value: f64) -> String {
    let k = key.to_lowercase();
    if k.contains("cost") || k.contains("spend") || k.contains("budget") || k.contains("cpc") {
        format_currency(value)
    } else if k.contains("ctr") || k.contains("rate") {
        format_percent(value)
    } else if k.contains("roas") || k.contains("ratio") {
        format!("{:.1}x", value)
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn format_currency(value: f64) -> String {
    format!("${:.2}", value)
}

fn format_percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
