//! Question classification.
//!
//! Decides whether a question needs live campaign data at all, whether it is
//! complex (must bypass the cache and summary shortcuts), and which metrics,
//! platforms, and time windows it references. All matching runs against the
//! normalized form of the question.

use adlens_common::models::{QueryParams, TimeWindow, Timeframe};
use regex::Regex;

use crate::normalizer::normalize;

/// Metric vocabulary. Any of these marks a question as metric-bearing.
const METRIC_TERMS: &[&str] = &[
    "impressions",
    "clicks",
    "click-through",
    "ctr",
    "cost",
    "spend",
    "cpc",
    "cpm",
    "conversions",
    "conversion rate",
    "acos",
    "roas",
    "sales",
    "revenue",
];

/// Platform names a question can reference
const PLATFORM_NAMES: &[&str] = &["amazon", "google", "facebook", "instagram", "tiktok", "walmart"];

/// Performance phrasing that signals a data question
const PERFORMANCE_PHRASES: &[&str] = &[
    "performance",
    "performing",
    "how are my",
    "how did my",
    "how is my",
    "doing",
    "results",
];

/// Comparison and superlative phrasing
const COMPARISON_PHRASES: &[&str] = &[
    "best", "worst", "top", "bottom", "most", "least", "highest", "lowest", "compare",
    "comparison", "versus", " vs ",
];

/// Time-window phrasing that signals a data question
const TIME_PHRASES: &[&str] = &[
    "today",
    "yesterday",
    "this week",
    "last week",
    "this month",
    "last month",
    "this quarter",
    "last quarter",
    "daily",
    "weekly",
    "monthly",
    "quarterly",
];

/// Indicator phrases for complex questions. These must always take the full
/// generation path; cached or precomputed answers would be wrong or stale.
const COMPLEX_PHRASES: &[&str] = &[
    "campaign id",
    "campaign named",
    "campaign called",
    "correlation",
    "correlate",
    "trend",
    "over time",
    "week over week",
    "month over month",
    "raw data",
    "exact",
    "precise",
    "breakdown by",
];

/// Classifier with its patterns compiled once at construction
pub struct Classifier {
    time_range_re: Regex,
    long_id_re: Regex,
    named_campaign_re: Regex,
    quoted_campaign_re: Regex,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        // Patterns are fixed literals; compilation cannot fail
        Self {
            time_range_re: Regex::new(r"last\s+(\d+)\s+(day|week|month|year)s?\b").unwrap(),
            long_id_re: Regex::new(r"\b\d{6,}\b").unwrap(),
            named_campaign_re: Regex::new(
                r#"campaign (?:named|called)\s+['"]?([^'"]+?)['"]?$"#,
            )
            .unwrap(),
            quoted_campaign_re: Regex::new(r#"['"]([^'"]+)['"] campaign"#).unwrap(),
        }
    }

    /// True when the question asks about campaign data rather than being a
    /// generic conversational message.
    pub fn is_data_question(&self, text: &str) -> bool {
        let q = normalize(text);

        if q.contains("campaign") || q.contains(" ads") || q.starts_with("ads ") {
            return true;
        }

        let has_metric = METRIC_TERMS.iter().any(|t| q.contains(t));
        let has_performance = PERFORMANCE_PHRASES.iter().any(|t| q.contains(t));
        let has_platform = PLATFORM_NAMES.iter().any(|t| q.contains(t));
        let has_comparison = COMPARISON_PHRASES.iter().any(|t| q.contains(t));
        let has_time = TIME_PHRASES.iter().any(|t| q.contains(t)) || self.time_range_re.is_match(&q);

        has_metric || has_platform || (has_performance && (has_time || has_comparison))
    }

    /// True when the question needs exact live computation: correctness over
    /// speed, so cache and summary shortcuts are bypassed.
    pub fn is_complex_question(&self, text: &str) -> bool {
        let q = normalize(text);

        if COMPLEX_PHRASES.iter().any(|t| q.contains(t)) {
            return true;
        }

        // A long bare numeric id is a specific-entity reference
        self.long_id_re.is_match(&q)
    }

    /// Which summary windows the question references. Defaults to monthly.
    pub fn detect_time_windows(&self, text: &str) -> Vec<TimeWindow> {
        let q = normalize(text);
        let mut windows = Vec::new();

        if ["daily", "today", "yesterday", "per day", "each day"]
            .iter()
            .any(|t| q.contains(t))
        {
            windows.push(TimeWindow::Daily);
        }
        if ["weekly", "this week", "last week", "per week"]
            .iter()
            .any(|t| q.contains(t))
        {
            windows.push(TimeWindow::Weekly);
        }
        if ["monthly", "this month", "last month", "per month"]
            .iter()
            .any(|t| q.contains(t))
        {
            windows.push(TimeWindow::Monthly);
        }
        if q.contains("quarter") {
            windows.push(TimeWindow::Quarterly);
        }

        if windows.is_empty() {
            windows.push(TimeWindow::Monthly);
        }
        windows
    }

    /// Metric vocabulary gate for the summary-store shortcut
    pub fn contains_metric_terms(&self, text: &str) -> bool {
        let q = normalize(text);
        METRIC_TERMS.iter().any(|t| q.contains(t))
    }

    /// Extract structured parameters used in prompts and context assembly
    pub fn extract_query_params(&self, text: &str) -> QueryParams {
        let q = normalize(text);

        let metrics: Vec<String> = METRIC_TERMS
            .iter()
            .filter(|t| q.contains(*t))
            .map(|t| t.to_string())
            .collect();

        let platforms: Vec<String> = PLATFORM_NAMES
            .iter()
            .filter(|t| q.contains(*t))
            .map(|t| t.to_string())
            .collect();

        let timeframe = self.time_range_re.captures(&q).and_then(|caps| {
            let value = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str().to_string();
            Some(Timeframe { value, unit })
        });

        let comparison = COMPARISON_PHRASES.iter().any(|t| q.contains(t));

        let specific_entity = self
            .named_campaign_re
            .captures(&q)
            .or_else(|| self.quoted_campaign_re.captures(&q))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());

        QueryParams {
            metrics,
            timeframe,
            platforms,
            comparison,
            specific_entity,
        }
    }
}
