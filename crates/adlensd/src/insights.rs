//! Aggregate statistics and comparative observations over result rows.
//!
//! Everything here is recomputed per call from the rows at hand. Output is
//! deterministic for identical input: rows are visited in order and exact
//! ties keep the first occurrence.

use adlens_common::models::{InsightReport, MetricStats, ResultRow};
use serde_json::Value;

/// Columns that identify rather than measure
fn is_identifier_column(name: &str) -> bool {
    name == "id" || name.ends_with("_id") || name == "date" || name == "created_at"
}

/// Rate-type metrics are compared per-entity as ratios, count-type as sums
fn is_rate_metric(name: &str) -> bool {
    name.contains("ctr") || name.contains("rate") || name.contains("avg")
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// The human-facing label for a row, if it has one
fn entity_label(row: &ResultRow) -> Option<String> {
    for key in ["name", "campaign_name", "campaign_id", "platform"] {
        if let Some(Value::String(label)) = row.get(key) {
            return Some(label.clone());
        }
    }
    None
}

/// Compute per-metric stats and, with multiple labelled entities,
/// comparative sentences
pub fn extract(rows: &[ResultRow]) -> InsightReport {
    let mut stats: Vec<MetricStats> = Vec::new();

    if rows.is_empty() {
        return InsightReport {
            stats,
            sentences: Vec::new(),
        };
    }

    // Metric set comes from the first row; executors return uniform rows
    let metric_keys: Vec<String> = rows[0]
        .keys()
        .filter(|k| !is_identifier_column(k))
        .filter(|k| rows[0].get(*k).and_then(numeric).is_some())
        .cloned()
        .collect();

    for key in &metric_keys {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(key).and_then(numeric))
            .collect();
        if values.is_empty() {
            continue;
        }
        let total: f64 = values.iter().sum();
        let minimum = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let maximum = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        stats.push(MetricStats {
            metric: key.clone(),
            average: total / values.len() as f64,
            minimum,
            maximum,
            total,
        });
    }

    let sentences = comparative_sentences(rows, &metric_keys);

    InsightReport { stats, sentences }
}

fn comparative_sentences(rows: &[ResultRow], metric_keys: &[String]) -> Vec<String> {
    let labelled: Vec<(String, &ResultRow)> = rows
        .iter()
        .filter_map(|row| entity_label(row).map(|label| (label, row)))
        .collect();
    if labelled.len() < 2 {
        return Vec::new();
    }

    let mut sentences = Vec::new();

    if let Some(rate_key) = metric_keys.iter().find(|k| is_rate_metric(k)) {
        if let Some((label, value)) = leader(&labelled, rate_key, true) {
            sentences.push(format!(
                "{} has the highest {} at {:.1}%",
                label,
                rate_key,
                value * 100.0
            ));
        }
    }

    if let Some(count_key) = metric_keys
        .iter()
        .find(|k| !is_rate_metric(k))
    {
        if let Some((top, top_value)) = leader(&labelled, count_key, true) {
            sentences.push(format!(
                "{} leads on {} with {:.0}",
                top, count_key, top_value
            ));
        }
        if let Some((bottom, bottom_value)) = leader(&labelled, count_key, false) {
            sentences.push(format!(
                "{} has the lowest {} with {:.0}",
                bottom, count_key, bottom_value
            ));
        }
    }

    sentences
}

/// First-occurrence-wins extremum over labelled rows
fn leader<'a>(
    labelled: &'a [(String, &ResultRow)],
    key: &str,
    highest: bool,
) -> Option<(&'a str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (label, row) in labelled {
        let Some(value) = row.get(key).and_then(numeric) else {
            continue;
        };
        match best {
            None => best = Some((label, value)),
            Some((_, current)) => {
                let better = if highest {
                    value > current
                } else {
                    value < current
                };
                if better {
                    best = Some((label, value));
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> ResultRow {
        let mut row = ResultRow::new();
        for (key, value) in pairs {
            row.insert(key.to_string(), value.clone());
        }
        row
    }

    #[test]
    fn test_stats_over_numeric_columns() {
        let rows = vec![
            row(&[("name", json!("A")), ("clicks", json!(10))]),
            row(&[("name", json!("B")), ("clicks", json!(30))]),
        ];
        let report = extract(&rows);
        let clicks = report
            .stats
            .iter()
            .find(|s| s.metric == "clicks")
            .unwrap();
        assert_eq!(clicks.total, 40.0);
        assert_eq!(clicks.average, 20.0);
        assert_eq!(clicks.minimum, 10.0);
        assert_eq!(clicks.maximum, 30.0);
    }

    #[test]
    fn test_identifier_columns_excluded() {
        let rows = vec![row(&[
            ("campaign_id", json!("c-1")),
            ("id", json!(7)),
            ("clicks", json!(5)),
        ])];
        let report = extract(&rows);
        assert_eq!(report.stats.len(), 1);
        assert_eq!(report.stats[0].metric, "clicks");
    }

    #[test]
    fn test_comparative_sentences_for_multiple_entities() {
        let rows = vec![
            row(&[
                ("name", json!("Spring Sale")),
                ("clicks", json!(50)),
                ("ctr", json!(0.05)),
            ]),
            row(&[
                ("name", json!("Brand Push")),
                ("clicks", json!(40)),
                ("ctr", json!(0.02)),
            ]),
        ];
        let report = extract(&rows);
        assert!(report
            .sentences
            .iter()
            .any(|s| s.contains("Spring Sale has the highest ctr at 5.0%")));
        assert!(report
            .sentences
            .iter()
            .any(|s| s.contains("Spring Sale leads on clicks with 50")));
        assert!(report
            .sentences
            .iter()
            .any(|s| s.contains("Brand Push has the lowest clicks with 40")));
    }

    #[test]
    fn test_single_entity_yields_no_comparisons() {
        let rows = vec![row(&[("name", json!("Solo")), ("clicks", json!(9))])];
        let report = extract(&rows);
        assert!(report.sentences.is_empty());
        assert_eq!(report.stats.len(), 1);
    }

    #[test]
    fn test_exact_tie_keeps_first_occurrence() {
        let rows = vec![
            row(&[("name", json!("First")), ("clicks", json!(10))]),
            row(&[("name", json!("Second")), ("clicks", json!(10))]),
        ];
        let report = extract(&rows);
        assert!(report
            .sentences
            .iter()
            .any(|s| s.contains("First leads on clicks")));
        assert!(report
            .sentences
            .iter()
            .any(|s| s.contains("First has the lowest clicks")));
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let rows = vec![
            row(&[("name", json!("A")), ("clicks", json!(1)), ("cost", json!(2.5))]),
            row(&[("name", json!("B")), ("clicks", json!(3)), ("cost", json!(0.5))]),
        ];
        let a = extract(&rows);
        let b = extract(&rows);
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.sentences, b.sentences);
    }

    #[test]
    fn test_empty_rows() {
        let report = extract(&[]);
        assert!(report.stats.is_empty());
        assert!(report.sentences.is_empty());
    }
}
