//! Execution of guarded queries against the metrics database.
//!
//! The guard has already proven the statement is a scoped SELECT; this layer
//! still refuses anything SQLite reports as writing, and classifies failures
//! so the fallback ladder can pick the right corrective retry.

use adlens_common::models::ResultRow;
use rusqlite::types::ValueRef;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::MetricsStore;

/// How one execution attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Rows came back (possibly zero)
    Success(Vec<ResultRow>),
    /// The statement would have written, or was not a query at all
    NonSelect,
    /// SQLite could not parse or prepare the statement
    SyntaxError(String),
    /// Anything else (missing column, type trouble, locked database)
    Other(String),
}

pub struct QueryExecutor {
    store: MetricsStore,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(store: MetricsStore, max_rows: usize) -> Self {
        Self { store, max_rows }
    }

    /// Run one already-scoped statement and collect up to `max_rows` rows
    pub fn execute(&self, sql: &str) -> ExecOutcome {
        let conn = self.store.lock();

        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(e) => return classify_prepare_error(e),
        };

        // Belt-and-braces after the guard: SQLite knows best whether a
        // prepared statement writes.
        if !stmt.readonly() {
            warn!("prepared statement is not read-only, refusing: {}", sql);
            return ExecOutcome::NonSelect;
        }

        let column_names: Vec<String> =
            stmt.column_names().iter().map(|n| n.to_string()).collect();

        let mut rows = match stmt.query([]) {
            Ok(rows) => rows,
            Err(e) => return ExecOutcome::Other(e.to_string()),
        };

        let mut collected: Vec<ResultRow> = Vec::new();
        loop {
            match rows.next() {
                Ok(Some(row)) => {
                    let mut out = ResultRow::new();
                    for (index, name) in column_names.iter().enumerate() {
                        let value = match row.get_ref(index) {
                            Ok(value_ref) => json_value(value_ref),
                            Err(e) => return ExecOutcome::Other(e.to_string()),
                        };
                        out.insert(name.clone(), value);
                    }
                    collected.push(out);
                    if collected.len() >= self.max_rows {
                        debug!("row cap {} reached, truncating result", self.max_rows);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => return ExecOutcome::Other(e.to_string()),
            }
        }

        ExecOutcome::Success(collected)
    }
}

fn classify_prepare_error(error: rusqlite::Error) -> ExecOutcome {
    let message = error.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("syntax error") || lowered.contains("incomplete input") {
        ExecOutcome::SyntaxError(message)
    } else if lowered.contains("readonly") || lowered.contains("not authorized") {
        ExecOutcome::NonSelect
    } else {
        ExecOutcome::Other(message)
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> MetricsStore {
        let store = MetricsStore::open_in_memory().unwrap();
        store
            .insert_campaign("t1", "c-1", "Spring Sale", "google")
            .unwrap();
        store
            .insert_campaign("t1", "c-2", "Brand Push", "facebook")
            .unwrap();
        store
            .insert_metric_row("t1", "c-1", "google", "2026-08-01", 1000, 50, 25.0, 5)
            .unwrap();
        store
            .insert_metric_row("t1", "c-2", "facebook", "2026-08-01", 2000, 40, 30.0, 2)
            .unwrap();
        store
    }

    #[test]
    fn test_select_returns_typed_rows() {
        let executor = QueryExecutor::new(seeded_store(), 50);
        let outcome = executor.execute(
            "SELECT name, platform FROM campaigns WHERE tenant_id = 't1' ORDER BY name",
        );
        let rows = match outcome {
            ExecOutcome::Success(rows) => rows,
            other => panic!("expected success, got {:?}", other),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Brand Push");
        assert_eq!(rows[1]["platform"], "google");
    }

    #[test]
    fn test_numeric_columns_stay_numeric() {
        let executor = QueryExecutor::new(seeded_store(), 50);
        let outcome = executor.execute(
            "SELECT clicks, cost FROM campaign_metrics WHERE tenant_id = 't1' AND campaign_id = 'c-1'",
        );
        let rows = match outcome {
            ExecOutcome::Success(rows) => rows,
            other => panic!("expected success, got {:?}", other),
        };
        assert_eq!(rows[0]["clicks"], 50);
        assert_eq!(rows[0]["cost"], 25.0);
    }

    #[test]
    fn test_zero_rows_is_still_success() {
        let executor = QueryExecutor::new(seeded_store(), 50);
        let outcome =
            executor.execute("SELECT name FROM campaigns WHERE tenant_id = 'nobody'");
        assert_eq!(outcome, ExecOutcome::Success(vec![]));
    }

    #[test]
    fn test_row_cap_truncates() {
        let executor = QueryExecutor::new(seeded_store(), 1);
        let outcome = executor.execute("SELECT name FROM campaigns WHERE tenant_id = 't1'");
        match outcome {
            ExecOutcome::Success(rows) => assert_eq!(rows.len(), 1),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_classified() {
        let executor = QueryExecutor::new(seeded_store(), 50);
        match executor.execute("SELECT nonsense FROM FROM campaigns") {
            ExecOutcome::SyntaxError(_) => {}
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_write_statement_refused() {
        let executor = QueryExecutor::new(seeded_store(), 50);
        let outcome = executor.execute("DELETE FROM campaigns");
        assert_eq!(outcome, ExecOutcome::NonSelect);

        // The data is untouched
        let check = executor.execute("SELECT name FROM campaigns WHERE tenant_id = 't1'");
        match check {
            ExecOutcome::Success(rows) => assert_eq!(rows.len(), 2),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_column_is_other() {
        let executor = QueryExecutor::new(seeded_store(), 50);
        match executor.execute("SELECT no_such_column FROM campaigns") {
            ExecOutcome::Other(_) => {}
            other => panic!("expected other, got {:?}", other),
        }
    }
}
