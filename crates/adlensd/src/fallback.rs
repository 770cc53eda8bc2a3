//! Bounded recovery when a generated query fails validation or execution.
//!
//! The ladder is an explicit state machine, not nested retries: one primary
//! generation, at most one corrective regeneration, then one hardcoded
//! safety query, then a user-safe failure. It can never loop.

use adlens_common::error::{PipelineError, USER_SAFE_FAILURE};
use adlens_common::models::{QueryOrigin, QueryParams, ResultRow};
use tracing::{info, warn};

use crate::executor::{ExecOutcome, QueryExecutor};
use crate::sql_generator::{Corrective, SqlGenerator};
use crate::sql_guard::{scope_query, GuardOutcome};

/// Last-resort statement: top campaigns by traffic. The guard injects the
/// tenant filter structurally, same as for generated queries.
const HARDCODED_QUERY: &str = "SELECT campaign_id, SUM(clicks) AS total_clicks, \
     SUM(impressions) AS total_impressions, SUM(cost) AS total_cost \
     FROM campaign_metrics GROUP BY campaign_id ORDER BY total_clicks DESC LIMIT 5";

/// Which recoverable failure moved the ladder forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    NonSelect,
    Syntax,
}

impl FailureKind {
    fn corrective(self) -> Corrective {
        match self {
            Self::NonSelect => Corrective::NonSelect,
            Self::Syntax => Corrective::Syntax,
        }
    }
}

/// Ladder states, in the only order they can be visited
#[derive(Debug)]
enum LadderState {
    Primary,
    Retry(FailureKind),
    Hardcoded,
}

/// What the ladder hands back to the orchestrator on success
#[derive(Debug, Clone, PartialEq)]
pub struct LadderResult {
    pub rows: Vec<ResultRow>,
    pub sql: String,
    pub origin: QueryOrigin,
    pub fallback_used: bool,
}

pub struct FallbackLadder<'a> {
    generator: &'a SqlGenerator,
    executor: &'a QueryExecutor,
}

impl<'a> FallbackLadder<'a> {
    pub fn new(generator: &'a SqlGenerator, executor: &'a QueryExecutor) -> Self {
        Self {
            generator,
            executor,
        }
    }

    /// Drive the ladder to completion for one question.
    ///
    /// `context_available` gates recovery: without prior conversation there
    /// is nothing to steer a corrective prompt with, so the first failure is
    /// final.
    pub async fn run(
        &self,
        question: &str,
        tenant_id: &str,
        params: &QueryParams,
        conversation: Option<&str>,
        context_available: bool,
    ) -> Result<LadderResult, PipelineError> {
        let mut state = LadderState::Primary;

        loop {
            match state {
                LadderState::Primary => {
                    match self
                        .attempt(question, tenant_id, params, conversation, Corrective::None, 1)
                        .await?
                    {
                        AttemptEnd::Rows(result) => return Ok(result),
                        AttemptEnd::Recoverable(kind) => {
                            if !context_available {
                                warn!("query failed with no conversation context, not retrying");
                                return Err(PipelineError::Generation(
                                    USER_SAFE_FAILURE.to_string(),
                                ));
                            }
                            info!("primary query failed ({:?}), corrective retry", kind);
                            state = LadderState::Retry(kind);
                        }
                    }
                }
                LadderState::Retry(kind) => {
                    match self
                        .attempt(
                            question,
                            tenant_id,
                            params,
                            conversation,
                            kind.corrective(),
                            2,
                        )
                        .await?
                    {
                        AttemptEnd::Rows(result) => return Ok(result),
                        AttemptEnd::Recoverable(kind) => {
                            info!("corrective retry failed ({:?}), hardcoded fallback", kind);
                            state = LadderState::Hardcoded;
                        }
                    }
                }
                LadderState::Hardcoded => {
                    let scoped = match scope_query(HARDCODED_QUERY, tenant_id) {
                        GuardOutcome::Scoped(sql) => sql,
                        other => {
                            // The template is a constant; this only fires if
                            // the guard itself regresses.
                            warn!("hardcoded query rejected: {:?}", other);
                            return Err(PipelineError::Validation(
                                USER_SAFE_FAILURE.to_string(),
                            ));
                        }
                    };
                    return match self.executor.execute(&scoped) {
                        ExecOutcome::Success(rows) => Ok(LadderResult {
                            rows,
                            sql: scoped,
                            origin: QueryOrigin::HardcodedFallback,
                            fallback_used: true,
                        }),
                        outcome => {
                            warn!("hardcoded fallback failed: {:?}", outcome);
                            Err(PipelineError::Execution(USER_SAFE_FAILURE.to_string()))
                        }
                    };
                }
            }
        }
    }

    /// One generate-guard-execute round
    async fn attempt(
        &self,
        question: &str,
        tenant_id: &str,
        params: &QueryParams,
        conversation: Option<&str>,
        corrective: Corrective,
        attempt: u8,
    ) -> Result<AttemptEnd, PipelineError> {
        let generated = self
            .generator
            .generate(question, tenant_id, params, conversation, corrective, attempt)
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        let scoped = match scope_query(&generated.text, tenant_id) {
            GuardOutcome::Scoped(sql) => sql,
            GuardOutcome::RejectedNonSelect(reason) => {
                warn!("attempt {} rejected (non-select): {}", attempt, reason);
                return Ok(AttemptEnd::Recoverable(FailureKind::NonSelect));
            }
            GuardOutcome::RejectedSyntax(reason) => {
                warn!("attempt {} rejected (syntax): {}", attempt, reason);
                return Ok(AttemptEnd::Recoverable(FailureKind::Syntax));
            }
        };

        match self.executor.execute(&scoped) {
            ExecOutcome::Success(rows) => Ok(AttemptEnd::Rows(LadderResult {
                rows,
                sql: scoped,
                origin: generated.origin,
                fallback_used: false,
            })),
            ExecOutcome::NonSelect => Ok(AttemptEnd::Recoverable(FailureKind::NonSelect)),
            ExecOutcome::SyntaxError(message) => {
                warn!("attempt {} syntax error at execution: {}", attempt, message);
                Ok(AttemptEnd::Recoverable(FailureKind::Syntax))
            }
            ExecOutcome::Other(message) => {
                // Not a recoverable shape problem; regenerating the same
                // statement will not fix a missing column or a locked file.
                warn!("attempt {} execution error: {}", attempt, message);
                Err(PipelineError::Execution(USER_SAFE_FAILURE.to_string()))
            }
        }
    }
}

enum AttemptEnd {
    Rows(LadderResult),
    Recoverable(FailureKind),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation_client::{GenerationProvider, StreamEnd};
    use crate::store::MetricsStore;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a scripted sequence of replies and counts calls
    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
        }

        async fn generate_stream(
            &self,
            _prompt: &str,
            _tx: &tokio::sync::mpsc::Sender<String>,
        ) -> Result<StreamEnd> {
            Ok(StreamEnd::Complete(String::new()))
        }
    }

    fn seeded_store() -> MetricsStore {
        let store = MetricsStore::open_in_memory().unwrap();
        store
            .insert_campaign("t1", "c-1", "Spring Sale", "google")
            .unwrap();
        store
            .insert_metric_row("t1", "c-1", "google", "2026-08-01", 1000, 50, 25.0, 5)
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_primary_success_no_retry() {
        let provider = ScriptedProvider::new(&["SELECT name FROM campaigns"]);
        let generator = SqlGenerator::new(provider.clone());
        let executor = QueryExecutor::new(seeded_store(), 50);
        let ladder = FallbackLadder::new(&generator, &executor);

        let result = ladder
            .run("q", "t1", &QueryParams::default(), None, true)
            .await
            .unwrap();

        assert_eq!(result.origin, QueryOrigin::Primary);
        assert!(!result.fallback_used);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_prose_then_valid_retry() {
        let provider = ScriptedProvider::new(&[
            "Here is my analysis of your campaigns...",
            "SELECT name FROM campaigns",
        ]);
        let generator = SqlGenerator::new(provider.clone());
        let executor = QueryExecutor::new(seeded_store(), 50);
        let ladder = FallbackLadder::new(&generator, &executor);

        let result = ladder
            .run("q", "t1", &QueryParams::default(), Some("prior turns"), true)
            .await
            .unwrap();

        assert_eq!(result.origin, QueryOrigin::RetryNonSelect);
        assert!(!result.fallback_used);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_two_failures_reach_hardcoded() {
        let provider = ScriptedProvider::new(&[
            "Here is my analysis...",
            "Still not a statement, sorry.",
        ]);
        let generator = SqlGenerator::new(provider.clone());
        let executor = QueryExecutor::new(seeded_store(), 50);
        let ladder = FallbackLadder::new(&generator, &executor);

        let result = ladder
            .run("q", "t1", &QueryParams::default(), None, true)
            .await
            .unwrap();

        assert_eq!(result.origin, QueryOrigin::HardcodedFallback);
        assert!(result.fallback_used);
        assert_eq!(result.rows.len(), 1);
        // Bounded: exactly two generation calls, never more
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_no_context_fails_on_first_failure() {
        let provider = ScriptedProvider::new(&["I cannot write SQL today."]);
        let generator = SqlGenerator::new(provider.clone());
        let executor = QueryExecutor::new(seeded_store(), 50);
        let ladder = FallbackLadder::new(&generator, &executor);

        let err = ladder
            .run("q", "t1", &QueryParams::default(), None, false)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("rephrasing"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_syntax_failure_gets_syntax_corrective() {
        let provider = ScriptedProvider::new(&[
            "SELECT FROM WHERE GROUP",
            "SELECT name FROM campaigns",
        ]);
        let generator = SqlGenerator::new(provider.clone());
        let executor = QueryExecutor::new(seeded_store(), 50);
        let ladder = FallbackLadder::new(&generator, &executor);

        let result = ladder
            .run("q", "t1", &QueryParams::default(), None, true)
            .await
            .unwrap();

        assert_eq!(result.origin, QueryOrigin::RetrySyntax);
    }

    #[tokio::test]
    async fn test_other_error_is_terminal() {
        // Valid shape, but the column does not exist: not recoverable
        let provider = ScriptedProvider::new(&["SELECT no_such_column FROM campaigns"]);
        let generator = SqlGenerator::new(provider.clone());
        let executor = QueryExecutor::new(seeded_store(), 50);
        let ladder = FallbackLadder::new(&generator, &executor);

        let err = ladder
            .run("q", "t1", &QueryParams::default(), None, true)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Execution(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn test_hardcoded_template_passes_the_guard() {
        match scope_query(HARDCODED_QUERY, "t1") {
            GuardOutcome::Scoped(sql) => {
                assert!(sql.contains("tenant_id = 't1'"));
                assert!(sql.contains("GROUP BY campaign_id"));
            }
            other => panic!("hardcoded query rejected: {:?}", other),
        }
    }
}
