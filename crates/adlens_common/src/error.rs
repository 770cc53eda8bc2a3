//! Typed pipeline failures.
//!
//! Every external-call failure is caught at its own component boundary and
//! converted into one of these variants; the orchestrator consumes them and
//! decides whether to degrade, retry through the ladder, or give up. Only
//! ladder exhaustion ever reaches the user, and then only as the generic
//! message below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input to the classifier; treated as a general question
    #[error("classification failed: {0}")]
    Classification(String),

    /// Embedding or vector lookup unreachable; degrade to no-grounding path
    #[error("retrieval unavailable: {0}")]
    Retrieval(String),

    /// Text-generation provider unreachable or timed out
    #[error("generation provider failed: {0}")]
    Generation(String),

    /// Generated statement was not read-only or could not be tenant-scoped
    #[error("generated statement rejected: {0}")]
    Validation(String),

    /// Statement failed at execution time
    #[error("statement execution failed: {0}")]
    Execution(String),

    /// Answer cache unreachable; treated as a miss, never fatal
    #[error("answer cache unavailable: {0}")]
    Cache(String),

    /// Summary store unreachable; treated as a miss, never fatal
    #[error("summary store unavailable: {0}")]
    Summary(String),

    /// Underlying relational store failure outside the paths above
    #[error("store error: {0}")]
    Store(String),
}

/// The only failure text a user ever sees. Carries no statement text,
/// stack traces, or provider error bodies.
pub const USER_SAFE_FAILURE: &str =
    "I couldn't retrieve that data - please try rephrasing your question.";
