//! Error taxonomy for the analysis engine.
//!
//! Job-level errors surface through the public job interface. Pipeline-level
//! failures never escalate on their own: they are recorded per pipeline and the
//! job completes with the affected section marked unavailable.

use crate::models::{JobStatus, PipelineKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the job interface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Bad input; the job was never created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown job id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A lifecycle mutation that the state machine does not allow.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// The review corpus could not be acquired.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Result requested before the job completed.
    #[error("job {job_id} is not ready (status: {status})")]
    NotReady { job_id: String, status: JobStatus },
}

/// Errors raised by a review fetcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("failed to read reviews: {0}")]
    Io(String),

    #[error("failed to parse reviews: {0}")]
    Parse(String),

    #[error("no reviews found for app {app_id} ({locale})")]
    Empty { app_id: String, locale: String },
}

/// Errors returned by a model backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("model backend rate limited the request")]
    RateLimited,

    #[error("model backend error: {0}")]
    Upstream(String),

    #[error("model output is not valid JSON: {0}")]
    Schema(String),
}

impl ModelError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Timeout(_) | ModelError::RateLimited)
    }
}

/// Why a pipeline did not produce a result.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("token budget exceeded: needed {needed}, {remaining} remaining")]
    BudgetExceeded { needed: u64, remaining: u64 },

    #[error("upstream error: {message}")]
    UpstreamError { message: String },

    #[error("schema error: {message}")]
    SchemaError { message: String },
}

impl FailureReason {
    pub fn upstream(message: impl Into<String>) -> Self {
        FailureReason::UpstreamError {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        FailureReason::SchemaError {
            message: message.into(),
        }
    }

    /// Prefix a schema error with the pipeline that rejected the output.
    pub fn schema_for(kind: PipelineKind, message: impl std::fmt::Display) -> Self {
        FailureReason::schema(format!("{} output rejected: {}", kind, message))
    }
}

impl From<ModelError> for FailureReason {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Schema(message) => FailureReason::SchemaError { message },
            other => FailureReason::UpstreamError {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ModelError::Timeout(30).is_transient());
        assert!(ModelError::RateLimited.is_transient());
        assert!(!ModelError::Upstream("boom".to_string()).is_transient());
        assert!(!ModelError::Schema("bad".to_string()).is_transient());
    }

    #[test]
    fn test_model_error_into_failure_reason() {
        let schema: FailureReason = ModelError::Schema("not json".to_string()).into();
        assert_eq!(schema, FailureReason::schema("not json"));

        let upstream: FailureReason = ModelError::Timeout(30).into();
        assert!(matches!(upstream, FailureReason::UpstreamError { .. }));
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::BudgetExceeded {
            needed: 1200,
            remaining: 300,
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"reason\":\"budget_exceeded\""));
        assert!(json.contains("\"needed\":1200"));
    }
}
