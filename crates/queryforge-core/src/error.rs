//! Pipeline error type

use crate::client::GenerationError;
use crate::request::RequestError;
use queryforge_guard::{EnforcementError, ExtractionError, MatchedRule};
use queryforge_schema::{Dialect, SchemaError};
use thiserror::Error;

/// An unsafe verdict. A refusal, not a fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Query refused ({matched_rule}): {reason}")]
pub struct ValidationRejection {
    pub matched_rule: MatchedRule,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Rejected(#[from] ValidationRejection),

    #[error(transparent)]
    Enforcement(#[from] EnforcementError),

    #[error("Dialect {0} is disabled")]
    DialectDisabled(Dialect),
}

impl PipelineError {
    /// Stable identifier for callers and logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Schema(SchemaError::UnknownDialect(_)) => "unknown_dialect",
            PipelineError::Schema(_) => "invalid_schema",
            PipelineError::Request(_) => "invalid_request",
            PipelineError::Generation(GenerationError::Timeout(_)) => "generation_timeout",
            PipelineError::Generation(GenerationError::RateLimited(_)) => "rate_limited",
            PipelineError::Generation(_) => "generation_failed",
            PipelineError::Extraction(_) => "no_query_found",
            PipelineError::Rejected(_) => "unsafe_query",
            PipelineError::Enforcement(_) => "limit_failed",
            PipelineError::DialectDisabled(_) => "dialect_disabled",
        }
    }

    /// Whether asking again may succeed. Generation output varies between
    /// attempts, so everything downstream of the model is retryable too.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Generation(_) | PipelineError::Extraction(_) | PipelineError::Enforcement(_)
        )
    }

    pub fn matched_rule(&self) -> Option<MatchedRule> {
        match self {
            PipelineError::Rejected(rejection) => Some(rejection.matched_rule),
            _ => None,
        }
    }
}
