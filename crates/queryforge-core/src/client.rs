//! The seam between the pipeline and whatever model produces text

use crate::prompt::Prompt;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation backend failed: {0}")]
    TransportFailure(String),

    #[error("Generation backend is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("Generation backend returned no content")]
    EmptyResponse,

    #[error("Generation did not complete within {0:?}")]
    Timeout(Duration),
}

/// Turns a prompt into raw model text.
///
/// Implementations make one attempt per call. Retrying is the caller's
/// decision, and the pipeline bounds each call with its own timeout.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}
