//! The generation pipeline
//!
//! One call walks a request through
//! `RECEIVED -> PROMPTED -> GENERATED -> EXTRACTED -> VALIDATED -> (LIMITED) -> DONE`
//! and ends in `DONE`, `REJECTED` (unsafe verdict) or `FAILED`. Every stage but
//! the model call is synchronous and pure.

use crate::client::{GenerationClient, GenerationError};
use crate::error::{PipelineError, ValidationRejection};
use crate::prompt::build_prompt_for;
use crate::request::{GenerationRequest, RequestError};
use queryforge_guard::{
    extract_with, Access, EnforcementError, RowLimitEnforcer, SafetyValidator, ValidationVerdict,
};
use queryforge_rules::RuleRegistry;
use queryforge_schema::{Dialect, Schema, SchemaDescription};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_ROW_LIMIT: u32 = 100;
pub const MAX_ROW_LIMIT: u32 = 50_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only settings shared by every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    pub default_row_limit: u32,
    pub max_row_limit: u32,
    pub enabled_dialects: BTreeSet<Dialect>,
    pub timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            default_row_limit: DEFAULT_ROW_LIMIT,
            max_row_limit: MAX_ROW_LIMIT,
            enabled_dialects: Dialect::ALL.into_iter().collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GeneratorSettings {
    pub fn is_enabled(&self, dialect: Dialect) -> bool {
        self.enabled_dialects.contains(&dialect)
    }

    /// The bound applied to unbounded reads of this request
    pub fn row_limit(&self, requested: Option<u32>) -> Result<u32, RequestError> {
        match requested {
            Some(0) => Err(RequestError::InvalidRowLimit),
            Some(rows) if rows > self.max_row_limit => Err(RequestError::RowLimitTooLarge {
                requested: rows,
                max: self.max_row_limit,
            }),
            Some(rows) => Ok(rows),
            None => Ok(self.default_row_limit),
        }
    }
}

/// Per-call choices beyond the question, schema and dialect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOptions {
    pub row_limit: Option<u32>,
    pub access: Access,
    /// Model name passed to the client instead of its configured one
    pub model: Option<String>,
}

/// A query that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub query: String,
    pub dialect: Dialect,
    /// Whether the pipeline added the row bound itself
    pub was_limited: bool,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Received,
    Prompted,
    Generated,
    Extracted,
    Validated,
    Limited,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Prompted => "prompted",
            Stage::Generated => "generated",
            Stage::Extracted => "extracted",
            Stage::Validated => "validated",
            Stage::Limited => "limited",
        }
    }
}

pub struct QueryGenerator {
    client: Arc<dyn GenerationClient>,
    settings: Arc<GeneratorSettings>,
    registry: &'static RuleRegistry,
    validator: SafetyValidator,
    enforcer: RowLimitEnforcer,
}

impl QueryGenerator {
    pub fn new(client: Arc<dyn GenerationClient>, settings: GeneratorSettings) -> Self {
        Self::with_registry(client, settings, RuleRegistry::global())
    }

    pub fn with_registry(
        client: Arc<dyn GenerationClient>,
        settings: GeneratorSettings,
        registry: &'static RuleRegistry,
    ) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            registry,
            validator: SafetyValidator::new(registry),
            enforcer: RowLimitEnforcer::new(registry),
        }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Build the schema and request from caller input, then generate
    pub async fn generate_from(
        &self,
        question: &str,
        schema: &SchemaDescription,
        dialect: &str,
        row_limit_override: Option<u32>,
    ) -> Result<GenerationResult, PipelineError> {
        let options = GenerationOptions {
            row_limit: row_limit_override,
            ..GenerationOptions::default()
        };
        self.generate_with(question, schema, dialect, &options).await
    }

    /// [`QueryGenerator::generate_from`] with every per-call option
    pub async fn generate_with(
        &self,
        question: &str,
        schema: &SchemaDescription,
        dialect: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, PipelineError> {
        let request = Self::request(question, schema, dialect, options).inspect_err(|err| {
            warn!(kind = err.kind(), error = %err, "Request rejected before generation");
        })?;
        self.generate(request).await
    }

    fn request(
        question: &str,
        schema: &SchemaDescription,
        dialect: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationRequest, PipelineError> {
        let dialect: Dialect = dialect.parse()?;
        let schema = Schema::build_for(schema, dialect)?;
        Ok(GenerationRequest::new(question, schema, options.row_limit)?
            .with_access(options.access)
            .with_model(options.model.as_deref()))
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, PipelineError> {
        let span = tracing::info_span!(
            "generate",
            request_id = %Uuid::new_v4(),
            dialect = %request.schema().dialect(),
            access = request.access().as_str(),
            fingerprint = %request.schema().fingerprint(),
        );

        async move {
            let outcome = self.run(&request).await;
            match &outcome {
                Ok(result) => {
                    info!(state = "done", was_limited = result.was_limited, "Query generated");
                }
                Err(PipelineError::Rejected(rejection)) => {
                    warn!(
                        state = "rejected",
                        matched_rule = %rejection.matched_rule,
                        reason = %rejection.reason,
                        "Query refused"
                    );
                }
                Err(err @ PipelineError::Generation(_)) => {
                    error!(state = "failed", kind = err.kind(), error = %err, "Generation failed");
                }
                Err(err) => {
                    warn!(state = "failed", kind = err.kind(), error = %err, "Generation failed");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult, PipelineError> {
        let schema = request.schema();
        let dialect = schema.dialect();
        debug!(stage = Stage::Received.as_str(), question_len = request.question().len());

        if !self.settings.is_enabled(dialect) {
            return Err(PipelineError::DialectDisabled(dialect));
        }
        let row_limit = self.settings.row_limit(request.row_limit_override())?;

        let schema_text = (!schema.tables().is_empty()).then(|| schema.render_for_prompt());
        let access = request.access();
        let mut prompt = build_prompt_for(request.question(), schema_text.as_deref(), dialect, row_limit, access);
        prompt.model = request.model().map(str::to_string);
        debug!(stage = Stage::Prompted.as_str(), row_limit, model = prompt.model.as_deref());

        let raw = match tokio::time::timeout(self.settings.timeout, self.client.complete(&prompt)).await {
            Ok(completion) => completion?,
            Err(_) => return Err(GenerationError::Timeout(self.settings.timeout).into()),
        };
        if raw.trim().is_empty() {
            return Err(GenerationError::EmptyResponse.into());
        }
        debug!(stage = Stage::Generated.as_str(), length = raw.len());

        let extracted = extract_with(self.registry, &raw, dialect)?;
        debug!(stage = Stage::Extracted.as_str(), length = extracted.query.len());

        let verdict = self.validator.validate_for(&extracted.query, dialect, access);
        debug!(stage = Stage::Validated.as_str(), verdict = verdict.label());

        match verdict {
            ValidationVerdict::Safe(query) => Ok(GenerationResult {
                query,
                dialect,
                was_limited: false,
            }),
            ValidationVerdict::Unsafe { reason, matched_rule } => {
                Err(ValidationRejection { matched_rule, reason }.into())
            }
            ValidationVerdict::NeedsLimit(query) => {
                let limited = self.enforcer.apply(&query, dialect, row_limit)?;
                debug!(stage = Stage::Limited.as_str(), rows = row_limit);

                // Adding the bound must leave a query the validator accepts as is
                match self.validator.validate_for(&limited, dialect, access) {
                    ValidationVerdict::Safe(query) => Ok(GenerationResult {
                        query,
                        dialect,
                        was_limited: true,
                    }),
                    other => Err(EnforcementError::UnsupportedShape {
                        reason: format!("limited query is {} rather than safe", other.label()),
                    }
                    .into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GeneratorSettings::default();
        assert_eq!(settings.default_row_limit, 100);
        assert_eq!(settings.max_row_limit, 50_000);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert!(Dialect::ALL.iter().all(|d| settings.is_enabled(*d)));
    }

    #[test]
    fn test_row_limit_resolution() {
        let settings = GeneratorSettings::default();
        assert_eq!(settings.row_limit(None), Ok(100));
        assert_eq!(settings.row_limit(Some(7)), Ok(7));
        assert_eq!(settings.row_limit(Some(50_000)), Ok(50_000));
        assert_eq!(
            settings.row_limit(Some(50_001)),
            Err(RequestError::RowLimitTooLarge {
                requested: 50_001,
                max: 50_000
            })
        );
        assert_eq!(settings.row_limit(Some(0)), Err(RequestError::InvalidRowLimit));
    }

    #[test]
    fn test_default_options() {
        let options = GenerationOptions::default();
        assert_eq!(options.row_limit, None);
        assert_eq!(options.access, Access::ReadWrite);
        assert_eq!(options.model, None);
    }

    #[test]
    fn test_result_serializes() {
        let result = GenerationResult {
            query: "SELECT 1".to_string(),
            dialect: Dialect::Sqlite,
            was_limited: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"query": "SELECT 1", "dialect": "sqlite", "was_limited": false})
        );
    }
}
