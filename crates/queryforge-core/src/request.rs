//! Per-call request values

use queryforge_guard::Access;
use queryforge_schema::Schema;
use thiserror::Error;

pub const MAX_QUESTION_CHARS: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Question cannot be empty")]
    EmptyQuestion,

    #[error("Question is too long ({len} characters, max {max})")]
    QuestionTooLong { len: usize, max: usize },

    #[error("Row limit must be at least 1")]
    InvalidRowLimit,

    #[error("Row limit {requested} exceeds the maximum of {max}")]
    RowLimitTooLarge { requested: u32, max: u32 },
}

/// A validated question plus the schema it is asked against
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    question: String,
    schema: Schema,
    row_limit_override: Option<u32>,
    access: Access,
    model: Option<String>,
}

impl GenerationRequest {
    /// Sanitizes `question` and checks it is usable.
    ///
    /// The row limit's upper bound depends on generator settings and is
    /// checked when the request runs.
    pub fn new(
        question: &str,
        schema: Schema,
        row_limit_override: Option<u32>,
    ) -> Result<Self, RequestError> {
        let question = sanitize(question);
        if question.is_empty() {
            return Err(RequestError::EmptyQuestion);
        }
        let len = question.chars().count();
        if len > MAX_QUESTION_CHARS {
            return Err(RequestError::QuestionTooLong {
                len,
                max: MAX_QUESTION_CHARS,
            });
        }
        if row_limit_override == Some(0) {
            return Err(RequestError::InvalidRowLimit);
        }

        Ok(Self {
            question,
            schema,
            row_limit_override,
            access: Access::default(),
            model: None,
        })
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Ask for a specific model; blank names keep the client's default
    pub fn with_model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string);
        self
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_limit_override(&self) -> Option<u32> {
        self.row_limit_override
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

/// Drop control characters and collapse runs of whitespace
pub fn sanitize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use queryforge_schema::{Dialect, SchemaDescription};

    fn schema() -> Schema {
        Schema::build_for(&SchemaDescription::default(), Dialect::Sqlite).unwrap()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  how   many\n\tusers?\u{0}  "), "how many users?");
        assert_eq!(sanitize("a\u{7}b"), "ab");
        assert_eq!(sanitize("\u{1b} \u{0}"), "");
    }

    #[test]
    fn test_empty_question() {
        let err = GenerationRequest::new(" \n\t", schema(), None).unwrap_err();
        assert_eq!(err, RequestError::EmptyQuestion);
    }

    #[test]
    fn test_question_length() {
        let long = "x".repeat(MAX_QUESTION_CHARS + 1);
        let err = GenerationRequest::new(&long, schema(), None).unwrap_err();
        assert_eq!(
            err,
            RequestError::QuestionTooLong {
                len: MAX_QUESTION_CHARS + 1,
                max: MAX_QUESTION_CHARS
            }
        );

        let exact = "x".repeat(MAX_QUESTION_CHARS);
        assert!(GenerationRequest::new(&exact, schema(), None).is_ok());
    }

    #[test]
    fn test_zero_row_limit() {
        let err = GenerationRequest::new("q", schema(), Some(0)).unwrap_err();
        assert_eq!(err, RequestError::InvalidRowLimit);
    }

    #[test]
    fn test_request_keeps_sanitized_question() {
        let request = GenerationRequest::new(" list  users ", schema(), Some(5)).unwrap();
        assert_eq!(request.question(), "list users");
        assert_eq!(request.row_limit_override(), Some(5));
    }

    #[test]
    fn test_access_and_model() {
        let request = GenerationRequest::new("q", schema(), None).unwrap();
        assert_eq!(request.access(), Access::ReadWrite);
        assert_eq!(request.model(), None);

        let request = request.with_access(Access::ReadOnly).with_model(Some(" gpt-4o "));
        assert_eq!(request.access(), Access::ReadOnly);
        assert_eq!(request.model(), Some("gpt-4o"));
        assert_eq!(request.with_model(Some("  ")).model(), None);
    }
}
