//! Safety validation
//!
//! Classifies a candidate query without executing it. Checks run in a fixed
//! order and the first match decides the verdict:
//!
//! 1. more than one statement (`multi_statement`)
//! 2. destructive operation (`destructive_op`)
//! 3. malformed or unidentifiable text (`unrecognized`)
//! 4. access beyond the query sandbox (`system_access`)
//! 5. mutation without a filter (`unqualified_mutation`)
//! 6. any write when the caller asked for reads only (`write_not_allowed`)
//! 7. unbounded read (`NeedsLimit`)
//! 8. otherwise `Safe`
//!
//! A SQL `SELECT ... INTO` that stores its rows in a new table is reported as
//! `destructive_op` once the text is known to be well formed.

use queryforge_rules::{DialectRules, RuleRegistry};
use queryforge_schema::Dialect;
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) mod document;
pub(crate) mod sql;

/// The rule that made a query unsafe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedRule {
    MultiStatement,
    DestructiveOp,
    SystemAccess,
    UnqualifiedMutation,
    WriteNotAllowed,
    Unrecognized,
}

impl MatchedRule {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchedRule::MultiStatement => "multi_statement",
            MatchedRule::DestructiveOp => "destructive_op",
            MatchedRule::SystemAccess => "system_access",
            MatchedRule::UnqualifiedMutation => "unqualified_mutation",
            MatchedRule::WriteNotAllowed => "write_not_allowed",
            MatchedRule::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller lets the query do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Reads only: SELECT/WITH, find, aggregate, count, distinct
    ReadOnly,
    #[default]
    ReadWrite,
}

impl Access {
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Access::ReadOnly => "read_only",
            Access::ReadWrite => "read_write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Safe(String),
    Unsafe {
        reason: String,
        matched_rule: MatchedRule,
    },
    /// An otherwise safe read that returns an unbounded number of rows
    NeedsLimit(String),
}

impl ValidationVerdict {
    pub(crate) fn reject(matched_rule: MatchedRule, reason: impl Into<String>) -> Self {
        ValidationVerdict::Unsafe {
            reason: reason.into(),
            matched_rule,
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, ValidationVerdict::Safe(_))
    }

    pub fn matched_rule(&self) -> Option<MatchedRule> {
        match self {
            ValidationVerdict::Unsafe { matched_rule, .. } => Some(*matched_rule),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ValidationVerdict::Safe(_) => "safe",
            ValidationVerdict::Unsafe { .. } => "unsafe",
            ValidationVerdict::NeedsLimit(_) => "needs_limit",
        }
    }
}

pub struct SafetyValidator {
    registry: &'static RuleRegistry,
}

impl SafetyValidator {
    pub fn new(registry: &'static RuleRegistry) -> Self {
        Self { registry }
    }

    pub fn validate(&self, query: &str, dialect: Dialect) -> ValidationVerdict {
        self.validate_for(query, dialect, Access::ReadWrite)
    }

    pub fn validate_for(&self, query: &str, dialect: Dialect, access: Access) -> ValidationVerdict {
        let verdict = match self.registry.get(dialect) {
            Ok(DialectRules::Sql(rules)) => sql::validate(query, rules, access),
            Ok(DialectRules::Document(rules)) => document::validate(query, rules, access),
            Err(e) => ValidationVerdict::reject(MatchedRule::Unrecognized, e.to_string()),
        };

        tracing::debug!(
            dialect = %dialect,
            access = access.as_str(),
            verdict = verdict.label(),
            matched_rule = verdict.matched_rule().map(MatchedRule::as_str),
            "Validated candidate query"
        );
        verdict
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new(RuleRegistry::global())
    }
}

/// Validate `query` against the built-in rules for `dialect`
pub fn validate(query: &str, dialect: Dialect) -> ValidationVerdict {
    SafetyValidator::default().validate(query, dialect)
}
