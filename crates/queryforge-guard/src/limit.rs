//! Row-limit enforcement
//!
//! Adds the dialect's row bound to a read the validator reported as
//! unbounded. Text outside the insertion point is left untouched; when the
//! insertion point is ambiguous the query is refused rather than guessed at.

use crate::lexer::{tokenize, LexMode, Nesting, Scan, TokenKind};
use crate::validate::document::{self, documents, find_key, first_key, Form};
use crate::validate::sql::{main_statement, primary_mode};
use queryforge_rules::{is_one_of, DialectRules, DocumentRules, LimitStyle, OperationKind, RuleRegistry, SqlRules};
use queryforge_schema::Dialect;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnforcementError {
    #[error("Cannot add a row limit: {reason}")]
    UnsupportedShape { reason: String },

    #[error("Row limit must be greater than zero")]
    InvalidLimit,
}

fn unsupported(reason: impl Into<String>) -> EnforcementError {
    EnforcementError::UnsupportedShape {
        reason: reason.into(),
    }
}

pub struct RowLimitEnforcer {
    registry: &'static RuleRegistry,
}

impl RowLimitEnforcer {
    pub fn new(registry: &'static RuleRegistry) -> Self {
        Self { registry }
    }

    pub fn apply(&self, query: &str, dialect: Dialect, rows: u32) -> Result<String, EnforcementError> {
        if rows == 0 {
            return Err(EnforcementError::InvalidLimit);
        }
        let limited = match self.registry.get(dialect).map_err(|e| unsupported(e.to_string()))? {
            DialectRules::Sql(rules) => limit_sql(query, rules, rows)?,
            DialectRules::Document(rules) => limit_document(query, rules, rows)?,
        };
        tracing::debug!(dialect = %dialect, rows, "Applied row limit");
        Ok(limited)
    }
}

impl Default for RowLimitEnforcer {
    fn default() -> Self {
        Self::new(RuleRegistry::global())
    }
}

/// Bound `query` to at most `rows` results using the built-in rules for `dialect`
pub fn apply_limit(query: &str, dialect: Dialect, rows: u32) -> Result<String, EnforcementError> {
    RowLimitEnforcer::default().apply(query, dialect, rows)
}

fn insert_at(query: &str, at: usize, text: &str) -> String {
    let mut out = String::with_capacity(query.len() + text.len());
    out.push_str(&query[..at]);
    out.push_str(text);
    out.push_str(&query[at..]);
    out
}

fn limit_sql(query: &str, rules: &SqlRules, rows: u32) -> Result<String, EnforcementError> {
    let tokens = tokenize(query, primary_mode(rules)).map_err(|e| unsupported(e.to_string()))?;
    let scan = Scan::new(&tokens, Nesting::Parens);

    if scan.unterminated || !scan.balanced {
        return Err(unsupported("query is not well formed"));
    }
    if scan.get(0).is_some_and(|t| t.is_symbol("(")) {
        return Err(unsupported("top-level query is parenthesized"));
    }
    let main = main_statement(&scan, rules).ok_or_else(|| unsupported("no statement keyword found"))?;
    if !is_one_of(rules.read_ops, scan.tokens[main].text) {
        return Err(unsupported("only reads can be bounded"));
    }

    for (token, depth) in scan.tokens.iter().zip(&scan.depths) {
        if *depth != 0 || token.kind != TokenKind::Word {
            continue;
        }
        if is_one_of(rules.set_operators, token.text) {
            return Err(unsupported(format!(
                "top-level {} combines several reads",
                token.text.to_ascii_uppercase()
            )));
        }
        if is_one_of(rules.limit_conflicts, token.text) {
            return Err(unsupported(format!(
                "query already has a {} clause",
                token.text.to_ascii_uppercase()
            )));
        }
    }

    let bound = rules.limit.render(rows);
    let anchor = match rules.limit {
        LimitStyle::Suffix(_) => scan
            .tokens
            .iter()
            .rposition(|t| !t.is_symbol(";"))
            .ok_or_else(|| unsupported("query is empty"))?,
        LimitStyle::AfterSelect(_) => {
            let modifier = scan
                .get(main + 1)
                .is_some_and(|t| t.is_word("DISTINCT") || t.is_word("ALL"));
            if modifier {
                main + 1
            } else {
                main
            }
        }
    };

    Ok(insert_at(query, scan.tokens[anchor].end, &format!(" {bound}")))
}

fn limit_document(query: &str, rules: &DocumentRules, rows: u32) -> Result<String, EnforcementError> {
    let tokens = tokenize(query, LexMode::Shell).map_err(|e| unsupported(e.to_string()))?;
    let scan = Scan::new(&tokens, Nesting::Brackets);
    if scan.unterminated || !scan.balanced {
        return Err(unsupported("query is not well formed"));
    }
    let shape = document::parse_shape(&scan, rules).ok_or_else(|| unsupported("unrecognized query shape"))?;

    match shape.form {
        Form::Shell => {
            let step = shape.operation().ok_or_else(|| unsupported("query names no operation"))?;
            let kind = rules.operation(step.name).map(|op| op.kind);
            let (open, close) = step.call.ok_or_else(|| unsupported("query names no operation"))?;
            match kind {
                Some(OperationKind::Find) => {
                    if shape.steps.iter().any(|s| s.name == rules.limit_method) {
                        return Err(unsupported(format!("query already calls {}()", rules.limit_method)));
                    }
                    let call = format!(".{}({rows})", rules.limit_method);
                    Ok(insert_at(query, scan.tokens[close].end, &call))
                }
                Some(OperationKind::Aggregate) => {
                    let pipeline = open + 1;
                    if !scan.get(pipeline).is_some_and(|t| t.is_symbol("[")) {
                        return Err(unsupported("aggregate stages are not passed as an array"));
                    }
                    let end = scan.partner(pipeline).ok_or_else(|| unsupported("unbalanced pipeline"))?;
                    append_stage(query, &scan, pipeline, end, rules, rows, None)
                }
                _ => Err(unsupported(format!("{} cannot be bounded", step.name))),
            }
        }
        Form::Pipeline => append_stage(query, &scan, 0, shape.end - 1, rules, rows, None),
        Form::Command => {
            let close = shape.end - 1;
            match first_key(&scan, 0) {
                Some("find") => {
                    if find_key(&scan, 0, close, "limit").is_some() {
                        return Err(unsupported("find command already has a limit"));
                    }
                    let field = format!("\"limit\": {rows}");
                    Ok(append_entry(query, &scan, 0, close, &field))
                }
                Some("aggregate") => {
                    let key = find_key(&scan, 0, close, "pipeline")
                        .ok_or_else(|| unsupported("aggregate command has no pipeline"))?;
                    let pipeline = key + 2;
                    if !scan.get(pipeline).is_some_and(|t| t.is_symbol("[")) {
                        return Err(unsupported("aggregate pipeline is not an array"));
                    }
                    let end = scan.partner(pipeline).ok_or_else(|| unsupported("unbalanced pipeline"))?;
                    append_stage(query, &scan, pipeline, end, rules, rows, Some(true))
                }
                _ => Err(unsupported("only find and aggregate commands can be bounded")),
            }
        }
    }
}

/// Append a bound stage as the last element of the array at `open`..`close`.
/// The stage is JSON-quoted when `json` says so or when the existing stages
/// use quoted keys.
fn append_stage(
    query: &str,
    scan: &Scan<'_>,
    open: usize,
    close: usize,
    rules: &DocumentRules,
    rows: u32,
    json: Option<bool>,
) -> Result<String, EnforcementError> {
    let json = json.unwrap_or_else(|| {
        documents(scan, open, close)
            .iter()
            .any(|&(start, _)| scan.get(start + 1).is_some_and(|t| t.kind == TokenKind::Str))
    });
    let stage = if json {
        format!("{{\"{}\": {rows}}}", rules.bound_stage)
    } else {
        format!("{{ {}: {rows} }}", rules.bound_stage)
    };
    Ok(append_entry(query, scan, open, close, &stage))
}

/// Insert `entry` as the last element of the bracket pair at `open`..`close`
fn append_entry(query: &str, scan: &Scan<'_>, open: usize, close: usize, entry: &str) -> String {
    let last = close - 1;
    if last == open {
        insert_at(query, scan.tokens[open].end, entry)
    } else if scan.tokens[last].is_symbol(",") {
        insert_at(query, scan.tokens[last].end, &format!(" {entry}"))
    } else {
        insert_at(query, scan.tokens[last].end, &format!(", {entry}"))
    }
}
