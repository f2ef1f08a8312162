//! MongoDB query analysis
//!
//! Three shapes are accepted: a shell chain (`db.users.find(...).limit(5)`),
//! a bare aggregation pipeline (`[{ $match: ... }]`) and a JSON command
//! document (`{"find": "users", "filter": {...}}`).

use super::{Access, MatchedRule, ValidationVerdict};
use crate::lexer::{tokenize, LexMode, Nesting, Scan, TokenKind};
use queryforge_rules::{DocumentRules, OperationKind};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Form {
    Shell,
    Pipeline,
    Command,
}

/// One `.name`, `.name(...)` or `["name"]` step of a shell chain
#[derive(Debug, Clone, Copy)]
pub(crate) struct Step<'a> {
    pub name: &'a str,
    /// Token indices of the call's parentheses
    pub call: Option<(usize, usize)>,
}

#[derive(Debug)]
pub(crate) struct Shape<'a> {
    pub form: Form,
    pub steps: Vec<Step<'a>>,
    /// Step carrying the operation of a shell chain
    pub op_step: Option<usize>,
    /// One past the last token of the expression
    pub end: usize,
}

impl<'a> Shape<'a> {
    pub fn operation(&self) -> Option<&Step<'a>> {
        self.op_step.and_then(|i| self.steps.get(i))
    }
}

/// Recognize the top-level shape; `None` when the text is none of them.
/// Requires a balanced scan.
pub(crate) fn parse_shape<'a>(scan: &Scan<'a>, rules: &DocumentRules) -> Option<Shape<'a>> {
    let first = scan.get(0)?;
    if first.kind == TokenKind::Word && first.text == "db" {
        return parse_chain(scan, rules);
    }
    let form = match first.text {
        "[" if first.kind == TokenKind::Symbol => Form::Pipeline,
        "{" if first.kind == TokenKind::Symbol => Form::Command,
        _ => return None,
    };
    Some(Shape {
        form,
        steps: Vec::new(),
        op_step: None,
        end: scan.partner(0)? + 1,
    })
}

fn parse_chain<'a>(scan: &Scan<'a>, rules: &DocumentRules) -> Option<Shape<'a>> {
    let mut steps = Vec::new();
    let mut i = 1;

    while let Some(token) = scan.get(i) {
        if token.is_symbol(".") {
            let name = scan.get(i + 1).filter(|t| t.kind == TokenKind::Word)?;
            i += 2;
            if scan.get(i).is_some_and(|t| t.is_symbol("(")) {
                let close = scan.partner(i)?;
                steps.push(Step {
                    name: name.text,
                    call: Some((i, close)),
                });
                i = close + 1;
            } else {
                steps.push(Step {
                    name: name.text,
                    call: None,
                });
            }
        } else if token.is_symbol("[") {
            let close = scan.partner(i)?;
            let name = scan.get(i + 1).filter(|t| t.kind == TokenKind::Str && close == i + 2)?;
            steps.push(Step {
                name: name.name()?,
                call: None,
            });
            i = close + 1;
        } else {
            break;
        }
    }

    // db.<collection>.<op>(...), db.getCollection("c").<op>(...) or db.<op>(...)
    let op_step = match steps.first() {
        Some(Step { call: None, .. }) => Some(1),
        Some(Step { name, call: Some(_) }) if rules.collection_accessors.contains(name) => Some(1),
        Some(_) => Some(0),
        None => None,
    }
    .filter(|&k| steps.get(k).is_some_and(|s| s.call.is_some()));

    Some(Shape {
        form: Form::Shell,
        steps,
        op_step,
        end: i,
    })
}

/// Documents directly inside the bracket pair at `open`, as (open, close) indices
pub(crate) fn documents(scan: &Scan<'_>, open: usize, close: usize) -> Vec<(usize, usize)> {
    let depth = scan.depths[open] + 1;
    (open + 1..close)
        .filter(|&i| scan.depths[i] == depth && scan.tokens[i].is_symbol("{"))
        .filter_map(|i| scan.partner(i).map(|end| (i, end)))
        .collect()
}

/// First key of the document opening at `open`
pub(crate) fn first_key<'a>(scan: &Scan<'a>, open: usize) -> Option<&'a str> {
    scan.get(open + 1).and_then(|t| t.name())
}

/// Index of `key` among the direct keys of the document at `open`..`close`
pub(crate) fn find_key(scan: &Scan<'_>, open: usize, close: usize, key: &str) -> Option<usize> {
    let depth = scan.depths[open] + 1;
    (open + 1..close).find(|&i| {
        scan.depths[i] == depth
            && scan.tokens[i].name() == Some(key)
            && scan.get(i + 1).is_some_and(|t| t.is_symbol(":"))
    })
}

pub(crate) fn validate(query: &str, rules: &DocumentRules, access: Access) -> ValidationVerdict {
    let tokens = match tokenize(query, LexMode::Shell) {
        Ok(tokens) => tokens,
        Err(e) => return ValidationVerdict::reject(MatchedRule::Unrecognized, e.to_string()),
    };
    let scan = Scan::new(&tokens, Nesting::Brackets);

    if scan.is_empty() {
        return ValidationVerdict::reject(MatchedRule::Unrecognized, "Query is empty");
    }
    if scan.has_trailing_statement() {
        return ValidationVerdict::reject(
            MatchedRule::MultiStatement,
            "Query contains more than one statement",
        );
    }

    let shape = if scan.balanced && !scan.unterminated {
        parse_shape(&scan, rules)
    } else {
        None
    };
    if let Some(shape) = &shape {
        if scan.tokens[shape.end..].iter().any(|t| !t.is_symbol(";")) {
            return ValidationVerdict::reject(
                MatchedRule::MultiStatement,
                "Unexpected text after the query expression",
            );
        }
    }

    if let Some(reason) = destructive(&scan, rules) {
        return ValidationVerdict::reject(MatchedRule::DestructiveOp, reason);
    }

    if scan.unterminated {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            "Query has an unterminated string literal or comment",
        );
    }
    if !scan.balanced {
        return ValidationVerdict::reject(MatchedRule::Unrecognized, "Query has unbalanced brackets");
    }
    let Some(shape) = shape else {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            "Query is not a shell expression, pipeline or command document",
        );
    };

    let query = query.trim().to_string();
    match shape.form {
        Form::Shell => shell_verdict(query, &scan, &shape, rules, access),
        Form::Pipeline => {
            if let Some(reason) = system_access(&scan, rules) {
                return ValidationVerdict::reject(MatchedRule::SystemAccess, reason);
            }
            bound_verdict(query, pipeline_bounded(&scan, 0, shape.end - 1, rules))
        }
        Form::Command => command_verdict(query, &scan, rules, access),
    }
}

fn shell_verdict(
    query: String,
    scan: &Scan<'_>,
    shape: &Shape<'_>,
    rules: &DocumentRules,
    access: Access,
) -> ValidationVerdict {
    if let Some(step) = shape
        .steps
        .iter()
        .find(|s| s.call.is_some() && rules.database_accessors.contains(&s.name))
    {
        return ValidationVerdict::reject(
            MatchedRule::SystemAccess,
            format!("Switching databases with {} is not allowed", step.name),
        );
    }

    let Some(step) = shape.operation() else {
        return ValidationVerdict::reject(MatchedRule::Unrecognized, "Query names no operation");
    };
    let Some(operation) = rules.operation(step.name) else {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            format!("Unsupported operation {}", step.name),
        );
    };
    if operation.kind == OperationKind::Privileged {
        return ValidationVerdict::reject(
            MatchedRule::SystemAccess,
            format!("{} is not allowed", operation.name),
        );
    }
    if let Some(reason) = system_access(scan, rules) {
        return ValidationVerdict::reject(MatchedRule::SystemAccess, reason);
    }

    let Some((open, close)) = step.call else {
        return ValidationVerdict::reject(MatchedRule::Unrecognized, "Query names no operation");
    };
    match operation.kind {
        OperationKind::FilteredMutation if !has_filter(scan, open, close) => ValidationVerdict::reject(
            MatchedRule::UnqualifiedMutation,
            format!("{} requires a non-empty filter document", operation.name),
        ),
        kind if access == Access::ReadOnly && !kind.is_read() => ValidationVerdict::reject(
            MatchedRule::WriteNotAllowed,
            format!("{} is not a read; only reads are allowed in read-only mode", operation.name),
        ),
        OperationKind::Find => {
            let later = shape.op_step.map_or(&[][..], |k| &shape.steps[k + 1..]);
            bound_verdict(query, cursor_bounded(scan, later, rules))
        }
        OperationKind::Aggregate => {
            let bounded = match scan.get(open + 1) {
                Some(t) if t.is_symbol("[") => scan
                    .partner(open + 1)
                    .is_some_and(|end| pipeline_bounded(scan, open + 1, end, rules)),
                _ => pipeline_bounded(scan, open, close, rules),
            };
            bound_verdict(query, bounded)
        }
        _ => ValidationVerdict::Safe(query),
    }
}

fn command_verdict(query: String, scan: &Scan<'_>, rules: &DocumentRules, access: Access) -> ValidationVerdict {
    let name = first_key(scan, 0).unwrap_or_default();
    let Some(command) = rules.command(name) else {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            format!("Unsupported command {name:?}"),
        );
    };
    if command.kind == OperationKind::Privileged {
        return ValidationVerdict::reject(
            MatchedRule::SystemAccess,
            format!("{} is not allowed", command.name),
        );
    }

    let body = query.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let document: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return ValidationVerdict::reject(
                MatchedRule::Unrecognized,
                format!("Command document is not valid JSON: {e}"),
            );
        }
    };

    if let Some(reason) = system_access(scan, rules) {
        return ValidationVerdict::reject(MatchedRule::SystemAccess, reason);
    }

    if command.kind == OperationKind::FilteredMutation {
        if let Some(reason) = unqualified_command(command.name, &document) {
            return ValidationVerdict::reject(MatchedRule::UnqualifiedMutation, reason);
        }
    }
    if access == Access::ReadOnly && !command.kind.is_read() {
        return ValidationVerdict::reject(
            MatchedRule::WriteNotAllowed,
            format!("{} command is not a read; only reads are allowed in read-only mode", command.name),
        );
    }

    match command.kind {
        OperationKind::Find => {
            let bounded = document
                .get("limit")
                .and_then(Value::as_i64)
                .is_some_and(|n| n != 0);
            bound_verdict(query, bounded)
        }
        OperationKind::Aggregate => {
            let Some(pipeline) = document.get("pipeline").and_then(Value::as_array) else {
                return ValidationVerdict::reject(
                    MatchedRule::Unrecognized,
                    "aggregate command has no pipeline array",
                );
            };
            let bounded = pipeline
                .iter()
                .any(|stage| stage.get(rules.bound_stage).is_some());
            bound_verdict(query, bounded)
        }
        _ => ValidationVerdict::Safe(query),
    }
}

fn bound_verdict(query: String, bounded: bool) -> ValidationVerdict {
    if bounded {
        ValidationVerdict::Safe(query)
    } else {
        ValidationVerdict::NeedsLimit(query)
    }
}

/// Destructive calls, destructive command documents and write stages anywhere in the text
fn destructive(scan: &Scan<'_>, rules: &DocumentRules) -> Option<String> {
    if scan.get(0).is_some_and(|t| t.is_symbol("{")) {
        if let Some(command) = first_key(scan, 0).and_then(|name| rules.command(name)) {
            if command.kind == OperationKind::Destructive {
                return Some(format!("{} is not allowed", command.name));
            }
        }
    }

    for (i, token) in scan.tokens.iter().enumerate() {
        if is_call(scan, i) {
            if let Some(op) = rules.operation(token.text) {
                if op.kind == OperationKind::Destructive {
                    return Some(format!("{} is not allowed", op.name));
                }
            }
        }
        if let Some(stage) = token.name().filter(|n| rules.write_stages.contains(n)) {
            return Some(format!("{stage} stage writes to a collection"));
        }
    }
    None
}

/// Server-side JavaScript and access to other databases
fn system_access(scan: &Scan<'_>, rules: &DocumentRules) -> Option<String> {
    for (i, token) in scan.tokens.iter().enumerate() {
        let next = scan.get(i + 1);
        let is_key = next.is_some_and(|t| t.is_symbol(":"));

        if let Some(name) = token.name().filter(|n| rules.script_operators.contains(n)) {
            if is_key {
                return Some(format!("{name} runs server-side JavaScript"));
            }
        }
        if token.kind == TokenKind::Word && rules.script_keywords.contains(&token.text) {
            return Some("Inline JavaScript functions are not allowed".to_string());
        }
        if token.is_symbol("=") && next.is_some_and(|t| t.is_symbol(">") && t.start == token.end) {
            return Some("Inline JavaScript functions are not allowed".to_string());
        }
        if i > 0 && token.kind == TokenKind::Word && token.text == "db" && !is_key {
            return Some("Nested database access is not allowed".to_string());
        }
        if is_call(scan, i) {
            if rules.database_accessors.contains(&token.text) {
                return Some(format!("Switching databases with {} is not allowed", token.text));
            }
            if let Some(op) = rules.operation(token.text) {
                if op.kind == OperationKind::Privileged {
                    return Some(format!("{} is not allowed", op.name));
                }
            }
        }
    }
    None
}

/// `.name(` at `index`
fn is_call(scan: &Scan<'_>, index: usize) -> bool {
    scan.tokens[index].kind == TokenKind::Word
        && index > 0
        && scan.tokens[index - 1].is_symbol(".")
        && scan.get(index + 1).is_some_and(|t| t.is_symbol("("))
}

/// Whether the call's first argument is a non-empty document literal
fn has_filter(scan: &Scan<'_>, open: usize, close: usize) -> bool {
    let first = open + 1;
    first < close
        && scan.tokens[first].is_symbol("{")
        && scan.partner(first).is_some_and(|end| end > first + 1)
}

fn cursor_bounded(scan: &Scan<'_>, later: &[Step<'_>], rules: &DocumentRules) -> bool {
    if later
        .iter()
        .any(|s| s.call.is_some() && rules.scalar_methods.contains(&s.name))
    {
        return true;
    }
    later
        .iter()
        .rev()
        .find(|s| s.name == rules.limit_method && s.call.is_some())
        .and_then(|s| s.call)
        .is_some_and(|(open, close)| positive_count(scan, open, close))
}

/// `(n)` or `(-n)` with n > 0
fn positive_count(scan: &Scan<'_>, open: usize, close: usize) -> bool {
    let args = &scan.tokens[open + 1..close];
    let number = match args {
        [n] => n,
        [sign, n] if sign.is_symbol("-") => n,
        _ => return false,
    };
    number.integer().is_some_and(|n| n > 0)
}

fn pipeline_bounded(scan: &Scan<'_>, open: usize, close: usize, rules: &DocumentRules) -> bool {
    documents(scan, open, close)
        .into_iter()
        .any(|(start, _)| first_key(scan, start) == Some(rules.bound_stage))
}

fn unqualified_command(name: &str, document: &Value) -> Option<String> {
    let (list, unbounded): (&str, fn(&Value) -> bool) = match name {
        "update" => ("updates", |entry: &Value| entry.get("multi").and_then(Value::as_bool) == Some(true)),
        "delete" => ("deletes", |entry: &Value| entry.get("limit").and_then(Value::as_i64) == Some(0)),
        _ => return None,
    };
    let Some(entries) = document.get(list).and_then(Value::as_array) else {
        return Some(format!("{name} command has no {list} array"));
    };
    entries
        .iter()
        .find(|entry| {
            let empty = entry
                .get("q")
                .map_or(true, |q| q.as_object().is_some_and(|m| m.is_empty()));
            empty && unbounded(entry)
        })
        .map(|_| format!("{name} command with an empty filter affects every document"))
}
