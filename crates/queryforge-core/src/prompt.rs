//! Prompt construction for the generation model
//!
//! Prompts are pure functions of their inputs. They steer the model toward a
//! single bounded, non-destructive query, but nothing downstream relies on the
//! model following them: every answer still goes through the validator.

use queryforge_guard::Access;
use queryforge_rules::{DialectRules, LimitStyle, RuleRegistry};
use queryforge_schema::{Dialect, Family};

/// System prompt shared by every dialect
const SYSTEM_PROMPT: &str = r#"You are QueryForge, a generator of database queries.

You receive a question in natural language, the target database and, when available, a description of its tables or collections. You answer with exactly one query that answers the question.

Rules:
1. Return ONLY the query: no explanation, no markdown, no comments
2. Return a single statement or expression, never several
3. Use the syntax of the target database exactly
4. Use only the tables, collections and fields that are described
5. Do not perform destructive operations (dropping, truncating, altering, granting) or unfiltered updates/deletes unless the question explicitly asks for them
6. Never call system procedures, administrative commands or server-side scripts
7. Bound every read to the requested number of rows"#;

/// A prompt split the way chat models take it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Model asked for by the caller; the client's own model when `None`
    pub model: Option<String>,
}

impl Prompt {
    /// The whole instruction as one payload, for models without roles
    pub fn to_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

pub fn build_prompt(question: &str, schema_text: Option<&str>, dialect: Dialect) -> Prompt {
    render(question, schema_text, dialect, None, Access::ReadWrite)
}

pub fn build_prompt_with_limit(
    question: &str,
    schema_text: Option<&str>,
    dialect: Dialect,
    row_limit: u32,
) -> Prompt {
    render(question, schema_text, dialect, Some(row_limit), Access::ReadWrite)
}

/// Like [`build_prompt_with_limit`], stating what the query may do
pub fn build_prompt_for(
    question: &str,
    schema_text: Option<&str>,
    dialect: Dialect,
    row_limit: u32,
    access: Access,
) -> Prompt {
    render(question, schema_text, dialect, Some(row_limit), access)
}

fn render(
    question: &str,
    schema_text: Option<&str>,
    dialect: Dialect,
    row_limit: Option<u32>,
    access: Access,
) -> Prompt {
    let mut lines = vec![
        format!("Database type: {}", dialect.display_name()),
        format!("Mode: {}", mode(dialect, access)),
        format!("Question: {}", question.trim()),
        String::new(),
    ];

    match schema_text.map(str::trim).filter(|s| !s.is_empty()) {
        Some(schema) => {
            lines.push("Database schema:".to_string());
            lines.push(schema.to_string());
        }
        None => lines.push("No schema was provided; infer table and field names from the question.".to_string()),
    }
    lines.push(String::new());

    let rows = row_limit.map(|n| n.to_string()).unwrap_or_else(|| "a reasonable number of".to_string());
    lines.push(format!("Row limit: return at most {rows} rows."));
    lines.extend(dialect_guidance(dialect, row_limit));
    lines.push(String::new());
    lines.push(format!(
        "Return ONLY the {} query, without explanation or formatting.",
        dialect.display_name()
    ));

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: lines.join("\n"),
        model: None,
    }
}

fn mode(dialect: Dialect, access: Access) -> &'static str {
    match (access, dialect.family()) {
        (Access::ReadOnly, Family::Sql) => {
            "read-only. Answer with a SELECT (or WITH ... SELECT) only; never insert, update or delete."
        }
        (Access::ReadOnly, Family::Document) => {
            "read-only. Answer with find, aggregate, count or distinct only; never insert, update or delete."
        }
        (Access::ReadWrite, _) => {
            "read-write. Write only when the question asks for a change, and always filter updates and deletes."
        }
    }
}

fn dialect_guidance(dialect: Dialect, row_limit: Option<u32>) -> Vec<String> {
    match dialect.family() {
        Family::Document => vec![
            "Write a MongoDB shell expression of the form db.<collection>.<operation>(...).".to_string(),
            "For reads use find(...).limit(n); for grouping or joins use db.<collection>.aggregate([...]) ending with a { $limit: n } stage.".to_string(),
            "Filter documents with query operators; never use $where, $function or JavaScript.".to_string(),
        ],
        Family::Sql => {
            let mut guidance = vec![format!(
                "Write a single {} statement using that dialect's own syntax.",
                dialect.display_name()
            )];
            if let Some(bound) = bound_example(dialect, row_limit.unwrap_or(100)) {
                guidance.push(format!("Bound SELECT results with {bound}."));
            }
            guidance.push("Use explicit JOIN ... ON clauses when combining tables.".to_string());
            guidance
        }
    }
}

/// How the dialect spells a row bound, e.g. `LIMIT 50` or `TOP 50`
fn bound_example(dialect: Dialect, rows: u32) -> Option<String> {
    match RuleRegistry::global().get(dialect).ok()? {
        DialectRules::Sql(rules) => Some(match rules.limit {
            LimitStyle::Suffix(_) => format!("a trailing {}", rules.limit.render(rows)),
            LimitStyle::AfterSelect(_) => format!("SELECT {} ...", rules.limit.render(rows)),
        }),
        DialectRules::Document(_) => None,
    }
}
