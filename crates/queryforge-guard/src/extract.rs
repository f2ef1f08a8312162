//! Query extraction from free-form model output

use crate::lexer::{tokenize, LexMode, TokenKind};
use queryforge_rules::{DialectRules, RuleRegistry};
use queryforge_schema::Dialect;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// A fenced code block, with an optional language tag on the opening line
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[ \t]*[A-Za-z][\w+.-]*)?[ \t]*\r?\n(.*?)```|```(.*?)```").expect("valid fence pattern")
});

/// Labels models put in front of the query on the same line
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:here(?:'s|’s| is) the (?:\w+ )?query|the query is|query|sql|mongodb)\s*:\s*")
        .expect("valid label pattern")
});

/// Clause words that may open a continuation line of a SQL statement
const CLAUSE_WORDS: &[&str] = &[
    "FROM", "WHERE", "AND", "OR", "NOT", "ORDER", "GROUP", "HAVING", "LIMIT", "OFFSET", "FETCH",
    "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "ON", "USING", "UNION", "EXCEPT",
    "INTERSECT", "SET", "VALUES", "CASE", "WHEN", "THEN", "ELSE", "END", "AS", "INTO", "RETURNING",
    "WINDOW", "PARTITION", "OVER", "TOP", "DISTINCT", "LATERAL",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("No query found in model output")]
    NoQueryFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub query: String,
    pub dialect: Dialect,
}

/// What a candidate block may start with
enum Opening {
    Keywords(Vec<&'static str>),
    Prefixes(&'static [&'static str]),
}

impl Opening {
    fn for_dialect(registry: &RuleRegistry, dialect: Dialect) -> Option<Self> {
        match registry.get(dialect).ok()? {
            DialectRules::Sql(rules) => Some(Opening::Keywords(rules.statement_keywords())),
            DialectRules::Document(rules) => Some(Opening::Prefixes(rules.expression_starts)),
        }
    }

    fn starts(&self, line: &str) -> bool {
        match self {
            Opening::Keywords(keywords) => {
                let word = leading_word(line.trim_start_matches(['(', ' ', '\t']));
                !word.is_empty() && keywords.iter().any(|k| k.eq_ignore_ascii_case(word))
            }
            Opening::Prefixes(prefixes) => prefixes.iter().any(|p| line.starts_with(p)),
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        let listed = match self {
            Opening::Keywords(keywords) => keywords.iter().any(|k| k.eq_ignore_ascii_case(word)),
            Opening::Prefixes(_) => false,
        };
        listed || CLAUSE_WORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
    }

    /// A SQL clause word that continues the statement above it
    fn is_clause(&self, word: &str) -> bool {
        matches!(self, Opening::Keywords(_)) && CLAUSE_WORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
    }
}

fn leading_word(line: &str) -> &str {
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(line.len());
    &line[..end]
}

fn strip_label(line: &str) -> &str {
    match LABEL.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

/// A capitalized sentence that is not a keyword, ending like prose does
fn is_prose(line: &str, opening: &Opening) -> bool {
    let word = leading_word(line);
    let mut chars = word.chars();
    let capitalized = chars.next().is_some_and(|c| c.is_uppercase())
        && chars.clone().next().is_some()
        && chars.all(|c| c.is_lowercase() || c == '\'');
    capitalized && !opening.is_keyword(word) && line.ends_with(['.', ':', '!'])
}

/// The query inside one fenced body: from the first line that opens a query
/// to the closing fence
fn fenced_block(body: &str, opening: &Opening) -> Option<String> {
    let mut lines = body.lines();
    let first = lines.by_ref().map(|line| strip_label(line.trim())).find(|line| opening.starts(line))?;
    let block = std::iter::once(first)
        .chain(lines.map(str::trim_end))
        .collect::<Vec<_>>()
        .join("\n");
    let block = block.trim();
    (!block.is_empty()).then(|| block.to_string())
}

/// Whether any bracket, literal or comment opened in `text` is still open
fn is_open(text: &str) -> bool {
    let Ok(tokens) = tokenize(text, LexMode::Shell) else {
        return false;
    };
    let mut depth = 0i64;
    for token in &tokens {
        match (token.kind, token.text) {
            (TokenKind::Unterminated, _) => return true,
            (TokenKind::Symbol, "(" | "[" | "{") => depth += 1,
            (TokenKind::Symbol, ")" | "]" | "}") => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

/// Whether `next`, following a blank line, still belongs to the block in `lines`
fn continues(lines: &[&str], next: &str, opening: &Opening) -> bool {
    next.starts_with([')', ']', '}', '.', ','])
        || opening.is_clause(leading_word(next))
        || is_open(&lines.join("\n"))
}

/// Candidate blocks of unfenced `text`, in order of appearance
fn blocks(text: &str, opening: &Opening) -> Vec<String> {
    let mut found = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut after_blank = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !current.is_empty() {
            if trimmed.starts_with("```") || is_prose(trimmed, opening) {
                found.push(current.join("\n"));
                current.clear();
                after_blank = false;
                continue;
            }
            if trimmed.is_empty() {
                after_blank = true;
                continue;
            }
            if !after_blank || continues(&current, trimmed, opening) {
                if after_blank {
                    current.push("");
                }
                current.push(line.trim_end());
                after_blank = false;
                continue;
            }
            found.push(current.join("\n"));
            current.clear();
            after_blank = false;
        }

        let content = strip_label(trimmed);
        if opening.starts(content) {
            current.push(content);
        }
    }
    if !current.is_empty() {
        found.push(current.join("\n"));
    }

    found
        .into_iter()
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

/// First of the longest candidates
fn largest(candidates: Vec<String>) -> Option<String> {
    candidates.into_iter().fold(None, |best: Option<String>, candidate| match best {
        Some(b) if b.len() >= candidate.len() => Some(b),
        _ => Some(candidate),
    })
}

pub fn extract_with(registry: &RuleRegistry, raw: &str, dialect: Dialect) -> Result<Extracted, ExtractionError> {
    let opening = Opening::for_dialect(registry, dialect).ok_or(ExtractionError::NoQueryFound)?;

    let fenced: Vec<String> = FENCE
        .captures_iter(raw)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .filter_map(|body| fenced_block(body.as_str(), &opening))
        .collect();

    let query = match largest(fenced) {
        Some(query) => query,
        None => largest(blocks(raw, &opening)).ok_or(ExtractionError::NoQueryFound)?,
    };

    tracing::debug!(dialect = %dialect, length = query.len(), "Extracted candidate query");
    Ok(Extracted { query, dialect })
}

/// Pull the most likely query for `dialect` out of raw model output
pub fn extract(raw: &str, dialect: Dialect) -> Result<Extracted, ExtractionError> {
    extract_with(RuleRegistry::global(), raw, dialect)
}
