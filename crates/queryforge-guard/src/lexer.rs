//! Pest-based tokenizer for candidate queries

use pest::Parser;
use pest_derive::Parser;
use queryforge_rules::{Marker, Pattern};
use thiserror::Error;

#[derive(Parser)]
#[grammar = "query.pest"]
struct QueryLexer;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("Tokenizer error: {0}")]
    Pest(#[from] Box<pest::error::Error<Rule>>),
}

/// Literal and comment conventions used to split the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    /// `''` doubling, `"`/backtick/`[]` quoted identifiers, `--` and `/* */` comments
    Sql,
    /// MySQL defaults: backslash escapes, `"` strings, `#` and `-- ` comments
    SqlBackslash,
    /// JavaScript-like shell expressions
    Shell,
}

impl LexMode {
    pub fn alternate(self) -> Self {
        match self {
            LexMode::Sql => LexMode::SqlBackslash,
            LexMode::SqlBackslash => LexMode::Sql,
            LexMode::Shell => LexMode::Shell,
        }
    }

    fn rule(self) -> Rule {
        match self {
            LexMode::Sql => Rule::sql_standard,
            LexMode::SqlBackslash => Rule::sql_backslash,
            LexMode::Shell => Rule::shell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Space,
    Comment,
    Str,
    QuotedIdent,
    Number,
    Word,
    Symbol,
    /// A literal or comment that never closes; runs to the end of input
    Unterminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offsets into the tokenized input
    pub start: usize,
    pub end: usize,
}

impl<'a> Token<'a> {
    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Space | TokenKind::Comment)
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    /// Identifier text: the word itself, or the body of a quoted identifier
    pub fn ident(&self) -> Option<&'a str> {
        match self.kind {
            TokenKind::Word => Some(self.text),
            TokenKind::QuotedIdent => Some(strip_delimiters(self.text)),
            _ => None,
        }
    }

    /// Word or string body, as used for document keys and names
    pub fn name(&self) -> Option<&'a str> {
        match self.kind {
            TokenKind::Word => Some(self.text),
            TokenKind::Str | TokenKind::QuotedIdent => Some(strip_delimiters(self.text)),
            _ => None,
        }
    }

    /// Unsigned integer value of a number token
    pub fn integer(&self) -> Option<u64> {
        match self.kind {
            TokenKind::Number => self.text.parse().ok(),
            _ => None,
        }
    }
}

fn strip_delimiters(text: &str) -> &str {
    let mut chars = text.chars();
    chars.next();
    chars.next_back();
    chars.as_str()
}

/// Split `input` into tokens covering every character
pub fn tokenize(input: &str, mode: LexMode) -> Result<Vec<Token<'_>>, LexError> {
    let mut pairs = QueryLexer::parse(mode.rule(), input).map_err(Box::new)?;
    let Some(root) = pairs.next() else {
        return Ok(Vec::new());
    };

    let tokens = root
        .into_inner()
        .filter_map(|pair| {
            let kind = match pair.as_rule() {
                Rule::space => TokenKind::Space,
                Rule::line_comment
                | Rule::mysql_line_comment
                | Rule::hash_comment
                | Rule::js_line_comment
                | Rule::block_comment
                | Rule::mysql_block_comment => TokenKind::Comment,
                Rule::plain_string | Rule::escaped_string | Rule::js_string => TokenKind::Str,
                Rule::quoted_ident | Rule::backtick_ident => TokenKind::QuotedIdent,
                Rule::number => TokenKind::Number,
                Rule::word | Rule::bare_word => TokenKind::Word,
                Rule::unterminated | Rule::mysql_unterminated => TokenKind::Unterminated,
                Rule::symbol => TokenKind::Symbol,
                _ => return None,
            };
            let span = pair.as_span();
            Some(Token {
                kind,
                text: span.as_str(),
                start: span.start(),
                end: span.end(),
            })
        })
        .collect();

    Ok(tokens)
}

/// Which brackets open a nesting level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    /// `(` only
    Parens,
    /// `(`, `[` and `{`, each closed by its own partner
    Brackets,
}

impl Nesting {
    fn closer(self, open: &str) -> Option<&'static str> {
        match (self, open) {
            (_, "(") => Some(")"),
            (Nesting::Brackets, "[") => Some("]"),
            (Nesting::Brackets, "{") => Some("}"),
            _ => None,
        }
    }

    fn is_closer(self, text: &str) -> bool {
        match self {
            Nesting::Parens => text == ")",
            Nesting::Brackets => matches!(text, ")" | "]" | "}"),
        }
    }
}

/// Significant tokens annotated with their nesting depth
///
/// An opening bracket sits at the depth outside it and its closing partner
/// at the same depth, so every token strictly between them is deeper.
#[derive(Debug)]
pub struct Scan<'a> {
    pub tokens: Vec<Token<'a>>,
    pub depths: Vec<usize>,
    partners: Vec<Option<usize>>,
    pub balanced: bool,
    pub unterminated: bool,
}

impl<'a> Scan<'a> {
    pub fn new(all: &[Token<'a>], nesting: Nesting) -> Self {
        let tokens: Vec<Token<'a>> = all.iter().filter(|t| t.is_significant()).copied().collect();
        let mut depths = Vec::with_capacity(tokens.len());
        let mut partners = vec![None; tokens.len()];
        let mut stack: Vec<(usize, &'static str)> = Vec::new();
        let mut balanced = true;
        let mut unterminated = false;

        for (i, token) in tokens.iter().enumerate() {
            match token.kind {
                TokenKind::Unterminated => unterminated = true,
                TokenKind::Symbol => {
                    if let Some(closer) = nesting.closer(token.text) {
                        depths.push(stack.len());
                        stack.push((i, closer));
                        continue;
                    }
                    if nesting.is_closer(token.text) {
                        match stack.last() {
                            Some(&(open, closer)) if closer == token.text => {
                                stack.pop();
                                partners[open] = Some(i);
                                partners[i] = Some(open);
                            }
                            _ => balanced = false,
                        }
                    }
                }
                _ => {}
            }
            depths.push(stack.len());
        }

        if !stack.is_empty() {
            balanced = false;
        }

        Self {
            tokens,
            depths,
            partners,
            balanced,
            unterminated,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Token<'a>> {
        self.tokens.get(index)
    }

    /// Index of the bracket closing (or opening) the one at `index`
    pub fn partner(&self, index: usize) -> Option<usize> {
        self.partners.get(index).copied().flatten()
    }

    /// Whether the text contains a `;` with further non-`;` tokens after it.
    /// Depth does not matter: a `;` inside brackets still splits statements.
    pub fn has_trailing_statement(&self) -> bool {
        match self.tokens.iter().position(|t| t.is_symbol(";")) {
            Some(first) => self.tokens[first..].iter().any(|t| !t.is_symbol(";")),
            None => false,
        }
    }

    /// Whether `pattern` matches the tokens starting at `index`.
    /// `quoted` lets word markers match quoted identifiers too.
    pub fn matches(&self, index: usize, pattern: Pattern, quoted: bool) -> bool {
        pattern.iter().enumerate().all(|(offset, marker)| {
            let Some(token) = self.tokens.get(index + offset) else {
                return false;
            };
            match marker {
                Marker::Word(word) => {
                    let text = if quoted {
                        token.ident()
                    } else {
                        (token.kind == TokenKind::Word).then_some(token.text)
                    };
                    text.is_some_and(|t| t.eq_ignore_ascii_case(word))
                }
                Marker::Open => token.is_symbol("("),
                Marker::Symbol(symbol) => token.is_symbol(symbol),
                Marker::Count => is_count(token),
            }
        })
    }

    /// First index at which any of `patterns` matches
    pub fn find_any(&self, patterns: &[Pattern], quoted: bool) -> Option<(usize, Pattern)> {
        (0..self.tokens.len()).find_map(|i| {
            patterns
                .iter()
                .find(|p| self.matches(i, p, quoted))
                .map(|p| (i, *p))
        })
    }
}

fn is_count(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Number => true,
        TokenKind::Symbol => matches!(token.text, "(" | "?" | ":"),
        TokenKind::Word => token.text.starts_with('$') || token.text.starts_with('@'),
        _ => false,
    }
}

/// Render a pattern for messages, e.g. `INTO OUTFILE` or `SLEEP(`
pub fn describe(pattern: Pattern) -> String {
    let mut out = String::new();
    for marker in pattern {
        match marker {
            Marker::Word(word) => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(word);
            }
            Marker::Open => out.push('('),
            Marker::Symbol(symbol) => {
                if !out.ends_with(['<', '>', '=']) {
                    out.push(' ');
                }
                out.push_str(symbol);
            }
            Marker::Count => out.push_str(" n"),
        }
    }
    out
}
