//! Safety rule registry
//!
//! Every dialect is described by a static table: which leading keywords are
//! reads, writes or denied, which token sequences reach outside the database,
//! what bounds a result set and how a bound is injected. The validator and the
//! row-limit enforcer only interpret these tables, so supporting a new dialect
//! means registering a new table.

use queryforge_schema::{Dialect, Family};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

mod document;
mod sql;

pub use document::MONGODB;
pub use sql::{MYSQL, ORACLE, POSTGRES, SQLITE, SQLSERVER};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("No rule table registered for dialect {0}")]
    NotRegistered(Dialect),

    #[error("Rule table for {dialect} is a {found:?} table, expected {expected:?}")]
    FamilyMismatch {
        dialect: Dialect,
        expected: Family,
        found: Family,
    },
}

/// One element of a token-sequence pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// A bare word, compared case-insensitively
    Word(&'static str),
    /// An opening parenthesis
    Open,
    /// A one-character operator such as `<` or `=`
    Symbol(&'static str),
    /// A row count: a number, a bind placeholder (`?`, `:n`, `$1`, `@p`) or a
    /// parenthesized expression
    Count,
}

pub type Pattern = &'static [Marker];

/// How a row bound is written into a SQL read. `{n}` is the row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// Appended after the last clause of the statement
    Suffix(&'static str),
    /// Inserted right after the main SELECT keyword (and DISTINCT/ALL)
    AfterSelect(&'static str),
}

impl LimitStyle {
    pub fn render(&self, rows: u32) -> String {
        let template = match self {
            LimitStyle::Suffix(t) | LimitStyle::AfterSelect(t) => t,
        };
        template.replace("{n}", &rows.to_string())
    }
}

/// A statement that must carry a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilteredMutation {
    pub keyword: &'static str,
    pub filter: &'static str,
}

/// Rule table for a SQL dialect
#[derive(Debug)]
pub struct SqlRules {
    /// Backslash escapes inside string literals, `#` comments, `-- ` needing a space
    pub backslash_escapes: bool,
    pub read_ops: &'static [&'static str],
    /// Keywords introducing common table expressions before the main statement
    pub cte_ops: &'static [&'static str],
    /// Writes whose reach is bounded by their own values
    pub write_ops: &'static [&'static str],
    pub filtered_mutations: &'static [FilteredMutation],
    /// Words that, directly before UPDATE/DELETE, make it a clause rather than a statement
    pub mutation_exemptions: &'static [&'static str],
    pub deny_ops: &'static [&'static str],
    pub privileged_ops: &'static [&'static str],
    pub system_patterns: &'static [Pattern],
    pub bound_markers: &'static [Pattern],
    /// Words that, at the main level of a read, store its rows in a new table
    /// (`SELECT ... INTO t FROM ...`)
    pub read_targets: &'static [&'static str],
    pub set_operators: &'static [&'static str],
    /// Top-level words that make the bound insertion point ambiguous
    pub limit_conflicts: &'static [&'static str],
    pub limit: LimitStyle,
}

impl SqlRules {
    /// Every keyword a statement of this dialect may start with, including the
    /// ones the validator refuses
    pub fn statement_keywords(&self) -> Vec<&'static str> {
        self.read_ops
            .iter()
            .chain(self.cte_ops)
            .chain(self.write_ops)
            .copied()
            .chain(self.filtered_mutations.iter().map(|m| m.keyword))
            .chain(self.deny_ops.iter().copied())
            .chain(self.privileged_ops.iter().copied())
            .collect()
    }

    pub fn filtered_mutation(&self, word: &str) -> Option<&FilteredMutation> {
        self.filtered_mutations
            .iter()
            .find(|m| m.keyword.eq_ignore_ascii_case(word))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Cursor read; needs a bound
    Find,
    /// Pipeline read; needs a bound stage
    Aggregate,
    /// Returns a single document or a scalar
    BoundedRead,
    /// Touches every matching document; needs a non-empty filter
    FilteredMutation,
    /// Inserts or single-document writes
    Write,
    Destructive,
    Privileged,
}

impl OperationKind {
    pub fn is_read(self) -> bool {
        matches!(self, OperationKind::Find | OperationKind::Aggregate | OperationKind::BoundedRead)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub kind: OperationKind,
}

/// Rule table for a document store
#[derive(Debug)]
pub struct DocumentRules {
    /// Shell methods, as in `db.users.find(...)`
    pub operations: &'static [Operation],
    /// Command documents, keyed by their first field
    pub commands: &'static [Operation],
    pub collection_accessors: &'static [&'static str],
    pub database_accessors: &'static [&'static str],
    pub write_stages: &'static [&'static str],
    pub bound_stage: &'static str,
    pub limit_method: &'static str,
    /// Cursor methods that collapse the result to a scalar
    pub scalar_methods: &'static [&'static str],
    /// Operators that run server-side JavaScript
    pub script_operators: &'static [&'static str],
    pub script_keywords: &'static [&'static str],
    /// Line prefixes an expression of this store starts with
    pub expression_starts: &'static [&'static str],
}

impl DocumentRules {
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&Operation> {
        self.commands.iter().find(|op| op.name == name)
    }
}

/// The table registered for one dialect
#[derive(Debug, Clone, Copy)]
pub enum DialectRules {
    Sql(&'static SqlRules),
    Document(&'static DocumentRules),
}

impl DialectRules {
    pub fn family(&self) -> Family {
        match self {
            DialectRules::Sql(_) => Family::Sql,
            DialectRules::Document(_) => Family::Document,
        }
    }
}

/// Case-insensitive membership test for keyword lists
pub fn is_one_of(list: &[&str], word: &str) -> bool {
    list.iter().any(|k| k.eq_ignore_ascii_case(word))
}

pub struct RuleRegistry {
    tables: HashMap<Dialect, DialectRules>,
    version: String,
}

impl RuleRegistry {
    pub fn new(version: impl Into<String>) -> Self {
        let mut registry = Self {
            tables: HashMap::new(),
            version: version.into(),
        };
        registry.register_builtins();
        registry
    }

    /// An empty registry, for callers assembling their own tables
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            tables: HashMap::new(),
            version: version.into(),
        }
    }

    /// The process-wide registry with the built-in tables, initialized once
    pub fn global() -> &'static RuleRegistry {
        static GLOBAL: OnceLock<RuleRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| RuleRegistry::new(env!("CARGO_PKG_VERSION")))
    }

    fn register_builtins(&mut self) {
        self.register(Dialect::Mysql, DialectRules::Sql(&MYSQL))
            .register(Dialect::Postgres, DialectRules::Sql(&POSTGRES))
            .register(Dialect::Sqlserver, DialectRules::Sql(&SQLSERVER))
            .register(Dialect::Sqlite, DialectRules::Sql(&SQLITE))
            .register(Dialect::Oracle, DialectRules::Sql(&ORACLE))
            .register(Dialect::Mongodb, DialectRules::Document(&MONGODB));
    }

    pub fn register(&mut self, dialect: Dialect, rules: DialectRules) -> &mut Self {
        self.tables.insert(dialect, rules);
        self
    }

    pub fn get(&self, dialect: Dialect) -> Result<DialectRules, RuleError> {
        self.tables
            .get(&dialect)
            .copied()
            .ok_or(RuleError::NotRegistered(dialect))
    }

    pub fn sql(&self, dialect: Dialect) -> Result<&'static SqlRules, RuleError> {
        match self.get(dialect)? {
            DialectRules::Sql(rules) => Ok(rules),
            other => Err(RuleError::FamilyMismatch {
                dialect,
                expected: Family::Sql,
                found: other.family(),
            }),
        }
    }

    pub fn document(&self, dialect: Dialect) -> Result<&'static DocumentRules, RuleError> {
        match self.get(dialect)? {
            DialectRules::Document(rules) => Ok(rules),
            other => Err(RuleError::FamilyMismatch {
                dialect,
                expected: Family::Document,
                found: other.family(),
            }),
        }
    }

    pub fn dialects(&self) -> Vec<Dialect> {
        let mut dialects: Vec<_> = self.tables.keys().copied().collect();
        dialects.sort();
        dialects
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_dialect_registered() {
        let registry = RuleRegistry::global();
        assert_eq!(registry.dialects(), Dialect::ALL.to_vec());
        for dialect in Dialect::ALL {
            assert_eq!(registry.get(dialect).unwrap().family(), dialect.family());
        }
    }

    #[test]
    fn test_family_mismatch() {
        let registry = RuleRegistry::global();
        assert!(registry.sql(Dialect::Mongodb).is_err());
        assert!(registry.document(Dialect::Postgres).is_err());
        assert!(registry.sql(Dialect::Postgres).is_ok());
    }

    #[test]
    fn test_empty_registry() {
        let registry = RuleRegistry::empty("test");
        assert!(matches!(
            registry.get(Dialect::Mysql),
            Err(RuleError::NotRegistered(Dialect::Mysql))
        ));
    }

    #[test]
    fn test_limit_templates() {
        assert_eq!(MYSQL.limit.render(100), "LIMIT 100");
        assert_eq!(ORACLE.limit.render(5), "FETCH FIRST 5 ROWS ONLY");
        assert_eq!(SQLSERVER.limit, LimitStyle::AfterSelect("TOP {n}"));
    }

    #[test]
    fn test_deny_set_shared_by_sql_dialects() {
        for dialect in Dialect::ALL.into_iter().filter(|d| d.family() == Family::Sql) {
            let rules = RuleRegistry::global().sql(dialect).unwrap();
            for keyword in ["DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE"] {
                assert!(is_one_of(rules.deny_ops, keyword), "{dialect} must deny {keyword}");
            }
        }
    }

    #[test]
    fn test_statement_keywords_include_refused_ones() {
        let keywords = POSTGRES.statement_keywords();
        for keyword in ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "DROP", "COPY"] {
            assert!(keywords.contains(&keyword));
        }
    }

    #[test]
    fn test_document_lookup() {
        assert_eq!(MONGODB.operation("deleteMany").unwrap().kind, OperationKind::FilteredMutation);
        assert_eq!(MONGODB.operation("dropDatabase").unwrap().kind, OperationKind::Destructive);
        assert_eq!(MONGODB.command("find").unwrap().kind, OperationKind::Find);
        assert!(MONGODB.operation("DELETEMANY").is_none());
    }
}
