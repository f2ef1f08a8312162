//! SQL statement analysis

use super::{Access, MatchedRule, ValidationVerdict};
use crate::lexer::{describe, tokenize, LexMode, Nesting, Scan, TokenKind};
use queryforge_rules::{is_one_of, SqlRules};

pub(crate) fn primary_mode(rules: &SqlRules) -> LexMode {
    if rules.backslash_escapes {
        LexMode::SqlBackslash
    } else {
        LexMode::Sql
    }
}

/// Index of the first word, skipping opening parentheses
pub(crate) fn leading_word(scan: &Scan<'_>) -> Option<usize> {
    let index = scan.tokens.iter().position(|t| !t.is_symbol("("))?;
    (scan.tokens[index].kind == TokenKind::Word).then_some(index)
}

/// Index of the keyword naming the statement's operation. For a statement
/// opening with common table expressions this is the first top-level
/// operation keyword after them.
pub(crate) fn main_statement(scan: &Scan<'_>, rules: &SqlRules) -> Option<usize> {
    let lead = leading_word(scan)?;
    let is_operation = |i: usize| {
        let token = &scan.tokens[i];
        token.kind == TokenKind::Word
            && (is_one_of(rules.read_ops, token.text)
                || is_one_of(rules.write_ops, token.text)
                || rules.filtered_mutation(token.text).is_some())
    };

    if is_one_of(rules.cte_ops, scan.tokens[lead].text) {
        (lead + 1..scan.len()).find(|&i| scan.depths[i] == 0 && is_operation(i))
    } else {
        is_operation(lead).then_some(lead)
    }
}

pub(crate) fn validate(query: &str, rules: &SqlRules, access: Access) -> ValidationVerdict {
    let mode = primary_mode(rules);
    let (primary, alternate) = match (tokenize(query, mode), tokenize(query, mode.alternate())) {
        (Ok(primary), Ok(alternate)) => (primary, alternate),
        (Err(e), _) | (_, Err(e)) => {
            return ValidationVerdict::reject(MatchedRule::Unrecognized, e.to_string());
        }
    };
    let scan = Scan::new(&primary, Nesting::Parens);
    let alternate = Scan::new(&alternate, Nesting::Parens);

    if scan.is_empty() {
        return ValidationVerdict::reject(MatchedRule::Unrecognized, "Query is empty");
    }

    if scan.has_trailing_statement() || alternate.has_trailing_statement() {
        return ValidationVerdict::reject(
            MatchedRule::MultiStatement,
            "Query contains more than one statement",
        );
    }

    let lead = leading_word(&scan);
    let keyword = lead.map(|i| scan.tokens[i].text.to_ascii_uppercase());

    if let Some(keyword) = keyword.as_deref().filter(|k| is_one_of(rules.deny_ops, k)) {
        return ValidationVerdict::reject(
            MatchedRule::DestructiveOp,
            format!("{keyword} statements are not allowed"),
        );
    }

    if scan.unterminated {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            "Query has an unterminated string literal, identifier or comment",
        );
    }
    if !scan.balanced {
        return ValidationVerdict::reject(MatchedRule::Unrecognized, "Query has unbalanced parentheses");
    }

    let Some(keyword) = keyword else {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            "Query does not start with a statement keyword",
        );
    };

    if is_one_of(rules.privileged_ops, &keyword) {
        return ValidationVerdict::reject(
            MatchedRule::SystemAccess,
            format!("{keyword} statements are not allowed"),
        );
    }

    let Some(main) = main_statement(&scan, rules) else {
        return ValidationVerdict::reject(
            MatchedRule::Unrecognized,
            format!("Unrecognized statement starting with {keyword}"),
        );
    };

    for candidate in [&scan, &alternate] {
        if let Some((_, pattern)) = candidate.find_any(rules.system_patterns, true) {
            return ValidationVerdict::reject(
                MatchedRule::SystemAccess,
                format!("Query uses {}", describe(pattern)),
            );
        }
    }

    if let Some(target) = read_target(&scan, rules, main) {
        return ValidationVerdict::reject(
            MatchedRule::DestructiveOp,
            format!("SELECT ... {target} stores the result in a new table"),
        );
    }

    if let Some(reason) = unqualified_mutation(&scan, rules) {
        return ValidationVerdict::reject(MatchedRule::UnqualifiedMutation, reason);
    }

    if access == Access::ReadOnly && writes(&scan, rules, main) {
        return ValidationVerdict::reject(
            MatchedRule::WriteNotAllowed,
            "Only reads are allowed in read-only mode",
        );
    }

    let query = query.trim().to_string();
    if is_one_of(rules.read_ops, scan.tokens[main].text) && !is_bounded(&scan, rules) {
        return ValidationVerdict::NeedsLimit(query);
    }

    ValidationVerdict::Safe(query)
}

/// `INTO` at the main level of a read, as in `SELECT * INTO copy FROM t`
fn read_target(scan: &Scan<'_>, rules: &SqlRules, main: usize) -> Option<String> {
    if !is_one_of(rules.read_ops, scan.tokens[main].text) {
        return None;
    }
    let depth = scan.depths[main];
    scan.tokens[main + 1..]
        .iter()
        .zip(&scan.depths[main + 1..])
        .take_while(|(t, d)| **d >= depth && !t.is_symbol(";"))
        .find(|(t, d)| **d == depth && t.kind == TokenKind::Word && is_one_of(rules.read_targets, t.text))
        .map(|(t, _)| t.text.to_ascii_uppercase())
}

/// Whether the statement, or any statement nested in it, changes data
fn writes(scan: &Scan<'_>, rules: &SqlRules, main: usize) -> bool {
    if !is_one_of(rules.read_ops, scan.tokens[main].text) {
        return true;
    }
    scan.tokens.iter().enumerate().any(|(i, token)| {
        let head = token.kind == TokenKind::Word
            && (is_one_of(rules.write_ops, token.text) || rules.filtered_mutation(token.text).is_some());
        // REPLACE(...) is a string function, not a statement
        let call = scan.get(i + 1).is_some_and(|next| next.is_symbol("("));
        head && !call && !is_exempt(scan, rules, i)
    })
}

fn is_exempt(scan: &Scan<'_>, rules: &SqlRules, index: usize) -> bool {
    index
        .checked_sub(1)
        .and_then(|prev| scan.get(prev))
        .is_some_and(|prev| prev.kind == TokenKind::Word && is_one_of(rules.mutation_exemptions, prev.text))
}

/// Every UPDATE/DELETE head must have its filter keyword at its own nesting
/// level before the enclosing group or statement ends
fn unqualified_mutation(scan: &Scan<'_>, rules: &SqlRules) -> Option<String> {
    for (i, token) in scan.tokens.iter().enumerate() {
        if token.kind != TokenKind::Word {
            continue;
        }
        let Some(mutation) = rules.filtered_mutation(token.text) else {
            continue;
        };
        if is_exempt(scan, rules, i) {
            continue;
        }

        let depth = scan.depths[i];
        let filtered = scan.tokens[i + 1..]
            .iter()
            .zip(&scan.depths[i + 1..])
            .take_while(|(t, d)| **d > depth || (**d == depth && !t.is_symbol(";")))
            .any(|(t, d)| *d == depth && t.is_word(mutation.filter));

        if !filtered {
            return Some(format!(
                "{} without a {} clause affects every row",
                mutation.keyword, mutation.filter
            ));
        }
    }
    None
}

fn is_bounded(scan: &Scan<'_>, rules: &SqlRules) -> bool {
    (0..scan.len()).any(|i| {
        scan.depths[i] == 0 && rules.bound_markers.iter().any(|p| scan.matches(i, p, false))
    })
}

#[cfg(test)]
mod tests {
    use crate::validate::{validate, Access, MatchedRule, SafetyValidator, ValidationVerdict};
    use queryforge_schema::Dialect;

    const SQL_DIALECTS: [Dialect; 5] = [
        Dialect::Mysql,
        Dialect::Postgres,
        Dialect::Sqlserver,
        Dialect::Sqlite,
        Dialect::Oracle,
    ];

    fn rule(query: &str, dialect: Dialect) -> Option<MatchedRule> {
        validate(query, dialect).matched_rule()
    }

    #[test]
    fn test_bounded_select_is_safe() {
        assert_eq!(
            validate("SELECT * FROM users LIMIT 10", Dialect::Postgres),
            ValidationVerdict::Safe("SELECT * FROM users LIMIT 10".to_string())
        );
        assert!(validate("SELECT TOP 5 * FROM users", Dialect::Sqlserver).is_safe());
        assert!(validate("SELECT * FROM users FETCH FIRST 5 ROWS ONLY", Dialect::Oracle).is_safe());
        assert!(validate("SELECT * FROM users WHERE ROWNUM <= 5", Dialect::Oracle).is_safe());
        assert!(validate("SELECT * FROM users WHERE active = 1 AND ROWNUM < 10", Dialect::Oracle).is_safe());
        assert!(validate("SELECT * FROM users LIMIT ?", Dialect::Sqlite).is_safe());
    }

    #[test]
    fn test_unbounded_select_needs_limit() {
        for dialect in SQL_DIALECTS {
            assert_eq!(
                validate("  SELECT * FROM users\n", dialect),
                ValidationVerdict::NeedsLimit("SELECT * FROM users".to_string()),
                "{dialect}"
            );
        }
    }

    #[test]
    fn test_limit_inside_subquery_does_not_bound() {
        let query = "SELECT * FROM (SELECT id FROM users LIMIT 5) AS u";
        assert!(matches!(validate(query, Dialect::Postgres), ValidationVerdict::NeedsLimit(_)));
    }

    #[test]
    fn test_cte_main_statement() {
        let query = "WITH recent AS (SELECT * FROM orders LIMIT 5) SELECT * FROM recent";
        assert!(matches!(validate(query, Dialect::Postgres), ValidationVerdict::NeedsLimit(_)));

        let query = "WITH recent AS (SELECT id FROM orders) SELECT * FROM recent LIMIT 5";
        assert!(validate(query, Dialect::Postgres).is_safe());

        let query = "WITH gone AS (DELETE FROM orders RETURNING *) SELECT * FROM gone LIMIT 5";
        assert_eq!(rule(query, Dialect::Postgres), Some(MatchedRule::UnqualifiedMutation));
    }

    #[test]
    fn test_multi_statement() {
        for dialect in SQL_DIALECTS {
            assert_eq!(
                rule("SELECT * FROM users; DROP TABLE users;", dialect),
                Some(MatchedRule::MultiStatement),
                "{dialect}"
            );
        }
        assert!(validate("SELECT 1 LIMIT 1;", Dialect::Mysql).is_safe());
        assert!(validate("SELECT 1 LIMIT 1;;  ", Dialect::Mysql).is_safe());
    }

    #[test]
    fn test_semicolon_inside_literal_or_comment() {
        assert!(validate("SELECT 'a;b' FROM t LIMIT 1", Dialect::Postgres).is_safe());
        assert!(validate("SELECT 1 LIMIT 1 -- ; DROP TABLE t", Dialect::Postgres).is_safe());
        assert!(validate("SELECT \"odd;name\" FROM t LIMIT 1", Dialect::Postgres).is_safe());
    }

    #[test]
    fn test_escape_ambiguity_resolves_unsafe() {
        // Standard lexing ends the literal at `\'`, exposing a second statement
        let query = r"SELECT * FROM t WHERE a = 'x\' ; DROP TABLE t; -- ' LIMIT 1";
        assert_eq!(rule(query, Dialect::Postgres), Some(MatchedRule::MultiStatement));
        assert_eq!(rule(query, Dialect::Mysql), Some(MatchedRule::MultiStatement));
    }

    #[test]
    fn test_destructive_leading_keywords() {
        for dialect in SQL_DIALECTS {
            for query in [
                "DROP TABLE users",
                "truncate table users",
                "ALTER TABLE users ADD COLUMN x int",
                "GRANT ALL ON users TO bob",
                "REVOKE ALL ON users FROM bob",
                "CREATE TABLE x (id int)",
                "(DROP TABLE users)",
            ] {
                assert_eq!(rule(query, dialect), Some(MatchedRule::DestructiveOp), "{dialect}: {query}");
            }
        }
    }

    #[test]
    fn test_destructive_wins_over_malformed() {
        assert_eq!(rule("DROP TABLE 'users", Dialect::Sqlite), Some(MatchedRule::DestructiveOp));
    }

    #[test]
    fn test_malformed_is_unrecognized() {
        assert_eq!(rule("SELECT 'abc", Dialect::Postgres), Some(MatchedRule::Unrecognized));
        assert_eq!(rule("SELECT (1", Dialect::Postgres), Some(MatchedRule::Unrecognized));
        assert_eq!(rule("", Dialect::Postgres), Some(MatchedRule::Unrecognized));
        assert_eq!(rule("EXPLAIN SELECT 1", Dialect::Postgres), Some(MatchedRule::Unrecognized));
        assert_eq!(rule("42", Dialect::Postgres), Some(MatchedRule::Unrecognized));
    }

    #[test]
    fn test_privileged_statements() {
        assert_eq!(rule("EXEC sp_who", Dialect::Sqlserver), Some(MatchedRule::SystemAccess));
        assert_eq!(rule("COPY users TO '/tmp/x'", Dialect::Postgres), Some(MatchedRule::SystemAccess));
        assert_eq!(rule("ATTACH DATABASE 'x.db' AS x", Dialect::Sqlite), Some(MatchedRule::SystemAccess));
        assert_eq!(rule("PRAGMA table_info(users)", Dialect::Sqlite), Some(MatchedRule::SystemAccess));
        assert_eq!(rule("CALL purge_all()", Dialect::Mysql), Some(MatchedRule::SystemAccess));
    }

    #[test]
    fn test_system_patterns() {
        assert_eq!(
            rule("SELECT * FROM users INTO OUTFILE '/tmp/u'", Dialect::Mysql),
            Some(MatchedRule::SystemAccess)
        );
        assert_eq!(rule("SELECT SLEEP(10) LIMIT 1", Dialect::Mysql), Some(MatchedRule::SystemAccess));
        assert_eq!(rule("SELECT pg_sleep(10)", Dialect::Postgres), Some(MatchedRule::SystemAccess));
        assert_eq!(
            rule("SELECT pg_read_file('/etc/passwd')", Dialect::Postgres),
            Some(MatchedRule::SystemAccess)
        );
        assert_eq!(
            rule("SELECT * FROM OPENROWSET('SQLNCLI', 'x', 'y')", Dialect::Sqlserver),
            Some(MatchedRule::SystemAccess)
        );
        assert_eq!(
            rule("SELECT UTL_HTTP.REQUEST('http://x') FROM dual", Dialect::Oracle),
            Some(MatchedRule::SystemAccess)
        );
        assert_eq!(
            rule("SELECT load_extension('evil.so')", Dialect::Sqlite),
            Some(MatchedRule::SystemAccess)
        );
    }

    #[test]
    fn test_system_pattern_in_literal_is_ignored() {
        assert!(validate("SELECT 'SLEEP(5)' LIMIT 1", Dialect::Mysql).is_safe());
    }

    #[test]
    fn test_unqualified_mutation_every_dialect() {
        for dialect in SQL_DIALECTS {
            assert_eq!(rule("UPDATE t SET c=1", dialect), Some(MatchedRule::UnqualifiedMutation));
            assert_eq!(rule("DELETE FROM t", dialect), Some(MatchedRule::UnqualifiedMutation));
            assert!(validate("UPDATE t SET c=1 WHERE id=5", dialect).is_safe(), "{dialect}");
            assert!(validate("DELETE FROM t WHERE id = 5", dialect).is_safe(), "{dialect}");
        }
    }

    #[test]
    fn test_where_in_subquery_does_not_qualify() {
        let query = "UPDATE t SET c = (SELECT max(c) FROM u WHERE u.id = 1)";
        assert_eq!(rule(query, Dialect::Postgres), Some(MatchedRule::UnqualifiedMutation));
    }

    #[test]
    fn test_mutation_exemptions() {
        assert!(validate("SELECT * FROM t LIMIT 1 FOR UPDATE", Dialect::Postgres).is_safe());
        assert!(validate(
            "INSERT INTO t (id, c) VALUES (1, 2) ON DUPLICATE KEY UPDATE c = 2",
            Dialect::Mysql
        )
        .is_safe());
        assert!(validate(
            "INSERT INTO t (id) VALUES (1) ON CONFLICT (id) DO UPDATE SET c = 1",
            Dialect::Postgres
        )
        .is_safe());
    }

    #[test]
    fn test_insert_is_safe() {
        assert!(validate("INSERT INTO users (name) VALUES ('a')", Dialect::Sqlite).is_safe());
        assert!(validate("INSERT INTO archive SELECT * FROM users", Dialect::Postgres).is_safe());
    }

    #[test]
    fn test_comment_hidden_keywords() {
        assert_eq!(rule("/* hi */ DROP TABLE t", Dialect::Postgres), Some(MatchedRule::DestructiveOp));
        assert_eq!(rule("-- x\nDELETE FROM t", Dialect::Postgres), Some(MatchedRule::UnqualifiedMutation));
    }

    #[test]
    fn test_rownum_outside_a_bound_needs_limit() {
        for query in [
            "SELECT ROWNUM, name FROM users",
            "SELECT * FROM t WHERE x = 1 ORDER BY ROWNUM",
            "SELECT * FROM t WHERE ROWNUM > 5",
            "SELECT * FROM (SELECT * FROM t WHERE ROWNUM <= 5) s",
        ] {
            assert!(
                matches!(validate(query, Dialect::Oracle), ValidationVerdict::NeedsLimit(_)),
                "{query}"
            );
        }
    }

    #[test]
    fn test_select_into_creates_a_table() {
        let cases = [
            ("SELECT TOP 5 * INTO users_copy FROM users", Dialect::Sqlserver),
            ("SELECT * INTO users_copy FROM users LIMIT 5", Dialect::Postgres),
            ("SELECT * INTO TEMP recent FROM orders LIMIT 5", Dialect::Postgres),
            ("WITH u AS (SELECT id FROM users) SELECT * INTO ids FROM u", Dialect::Sqlserver),
            ("SELECT COUNT(*) INTO total FROM orders", Dialect::Oracle),
            ("CREATE TABLE users_copy AS SELECT * FROM users", Dialect::Postgres),
        ];
        for (query, dialect) in cases {
            assert_eq!(rule(query, dialect), Some(MatchedRule::DestructiveOp), "{dialect}: {query}");
        }
        assert!(validate("INSERT INTO archive SELECT * FROM users", Dialect::Sqlserver).is_safe());
        assert!(validate("SELECT * FROM t WHERE id IN (SELECT id FROM u) LIMIT 5", Dialect::Postgres).is_safe());
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let validator = SafetyValidator::default();
        let read_only = |query: &str, dialect| validator.validate_for(query, dialect, Access::ReadOnly);

        for dialect in SQL_DIALECTS {
            assert_eq!(
                read_only("UPDATE t SET c = 1 WHERE id = 5", dialect).matched_rule(),
                Some(MatchedRule::WriteNotAllowed),
                "{dialect}"
            );
            assert_eq!(
                read_only("INSERT INTO t (a) VALUES (1)", dialect).matched_rule(),
                Some(MatchedRule::WriteNotAllowed),
                "{dialect}"
            );
            assert!(matches!(read_only("SELECT * FROM t", dialect), ValidationVerdict::NeedsLimit(_)));
        }

        let query = "WITH gone AS (DELETE FROM orders WHERE id = 1 RETURNING *) SELECT * FROM gone LIMIT 5";
        assert_eq!(read_only(query, Dialect::Postgres).matched_rule(), Some(MatchedRule::WriteNotAllowed));

        // Earlier rules still name the refusal
        assert_eq!(read_only("DROP TABLE t", Dialect::Postgres).matched_rule(), Some(MatchedRule::DestructiveOp));
        assert_eq!(read_only("DELETE FROM t", Dialect::Mysql).matched_rule(), Some(MatchedRule::UnqualifiedMutation));

        assert!(read_only("SELECT REPLACE(name, 'a', 'b') FROM t LIMIT 5", Dialect::Mysql).is_safe());
        assert!(read_only("SELECT * FROM t LIMIT 1 FOR UPDATE", Dialect::Postgres).is_safe());
    }
}
