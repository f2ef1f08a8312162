//! SQL dialect tables

use crate::{FilteredMutation, LimitStyle, Marker, Pattern, SqlRules};
use Marker::{Count, Open, Symbol, Word};

const READ_OPS: &[&str] = &["SELECT"];
const CTE_OPS: &[&str] = &["WITH"];

const FILTERED: &[FilteredMutation] = &[
    FilteredMutation { keyword: "UPDATE", filter: "WHERE" },
    FilteredMutation { keyword: "DELETE", filter: "WHERE" },
];

// ON DUPLICATE KEY UPDATE, ON CONFLICT DO UPDATE, FOR UPDATE, ON DELETE CASCADE
const EXEMPTIONS: &[&str] = &["FOR", "ON", "KEY", "DO"];

const SET_OPERATORS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];

const LIMIT_BOUND: &[Pattern] = &[&[Word("LIMIT"), Count]];

const INTO_TARGET: &[&str] = &["INTO"];

pub static MYSQL: SqlRules = SqlRules {
    backslash_escapes: true,
    read_ops: READ_OPS,
    cte_ops: CTE_OPS,
    write_ops: &["INSERT", "REPLACE"],
    filtered_mutations: FILTERED,
    mutation_exemptions: EXEMPTIONS,
    deny_ops: &["DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE", "RENAME"],
    privileged_ops: &[
        "CALL", "LOAD", "HANDLER", "SET", "FLUSH", "KILL", "SHUTDOWN", "LOCK", "UNLOCK",
        "PREPARE", "EXECUTE", "DEALLOCATE", "DO", "INSTALL", "UNINSTALL", "RESET", "PURGE",
        "CHANGE", "START", "STOP", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "USE",
    ],
    system_patterns: &[
        &[Word("INTO"), Word("OUTFILE")],
        &[Word("INTO"), Word("DUMPFILE")],
        &[Word("LOAD_FILE"), Open],
        &[Word("SLEEP"), Open],
        &[Word("BENCHMARK"), Open],
        &[Word("GET_LOCK"), Open],
        &[Word("SYS_EXEC"), Open],
        &[Word("SYS_EVAL"), Open],
    ],
    bound_markers: LIMIT_BOUND,
    read_targets: &[],
    set_operators: SET_OPERATORS,
    limit_conflicts: &["LIMIT", "OFFSET", "FOR", "LOCK", "INTO", "PROCEDURE"],
    limit: LimitStyle::Suffix("LIMIT {n}"),
};

pub static POSTGRES: SqlRules = SqlRules {
    backslash_escapes: false,
    read_ops: READ_OPS,
    cte_ops: CTE_OPS,
    write_ops: &["INSERT"],
    filtered_mutations: FILTERED,
    mutation_exemptions: EXEMPTIONS,
    deny_ops: &["DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE", "RENAME"],
    privileged_ops: &[
        "CALL", "COPY", "DO", "EXECUTE", "PREPARE", "DEALLOCATE", "SET", "RESET", "LISTEN",
        "NOTIFY", "UNLISTEN", "LOCK", "VACUUM", "REINDEX", "CLUSTER", "SECURITY", "LOAD",
        "DISCARD", "REFRESH", "IMPORT", "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT",
    ],
    system_patterns: &[
        &[Word("PG_SLEEP"), Open],
        &[Word("PG_SLEEP_FOR"), Open],
        &[Word("PG_READ_FILE"), Open],
        &[Word("PG_READ_BINARY_FILE"), Open],
        &[Word("PG_LS_DIR"), Open],
        &[Word("LO_IMPORT"), Open],
        &[Word("LO_EXPORT"), Open],
        &[Word("DBLINK"), Open],
        &[Word("DBLINK_EXEC"), Open],
        &[Word("PG_TERMINATE_BACKEND"), Open],
        &[Word("PG_CANCEL_BACKEND"), Open],
        &[Word("SET_CONFIG"), Open],
    ],
    bound_markers: &[
        &[Word("LIMIT"), Count],
        &[Word("FETCH"), Word("FIRST")],
        &[Word("FETCH"), Word("NEXT")],
    ],
    read_targets: INTO_TARGET,
    set_operators: SET_OPERATORS,
    limit_conflicts: &["LIMIT", "OFFSET", "FETCH", "FOR", "INTO"],
    limit: LimitStyle::Suffix("LIMIT {n}"),
};

pub static SQLSERVER: SqlRules = SqlRules {
    backslash_escapes: false,
    read_ops: READ_OPS,
    cte_ops: CTE_OPS,
    write_ops: &["INSERT"],
    filtered_mutations: FILTERED,
    mutation_exemptions: EXEMPTIONS,
    deny_ops: &["DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE", "RENAME", "DENY"],
    privileged_ops: &[
        "EXEC", "EXECUTE", "DBCC", "BACKUP", "RESTORE", "SHUTDOWN", "KILL", "RECONFIGURE",
        "BULK", "SET", "USE", "WAITFOR", "DECLARE", "OPEN", "BEGIN", "COMMIT",
        "ROLLBACK", "SAVE",
    ],
    system_patterns: &[
        &[Word("XP_CMDSHELL")],
        &[Word("XP_DIRTREE")],
        &[Word("XP_REGREAD")],
        &[Word("XP_REGWRITE")],
        &[Word("SP_EXECUTESQL")],
        &[Word("SP_CONFIGURE")],
        &[Word("SP_OACREATE")],
        &[Word("OPENROWSET"), Open],
        &[Word("OPENDATASOURCE"), Open],
        &[Word("OPENQUERY"), Open],
        &[Word("WAITFOR")],
    ],
    bound_markers: &[
        &[Word("TOP"), Count],
        &[Word("FETCH"), Word("FIRST")],
        &[Word("FETCH"), Word("NEXT")],
    ],
    read_targets: INTO_TARGET,
    set_operators: SET_OPERATORS,
    limit_conflicts: &["TOP", "OFFSET", "FETCH", "INTO"],
    limit: LimitStyle::AfterSelect("TOP {n}"),
};

pub static SQLITE: SqlRules = SqlRules {
    backslash_escapes: false,
    read_ops: READ_OPS,
    cte_ops: CTE_OPS,
    write_ops: &["INSERT", "REPLACE"],
    filtered_mutations: FILTERED,
    mutation_exemptions: EXEMPTIONS,
    deny_ops: &["DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE", "RENAME"],
    privileged_ops: &[
        "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "ANALYZE", "BEGIN", "COMMIT",
        "END", "ROLLBACK", "SAVEPOINT", "RELEASE",
    ],
    system_patterns: &[
        &[Word("LOAD_EXTENSION"), Open],
        &[Word("READFILE"), Open],
        &[Word("WRITEFILE"), Open],
        &[Word("FTS3_TOKENIZER"), Open],
    ],
    bound_markers: LIMIT_BOUND,
    read_targets: &[],
    set_operators: SET_OPERATORS,
    limit_conflicts: &["LIMIT", "OFFSET"],
    limit: LimitStyle::Suffix("LIMIT {n}"),
};

pub static ORACLE: SqlRules = SqlRules {
    backslash_escapes: false,
    read_ops: READ_OPS,
    cte_ops: CTE_OPS,
    write_ops: &["INSERT"],
    filtered_mutations: FILTERED,
    mutation_exemptions: EXEMPTIONS,
    deny_ops: &[
        "DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE", "RENAME", "PURGE", "FLASHBACK",
    ],
    privileged_ops: &[
        "EXEC", "EXECUTE", "CALL", "BEGIN", "DECLARE", "LOCK", "AUDIT", "NOAUDIT", "SHUTDOWN",
        "STARTUP", "SET", "COMMIT", "ROLLBACK", "SAVEPOINT", "ANALYZE",
    ],
    system_patterns: &[
        &[Word("UTL_HTTP")],
        &[Word("UTL_FILE")],
        &[Word("UTL_TCP")],
        &[Word("UTL_SMTP")],
        &[Word("UTL_INADDR")],
        &[Word("DBMS_PIPE")],
        &[Word("DBMS_LOCK")],
        &[Word("DBMS_SCHEDULER")],
        &[Word("DBMS_JAVA")],
        &[Word("DBMS_SQL")],
        &[Word("HTTPURITYPE")],
    ],
    bound_markers: &[
        &[Word("FETCH"), Word("FIRST")],
        &[Word("FETCH"), Word("NEXT")],
        &[Word("WHERE"), Word("ROWNUM"), Symbol("<"), Count],
        &[Word("WHERE"), Word("ROWNUM"), Symbol("<"), Symbol("="), Count],
        &[Word("WHERE"), Word("ROWNUM"), Symbol("="), Count],
        &[Word("AND"), Word("ROWNUM"), Symbol("<"), Count],
        &[Word("AND"), Word("ROWNUM"), Symbol("<"), Symbol("="), Count],
        &[Word("AND"), Word("ROWNUM"), Symbol("="), Count],
    ],
    read_targets: INTO_TARGET,
    set_operators: &["UNION", "INTERSECT", "EXCEPT", "MINUS"],
    limit_conflicts: &["FETCH", "OFFSET", "FOR", "INTO"],
    limit: LimitStyle::Suffix("FETCH FIRST {n} ROWS ONLY"),
};
