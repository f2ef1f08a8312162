//! Dialect identifiers and the semantic field type system

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SchemaError;

/// Target query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    Postgres,
    Sqlserver,
    Sqlite,
    Oracle,
    Mongodb,
}

/// Structural family a dialect belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Sql,
    Document,
}

impl Dialect {
    pub const ALL: [Dialect; 6] = [
        Dialect::Mysql,
        Dialect::Postgres,
        Dialect::Sqlserver,
        Dialect::Sqlite,
        Dialect::Oracle,
        Dialect::Mongodb,
    ];

    /// Canonical identifier, as used in configuration and on the wire
    pub fn id(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlserver => "sqlserver",
            Dialect::Sqlite => "sqlite",
            Dialect::Oracle => "oracle",
            Dialect::Mongodb => "mongodb",
        }
    }

    /// Human-facing product name, used in prompts
    pub fn display_name(self) -> &'static str {
        match self {
            Dialect::Mysql => "MySQL",
            Dialect::Postgres => "PostgreSQL",
            Dialect::Sqlserver => "SQL Server",
            Dialect::Sqlite => "SQLite",
            Dialect::Oracle => "Oracle",
            Dialect::Mongodb => "MongoDB",
        }
    }

    pub fn family(self) -> Family {
        match self {
            Dialect::Mongodb => Family::Document,
            _ => Family::Sql,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Dialect {
    type Err = SchemaError;

    /// Accepts canonical ids and the product names the web UI used
    /// ("PostgreSQL", "SQL Server", ...), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "mysql" => Ok(Dialect::Mysql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            "sqlite" => Ok(Dialect::Sqlite),
            "oracle" => Ok(Dialect::Oracle),
            "mongodb" | "mongo" => Ok(Dialect::Mongodb),
            _ => Err(SchemaError::UnknownDialect(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Dialect {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Semantic type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
    Binary,
    Unknown,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Binary => "binary",
            FieldType::Unknown => "unknown",
        }
    }

    /// Map a declared database type (`varchar(255)`, `NUMBER(10,2)`,
    /// `timestamp with time zone`) onto a semantic tag.
    pub fn from_declared(declared: &str) -> Self {
        let lowered = declared.trim().to_lowercase();
        let (base, args) = match lowered.split_once('(') {
            Some((base, rest)) => (base.trim(), Some(rest.trim_end_matches(')'))),
            None => (lowered.as_str(), None),
        };
        let head = base.split_whitespace().next().unwrap_or("");

        match head {
            "char" | "character" | "varchar" | "varchar2" | "nvarchar" | "nvarchar2" | "nchar"
            | "text" | "tinytext" | "mediumtext" | "longtext" | "ntext" | "string" | "clob"
            | "nclob" | "uuid" | "uniqueidentifier" | "json" | "jsonb" | "xml" | "enum"
            | "citext" | "objectid" => FieldType::Text,
            "int" | "integer" | "smallint" | "bigint" | "tinyint" | "mediumint" | "serial"
            | "bigserial" | "smallserial" | "int2" | "int4" | "int8" | "long" => {
                FieldType::Integer
            }
            // Oracle NUMBER without a scale holds whole numbers.
            "number" => match args {
                Some(args) if !args.contains(',') => FieldType::Integer,
                Some(args) if args.split(',').nth(1).map(str::trim) == Some("0") => {
                    FieldType::Integer
                }
                _ => FieldType::Float,
            },
            "float" | "double" | "real" | "decimal" | "numeric" | "money" | "smallmoney"
            | "float4" | "float8" | "decimal128" => FieldType::Float,
            "bool" | "boolean" | "bit" => FieldType::Boolean,
            "date" | "time" | "datetime" | "datetime2" | "timestamp" | "timestamptz"
            | "smalldatetime" | "datetimeoffset" | "interval" | "year" => FieldType::Datetime,
            "blob" | "binary" | "varbinary" | "bytea" | "image" | "raw" | "longblob"
            | "mediumblob" | "tinyblob" | "bindata" | "bfile" => FieldType::Binary,
            _ => FieldType::Unknown,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
