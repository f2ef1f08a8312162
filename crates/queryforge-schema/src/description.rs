//! Raw, caller-supplied schema descriptions
//!
//! These are the unvalidated shapes callers send (JSON tool arguments, YAML
//! files). [`Schema::build`](crate::Schema::build) turns them into a checked
//! [`Schema`](crate::Schema).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescription {
    #[serde(default)]
    pub name: String,

    /// Dialect identifier; may be omitted when the caller passes it separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,

    #[serde(default, alias = "collections")]
    pub tables: Vec<TableDescription>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,

    #[serde(default, alias = "columns")]
    pub fields: Vec<FieldDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipDescription>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,

    #[serde(default, rename = "type", alias = "data_type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipDescription {
    pub field: String,
    pub references_table: String,
    pub references_field: String,
}
