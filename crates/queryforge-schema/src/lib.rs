//! QueryForge schema model
//!
//! Dialect-agnostic representation of tables/collections and their fields,
//! built from caller-supplied descriptions. Rendering is deterministic so the
//! prompt text, and anything keyed on it, is reproducible.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use thiserror::Error;

mod description;
mod types;
pub use description::*;
pub use types::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown dialect: {0} (expected one of mysql, postgres, sqlserver, sqlite, oracle, mongodb)")]
    UnknownDialect(String),

    #[error("Schema does not declare a dialect")]
    MissingDialect,

    #[error("Schema declares dialect {declared} but {requested} was requested")]
    DialectMismatch { declared: Dialect, requested: Dialect },

    #[error("Empty {0} name")]
    EmptyName(&'static str),

    #[error("Duplicate table: {0}")]
    DuplicateTable(String),

    #[error("Duplicate field {field} in table {table}")]
    DuplicateField { table: String, field: String },

    #[error("Primary key of table {table} names unknown field {field}")]
    UnknownPrimaryKeyField { table: String, field: String },

    #[error("Relationship on {table}.{field}: field does not exist")]
    UnknownRelationshipField { table: String, field: String },

    #[error("Relationship on {table}.{field} references unknown table {references_table}")]
    UnknownReferencedTable {
        table: String,
        field: String,
        references_table: String,
    },

    #[error("Relationship on {table}.{field} references unknown field {references_table}.{references_field}")]
    UnknownReferencedField {
        table: String,
        field: String,
        references_table: String,
        references_field: String,
    },
}

/// A column or document field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    field_type: FieldType,
    declared_type: Option<String>,
    nullable: bool,
    description: Option<String>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// The type string as the caller wrote it, if any
    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub field: String,
    pub references_table: String,
    pub references_field: String,
}

/// A relational table or a document collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    fields: Vec<Field>,
    primary_key: Vec<String>,
    relationships: Vec<Relationship>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A validated schema. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    dialect: Dialect,
    tables: Vec<Table>,
}

impl Schema {
    /// Validate a description that carries its own dialect
    pub fn build(description: &SchemaDescription) -> Result<Self, SchemaError> {
        let dialect = description
            .dialect
            .as_deref()
            .ok_or(SchemaError::MissingDialect)?
            .parse()?;
        Self::build_with(description, dialect)
    }

    /// Validate a description for the requested dialect.
    ///
    /// A description without a dialect adopts `dialect`; one that declares a
    /// different dialect is rejected.
    pub fn build_for(description: &SchemaDescription, dialect: Dialect) -> Result<Self, SchemaError> {
        if let Some(declared) = description.dialect.as_deref() {
            let declared: Dialect = declared.parse()?;
            if declared != dialect {
                return Err(SchemaError::DialectMismatch {
                    declared,
                    requested: dialect,
                });
            }
        }
        Self::build_with(description, dialect)
    }

    fn build_with(description: &SchemaDescription, dialect: Dialect) -> Result<Self, SchemaError> {
        let mut table_names = HashSet::new();
        let mut tables = Vec::with_capacity(description.tables.len());

        for raw in &description.tables {
            if raw.name.trim().is_empty() {
                return Err(SchemaError::EmptyName("table"));
            }
            if !table_names.insert(raw.name.as_str()) {
                return Err(SchemaError::DuplicateTable(raw.name.clone()));
            }
            tables.push(build_table(raw)?);
        }

        // References are checked once every table is known so that declaration
        // order does not matter.
        for table in &tables {
            for rel in &table.relationships {
                let target = tables
                    .iter()
                    .find(|t| t.name == rel.references_table)
                    .ok_or_else(|| SchemaError::UnknownReferencedTable {
                        table: table.name.clone(),
                        field: rel.field.clone(),
                        references_table: rel.references_table.clone(),
                    })?;
                if target.find_field(&rel.references_field).is_none() {
                    return Err(SchemaError::UnknownReferencedField {
                        table: table.name.clone(),
                        field: rel.field.clone(),
                        references_table: rel.references_table.clone(),
                        references_field: rel.references_field.clone(),
                    });
                }
            }
        }

        Ok(Schema {
            name: description.name.trim().to_string(),
            dialect,
            tables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Human-readable listing for prompts, in declaration order
    pub fn render_for_prompt(&self) -> String {
        render_for_prompt(self)
    }

    /// SHA-256 of the rendered listing, for cache keys and log correlation
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.render_for_prompt().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn build_table(raw: &TableDescription) -> Result<Table, SchemaError> {
    let mut field_names = HashSet::new();
    let mut fields = Vec::with_capacity(raw.fields.len());

    for f in &raw.fields {
        if f.name.trim().is_empty() {
            return Err(SchemaError::EmptyName("field"));
        }
        if !field_names.insert(f.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                table: raw.name.clone(),
                field: f.name.clone(),
            });
        }

        let declared_type = f
            .data_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);

        fields.push(Field {
            name: f.name.clone(),
            field_type: declared_type
                .as_deref()
                .map(FieldType::from_declared)
                .unwrap_or(FieldType::Unknown),
            declared_type,
            nullable: f.nullable.unwrap_or(true),
            description: f
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
        });
    }

    for key in &raw.primary_key {
        if !field_names.contains(key.as_str()) {
            return Err(SchemaError::UnknownPrimaryKeyField {
                table: raw.name.clone(),
                field: key.clone(),
            });
        }
    }

    let mut relationships = Vec::with_capacity(raw.relationships.len());
    for rel in &raw.relationships {
        if !field_names.contains(rel.field.as_str()) {
            return Err(SchemaError::UnknownRelationshipField {
                table: raw.name.clone(),
                field: rel.field.clone(),
            });
        }
        relationships.push(Relationship {
            field: rel.field.clone(),
            references_table: rel.references_table.clone(),
            references_field: rel.references_field.clone(),
        });
    }

    Ok(Table {
        name: raw.name.clone(),
        fields,
        primary_key: raw.primary_key.clone(),
        relationships,
    })
}

/// Render a schema as the listing embedded in prompts.
///
/// Output depends only on the schema value: tables, fields and relationships
/// appear in declaration order.
pub fn render_for_prompt(schema: &Schema) -> String {
    let mut out = String::new();
    let label = match schema.dialect.family() {
        Family::Document => "Collection",
        Family::Sql => "Table",
    };

    if schema.name.is_empty() {
        let _ = writeln!(out, "Database ({})", schema.dialect.display_name());
    } else {
        let _ = writeln!(out, "Database {} ({})", schema.name, schema.dialect.display_name());
    }

    if schema.tables.is_empty() {
        out.push_str("\n(no tables described)\n");
        return out;
    }

    for table in &schema.tables {
        out.push('\n');
        if table.primary_key.is_empty() {
            let _ = writeln!(out, "{} {}", label, table.name);
        } else {
            let _ = writeln!(
                out,
                "{} {} (primary key: {})",
                label,
                table.name,
                table.primary_key.join(", ")
            );
        }

        for field in &table.fields {
            let _ = write!(out, "  {}: {}", field.name, field.field_type);

            let mut notes = Vec::new();
            if let Some(declared) = &field.declared_type {
                notes.push(declared.as_str());
            }
            if !field.nullable {
                notes.push("not null");
            }
            if !notes.is_empty() {
                let _ = write!(out, " [{}]", notes.join(", "));
            }
            if let Some(desc) = &field.description {
                let _ = write!(out, " -- {}", desc);
            }
            out.push('\n');
        }

        for rel in &table.relationships {
            let _ = writeln!(
                out,
                "  foreign key {} -> {}.{}",
                rel.field, rel.references_table, rel.references_field
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(name: &str, ty: &str) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            data_type: Some(ty.to_string()),
            nullable: None,
            description: None,
        }
    }

    fn shop() -> SchemaDescription {
        SchemaDescription {
            name: "shop".to_string(),
            dialect: Some("postgres".to_string()),
            tables: vec![
                TableDescription {
                    name: "users".to_string(),
                    fields: vec![
                        FieldDescription {
                            nullable: Some(false),
                            ..field("id", "serial")
                        },
                        FieldDescription {
                            description: Some("login address".to_string()),
                            ..field("email", "varchar(255)")
                        },
                    ],
                    primary_key: vec!["id".to_string()],
                    relationships: vec![],
                },
                TableDescription {
                    name: "orders".to_string(),
                    fields: vec![field("id", "int"), field("user_id", "int"), field("total", "numeric(10,2)")],
                    primary_key: vec![],
                    relationships: vec![RelationshipDescription {
                        field: "user_id".to_string(),
                        references_table: "users".to_string(),
                        references_field: "id".to_string(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_build_valid_schema() {
        let schema = Schema::build(&shop()).unwrap();
        assert_eq!(schema.dialect(), Dialect::Postgres);
        assert_eq!(schema.tables().len(), 2);

        let users = schema.find_table("users").unwrap();
        assert_eq!(users.find_field("id").unwrap().field_type(), FieldType::Integer);
        assert!(!users.find_field("id").unwrap().nullable());
        assert_eq!(users.find_field("email").unwrap().description(), Some("login address"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = Schema::build(&shop()).unwrap();
        let b = Schema::build(&shop()).unwrap();
        assert_eq!(a.render_for_prompt(), b.render_for_prompt());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_render_layout() {
        let schema = Schema::build(&shop()).unwrap();
        let expected = "\
Database shop (PostgreSQL)

Table users (primary key: id)
  id: integer [serial, not null]
  email: text [varchar(255)] -- login address

Table orders
  id: integer [int]
  user_id: integer [int]
  total: float [numeric(10,2)]
  foreign key user_id -> users.id
";
        assert_eq!(schema.render_for_prompt(), expected);
    }

    #[test]
    fn test_render_follows_declaration_order() {
        let mut desc = shop();
        desc.tables.reverse();
        desc.tables[0].relationships.clear();
        let rendered = Schema::build(&desc).unwrap().render_for_prompt();
        let orders = rendered.find("Table orders").unwrap();
        let users = rendered.find("Table users").unwrap();
        assert!(orders < users);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut desc = shop();
        desc.tables.push(desc.tables[0].clone());
        assert_eq!(
            Schema::build(&desc),
            Err(SchemaError::DuplicateTable("users".to_string()))
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut desc = shop();
        desc.tables[0].fields.push(field("email", "text"));
        assert!(matches!(
            Schema::build(&desc),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_relationship_to_unknown_table_rejected() {
        let mut desc = shop();
        desc.tables[1].relationships[0].references_table = "customers".to_string();
        assert!(matches!(
            Schema::build(&desc),
            Err(SchemaError::UnknownReferencedTable { .. })
        ));
    }

    #[test]
    fn test_relationship_to_unknown_field_rejected() {
        let mut desc = shop();
        desc.tables[1].relationships[0].references_field = "uuid".to_string();
        assert!(matches!(
            Schema::build(&desc),
            Err(SchemaError::UnknownReferencedField { .. })
        ));
    }

    #[test]
    fn test_relationship_from_unknown_field_rejected() {
        let mut desc = shop();
        desc.tables[1].relationships[0].field = "customer_id".to_string();
        assert!(matches!(
            Schema::build(&desc),
            Err(SchemaError::UnknownRelationshipField { .. })
        ));
    }

    #[test]
    fn test_unknown_primary_key_rejected() {
        let mut desc = shop();
        desc.tables[0].primary_key = vec!["uuid".to_string()];
        assert!(matches!(
            Schema::build(&desc),
            Err(SchemaError::UnknownPrimaryKeyField { .. })
        ));
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let mut desc = shop();
        desc.dialect = Some("cassandra".to_string());
        assert_eq!(
            Schema::build(&desc),
            Err(SchemaError::UnknownDialect("cassandra".to_string()))
        );
    }

    #[test]
    fn test_build_for_adopts_or_checks_dialect() {
        let mut desc = shop();
        desc.dialect = None;
        assert_eq!(Schema::build_for(&desc, Dialect::Mysql).unwrap().dialect(), Dialect::Mysql);
        assert!(matches!(Schema::build(&desc), Err(SchemaError::MissingDialect)));

        desc.dialect = Some("PostgreSQL".to_string());
        assert!(matches!(
            Schema::build_for(&desc, Dialect::Mysql),
            Err(SchemaError::DialectMismatch { .. })
        ));
    }

    #[test]
    fn test_document_schema_from_yaml() {
        let yaml = r#"
name: crm
dialect: MongoDB
collections:
  - name: customers
    fields:
      - name: _id
        type: objectId
      - name: tags
"#;
        let desc: SchemaDescription = serde_yaml::from_str(yaml).unwrap();
        let schema = Schema::build(&desc).unwrap();
        let customers = &schema.tables()[0];
        assert_eq!(customers.find_field("_id").unwrap().field_type(), FieldType::Text);
        assert_eq!(customers.find_field("tags").unwrap().field_type(), FieldType::Unknown);
        assert!(schema.render_for_prompt().contains("Collection customers"));
    }

    #[test]
    fn test_empty_schema_renders_placeholder() {
        let desc = SchemaDescription {
            name: String::new(),
            dialect: Some("sqlite".to_string()),
            tables: vec![],
        };
        let rendered = Schema::build(&desc).unwrap().render_for_prompt();
        assert_eq!(rendered, "Database (SQLite)\n\n(no tables described)\n");
    }
}
