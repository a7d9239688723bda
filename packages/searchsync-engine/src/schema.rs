//! Schema graph of an index's defining query
//!
//! Built by an external SQL parser and consumed read-only: the tables and
//! aliases of the query, the join keys between them and the select list.
//!
//! ```text
//! SELECT a.id AS _id, a.name, b.name AS role_name, a.role_id
//! FROM user a LEFT JOIN role b ON b.id = a.role_id
//!
//! tables:  user a (main), role b
//! role b:  relation key b.id → [role_id]
//! fields:  _id(a.id) name(a.name) role_name(b.name) role_id(a.role_id)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use searchsync_storage::Row;

use crate::error::{Result, SyncError};

/// One column read by a select field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Owning table alias
    pub owner: String,
    pub column_name: String,
}

impl ColumnRef {
    pub fn new(owner: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            column_name: column_name.into(),
        }
    }

    /// `alias.column`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.owner, self.column_name)
    }
}

/// One entry of the select list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectField {
    /// Output label (alias or column name)
    pub field_name: String,
    /// Alias of the table owning the field
    pub owner: String,
    #[serde(default)]
    pub columns: Vec<ColumnRef>,
    /// Direct column reference, no function or expression
    #[serde(default = "default_simple")]
    pub is_simple: bool,
}

fn default_simple() -> bool {
    true
}

impl SelectField {
    /// `owner.column AS field_name`
    pub fn simple(owner: &str, column: &str, field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            owner: owner.to_string(),
            columns: vec![ColumnRef::new(owner, column)],
            is_simple: true,
        }
    }

    /// Function or expression over `columns`, labelled `field_name`
    pub fn expression(owner: &str, field_name: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            field_name: field_name.to_string(),
            owner: owner.to_string(),
            columns: columns
                .iter()
                .map(|(o, c)| ColumnRef::new(*o, *c))
                .collect(),
            is_simple: false,
        }
    }

    pub fn column(&self) -> Option<&ColumnRef> {
        self.columns.first()
    }

    /// Source column of a simple field; the field label when none is known
    pub fn column_name(&self) -> &str {
        self.column()
            .map(|c| c.column_name.as_str())
            .unwrap_or(&self.field_name)
    }

    /// Whether any column of this field appears in `row`
    pub fn reads_any(&self, row: &Row) -> bool {
        self.columns.iter().any(|c| row.contains_key(&c.column_name))
    }
}

/// Join key of a non-main table
///
/// `foreign_key` is the column of this table used in the join condition;
/// `linked_fields` are the select fields on the other side of the condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationKey {
    pub foreign_key: ColumnRef,
    #[serde(default)]
    pub linked_fields: Vec<SelectField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableItem {
    pub table_name: String,
    pub alias: String,
    #[serde(default)]
    pub is_main: bool,
    /// Present when the table is a derived `(SELECT ...) alias`
    #[serde(default)]
    pub sub_query_sql: Option<String>,
    /// Select list of the derived table
    #[serde(default)]
    pub sub_query_fields: Vec<SelectField>,
    #[serde(default)]
    pub relation_keys: Vec<RelationKey>,
}

impl TableItem {
    pub fn main(table_name: &str, alias: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            alias: alias.to_string(),
            is_main: true,
            sub_query_sql: None,
            sub_query_fields: Vec::new(),
            relation_keys: Vec::new(),
        }
    }

    pub fn joined(table_name: &str, alias: &str, relation_keys: Vec<RelationKey>) -> Self {
        Self {
            table_name: table_name.to_string(),
            alias: alias.to_string(),
            is_main: false,
            sub_query_sql: None,
            sub_query_fields: Vec::new(),
            relation_keys,
        }
    }

    pub fn with_sub_query(mut self, sql: &str, fields: Vec<SelectField>) -> Self {
        self.sub_query_sql = Some(sql.to_string());
        self.sub_query_fields = fields;
        self
    }

    pub fn is_sub_query(&self) -> bool {
        self.sub_query_sql.is_some()
    }

    pub fn is_named(&self, table: &str) -> bool {
        self.table_name.eq_ignore_ascii_case(table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaGraph {
    pub tables: Vec<TableItem>,
    pub select_fields: Vec<SelectField>,
}

impl SchemaGraph {
    pub fn new(tables: Vec<TableItem>, select_fields: Vec<SelectField>) -> Self {
        Self {
            tables,
            select_fields,
        }
    }

    pub fn main_table(&self) -> Result<&TableItem> {
        self.tables
            .iter()
            .find(|t| t.is_main)
            .ok_or_else(|| SyncError::schema("Schema graph has no main table"))
    }

    pub fn table(&self, alias: &str) -> Option<&TableItem> {
        self.tables.iter().find(|t| t.alias == alias)
    }

    pub fn is_single_table(&self) -> bool {
        self.tables.len() == 1
    }

    pub fn is_all_fields_simple(&self) -> bool {
        self.select_fields.iter().all(|f| f.is_simple)
    }

    pub fn select_field(&self, name: &str) -> Option<&SelectField> {
        self.select_fields.iter().find(|f| f.field_name == name)
    }

    /// Select fields owned by `alias`, in select-list order
    pub fn fields_owned_by<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a SelectField> + 'a {
        self.select_fields.iter().filter(move |f| f.owner == alias)
    }

    /// Physical table name behind a select field
    pub fn owner_table_name(&self, field: &SelectField) -> Option<&str> {
        self.table(&field.owner).map(|t| t.table_name.as_str())
    }

    pub fn is_main_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.is_main && t.is_named(table))
    }

    /// Non-main tables with the given physical name (a table may be joined
    /// more than once under different aliases)
    pub fn joined_tables_named<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a TableItem> + 'a {
        self.tables
            .iter()
            .filter(move |t| !t.is_main && t.is_named(table))
    }

    pub fn references_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.is_named(table))
    }

    /// Structural checks: one main table, unique aliases, known owners
    pub fn validate(&self) -> Result<()> {
        let mains = self.tables.iter().filter(|t| t.is_main).count();
        if mains != 1 {
            return Err(SyncError::schema(format!(
                "Schema graph must have exactly one main table, found {}",
                mains
            )));
        }

        let mut aliases = HashSet::new();
        for table in &self.tables {
            if !aliases.insert(table.alias.as_str()) {
                return Err(SyncError::schema(format!(
                    "Duplicate table alias {}",
                    table.alias
                )));
            }
        }

        for field in &self.select_fields {
            if !aliases.contains(field.owner.as_str()) {
                return Err(SyncError::schema(format!(
                    "Field {} is owned by unknown alias {}",
                    field.field_name, field.owner
                )));
            }
        }
        Ok(())
    }
}
