//! Update strategy classification
//!
//! A changed table is classified against the schema graph once per
//! `(index, table)` pair. The result lists every role the table plays in the
//! query: main table, one or more joined aliases, or the sole table of a
//! flat mapping.

use dashmap::DashMap;
use std::sync::Arc;

use searchsync_storage::{Row, Value};

use crate::schema::{SchemaGraph, TableItem};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One table, every field a direct column: map the record row directly
    SingleTable,
    /// The main table of a joined or computed query: requery by primary key
    MainTable,
    /// Joined table whose dependent fields are all simple: update by query
    JoinedSimple { alias: String },
    /// Joined derived table with simple dependent fields: requery the
    /// sub-select, then update by query per result
    JoinedSubQuery { alias: String },
    /// Joined table feeding a computed field: requery the whole query
    JoinedWholeQuery { alias: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::SingleTable => "single_table",
            Strategy::MainTable => "main_table",
            Strategy::JoinedSimple { .. } => "joined_simple",
            Strategy::JoinedSubQuery { .. } => "joined_sub_query",
            Strategy::JoinedWholeQuery { .. } => "joined_whole_query",
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Strategy::JoinedSimple { alias }
            | Strategy::JoinedSubQuery { alias }
            | Strategy::JoinedWholeQuery { alias } => Some(alias),
            _ => None,
        }
    }
}

fn classify_joined(table: &TableItem, schema: &SchemaGraph) -> Strategy {
    let alias = table.alias.clone();
    let all_simple = schema.fields_owned_by(&table.alias).all(|f| f.is_simple);

    match (all_simple, table.is_sub_query()) {
        (true, false) => Strategy::JoinedSimple { alias },
        (true, true) => Strategy::JoinedSubQuery { alias },
        (false, _) => Strategy::JoinedWholeQuery { alias },
    }
}

/// Strategies for a change on `table`, main-table role first.
///
/// Table names compare case-insensitively. An empty result means the
/// table does not feed this mapping.
pub fn classify(table: &str, schema: &SchemaGraph) -> Vec<Strategy> {
    if schema.is_single_table() && schema.is_all_fields_simple() {
        return if schema.references_table(table) {
            vec![Strategy::SingleTable]
        } else {
            Vec::new()
        };
    }

    let mut strategies = Vec::new();
    if schema.is_main_table(table) {
        strategies.push(Strategy::MainTable);
    }
    strategies.extend(
        schema
            .joined_tables_named(table)
            .map(|joined| classify_joined(joined, schema)),
    );
    strategies
}

/// Mark every field of a joined table as changed when the update moved the
/// join key pointing at it.
///
/// `old` holds the changed columns of a row of `table`. When it contains a
/// column linking `table` to a joined alias, each column of each field owned
/// by that alias is added to `old` with a null previous value. Returns
/// whether any link changed.
pub fn apply_foreign_key_rule(schema: &SchemaGraph, table: &str, old: &mut Row) -> bool {
    let mut marked = Vec::new();

    for joined in schema.tables.iter().filter(|t| !t.is_main) {
        let link_changed = joined.relation_keys.iter().any(|key| {
            key.linked_fields.iter().any(|linked| {
                let on_table = schema
                    .owner_table_name(linked)
                    .is_some_and(|t| t.eq_ignore_ascii_case(table));
                on_table && linked.reads_any(old)
            })
        });
        if !link_changed {
            continue;
        }
        for field in schema.fields_owned_by(&joined.alias) {
            marked.extend(field.columns.iter().map(|c| c.column_name.clone()));
        }
    }

    let changed = !marked.is_empty();
    for column in marked {
        old.entry(column).or_insert(Value::Null);
    }
    changed
}

/// Classification results cached per `index:table`
#[derive(Clone, Default)]
pub struct StrategyCache {
    entries: Arc<DashMap<String, Arc<Vec<Strategy>>>>,
}

impl StrategyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, index: &str, table: &str, schema: &SchemaGraph) -> Arc<Vec<Strategy>> {
        let key = format!("{}:{}", index, table.to_ascii_lowercase());
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(classify(table, schema)))
            .clone()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
