//! Field value resolution
//!
//! Extracts values from change-record rows or requery result rows and
//! converts them to the index's declared field types.
//!
//! - change-record rows are keyed by source column name
//! - requery rows are keyed by select-list label
//!
//! Integer flags coming from the change stream become booleans when the
//! index field is declared `boolean`; driver-level booleans in query rows
//! become `0`/`1` when it is not.

use searchsync_storage::{scalar_to_string, Row, Value};
use serde_json::Number;

use crate::config::MappingConfig;
use crate::field_types::FieldTypes;
use crate::mutation::DocumentDraft;
use crate::schema::{SchemaGraph, SelectField};
use crate::sql::clean_column;

pub struct FieldValueResolver<'a> {
    mapping: &'a MappingConfig,
    types: &'a FieldTypes,
}

impl<'a> FieldValueResolver<'a> {
    pub fn new(mapping: &'a MappingConfig, types: &'a FieldTypes) -> Self {
        Self { mapping, types }
    }

    pub fn mapping(&self) -> &MappingConfig {
        self.mapping
    }

    pub fn declared_type(&self, field_name: &str) -> Option<&str> {
        self.types.get(field_name).map(String::as_str)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Single values
    // ═══════════════════════════════════════════════════════════════════════

    /// Value of `column_name` in a change-record row, typed for `field_name`
    pub fn value_from_record(&self, row: &Row, field_name: &str, column_name: &str) -> Value {
        let field = clean_column(field_name);
        let mut value = row
            .get(&clean_column(column_name))
            .cloned()
            .unwrap_or(Value::Null);

        if self.declared_type(&field) == Some("boolean") {
            if let Some(flag) = value.as_i64() {
                value = Value::Bool(flag != 0);
            }
        }
        self.finish(&field, value)
    }

    /// Value of `column_name` in a requery row, typed for `field_name`
    pub fn value_from_row(&self, row: &Row, field_name: &str, column_name: &str) -> Value {
        let field = clean_column(field_name);
        let mut value = row
            .get(&clean_column(column_name))
            .cloned()
            .unwrap_or(Value::Null);

        if let Value::Bool(flag) = value {
            if self.declared_type(&field) != Some("boolean") {
                value = Value::from(u8::from(flag));
            }
        }
        self.finish(&field, value)
    }

    fn finish(&self, field: &str, value: Value) -> Value {
        match self.mapping.object_fields.get(field) {
            Some(kind) => convert_object(value, kind),
            None => convert_value(value, self.declared_type(field)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Documents from change records
    // ═══════════════════════════════════════════════════════════════════════

    /// Full document of a change-record row.
    ///
    /// The payload holds every non-skipped field except the mapped id field.
    pub fn document_from_record(&self, schema: &SchemaGraph, row: &Row) -> DocumentDraft {
        let mut draft = DocumentDraft::default();
        let id_field = self.mapping.id_field_name();

        for field in &schema.select_fields {
            let value = self.value_from_record(row, &field.field_name, field.column_name());
            if field.field_name == id_field {
                draft.id = value.clone();
            }
            if !self.mapping.is_id_field(&field.field_name) && !self.mapping.is_skipped(&field.field_name) {
                draft.payload.insert(clean_column(&field.field_name), value);
            }
        }

        draft.routing = self.routing_with(schema, |f| {
            self.value_from_record(row, &f.field_name, f.column_name())
        });
        self.put_relations(schema, &mut draft, |f| {
            self.value_from_record(row, &f.field_name, f.column_name())
        });
        draft
    }

    /// Changed fields of `table` in a change-record row.
    ///
    /// Only fields whose source column appears in `old` and whose owner is
    /// the changed table are included.
    pub fn delta_from_record(&self, schema: &SchemaGraph, row: &Row, old: &Row, table: &str) -> DocumentDraft {
        let mut draft = DocumentDraft::default();
        let id_field = self.mapping.id_field_name();

        for field in &schema.select_fields {
            let column = field.column_name();
            if field.field_name == id_field {
                draft.id = self.value_from_record(row, &field.field_name, column);
            }
            let owned_by_table = schema
                .owner_table_name(field)
                .is_some_and(|t| t.eq_ignore_ascii_case(table));
            if old.contains_key(column) && owned_by_table && !self.mapping.is_skipped(&field.field_name) {
                draft.payload.insert(
                    clean_column(&field.field_name),
                    self.value_from_record(row, &field.field_name, column),
                );
            }
        }

        draft.routing = self.routing_with(schema, |f| {
            self.value_from_record(row, &f.field_name, f.column_name())
        });
        self.put_relations(schema, &mut draft, |f| {
            self.value_from_record(row, &f.field_name, f.column_name())
        });
        draft
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Documents from requery rows
    // ═══════════════════════════════════════════════════════════════════════

    pub fn document_from_row(&self, schema: &SchemaGraph, row: &Row) -> DocumentDraft {
        let mut draft = DocumentDraft::default();
        let id_field = self.mapping.id_field_name();

        for field in &schema.select_fields {
            let value = self.value_from_row(row, &field.field_name, &field.field_name);
            if field.field_name == id_field {
                draft.id = value.clone();
            }
            if !self.mapping.is_id_field(&field.field_name) && !self.mapping.is_skipped(&field.field_name) {
                draft.payload.insert(clean_column(&field.field_name), value);
            }
        }

        draft.routing = self.routing_from_row(row);
        self.put_relations(schema, &mut draft, |f| {
            self.value_from_row(row, &f.field_name, &f.field_name)
        });
        draft
    }

    /// Fields of a requery row whose columns appear in `old`
    pub fn delta_from_row(&self, schema: &SchemaGraph, row: &Row, old: &Row) -> DocumentDraft {
        let mut draft = DocumentDraft::new(self.id_from_row(row), Row::new());

        for field in &schema.select_fields {
            if field.reads_any(old) && !self.mapping.is_skipped(&field.field_name) {
                draft.payload.insert(
                    clean_column(&field.field_name),
                    self.value_from_row(row, &field.field_name, &field.field_name),
                );
            }
        }

        draft.routing = self.routing_from_row(row);
        self.put_relations(schema, &mut draft, |f| {
            self.value_from_row(row, &f.field_name, &f.field_name)
        });
        draft
    }

    pub fn id_from_row(&self, row: &Row) -> Value {
        let id_field = self.mapping.id_field_name();
        self.value_from_row(row, id_field, id_field)
    }

    pub fn routing_from_row(&self, row: &Row) -> Option<String> {
        let field = self.mapping.routing()?;
        shard_key(&self.value_from_row(row, field, field))
    }

    /// Parent id of the first relation declaring one
    pub fn parent_from_row(&self, row: &Row) -> Option<String> {
        self.mapping
            .relations
            .values()
            .find_map(|relation| relation.parent.as_deref())
            .and_then(|field| shard_key(&self.value_from_row(row, field, field)))
    }

    fn routing_with(&self, schema: &SchemaGraph, lookup: impl Fn(&SelectField) -> Value) -> Option<String> {
        let field = schema.select_field(self.mapping.routing()?)?;
        shard_key(&lookup(field))
    }

    /// Emit `{name, parent?}` for each declared relation and record the
    /// parent as the draft's parent key
    fn put_relations(&self, schema: &SchemaGraph, draft: &mut DocumentDraft, lookup: impl Fn(&SelectField) -> Value) {
        for (relation_field, relation) in &self.mapping.relations {
            let mut join = Row::new();
            join.insert("name".to_string(), Value::String(relation.name.clone()));

            if let Some(parent_field) = relation.parent.as_deref().and_then(|p| schema.select_field(p)) {
                if let Some(parent) = shard_key(&lookup(parent_field)) {
                    join.insert("parent".to_string(), Value::String(parent.clone()));
                    draft.parent = Some(parent);
                }
            }
            draft.payload.insert(clean_column(relation_field), Value::Object(join));
        }
    }
}

fn shard_key(value: &Value) -> Option<String> {
    scalar_to_string(value).filter(|v| !v.trim().is_empty())
}

// ═══════════════════════════════════════════════════════════════════════════
// Type conversion
// ═══════════════════════════════════════════════════════════════════════════

/// Coerce a scalar to the declared index type; unknown types pass through
pub fn convert_value(value: Value, declared: Option<&str>) -> Value {
    let Some(kind) = declared else {
        return value;
    };
    if value.is_null() {
        return value;
    }

    let converted = match kind {
        "integer" | "long" | "short" | "byte" => to_integer(&value).map(Value::from),
        "float" | "double" | "half_float" | "scaled_float" => {
            to_float(&value).and_then(Number::from_f64).map(Value::Number)
        }
        "boolean" => to_bool(&value).map(Value::Bool),
        "keyword" | "text" => match &value {
            Value::Number(_) | Value::Bool(_) => scalar_to_string(&value).map(Value::String),
            _ => None,
        },
        _ => None,
    };
    converted.unwrap_or(value)
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Structured conversion for `object`, `array` and `array:<sep>` fields
pub fn convert_object(value: Value, kind: &str) -> Value {
    let text = match value {
        Value::Null => return Value::Null,
        Value::String(s) => s,
        Value::Object(_) | Value::Array(_) => return value,
        other => other.to_string(),
    };

    if let Some(separator) = kind.strip_prefix("array:") {
        let separator = separator.trim();
        if separator.is_empty() {
            return Value::Array(vec![Value::String(text)]);
        }
        return Value::Array(
            text.split(separator)
                .map(|part| Value::String(part.to_string()))
                .collect(),
        );
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(parsed @ Value::Object(_)) if kind == "object" => parsed,
        Ok(parsed @ Value::Array(_)) if kind == "array" => parsed,
        _ => Value::String(text),
    }
}
