//! Change records decoded from the replication stream

use serde::{Deserialize, Deserializer, Serialize};

use searchsync_storage::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    /// DDL and anything else the stream carries; ignored by sync
    Other,
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let op = String::deserialize(deserializer)?;
        Ok(Operation::parse(&op))
    }
}

impl Operation {
    pub fn parse(op: &str) -> Self {
        match op.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Operation::Insert,
            "UPDATE" => Operation::Update,
            "DELETE" => Operation::Delete,
            _ => Operation::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row-level mutation of a source table
///
/// For `UPDATE`, `old_rows[i]` holds only the changed columns of
/// `new_rows[i]`, with their previous values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub database: Option<String>,
    pub table: String,
    #[serde(rename = "type")]
    pub operation: Operation,
    #[serde(default)]
    pub new_rows: Vec<Row>,
    #[serde(default)]
    pub old_rows: Vec<Row>,
    /// Commit time at the source, epoch millis
    #[serde(default)]
    pub origin_timestamp_ms: i64,
}

impl ChangeRecord {
    pub fn new(table: impl Into<String>, operation: Operation, new_rows: Vec<Row>) -> Self {
        Self {
            destination: String::new(),
            database: None,
            table: table.into(),
            operation,
            new_rows,
            old_rows: Vec::new(),
            origin_timestamp_ms: 0,
        }
    }

    pub fn insert(table: impl Into<String>, rows: Vec<Row>) -> Self {
        Self::new(table, Operation::Insert, rows)
    }

    pub fn update(table: impl Into<String>, rows: Vec<Row>, old_rows: Vec<Row>) -> Self {
        let mut record = Self::new(table, Operation::Update, rows);
        record.old_rows = old_rows;
        record
    }

    pub fn delete(table: impl Into<String>, rows: Vec<Row>) -> Self {
        Self::new(table, Operation::Delete, rows)
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_timestamp(mut self, origin_timestamp_ms: i64) -> Self {
        self.origin_timestamp_ms = origin_timestamp_ms;
        self
    }

    /// Value of `column` in the first new row, for log and alert lines
    pub fn first_value(&self, column: &str) -> Value {
        self.new_rows
            .first()
            .and_then(|row| row.get(column))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("insert"), Operation::Insert);
        assert_eq!(Operation::parse(" Update"), Operation::Update);
        assert_eq!(Operation::parse("DELETE"), Operation::Delete);
        assert_eq!(Operation::parse("ALTER"), Operation::Other);
    }

    #[test]
    fn test_deserialize_record() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "destination": "example",
            "table": "user",
            "type": "UPDATE",
            "new_rows": [{"id": 1, "name": "b"}],
            "old_rows": [{"name": "a"}],
            "origin_timestamp_ms": 1700000000000i64
        }))
        .unwrap();

        assert_eq!(record.operation, Operation::Update);
        assert_eq!(record.first_value("id"), json!(1));
        assert_eq!(record.first_value("missing"), Value::Null);
        assert_eq!(record.old_rows[0].len(), 1);
    }

    #[test]
    fn test_unknown_type_is_other() {
        let record: ChangeRecord =
            serde_json::from_value(json!({"table": "user", "type": "TRUNCATE"})).unwrap();
        assert_eq!(record.operation, Operation::Other);
        assert!(record.new_rows.is_empty());
    }
}
