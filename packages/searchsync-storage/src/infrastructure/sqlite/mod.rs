//! SQLite DataSource
//!
//! File-based or in-memory relational source backed by rusqlite.
//! Used for local development, integration tests and backfill dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use crate::domain::{DataSource, Row, Value};
use crate::error::{Result, StorageError};

/// SQLite-based DataSource implementation
#[derive(Clone)]
pub struct SqliteDataSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDataSource {
    /// Open (or create) a database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a batch of `;`-separated statements (schema setup, fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Execute one statement with positional parameters, returning the
    /// number of affected rows
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.conn.lock();
        let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let changed = conn.execute(sql, rusqlite::params_from_iter(bound.iter()))?;
        Ok(changed)
    }

    fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(sql).map_err(|e| {
            StorageError::query(format!("Failed to prepare `{}`: {}", sql, e)).with_source(e)
        })?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound.iter()))
            .map_err(|e| {
                StorageError::query(format!("Failed to execute `{}`: {}", sql, e)).with_source(e)
            })?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut out = Row::new();
            for (i, name) in columns.iter().enumerate() {
                out.insert(name.clone(), from_sql_value(row.get_ref(i)?));
            }
            result.push(out);
        }
        Ok(result)
    }
}

#[async_trait]
impl DataSource for SqliteDataSource {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query_rows(sql, params)
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                SqlValue::Text(n.to_string())
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}
