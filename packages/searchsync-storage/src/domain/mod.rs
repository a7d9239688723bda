//! Domain layer: the collaborator boundary of the sync engine
//!
//! # Domain Models
//!
//! - `Row`: one relational row (column name → JSON value)
//! - `IndexMutation`: one document write sent to the index store
//! - `BulkItemResult`: per-item outcome of a bulk request
//!
//! # Port Traits
//!
//! - `DataSource`: parametrised SQL in, rows out
//! - `IndexStore`: bulk execution, term search, field mapping lookup
//! - `AlertSink`: operational alert transport
//!
//! # Examples
//!
//! ```rust,ignore
//! use searchsync_storage::domain::{DataSource, IndexStore, IndexMutation};
//!
//! async fn example(db: impl DataSource, store: impl IndexStore) -> Result<()> {
//!     let rows = db.query("SELECT * FROM user WHERE id = ?", &[json!(1)]).await?;
//!     let mutation = IndexMutation::index("users", "_doc", "1", rows[0].clone());
//!     let results = store.bulk(&[mutation]).await?;
//!     assert!(results[0].is_ok());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use serde_json::Value;

/// One relational row, or one document body.
pub type Row = serde_json::Map<String, Value>;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Physical write operation understood by the index store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Full document write (create or replace)
    Index,
    /// Partial update that creates the document when missing
    Upsert,
    /// Partial update of an existing document
    Update,
    /// Remove the document
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Index => "index",
            MutationKind::Upsert => "upsert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single document mutation
///
/// `routing` and `parent` are first-class fields: they select the physical
/// shard of the document and never travel inside `payload`.
///
/// # Identity
///
/// - `id` is `None` only for `MutationKind::Index`, where the store assigns one
/// - every other kind addresses an existing document by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMutation {
    pub kind: MutationKind,
    pub index: String,
    pub doc_type: String,
    pub id: Option<String>,
    pub routing: Option<String>,
    pub parent: Option<String>,
    #[serde(default)]
    pub payload: Row,
}

impl IndexMutation {
    pub fn new(
        kind: MutationKind,
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: Option<String>,
        payload: Row,
    ) -> Self {
        Self {
            kind,
            index: index.into(),
            doc_type: doc_type.into(),
            id,
            routing: None,
            parent: None,
            payload,
        }
    }

    /// Full document write addressed by id
    pub fn index(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        payload: Row,
    ) -> Self {
        Self::new(MutationKind::Index, index, doc_type, Some(id.into()), payload)
    }

    /// Delete addressed by id
    pub fn delete(index: impl Into<String>, doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(
            MutationKind::Delete,
            index,
            doc_type,
            Some(id.into()),
            Row::new(),
        )
    }

    pub fn with_routing(mut self, routing: Option<String>) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    /// Shard key actually sent with the request.
    ///
    /// A child document must live on its parent's shard, so the parent key
    /// takes precedence over the configured routing value.
    pub fn effective_routing(&self) -> Option<&str> {
        self.parent
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.routing.as_deref().filter(|r| !r.trim().is_empty()))
    }
}

/// Outcome of one item of a bulk request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    /// The addressed document does not exist (e.g. an update racing a delete)
    NotFound { reason: String },
    Failed { code: u16, reason: String },
}

/// Per-item bulk result, aligned with the request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub kind: MutationKind,
    pub id: Option<String>,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl BulkItemResult {
    pub fn ok(kind: MutationKind, id: Option<String>) -> Self {
        Self {
            kind,
            id,
            status: ItemStatus::Ok,
        }
    }

    pub fn not_found(kind: MutationKind, id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            status: ItemStatus::NotFound {
                reason: reason.into(),
            },
        }
    }

    pub fn failed(kind: MutationKind, id: Option<String>, code: u16, reason: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            status: ItemStatus::Failed {
                code,
                reason: reason.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ItemStatus::Ok)
    }

    /// Human readable failure text, `None` for successful items
    pub fn failure_message(&self) -> Option<String> {
        match &self.status {
            ItemStatus::Ok => None,
            ItemStatus::NotFound { reason } => Some(format!(
                "{} [{}] not found: {}",
                self.kind,
                self.id.as_deref().unwrap_or("-"),
                reason
            )),
            ItemStatus::Failed { code, reason } => Some(format!(
                "{} [{}] failed with status {}: {}",
                self.kind,
                self.id.as_deref().unwrap_or("-"),
                code,
                reason
            )),
        }
    }
}

/// Render a scalar as the string form used for ids and routing keys.
///
/// Returns `None` for null; strings are returned without JSON quotes.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Traits
// ═══════════════════════════════════════════════════════════════════════════

/// Relational source abstraction
///
/// Placeholders are positional `?` markers bound in order from `params`.
/// Connection pooling and timeouts belong to the implementation.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Execute a query and return every row.
    ///
    /// Column names are the labels of the result set (select aliases).
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
}

/// Search index store abstraction
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Execute mutations as one batched request.
    ///
    /// # Returns
    ///
    /// One result per mutation, in request order. A transport failure of the
    /// whole request is an `Err`.
    async fn bulk(&self, mutations: &[IndexMutation]) -> Result<Vec<BulkItemResult>>;

    /// Ids of the documents whose `field` equals `value` (at most `limit`)
    async fn search_by_term(
        &self,
        index: &str,
        doc_type: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// The `properties` object of the index mapping, `None` when the index
    /// has no mapping for `doc_type`.
    async fn field_mapping(&self, index: &str, doc_type: &str) -> Result<Option<Value>>;
}

/// Operational alert transport
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, message: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_index_mutation_new() {
        let m = IndexMutation::index("users", "_doc", "1", row(json!({"name": "a"})));

        assert_eq!(m.kind, MutationKind::Index);
        assert_eq!(m.id.as_deref(), Some("1"));
        assert_eq!(m.routing, None);
        assert_eq!(m.payload["name"], json!("a"));
    }

    #[test]
    fn test_effective_routing_prefers_parent() {
        let m = IndexMutation::delete("users", "_doc", "1")
            .with_routing(Some("r1".to_string()))
            .with_parent(Some("p1".to_string()));
        assert_eq!(m.effective_routing(), Some("p1"));

        let m = m.with_parent(Some("  ".to_string()));
        assert_eq!(m.effective_routing(), Some("r1"));

        let m = m.with_routing(None);
        assert_eq!(m.effective_routing(), None);
    }

    #[test]
    fn test_bulk_item_failure_message() {
        let ok = BulkItemResult::ok(MutationKind::Update, Some("1".to_string()));
        assert!(ok.is_ok());
        assert_eq!(ok.failure_message(), None);

        let nf = BulkItemResult::not_found(MutationKind::Update, Some("2".to_string()), "missing");
        assert_eq!(
            nf.failure_message().unwrap(),
            "update [2] not found: missing"
        );

        let failed = BulkItemResult::failed(MutationKind::Index, None, 400, "mapper_parsing");
        assert_eq!(
            failed.failure_message().unwrap(),
            "index [-] failed with status 400: mapper_parsing"
        );
    }

    #[test]
    fn test_bulk_item_serde() {
        let nf = BulkItemResult::not_found(MutationKind::Delete, Some("9".to_string()), "gone");
        let json = serde_json::to_value(&nf).unwrap();
        assert_eq!(json["status"], json!("not_found"));
        assert_eq!(json["reason"], json!("gone"));

        let back: BulkItemResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, nf);
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string(&json!(null)), None);
        assert_eq!(scalar_to_string(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(scalar_to_string(&json!(42)).as_deref(), Some("42"));
        assert_eq!(scalar_to_string(&json!(true)).as_deref(), Some("true"));
    }
}
