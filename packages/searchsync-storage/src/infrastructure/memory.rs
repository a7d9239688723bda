//! In-Memory Index Store
//!
//! HashMap-backed search index with bulk semantics close to a real cluster:
//! updates and deletes of missing documents report `NotFound`, upserts
//! create, index replaces. Every mutation must carry an id. Failures can be
//! injected per document id or for the next whole request.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::{
    scalar_to_string, BulkItemResult, IndexMutation, IndexStore, MutationKind, Row, Value,
};
use crate::error::{Result, StorageError};

type IndexKey = (String, String);

/// A stored document and the shard key it was written with
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub source: Row,
    pub routing: Option<String>,
}

#[derive(Clone, Default)]
pub struct MemoryIndexStore {
    documents: Arc<RwLock<HashMap<IndexKey, BTreeMap<String, StoredDocument>>>>,
    mappings: Arc<RwLock<HashMap<IndexKey, Value>>>,
    item_failures: Arc<Mutex<HashMap<String, (u16, String)>>>,
    request_failure: Arc<Mutex<Option<String>>>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `properties` object returned by `field_mapping`
    pub fn set_field_mapping(&self, index: &str, doc_type: &str, properties: Value) {
        self.mappings
            .write()
            .insert(key(index, doc_type), properties);
    }

    /// Seed a document directly, bypassing bulk
    pub fn put_document(&self, index: &str, doc_type: &str, id: &str, source: Row) {
        self.documents
            .write()
            .entry(key(index, doc_type))
            .or_default()
            .insert(
                id.to_string(),
                StoredDocument {
                    source,
                    routing: None,
                },
            );
    }

    /// Every bulk item addressing `id` fails with `code` until cleared
    pub fn fail_item(&self, id: &str, code: u16, reason: &str) {
        self.item_failures
            .lock()
            .insert(id.to_string(), (code, reason.to_string()));
    }

    pub fn clear_failures(&self) {
        self.item_failures.lock().clear();
        *self.request_failure.lock() = None;
    }

    /// The next bulk request fails as a whole
    pub fn fail_next_bulk(&self, reason: &str) {
        *self.request_failure.lock() = Some(reason.to_string());
    }

    pub fn document(&self, index: &str, doc_type: &str, id: &str) -> Option<StoredDocument> {
        self.documents
            .read()
            .get(&key(index, doc_type))
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// All documents of an index, ordered by id
    pub fn documents(&self, index: &str, doc_type: &str) -> Vec<(String, Row)> {
        self.documents
            .read()
            .get(&key(index, doc_type))
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| (id.clone(), doc.source.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn document_count(&self, index: &str, doc_type: &str) -> usize {
        self.documents
            .read()
            .get(&key(index, doc_type))
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Number of mutations in each bulk request received so far
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    fn apply(&self, mutation: &IndexMutation) -> BulkItemResult {
        let kind = mutation.kind;

        let Some(id) = mutation.id.clone() else {
            return BulkItemResult::failed(kind, None, 400, "document id is required");
        };
        if let Some((code, reason)) = self.item_failures.lock().get(&id) {
            return BulkItemResult::failed(kind, Some(id), *code, reason.clone());
        }
        let routing = mutation.effective_routing().map(String::from);
        let mut documents = self.documents.write();
        let docs = documents
            .entry(key(&mutation.index, &mutation.doc_type))
            .or_default();

        if kind == MutationKind::Delete {
            return match docs.remove(&id) {
                Some(_) => BulkItemResult::ok(kind, Some(id)),
                None => BulkItemResult::not_found(kind, Some(id), "document not found"),
            };
        }
        if kind != MutationKind::Index {
            if let Some(existing) = docs.get_mut(&id) {
                for (field, value) in &mutation.payload {
                    existing.source.insert(field.clone(), value.clone());
                }
                if routing.is_some() {
                    existing.routing = routing;
                }
                return BulkItemResult::ok(kind, Some(id));
            }
            if kind == MutationKind::Update {
                return BulkItemResult::not_found(kind, Some(id), "document missing");
            }
        }
        docs.insert(
            id.clone(),
            StoredDocument {
                source: mutation.payload.clone(),
                routing,
            },
        );
        BulkItemResult::ok(kind, Some(id))
    }
}

fn key(index: &str, doc_type: &str) -> IndexKey {
    (index.to_string(), doc_type.to_string())
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn bulk(&self, mutations: &[IndexMutation]) -> Result<Vec<BulkItemResult>> {
        if let Some(reason) = self.request_failure.lock().take() {
            return Err(StorageError::index_store(format!(
                "Bulk request rejected: {}",
                reason
            )));
        }
        self.batch_sizes.lock().push(mutations.len());

        Ok(mutations.iter().map(|m| self.apply(m)).collect())
    }

    async fn search_by_term(
        &self,
        index: &str,
        doc_type: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<String>> {
        let wanted = scalar_to_string(value);
        let documents = self.documents.read();

        Ok(documents
            .get(&key(index, doc_type))
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| {
                        let stored = doc.source.get(field).and_then(scalar_to_string);
                        stored.is_some() && stored == wanted
                    })
                    .take(limit)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn field_mapping(&self, index: &str, doc_type: &str) -> Result<Option<Value>> {
        Ok(self.mappings.read().get(&key(index, doc_type)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemStatus;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn update(id: &str, payload: Value) -> IndexMutation {
        IndexMutation::new(
            MutationKind::Update,
            "users",
            "_doc",
            Some(id.to_string()),
            row(payload),
        )
    }

    #[tokio::test]
    async fn test_index_then_update_merges() {
        let store = MemoryIndexStore::new();
        store
            .bulk(&[
                IndexMutation::index("users", "_doc", "1", row(json!({"name": "a", "age": 3}))),
                update("1", json!({"age": 4})),
            ])
            .await
            .unwrap();

        let doc = store.document("users", "_doc", "1").unwrap();
        assert_eq!(doc.source["name"], json!("a"));
        assert_eq!(doc.source["age"], json!(4));
        assert_eq!(store.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_report_not_found() {
        let store = MemoryIndexStore::new();
        let results = store
            .bulk(&[
                update("9", json!({"age": 4})),
                IndexMutation::delete("users", "_doc", "9"),
            ])
            .await
            .unwrap();

        assert!(matches!(results[0].status, ItemStatus::NotFound { .. }));
        assert!(matches!(results[1].status, ItemStatus::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_creates_missing() {
        let store = MemoryIndexStore::new();
        let upsert = IndexMutation::new(
            MutationKind::Upsert,
            "users",
            "_doc",
            Some("5".to_string()),
            row(json!({"name": "e"})),
        )
        .with_routing(Some("r".to_string()));

        let results = store.bulk(&[upsert]).await.unwrap();
        assert!(results[0].is_ok());

        let doc = store.document("users", "_doc", "5").unwrap();
        assert_eq!(doc.routing.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_mutation_without_id_is_rejected() {
        let store = MemoryIndexStore::new();
        let m = IndexMutation::new(MutationKind::Index, "users", "_doc", None, row(json!({"pk": 1})));
        let results = store.bulk(&[m]).await.unwrap();

        assert!(matches!(results[0].status, ItemStatus::Failed { code: 400, .. }));
        assert_eq!(store.document_count("users", "_doc"), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryIndexStore::new();
        store.fail_item("1", 400, "mapper_parsing_exception");

        let results = store
            .bulk(&[IndexMutation::index("users", "_doc", "1", Row::new())])
            .await
            .unwrap();
        assert!(matches!(results[0].status, ItemStatus::Failed { code: 400, .. }));

        store.fail_next_bulk("cluster unavailable");
        assert!(store.bulk(&[]).await.is_err());
        assert!(store.bulk(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_search_by_term_matches_string_form() {
        let store = MemoryIndexStore::new();
        store.put_document("users", "_doc", "a", row(json!({"pk": 7})));
        store.put_document("users", "_doc", "b", row(json!({"pk": "7"})));
        store.put_document("users", "_doc", "c", row(json!({"pk": 8})));

        let ids = store
            .search_by_term("users", "_doc", "pk", &json!(7), 10)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let ids = store
            .search_by_term("users", "_doc", "pk", &json!(7), 1)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_field_mapping() {
        let store = MemoryIndexStore::new();
        assert_eq!(store.field_mapping("users", "_doc").await.unwrap(), None);

        store.set_field_mapping("users", "_doc", json!({"name": {"type": "keyword"}}));
        let mapping = store.field_mapping("users", "_doc").await.unwrap().unwrap();
        assert_eq!(mapping["name"]["type"], json!("keyword"));
    }
}
