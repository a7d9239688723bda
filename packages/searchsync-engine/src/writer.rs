//! Document writer
//!
//! Turns resolved drafts into buffered index mutations. Mappings with an id
//! field address documents directly; mappings without one locate documents
//! by a term search on the primary key and update every hit. Such documents
//! are created by backfill only: a row with no hit is logged and skipped.
//!
//! Every operation drops drafts missing a routing or parent value the
//! mapping requires.

use std::sync::Arc;
use tracing::{trace, warn};

use searchsync_storage::IndexStore;

use crate::bulk::{BulkBuffer, FlushReport};
use crate::config::MappingConfig;
use crate::error::Result;
use crate::mutation::{DocumentDraft, MutationBuilder};

/// Upper bound of documents updated per primary-key search
pub const SEARCH_HIT_LIMIT: usize = 10_000;

pub struct DocumentWriter {
    buffer: BulkBuffer,
}

impl DocumentWriter {
    pub fn new(store: Arc<dyn IndexStore>, batch_size: usize) -> Self {
        Self {
            buffer: BulkBuffer::new(store, batch_size),
        }
    }

    pub fn buffer(&self) -> &BulkBuffer {
        &self.buffer
    }

    /// Hit ids of documents sharing the draft's primary key
    async fn search_hits(&self, mapping: &MappingConfig, draft: &DocumentDraft) -> Result<Vec<String>> {
        let hits = self
            .buffer
            .store()
            .search_by_term(
                &mapping.index,
                &mapping.doc_type,
                &mapping.primary_key,
                &draft.id,
                SEARCH_HIT_LIMIT,
            )
            .await?;
        trace!(
            "Index {}: {} documents match {} = {}",
            mapping.index,
            hits.len(),
            mapping.primary_key,
            draft.id
        );
        Ok(hits)
    }

    /// Write a full document.
    ///
    /// Returns the number of mutations buffered; a draft with a blank id or
    /// a missing shard key is dropped and logged.
    pub async fn insert(&mut self, mapping: &MappingConfig, draft: DocumentDraft) -> Result<usize> {
        if !shard_keys_present(mapping, &draft, "row") {
            return Ok(0);
        }
        let builder = MutationBuilder::new(mapping);

        if mapping.id_field.is_some() {
            let mutation = match builder.index(draft) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Index {}: row dropped, {}", mapping.index, e);
                    return Ok(0);
                }
            };
            self.buffer.add(mutation).await?;
            return Ok(1);
        }

        let hits = self.search_hits(mapping, &draft).await?;
        if hits.is_empty() {
            warn!(
                "Index {}: no document with {} = {}, insert skipped",
                mapping.index, mapping.primary_key, draft.id
            );
            return Ok(0);
        }
        let count = hits.len();
        for hit in hits {
            self.buffer.add(builder.update_hit(hit, draft.clone())).await?;
        }
        Ok(count)
    }

    /// Apply a partial update
    pub async fn update(&mut self, mapping: &MappingConfig, draft: DocumentDraft) -> Result<usize> {
        if !shard_keys_present(mapping, &draft, "update") {
            return Ok(0);
        }
        let builder = MutationBuilder::new(mapping);

        if mapping.id_field.is_some() {
            let id = match draft.document_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Index {}: update dropped, {}", mapping.index, e);
                    return Ok(0);
                }
            };
            self.buffer.add(builder.update(id, draft)).await?;
            return Ok(1);
        }

        let hits = self.search_hits(mapping, &draft).await?;
        let count = hits.len();
        for hit in hits {
            self.buffer.add(builder.update_hit(hit, draft.clone())).await?;
        }
        Ok(count)
    }

    /// Remove a document, or null the draft's payload fields in every
    /// document sharing its primary key when no id field is mapped
    pub async fn delete(&mut self, mapping: &MappingConfig, draft: DocumentDraft) -> Result<usize> {
        if !shard_keys_present(mapping, &draft, "delete") {
            return Ok(0);
        }
        let builder = MutationBuilder::new(mapping);

        if mapping.id_field.is_some() {
            let id = match draft.document_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Index {}: delete dropped, {}", mapping.index, e);
                    return Ok(0);
                }
            };
            self.buffer.add(builder.delete(id, draft)).await?;
            return Ok(1);
        }

        let hits = self.search_hits(mapping, &draft).await?;
        let count = hits.len();
        let mut nulled = draft.nulled();
        nulled.payload.remove(&mapping.primary_key);
        for hit in hits {
            self.buffer.add(builder.update_hit(hit, nulled.clone())).await?;
        }
        Ok(count)
    }

    pub async fn commit(&mut self) -> Result<FlushReport> {
        self.buffer.commit().await
    }

    /// Drop mutations of a batch that will be rebuilt
    pub fn discard(&mut self) -> usize {
        self.buffer.discard()
    }
}

fn shard_keys_present(mapping: &MappingConfig, draft: &DocumentDraft, what: &str) -> bool {
    match draft.require_shard_keys(mapping) {
        Ok(()) => true,
        Err(e) => {
            warn!("Index {}: {} dropped, {}", mapping.index, what, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationMapping;
    use searchsync_storage::{MemoryIndexStore, Row, Value};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn id_mapping() -> MappingConfig {
        let mut mapping = MappingConfig::new("users", "_id", "SELECT a.id AS _id FROM user a");
        mapping.id_field = Some("_id".into());
        mapping
    }

    fn pk_mapping() -> MappingConfig {
        MappingConfig::new("users", "pk", "SELECT a.id AS pk FROM user a")
    }

    #[tokio::test]
    async fn test_insert_update_delete_by_id() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut writer = DocumentWriter::new(store.clone(), 100);
        let mapping = id_mapping();

        writer
            .insert(&mapping, DocumentDraft::new(json!(1), row(json!({"name": "a"}))))
            .await
            .unwrap();
        writer
            .update(&mapping, DocumentDraft::new(json!(1), row(json!({"name": "b"}))))
            .await
            .unwrap();
        writer.commit().await.unwrap();
        assert_eq!(
            store.document("users", "_doc", "1").unwrap().source["name"],
            json!("b")
        );

        writer
            .delete(&mapping, DocumentDraft::new(json!(1), Row::new()))
            .await
            .unwrap();
        writer.commit().await.unwrap();
        assert!(store.document("users", "_doc", "1").is_none());
    }

    #[tokio::test]
    async fn test_blank_id_is_dropped() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut writer = DocumentWriter::new(store, 100);
        let mapping = id_mapping();

        let n = writer
            .insert(&mapping, DocumentDraft::new(json!(""), Row::new()))
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(writer.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_missing_routing_is_dropped() {
        let store = Arc::new(MemoryIndexStore::new());
        store.put_document("users", "_doc", "1", row(json!({"name": "a"})));
        let mut writer = DocumentWriter::new(store.clone(), 100);
        let mut mapping = id_mapping();
        mapping.routing_field = Some("tenant".into());
        mapping.upsert = true;
        let unrouted = || DocumentDraft::new(json!(1), row(json!({"name": "b"})));

        assert_eq!(writer.insert(&mapping, unrouted()).await.unwrap(), 0);
        assert_eq!(writer.update(&mapping, unrouted()).await.unwrap(), 0);
        assert_eq!(writer.delete(&mapping, unrouted()).await.unwrap(), 0);
        assert!(writer.buffer().is_empty());

        let mut routed = unrouted();
        routed.routing = Some("t1".into());
        assert_eq!(writer.update(&mapping, routed).await.unwrap(), 1);
        writer.commit().await.unwrap();
        let doc = store.document("users", "_doc", "1").unwrap();
        assert_eq!(doc.routing.as_deref(), Some("t1"));
        assert_eq!(doc.source["name"], json!("b"));
    }

    #[tokio::test]
    async fn test_missing_parent_is_dropped() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut writer = DocumentWriter::new(store, 100);
        let mut mapping = id_mapping();
        mapping.relations.insert(
            "join_field".into(),
            RelationMapping {
                name: "answer".into(),
                parent: Some("question_id".into()),
            },
        );

        let orphan = DocumentDraft::new(json!(1), row(json!({"name": "b"})));
        assert_eq!(writer.update(&mapping, orphan.clone()).await.unwrap(), 0);
        assert_eq!(writer.delete(&mapping, orphan.clone()).await.unwrap(), 0);

        let mut child = orphan;
        child.parent = Some("7".into());
        assert_eq!(writer.delete(&mapping, child).await.unwrap(), 1);
        assert_eq!(writer.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_pk_mapping_updates_every_hit() {
        let store = Arc::new(MemoryIndexStore::new());
        store.put_document("users", "_doc", "x1", row(json!({"pk": 5, "name": "a"})));
        store.put_document("users", "_doc", "x2", row(json!({"pk": 5, "name": "a"})));
        let mut writer = DocumentWriter::new(store.clone(), 100);
        let mapping = pk_mapping();

        let n = writer
            .update(&mapping, DocumentDraft::new(json!(5), row(json!({"name": "b"}))))
            .await
            .unwrap();
        writer.commit().await.unwrap();

        assert_eq!(n, 2);
        for (_, doc) in store.documents("users", "_doc") {
            assert_eq!(doc["name"], json!("b"));
        }
    }

    #[tokio::test]
    async fn test_pk_mapping_insert_without_hit_is_skipped() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut writer = DocumentWriter::new(store.clone(), 100);
        let mapping = pk_mapping();
        let draft = || DocumentDraft::new(json!(9), row(json!({"pk": 9, "name": "z"})));

        // a redelivered row must not fork a second document
        for _ in 0..2 {
            assert_eq!(writer.insert(&mapping, draft()).await.unwrap(), 0);
            writer.commit().await.unwrap();
        }
        assert_eq!(store.document_count("users", "_doc"), 0);

        store.put_document("users", "_doc", "x1", row(json!({"pk": 9})));
        for _ in 0..2 {
            assert_eq!(writer.insert(&mapping, draft()).await.unwrap(), 1);
            writer.commit().await.unwrap();
        }
        let docs = store.documents("users", "_doc");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].1["name"], json!("z"));
    }

    #[tokio::test]
    async fn test_pk_mapping_delete_nulls_fields() {
        let store = Arc::new(MemoryIndexStore::new());
        store.put_document("users", "_doc", "x1", row(json!({"pk": 5, "name": "a"})));
        let mut writer = DocumentWriter::new(store.clone(), 100);
        let mapping = pk_mapping();

        writer
            .delete(&mapping, DocumentDraft::new(json!(5), row(json!({"name": "a"}))))
            .await
            .unwrap();
        writer.commit().await.unwrap();

        let doc = store.document("users", "_doc", "x1").unwrap();
        assert_eq!(doc.source["name"], Value::Null);
        assert_eq!(doc.source["pk"], json!(5));
    }
}
