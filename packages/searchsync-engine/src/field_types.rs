//! Declared field types of index mappings
//!
//! Types are fetched from the index store on first use per `index-type` key
//! and kept until invalidated. The cache is an explicit object so each
//! service (and each test) owns its lifetime.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use searchsync_storage::{IndexStore, StorageError, Value};

use crate::error::Result;

/// field → declared type (`long`, `keyword`, `boolean`, `object`, ...)
pub type FieldTypes = HashMap<String, String>;

#[derive(Clone, Default)]
pub struct FieldTypeCache {
    entries: Arc<DashMap<String, Arc<FieldTypes>>>,
}

impl FieldTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(index: &str, doc_type: &str) -> String {
        format!("{}-{}", index, doc_type)
    }

    /// Field types of `index`, loading them from `store` on a miss.
    ///
    /// # Errors
    ///
    /// `MappingNotFound` when the store has no mapping for the index.
    pub async fn get(
        &self,
        store: &dyn IndexStore,
        index: &str,
        doc_type: &str,
    ) -> Result<Arc<FieldTypes>> {
        let key = Self::key(index, doc_type);
        if let Some(types) = self.entries.get(&key) {
            return Ok(types.clone());
        }

        let properties = store
            .field_mapping(index, doc_type)
            .await?
            .ok_or_else(|| StorageError::mapping_not_found(index))?;
        let types = Arc::new(parse_properties(&properties));
        debug!("Loaded {} field types for {}", types.len(), key);

        self.entries.insert(key, types.clone());
        Ok(types)
    }

    pub fn insert(&self, index: &str, doc_type: &str, types: FieldTypes) {
        self.entries
            .insert(Self::key(index, doc_type), Arc::new(types));
    }

    pub fn invalidate(&self, index: &str, doc_type: &str) {
        self.entries.remove(&Self::key(index, doc_type));
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

/// Flatten the top level of a mapping's `properties` object.
///
/// Entries with nested `properties` are reported as `object`.
pub fn parse_properties(properties: &Value) -> FieldTypes {
    let mut types = FieldTypes::new();
    if let Some(props) = properties.as_object() {
        for (field, property) in props {
            let kind = if property.get("properties").is_some() {
                Some("object".to_string())
            } else {
                property.get("type").and_then(Value::as_str).map(String::from)
            };
            if let Some(kind) = kind {
                types.insert(field.clone(), kind);
            }
        }
    }
    types
}
