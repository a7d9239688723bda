//! Document drafts and the mutations built from them
//!
//! A `DocumentDraft` carries the resolved id, payload and shard keys of one
//! row. Routing and parent are first-class fields of the draft and of the
//! resulting `IndexMutation`; they are never stored in the payload.

use searchsync_storage::{scalar_to_string, IndexMutation, MutationKind, Row, Value};

use crate::config::MappingConfig;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentDraft {
    /// Value of the id field (or primary key when no id field is mapped)
    pub id: Value,
    pub payload: Row,
    pub routing: Option<String>,
    pub parent: Option<String>,
}

impl DocumentDraft {
    pub fn new(id: Value, payload: Row) -> Self {
        Self {
            id,
            payload,
            routing: None,
            parent: None,
        }
    }

    /// Document id as sent to the store; null or blank ids are rejected
    pub fn document_id(&self) -> Result<String> {
        scalar_to_string(&self.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SyncError::ValueResolution(format!("document id is blank: {}", self.id)))
    }

    /// Reject drafts missing a shard key the mapping requires
    pub fn require_shard_keys(&self, mapping: &MappingConfig) -> Result<()> {
        if let Some(field) = mapping.routing() {
            if self.routing.is_none() {
                return Err(SyncError::ValueResolution(format!(
                    "routing field {} is blank for id {}",
                    field, self.id
                )));
            }
        }
        let needs_parent = mapping.relations.values().any(|r| r.parent.is_some());
        if needs_parent && self.parent.is_none() {
            return Err(SyncError::ValueResolution(format!(
                "parent value is blank for id {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Same draft with every payload value replaced by null
    pub fn nulled(mut self) -> Self {
        for value in self.payload.values_mut() {
            *value = Value::Null;
        }
        self
    }
}

/// Turns drafts into store mutations for one mapping
pub struct MutationBuilder<'a> {
    mapping: &'a MappingConfig,
}

impl<'a> MutationBuilder<'a> {
    pub fn new(mapping: &'a MappingConfig) -> Self {
        Self { mapping }
    }

    fn build(&self, kind: MutationKind, id: Option<String>, draft: DocumentDraft) -> IndexMutation {
        IndexMutation::new(
            kind,
            self.mapping.index.clone(),
            self.mapping.doc_type.clone(),
            id,
            draft.payload,
        )
        .with_routing(draft.routing)
        .with_parent(draft.parent)
    }

    /// Full write addressed by the draft's id: doc-as-upsert when the
    /// mapping asks for it, a plain index otherwise
    pub fn index(&self, draft: DocumentDraft) -> Result<IndexMutation> {
        let id = draft.document_id()?;
        let kind = if self.mapping.upsert {
            MutationKind::Upsert
        } else {
            MutationKind::Index
        };
        Ok(self.build(kind, Some(id), draft))
    }

    /// Partial update addressed by `id`
    pub fn update(&self, id: String, draft: DocumentDraft) -> IndexMutation {
        let kind = if self.mapping.upsert {
            MutationKind::Upsert
        } else {
            MutationKind::Update
        };
        self.build(kind, Some(id), draft)
    }

    /// Partial update of a document located by search
    pub fn update_hit(&self, hit_id: String, draft: DocumentDraft) -> IndexMutation {
        self.build(MutationKind::Update, Some(hit_id), draft)
    }

    pub fn delete(&self, id: String, draft: DocumentDraft) -> IndexMutation {
        let shard_keys = DocumentDraft {
            routing: draft.routing,
            parent: draft.parent,
            ..Default::default()
        };
        self.build(MutationKind::Delete, Some(id), shard_keys)
    }
}
