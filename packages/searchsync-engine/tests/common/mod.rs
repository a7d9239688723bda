//! Shared fixtures: a SQLite `member`/`role` database and an index store
//! that records every mutation it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use searchsync_engine::{
    ColumnRef, DataSourceRegistry, MappingConfig, RelationKey, SchemaGraph, SelectField,
    SyncConfig, SyncService, TableItem,
};
use searchsync_storage::{
    BulkItemResult, IndexMutation, IndexStore, MemoryIndexStore, RecordingAlertSink, Row,
    SqliteDataSource, Value,
};

pub const JOINED_SQL: &str = "SELECT a.id AS _id, a.name AS name, a.role_id AS role_id, b.role_name AS role_name \
     FROM member a LEFT JOIN role b ON b.id = a.role_id";

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

pub fn database() -> Arc<SqliteDataSource> {
    let db = SqliteDataSource::in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE role (id INTEGER PRIMARY KEY, role_name TEXT);
         CREATE TABLE member (id INTEGER PRIMARY KEY, name TEXT, role_id INTEGER);
         INSERT INTO role VALUES (1, 'admin'), (2, 'guest'), (3, 'unused');
         INSERT INTO member VALUES (10, 'alice', 1), (11, 'bob', 1), (12, 'carol', 2);",
    )
    .unwrap();
    Arc::new(db)
}

/// Index store wrapper keeping a log of every mutation sent
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemoryIndexStore,
    sent: Arc<Mutex<Vec<IndexMutation>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.inner.set_field_mapping(
            "members",
            "_doc",
            json!({
                "name": {"type": "keyword"},
                "role_id": {"type": "long"},
                "role_name": {"type": "keyword"},
                "role_label": {"type": "keyword"}
            }),
        );
        store
    }

    pub fn sent(&self) -> Vec<IndexMutation> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn doc(&self, id: &str) -> Option<Row> {
        self.inner.document("members", "_doc", id).map(|d| d.source)
    }

    /// Seed the index with the fixture members as the joined query sees them
    pub fn seed_members(&self) {
        for (id, name, role_id, role_name) in [
            (10, "alice", 1, "admin"),
            (11, "bob", 1, "admin"),
            (12, "carol", 2, "guest"),
        ] {
            self.inner.put_document(
                "members",
                "_doc",
                &id.to_string(),
                row(json!({"name": name, "role_id": role_id, "role_name": role_name})),
            );
        }
    }
}

#[async_trait]
impl IndexStore for RecordingStore {
    async fn bulk(&self, mutations: &[IndexMutation]) -> searchsync_storage::Result<Vec<BulkItemResult>> {
        self.sent.lock().extend(mutations.iter().cloned());
        self.inner.bulk(mutations).await
    }

    async fn search_by_term(
        &self,
        index: &str,
        doc_type: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> searchsync_storage::Result<Vec<String>> {
        self.inner.search_by_term(index, doc_type, field, value, limit).await
    }

    async fn field_mapping(&self, index: &str, doc_type: &str) -> searchsync_storage::Result<Option<Value>> {
        self.inner.field_mapping(index, doc_type).await
    }
}

fn role_key() -> Vec<RelationKey> {
    vec![RelationKey {
        foreign_key: ColumnRef::new("b", "id"),
        linked_fields: vec![SelectField::simple("a", "role_id", "role_id")],
    }]
}

fn member_fields() -> Vec<SelectField> {
    vec![
        SelectField::simple("a", "id", "_id"),
        SelectField::simple("a", "name", "name"),
        SelectField::simple("a", "role_id", "role_id"),
    ]
}

fn mapping(sql: &str) -> MappingConfig {
    let mut mapping = MappingConfig::new("members", "_id", sql);
    mapping.id_field = Some("_id".into());
    mapping
}

/// `member` only, every field a plain column
pub fn single_table_config() -> SyncConfig {
    let mut mapping = mapping("SELECT a.id AS _id, a.name AS name, a.role_id AS role_id FROM member a");
    mapping.upsert = true;
    mapping.skip_fields.insert("role_id".into());
    SyncConfig::new("default", mapping)
        .with_destination("example")
        .with_schema(SchemaGraph::new(vec![TableItem::main("member", "a")], member_fields()))
}

/// `member a LEFT JOIN role b`, every field a plain column
pub fn joined_config() -> SyncConfig {
    let mut fields = member_fields();
    fields.push(SelectField::simple("b", "role_name", "role_name"));
    SyncConfig::new("default", mapping(JOINED_SQL))
        .with_destination("example")
        .with_schema(SchemaGraph::new(
            vec![TableItem::main("member", "a"), TableItem::joined("role", "b", role_key())],
            fields,
        ))
}

/// `role` joined as a derived table
pub fn sub_query_config() -> SyncConfig {
    let sub_sql = "SELECT id, role_name FROM role";
    let sql = format!(
        "SELECT a.id AS _id, a.name AS name, a.role_id AS role_id, b.role_name AS role_name \
         FROM member a LEFT JOIN ({}) b ON b.id = a.role_id",
        sub_sql
    );
    let mut fields = member_fields();
    fields.push(SelectField::simple("b", "role_name", "role_name"));
    let role = TableItem::joined("role", "b", role_key()).with_sub_query(
        sub_sql,
        vec![
            SelectField::simple("role", "id", "id"),
            SelectField::simple("role", "role_name", "role_name"),
        ],
    );
    SyncConfig::new("default", mapping(&sql))
        .with_destination("example")
        .with_schema(SchemaGraph::new(vec![TableItem::main("member", "a"), role], fields))
}

/// `role` feeding a computed field
pub fn whole_query_config() -> SyncConfig {
    let sql = "SELECT a.id AS _id, a.name AS name, a.role_id AS role_id, upper(b.role_name) AS role_label \
               FROM member a LEFT JOIN role b ON b.id = a.role_id";
    let mut fields = member_fields();
    fields.push(SelectField::expression("b", "role_label", &[("b", "role_name")]));
    SyncConfig::new("default", mapping(sql))
        .with_destination("example")
        .with_schema(SchemaGraph::new(
            vec![TableItem::main("member", "a"), TableItem::joined("role", "b", role_key())],
            fields,
        ))
}

pub fn service(db: &Arc<SqliteDataSource>, store: &RecordingStore, alerts: &RecordingAlertSink) -> SyncService {
    let mut sources = DataSourceRegistry::new();
    sources.register("default", db.clone());
    SyncService::new(sources, Arc::new(store.clone()), Arc::new(alerts.clone()))
}

/// `role` feeding an aggregate over a grouped query
pub fn grouped_config() -> SyncConfig {
    let sql = "SELECT a.id AS _id, a.name AS name, a.role_id AS role_id, max(upper(b.role_name)) AS role_label \
               FROM member a LEFT JOIN role b ON b.id = a.role_id GROUP BY a.id";
    let mut fields = member_fields();
    fields.push(SelectField::expression("b", "role_label", &[("b", "role_name")]));
    SyncConfig::new("default", mapping(sql))
        .with_destination("example")
        .with_schema(SchemaGraph::new(
            vec![TableItem::main("member", "a"), TableItem::joined("role", "b", role_key())],
            fields,
        ))
}

/// Document id computed from the member id, `member_id` as primary key
pub fn computed_id_config() -> SyncConfig {
    let sql = "SELECT 'm-' || a.id AS _id, a.id AS member_id, a.name AS name, a.role_id AS role_id, \
               b.role_name AS role_name FROM member a LEFT JOIN role b ON b.id = a.role_id";
    let mut mapping = MappingConfig::new("members", "member_id", sql);
    mapping.id_field = Some("_id".into());
    SyncConfig::new("default", mapping)
        .with_destination("example")
        .with_schema(SchemaGraph::new(
            vec![TableItem::main("member", "a"), TableItem::joined("role", "b", role_key())],
            vec![
                SelectField::expression("a", "_id", &[("a", "id")]),
                SelectField::simple("a", "id", "member_id"),
                SelectField::simple("a", "name", "name"),
                SelectField::simple("a", "role_id", "role_id"),
                SelectField::simple("b", "role_name", "role_name"),
            ],
        ))
}
