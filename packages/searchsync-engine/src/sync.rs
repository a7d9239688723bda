//! Incremental sync
//!
//! Maps one change record onto index mutations for each mapping reading the
//! changed table. The table's strategies are classified once per index and
//! cached; each row is then dispatched by operation and strategy:
//!
//! ```text
//!                  INSERT              UPDATE                 DELETE
//! single table     index row           delta of row           delete by id
//! main table       requery by pk       fast path / requery    delete by id
//! joined simple    update by query     changed fields         null fields
//! joined subquery  requery sub-select  changed fields         null fields
//! joined complex   requery whole sql   changed fields         requery whole sql
//! ```
//!
//! Mutations go through one long-lived `DocumentWriter`; call `commit` at
//! the end of a delivery batch.

use chrono::Local;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use searchsync_storage::{AlertSink, DataSource, IndexStore, Row, Value};

use crate::bulk::FlushReport;
use crate::config::{MappingConfig, SyncConfig, DEFAULT_COMMIT_BATCH_SIZE};
use crate::error::{Result, SyncError};
use crate::field_types::{FieldTypeCache, FieldTypes};
use crate::mutation::DocumentDraft;
use crate::record::{ChangeRecord, Operation};
use crate::registry::{DataSourceRegistry, MappingRegistry};
use crate::resolver::FieldValueResolver;
use crate::schema::{SchemaGraph, TableItem};
use crate::sql::{clean_column, equality_conjunction, inject_condition, sub_query_sql, update_by_query_sql};
use crate::strategy::{apply_foreign_key_rule, Strategy, StrategyCache};
use crate::writer::DocumentWriter;

/// Outcome of `SyncService::sync_record`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub mappings_synced: usize,
    /// No mapping reads the record's table
    pub missing: bool,
}

/// Which fields of a joined table a row refreshes
#[derive(Clone, Copy)]
enum Delta<'r> {
    /// Every dependent field (insert)
    All,
    /// Fields whose columns appear in the old values (update)
    Changed(&'r Row),
    /// Every dependent field, set to null (delete)
    Cleared,
}

impl Delta<'_> {
    fn includes_column(&self, column: &str) -> bool {
        match self {
            Delta::Changed(old) => old.contains_key(column),
            Delta::All | Delta::Cleared => true,
        }
    }
}

/// Per-call state shared by every row of one record and mapping
struct SyncContext<'a> {
    config: &'a SyncConfig,
    schema: &'a SchemaGraph,
    types: Arc<FieldTypes>,
    data_source: Arc<dyn DataSource>,
    table: &'a str,
}

impl SyncContext<'_> {
    fn mapping(&self) -> &MappingConfig {
        &self.config.mapping
    }

    fn resolver(&self) -> FieldValueResolver<'_> {
        FieldValueResolver::new(&self.config.mapping, &self.types)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        trace!("Requery on {}: {} {:?}", self.config.data_source_key, sql, params);
        self.data_source
            .query(sql, params)
            .await
            .map_err(|e| SyncError::requery(sql, e))
    }
}

pub struct SyncService {
    data_sources: DataSourceRegistry,
    writer: DocumentWriter,
    field_types: FieldTypeCache,
    strategies: StrategyCache,
    alerts: Arc<dyn AlertSink>,
}

impl SyncService {
    pub fn new(data_sources: DataSourceRegistry, store: Arc<dyn IndexStore>, alerts: Arc<dyn AlertSink>) -> Self {
        Self::with_batch_size(data_sources, store, alerts, DEFAULT_COMMIT_BATCH_SIZE)
    }

    pub fn with_batch_size(
        data_sources: DataSourceRegistry,
        store: Arc<dyn IndexStore>,
        alerts: Arc<dyn AlertSink>,
        batch_size: usize,
    ) -> Self {
        Self {
            data_sources,
            writer: DocumentWriter::new(store, batch_size),
            field_types: FieldTypeCache::new(),
            strategies: StrategyCache::new(),
            alerts,
        }
    }

    pub fn field_types(&self) -> &FieldTypeCache {
        &self.field_types
    }

    pub fn strategies(&self) -> &StrategyCache {
        &self.strategies
    }

    pub fn pending(&self) -> usize {
        self.writer.buffer().len()
    }

    /// Force-flush buffered mutations
    pub async fn commit(&mut self) -> Result<FlushReport> {
        self.writer.commit().await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Entry points
    // ═══════════════════════════════════════════════════════════════════════

    /// Sync every mapping of the record's destination that reads its table.
    ///
    /// A table with no mapping is logged and reported, never an error.
    pub async fn sync_record(&mut self, registry: &MappingRegistry, record: &ChangeRecord) -> Result<SyncReport> {
        let configs = registry.configs_for(&record.destination, &record.table);
        if configs.is_empty() {
            let missing = SyncError::ConfigMissing(format!(
                "destination {}, table {}",
                record.destination, record.table
            ));
            warn!("{}, category: {}", missing, missing.category());
            return Ok(SyncReport {
                mappings_synced: 0,
                missing: true,
            });
        }

        self.sync_all(&configs, record).await?;
        Ok(SyncReport {
            mappings_synced: configs.len(),
            missing: false,
        })
    }

    pub async fn sync_all(&mut self, configs: &[Arc<SyncConfig>], record: &ChangeRecord) -> Result<()> {
        for config in configs {
            self.sync(config, record).await?;
        }
        Ok(())
    }

    /// Apply one change record to one mapping.
    ///
    /// Hard failures raise an alert in `online` and propagate so the record
    /// can be redelivered.
    pub async fn sync(&mut self, config: &SyncConfig, record: &ChangeRecord) -> Result<()> {
        if config.mapping.sync_by_timestamp {
            trace!(
                "Index {} is refreshed by timestamp, skipping {} on {}",
                config.mapping.index,
                record.operation,
                record.table
            );
            return Ok(());
        }

        match self.sync_record_rows(config, record).await {
            Ok(()) => {
                self.alert_delay(config, record).await;
                Ok(())
            }
            Err(e) => {
                error!(
                    "Sync {} on {} into index {} failed: {}",
                    record.operation, record.table, config.mapping.index, e
                );
                if config.env.is_online() {
                    self.send_alert(&record.to_json()).await;
                }
                Err(e)
            }
        }
    }

    async fn sync_record_rows(&mut self, config: &SyncConfig, record: &ChangeRecord) -> Result<()> {
        let schema = config.schema()?;
        let mapping = &config.mapping;

        let strategies = self.strategies.classify(&mapping.index, &record.table, schema);
        if strategies.is_empty() {
            trace!("Table {} does not feed index {}", record.table, mapping.index);
            return Ok(());
        }

        let store = self.writer.buffer().store().clone();
        let ctx = SyncContext {
            config,
            schema,
            types: self.field_types.get(store.as_ref(), &mapping.index, &mapping.doc_type).await?,
            data_source: self.data_sources.get(&config.data_source_key)?,
            table: &record.table,
        };

        let started = std::time::Instant::now();
        for (i, row) in record.new_rows.iter().enumerate() {
            match record.operation {
                Operation::Insert => self.on_insert(&ctx, &strategies, row).await?,
                Operation::Update => {
                    let mut old = record.old_rows.get(i).cloned().unwrap_or_default();
                    self.on_update(&ctx, &strategies, row, &mut old).await?;
                }
                Operation::Delete => self.on_delete(&ctx, &strategies, row).await?,
                Operation::Other => {
                    trace!("Ignoring {} on {}", record.operation, record.table);
                    return Ok(());
                }
            }
        }

        debug!(
            "Synced {} {} rows of {} into index {} in {}ms",
            record.new_rows.len(),
            record.operation,
            record.table,
            mapping.index,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Operations
    // ═══════════════════════════════════════════════════════════════════════

    async fn on_insert(&mut self, ctx: &SyncContext<'_>, strategies: &[Strategy], row: &Row) -> Result<()> {
        for strategy in strategies {
            match strategy {
                Strategy::SingleTable => {
                    let draft = ctx.resolver().document_from_record(ctx.schema, row);
                    self.writer.insert(ctx.mapping(), draft).await?;
                }
                Strategy::MainTable => {
                    for result in self.requery_main(ctx, row).await? {
                        let draft = ctx.resolver().document_from_row(ctx.schema, &result);
                        self.writer.insert(ctx.mapping(), draft).await?;
                    }
                }
                Strategy::JoinedSimple { alias } => {
                    self.join_simple(ctx, joined(ctx, alias)?, row, Delta::All).await?
                }
                Strategy::JoinedSubQuery { alias } => {
                    self.join_sub_query(ctx, joined(ctx, alias)?, row, Delta::All).await?
                }
                Strategy::JoinedWholeQuery { alias } => {
                    self.join_whole_query(ctx, joined(ctx, alias)?, row, Delta::All).await?
                }
            }
        }
        Ok(())
    }

    async fn on_update(
        &mut self,
        ctx: &SyncContext<'_>,
        strategies: &[Strategy],
        row: &Row,
        old: &mut Row,
    ) -> Result<()> {
        let link_changed = apply_foreign_key_rule(ctx.schema, ctx.table, old);
        let old: &Row = old;

        for strategy in strategies {
            match strategy {
                Strategy::SingleTable => {
                    let draft = ctx.resolver().delta_from_record(ctx.schema, row, old, ctx.table);
                    self.write_update(ctx, draft).await?;
                }
                Strategy::MainTable if !link_changed && self.is_simple_update(ctx, old) => {
                    let draft = ctx.resolver().delta_from_record(ctx.schema, row, old, ctx.table);
                    self.write_update(ctx, draft).await?;
                }
                Strategy::MainTable => {
                    for result in self.requery_main(ctx, row).await? {
                        let draft = ctx.resolver().delta_from_row(ctx.schema, &result, old);
                        self.write_update(ctx, draft).await?;
                    }
                }
                Strategy::JoinedSimple { alias } => {
                    self.join_simple(ctx, joined(ctx, alias)?, row, Delta::Changed(old)).await?
                }
                Strategy::JoinedSubQuery { alias } => {
                    self.join_sub_query(ctx, joined(ctx, alias)?, row, Delta::Changed(old)).await?
                }
                Strategy::JoinedWholeQuery { alias } => {
                    self.join_whole_query(ctx, joined(ctx, alias)?, row, Delta::Changed(old)).await?
                }
            }
        }
        Ok(())
    }

    async fn on_delete(&mut self, ctx: &SyncContext<'_>, strategies: &[Strategy], row: &Row) -> Result<()> {
        for strategy in strategies {
            match strategy {
                Strategy::SingleTable => {
                    let draft = ctx.resolver().document_from_record(ctx.schema, row);
                    self.writer.delete(ctx.mapping(), draft).await?;
                }
                Strategy::MainTable if self.id_readable_from_record(ctx) => {
                    let draft = ctx.resolver().document_from_record(ctx.schema, row);
                    self.writer.delete(ctx.mapping(), draft).await?;
                }
                Strategy::MainTable => {
                    // a computed id can only come from the query, which no
                    // longer sees the deleted row
                    let results = self.requery_main(ctx, row).await?;
                    if results.is_empty() {
                        warn!(
                            "Index {}: computed id of deleted {} row cannot be resolved",
                            ctx.mapping().index,
                            ctx.table
                        );
                    }
                    for result in results {
                        let draft = ctx.resolver().document_from_row(ctx.schema, &result);
                        self.writer.delete(ctx.mapping(), draft).await?;
                    }
                }
                Strategy::JoinedSimple { alias } | Strategy::JoinedSubQuery { alias } => {
                    self.join_simple(ctx, joined(ctx, alias)?, row, Delta::Cleared).await?
                }
                Strategy::JoinedWholeQuery { alias } => {
                    self.join_whole_query(ctx, joined(ctx, alias)?, row, Delta::All).await?
                }
            }
        }
        Ok(())
    }

    /// Simple id field and only simple fields changed
    fn is_simple_update(&self, ctx: &SyncContext<'_>, old: &Row) -> bool {
        let id_simple = ctx
            .schema
            .select_field(ctx.mapping().id_field_name())
            .is_some_and(|f| f.is_simple);
        let changed_simple = ctx
            .schema
            .select_fields
            .iter()
            .filter(|f| f.reads_any(old))
            .all(|f| f.is_simple);
        id_simple && changed_simple
    }

    /// The document is addressable from the change record alone
    fn id_readable_from_record(&self, ctx: &SyncContext<'_>) -> bool {
        match &ctx.mapping().id_field {
            Some(id) => ctx.schema.select_field(id).is_some_and(|f| f.is_simple),
            None => true,
        }
    }

    async fn write_update(&mut self, ctx: &SyncContext<'_>, draft: DocumentDraft) -> Result<()> {
        if draft.payload.is_empty() {
            trace!("Index {}: nothing changed for id {}", ctx.mapping().index, draft.id);
            return Ok(());
        }
        self.writer.update(ctx.mapping(), draft).await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Requeries
    // ═══════════════════════════════════════════════════════════════════════

    /// Defining query restricted to the changed row's primary key
    async fn requery_main(&self, ctx: &SyncContext<'_>, row: &Row) -> Result<Vec<Row>> {
        let pk = &ctx.mapping().primary_key;
        let column = ctx
            .schema
            .select_field(pk)
            .and_then(|f| f.column())
            .ok_or_else(|| SyncError::schema(format!("Primary key field {} has no source column", pk)))?;

        let value = row.get(&column.column_name).cloned().unwrap_or(Value::Null);
        let sql = inject_condition(&ctx.mapping().sql, &format!("{} = ?", clean_column(&column.qualified())));
        ctx.query(&sql, &[value]).await
    }

    async fn join_simple(&mut self, ctx: &SyncContext<'_>, table: &TableItem, row: &Row, delta: Delta<'_>) -> Result<()> {
        let resolver = ctx.resolver();
        let mut payload = Row::new();

        for field in ctx.schema.fields_owned_by(&table.alias) {
            let column = field.column_name();
            if ctx.mapping().is_skipped(&field.field_name) || !delta.includes_column(column) {
                continue;
            }
            let value = match delta {
                Delta::Cleared => Value::Null,
                _ => resolver.value_from_record(row, &field.field_name, column),
            };
            payload.insert(clean_column(&field.field_name), value);
        }

        let filters = relation_filters(table, row);
        self.update_by_query(ctx, filters, payload).await
    }

    async fn join_sub_query(
        &mut self,
        ctx: &SyncContext<'_>,
        table: &TableItem,
        row: &Row,
        delta: Delta<'_>,
    ) -> Result<()> {
        let Some(sub_sql) = table.sub_query_sql.as_deref() else {
            return self.join_simple(ctx, table, row, delta).await;
        };

        let columns: Vec<&str> = table
            .relation_keys
            .iter()
            .map(|key| key.foreign_key.column_name.as_str())
            .collect();
        let params: Vec<Value> = columns
            .iter()
            .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
            .collect();
        let sql = sub_query_sql(sub_sql, &table.alias, &columns);

        for result in ctx.query(&sql, &params).await? {
            let resolver = ctx.resolver();
            let mut payload = Row::new();
            for field in ctx.schema.fields_owned_by(&table.alias) {
                let column = field.column_name();
                if ctx.mapping().is_skipped(&field.field_name) || !delta.includes_column(column) {
                    continue;
                }
                payload.insert(
                    clean_column(&field.field_name),
                    resolver.value_from_row(&result, &field.field_name, column),
                );
            }
            let filters = relation_filters(table, &result);
            self.update_by_query(ctx, filters, payload).await?;
        }
        Ok(())
    }

    /// Defining query restricted to the joined row, one update per result
    async fn join_whole_query(
        &mut self,
        ctx: &SyncContext<'_>,
        table: &TableItem,
        row: &Row,
        delta: Delta<'_>,
    ) -> Result<()> {
        let columns: Vec<String> = table
            .relation_keys
            .iter()
            .map(|key| format!("{}.{}", table.alias, clean_column(&key.foreign_key.column_name)))
            .collect();
        let params: Vec<Value> = table
            .relation_keys
            .iter()
            .map(|key| row.get(&key.foreign_key.column_name).cloned().unwrap_or(Value::Null))
            .collect();
        if columns.is_empty() {
            warn!("Joined table {} has no relation key, skipping", table.alias);
            return Ok(());
        }
        let sql = inject_condition(&ctx.mapping().sql, &equality_conjunction(&columns));

        for result in ctx.query(&sql, &params).await? {
            let resolver = ctx.resolver();
            let mut payload = Row::new();
            for field in ctx.schema.fields_owned_by(&table.alias) {
                let changed = match delta {
                    Delta::Changed(old) => field.reads_any(old),
                    Delta::All | Delta::Cleared => true,
                };
                if !changed || ctx.mapping().is_skipped(&field.field_name) {
                    continue;
                }
                payload.insert(
                    clean_column(&field.field_name),
                    resolver.value_from_row(&result, &field.field_name, &field.field_name),
                );
            }

            let filters = table
                .relation_keys
                .iter()
                .flat_map(|key| key.linked_fields.iter())
                .map(|linked| {
                    let value = result.get(&linked.field_name).cloned().unwrap_or(Value::Null);
                    (linked.field_name.clone(), value)
                })
                .collect();
            self.update_by_query(ctx, filters, payload).await?;
        }
        Ok(())
    }

    /// Apply `payload` to every document whose query row matches `filters`
    async fn update_by_query(
        &mut self,
        ctx: &SyncContext<'_>,
        filters: Vec<(String, Value)>,
        payload: Row,
    ) -> Result<()> {
        let mapping = ctx.mapping();
        if payload.is_empty() {
            trace!("Index {}: no dependent field changed on {}", mapping.index, ctx.table);
            return Ok(());
        }
        if filters.is_empty() {
            warn!("Index {}: no join filter for {}, skipping", mapping.index, ctx.table);
            return Ok(());
        }

        let (fields, params): (Vec<String>, Vec<Value>) = filters.into_iter().unzip();
        let sql = update_by_query_sql(&mapping.sql, &fields);
        let rows = ctx.query(&sql, &params).await?;

        if rows.is_empty() {
            debug!("Index {}: no document matches {:?} = {:?}", mapping.index, fields, params);
            if ctx.config.env.is_online() {
                let message = format!(
                    "Update by query matched no rows\nindex: {}\ntable: {}\nsql: {}\nparams: {:?}",
                    mapping.index, ctx.table, sql, params
                );
                self.send_alert(&message).await;
            }
            return Ok(());
        }

        let resolver = ctx.resolver();
        for row in &rows {
            let mut draft = DocumentDraft::new(resolver.id_from_row(row), payload.clone());
            draft.routing = resolver.routing_from_row(row);
            draft.parent = resolver.parent_from_row(row);
            trace!("Index {}: update id {} from {}", mapping.index, draft.id, ctx.table);
            self.writer.update(mapping, draft).await?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Alerts
    // ═══════════════════════════════════════════════════════════════════════

    async fn alert_delay(&self, config: &SyncConfig, record: &ChangeRecord) {
        if !config.env.is_online() || record.origin_timestamp_ms <= 0 {
            return;
        }
        let now = Local::now();
        let delay = now.timestamp_millis() - record.origin_timestamp_ms;
        if delay <= config.delay_threshold_ms {
            return;
        }

        let message = format!(
            "Sync delay alert\ntime: {}\nindex: {}\ndelay: {}ms\ntable: {}\ntype: {}\nid: {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            config.mapping.index,
            delay,
            record.table,
            record.operation,
            record.first_value("id")
        );
        self.send_alert(&message).await;
    }

    async fn send_alert(&self, message: &str) {
        if let Err(e) = self.alerts.send_alert(message).await {
            warn!("Alert not delivered: {}", e);
        }
    }
}

fn joined<'a>(ctx: &SyncContext<'a>, alias: &str) -> Result<&'a TableItem> {
    ctx.schema
        .table(alias)
        .ok_or_else(|| SyncError::schema(format!("Unknown table alias {}", alias)))
}

/// `linked field = foreign key value` for every relation key of `table`
fn relation_filters(table: &TableItem, row: &Row) -> Vec<(String, Value)> {
    table
        .relation_keys
        .iter()
        .flat_map(|key| {
            let value = row.get(&key.foreign_key.column_name).cloned().unwrap_or(Value::Null);
            key.linked_fields
                .iter()
                .map(move |linked| (linked.field_name.clone(), value.clone()))
        })
        .collect()
}
