//! Full import backfill
//!
//! Repopulates an index from its defining query. For each physical table:
//!
//! 1. look up the lowest and highest primary key (honouring the ETL filter)
//! 2. split `[min, max]` into contiguous shards, one per worker
//! 3. each worker pages through its shard with its own `DocumentWriter`,
//!    committing at the end of every page
//!
//! A failing page is retried in place after a fixed backoff until the
//! retry policy gives up. The imported-row count is an atomic counter and
//! page errors are collected behind a mutex; `import_data` joins every
//! worker before reporting.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use searchsync_storage::{AlertSink, DataSource, IndexStore, Row, Value};

use crate::config::{BackfillOptions, RetryPolicy, SyncConfig};
use crate::error::{Result, SyncError};
use crate::field_types::{FieldTypeCache, FieldTypes};
use crate::resolver::FieldValueResolver;
use crate::sql::{bind_placeholders, clean_column, inject_condition, replace_table, strip_leading_joiner};
use crate::writer::DocumentWriter;

/// Inclusive primary-key range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shard {
    pub start: i64,
    pub end: i64,
}

impl Shard {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        if self.end < self.start {
            return 0;
        }
        (i128::from(self.end) - i128::from(self.start) + 1) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Consecutive pages of at most `page_size` ids covering the shard
    pub fn pages(&self, page_size: i64) -> impl Iterator<Item = Shard> {
        let page_size = i128::from(page_size.max(1));
        let end = i128::from(self.end);
        let mut next = (!self.is_empty()).then_some(i128::from(self.start));

        std::iter::from_fn(move || {
            let start = next?;
            let page_end = (start + page_size - 1).min(end);
            next = (page_end < end).then_some(page_end + 1);
            Some(Shard::new(start as i64, page_end as i64))
        })
    }
}

/// Split `[min, max]` into at most `workers` contiguous shards.
///
/// Every shard but the last spans `(max - min + 1) / n` ids; the last one
/// absorbs the remainder. An inverted range yields no shards.
pub fn partition(min: i64, max: i64, workers: usize) -> Vec<Shard> {
    if max < min {
        return Vec::new();
    }
    let span = i128::from(max) - i128::from(min) + 1;
    let count = (workers.max(1) as i128).min(span);
    let base = span / count;

    (0..count)
        .map(|k| {
            let start = i128::from(min) + k * base;
            let end = if k == count - 1 {
                i128::from(max)
            } else {
                start + base - 1
            };
            Shard::new(start as i64, end as i64)
        })
        .collect()
}

/// Outcome of one `import_data` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub succeeded: bool,
    pub imported_count: u64,
    pub result_message: String,
    pub error_message: Option<String>,
}

pub struct ImportService {
    config: Arc<SyncConfig>,
    data_source: Arc<dyn DataSource>,
    store: Arc<dyn IndexStore>,
    alerts: Arc<dyn AlertSink>,
    options: BackfillOptions,
    field_types: FieldTypeCache,
}

impl ImportService {
    pub fn new(
        config: Arc<SyncConfig>,
        data_source: Arc<dyn DataSource>,
        store: Arc<dyn IndexStore>,
        alerts: Arc<dyn AlertSink>,
        options: BackfillOptions,
    ) -> Self {
        Self {
            config,
            data_source,
            store,
            alerts,
            options,
            field_types: FieldTypeCache::new(),
        }
    }

    /// Share a field-type cache with other services
    pub fn with_field_types(mut self, field_types: FieldTypeCache) -> Self {
        self.field_types = field_types;
        self
    }

    pub fn options(&self) -> &BackfillOptions {
        &self.options
    }

    /// Import every row of the mapping's query.
    ///
    /// `params` are bound in order to the `{}` placeholders of the ETL
    /// condition. Page failures do not abort the import; they are joined
    /// into `error_message`.
    pub async fn import_data(&self, params: &[String]) -> Result<ImportResult> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mapping = &self.config.mapping;
        let schema = self.config.schema()?;

        let (etl_condition, etl_params) = self.bind_etl_condition(params)?;
        let pk_field = clean_column(&mapping.primary_key);
        let pk_column = schema
            .select_field(&mapping.primary_key)
            .and_then(|f| f.column())
            .map(|c| clean_column(&c.qualified()))
            .ok_or_else(|| {
                SyncError::schema(format!("Primary key field {} has no source column", mapping.primary_key))
            })?;

        let types = self
            .field_types
            .get(self.store.as_ref(), &mapping.index, &mapping.doc_type)
            .await?;
        let imported = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let logical = schema.main_table()?.table_name.clone();
        let tables = if mapping.tables.is_empty() {
            vec![logical.clone()]
        } else {
            mapping.tables.clone()
        };

        info!(
            "Import {}: index {} from {} table(s), {} workers, page size {}",
            run_id,
            mapping.index,
            tables.len(),
            self.options.worker_count(),
            self.options.page_size
        );

        for table in &tables {
            let base_sql = if table.eq_ignore_ascii_case(&logical) {
                mapping.sql.clone()
            } else {
                replace_table(&mapping.sql, &logical, table)
            };

            let filtered = match &etl_condition {
                Some(condition) => inject_condition(&base_sql, condition),
                None => base_sql.clone(),
            };
            let Some(min) = self.key_bound(&filtered, &etl_params, &pk_column, &pk_field, "ASC").await? else {
                info!("Import {}: table {} has no rows", run_id, table);
                continue;
            };
            let Some(max) = self.key_bound(&filtered, &etl_params, &pk_column, &pk_field, "DESC").await? else {
                continue;
            };

            let mut range = format!("{} BETWEEN ? AND ?", pk_column);
            if let Some(condition) = &etl_condition {
                range.push_str(&format!(" AND ({})", condition));
            }
            let range_sql = format!("{} ORDER BY {} ASC", inject_condition(&base_sql, &range), pk_column);

            let shards = partition(min, max, self.options.worker_count());
            info!(
                "Import {}: table {} ids [{}, {}] in {} shards",
                run_id,
                table,
                min,
                max,
                shards.len()
            );

            let worker = ShardWorker {
                config: self.config.clone(),
                data_source: self.data_source.clone(),
                store: self.store.clone(),
                alerts: self.alerts.clone(),
                types: types.clone(),
                retry: self.options.retry.clone(),
                page_size: self.options.page_size,
                range_sql: Arc::from(range_sql),
                etl_params: Arc::new(etl_params.clone()),
                imported: imported.clone(),
                errors: errors.clone(),
            };

            let tasks: Vec<_> = shards
                .iter()
                .map(|shard| {
                    let worker = worker.clone();
                    let shard = *shard;
                    tokio::spawn(async move { worker.run(shard).await })
                })
                .collect();

            for (shard, outcome) in shards.iter().zip(join_all(tasks).await) {
                let failure = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e,
                    Err(join_err) => SyncError::Worker(format!("shard [{}, {}]: {}", shard.start, shard.end, join_err)),
                };
                error!("Import {}: {}", run_id, failure);
                errors.lock().push(failure.to_string());
            }
        }

        let imported_count = imported.load(Ordering::Relaxed);
        let elapsed = started.elapsed().as_millis();
        let errors = std::mem::take(&mut *errors.lock());

        if errors.is_empty() {
            let message = format!(
                "Imported {} rows into index {} in {}ms",
                imported_count, mapping.index, elapsed
            );
            info!("Import {}: {}", run_id, message);
            return Ok(ImportResult {
                succeeded: true,
                imported_count,
                result_message: message,
                error_message: None,
            });
        }

        warn!(
            "Import {}: index {} finished with {} errors after {}ms",
            run_id,
            mapping.index,
            errors.len(),
            elapsed
        );
        Ok(ImportResult {
            succeeded: false,
            imported_count,
            result_message: format!(
                "Imported {} rows into index {} with errors",
                imported_count, mapping.index
            ),
            error_message: Some(errors.join("\n")),
        })
    }

    fn bind_etl_condition(&self, params: &[String]) -> Result<(Option<String>, Vec<Value>)> {
        let Some(condition) = self.config.mapping.etl_condition.as_deref() else {
            return Ok((None, Vec::new()));
        };
        let condition = strip_leading_joiner(condition);
        if condition.is_empty() {
            return Ok((None, Vec::new()));
        }

        let (bound, count) = bind_placeholders(condition);
        if params.len() < count {
            return Err(SyncError::config(format!(
                "ETL condition of index {} takes {} params, got {}",
                self.config.mapping.index,
                count,
                params.len()
            )));
        }
        let values = params[..count].iter().cloned().map(Value::String).collect();
        Ok((Some(bound), values))
    }

    /// Lowest (`ASC`) or highest (`DESC`) primary key
    async fn key_bound(
        &self,
        sql: &str,
        params: &[Value],
        pk_column: &str,
        pk_field: &str,
        direction: &str,
    ) -> Result<Option<i64>> {
        let bound_sql = format!("{} ORDER BY {} {} LIMIT 1", sql, pk_column, direction);
        let rows = self
            .data_source
            .query(&bound_sql, params)
            .await
            .map_err(|e| SyncError::requery(bound_sql.as_str(), e))?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let value = row.get(pk_field).cloned().unwrap_or(Value::Null);
        let id = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| {
                SyncError::config(format!("Primary key {} is not an integer: {}", pk_field, value))
            })?;
        Ok(Some(id))
    }
}

/// State shared by every shard task of one table
#[derive(Clone)]
struct ShardWorker {
    config: Arc<SyncConfig>,
    data_source: Arc<dyn DataSource>,
    store: Arc<dyn IndexStore>,
    alerts: Arc<dyn AlertSink>,
    types: Arc<FieldTypes>,
    retry: RetryPolicy,
    page_size: i64,
    range_sql: Arc<str>,
    etl_params: Arc<Vec<Value>>,
    imported: Arc<AtomicU64>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl ShardWorker {
    async fn run(self, shard: Shard) -> Result<()> {
        let mapping = &self.config.mapping;
        let mut writer = DocumentWriter::new(self.store.clone(), mapping.commit_batch_size);

        for page in shard.pages(self.page_size) {
            let mut failed_attempts = 0u32;
            loop {
                match self.import_page(&mut writer, page).await {
                    Ok(count) => {
                        self.imported.fetch_add(count, Ordering::Relaxed);
                        break;
                    }
                    Err(e) => {
                        failed_attempts += 1;
                        writer.discard();
                        let failure = SyncError::BackfillPage {
                            from: page.start,
                            to: page.end,
                            message: e.to_string(),
                        };
                        error!(
                            "Index {}: {} (attempt {})",
                            mapping.index, failure, failed_attempts
                        );
                        if self.config.env.is_online() {
                            let message = format!("Import of index {} failed: {}", mapping.index, failure);
                            if let Err(alert_err) = self.alerts.send_alert(&message).await {
                                warn!("Alert not delivered: {}", alert_err);
                            }
                        }
                        if !self.retry.should_retry(failed_attempts) {
                            self.errors.lock().push(failure.to_string());
                            break;
                        }
                        tokio::time::sleep(self.retry.backoff()).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Import one page and commit it, returning the rows written
    async fn import_page(&self, writer: &mut DocumentWriter, page: Shard) -> Result<u64> {
        let started = Instant::now();
        let mapping = &self.config.mapping;
        let schema = self.config.schema()?;

        let mut params = vec![Value::from(page.start), Value::from(page.end)];
        params.extend(self.etl_params.iter().cloned());
        let rows = self
            .data_source
            .query(&self.range_sql, &params)
            .await
            .map_err(|e| SyncError::requery(&*self.range_sql, e))?;

        let resolver = FieldValueResolver::new(mapping, &self.types);
        let mut imported = 0u64;
        for row in &rows {
            let draft = resolver.document_from_row(schema, row);
            if let Err(e) = draft.document_id() {
                warn!("Index {}: row skipped, {}", mapping.index, e);
                continue;
            }
            if writer.insert(mapping, draft).await? > 0 {
                imported += 1;
            }
        }

        let bulk_started = Instant::now();
        writer.commit().await?;

        if !rows.is_empty() {
            info!(
                "Batch elapsed {}ms, bulk elapsed {}ms, size {}, index {}, first id {}, last id {}",
                started.elapsed().as_millis(),
                bulk_started.elapsed().as_millis(),
                rows.len(),
                mapping.index,
                first_id(&rows, &resolver, true),
                first_id(&rows, &resolver, false)
            );
        }
        Ok(imported)
    }
}

fn first_id(rows: &[Row], resolver: &FieldValueResolver<'_>, from_start: bool) -> Value {
    let row = if from_start { rows.first() } else { rows.last() };
    row.map(|r| resolver.id_from_row(r)).unwrap_or(Value::Null)
}
