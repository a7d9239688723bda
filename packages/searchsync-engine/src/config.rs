//! Sync configuration
//!
//! One `SyncConfig` per index mapping. The schema graph is produced by an
//! external SQL parser and attached with `SyncConfig::with_schema`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::schema::SchemaGraph;

pub const DEFAULT_COMMIT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: i64 = 10_000;
pub const DEFAULT_DELAY_THRESHOLD_MS: i64 = 1000;

/// Deployment environment; only `online` raises operational alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Online,
    #[default]
    Offline,
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Environment::parse(&tag))
    }
}

impl Environment {
    pub fn parse(tag: &str) -> Self {
        if tag.trim().eq_ignore_ascii_case("online") {
            Environment::Online
        } else {
            Environment::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Environment::Online)
    }
}

/// Parent/child declaration for one join field of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMapping {
    pub name: String,
    /// Select field holding the parent document id
    #[serde(default)]
    pub parent: Option<String>,
}

/// Per-index settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub index: String,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    /// Select field carrying the primary key of the main table
    pub primary_key: String,
    /// Select field used as document id; when absent documents are located
    /// by a term search on `primary_key`
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub routing_field: Option<String>,
    #[serde(default)]
    pub upsert: bool,
    #[serde(default)]
    pub skip_fields: BTreeSet<String>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationMapping>,
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,
    /// Defining query of the document
    pub sql: String,
    /// field → `object` | `array` | `array:<separator>`
    #[serde(default)]
    pub object_fields: BTreeMap<String, String>,
    /// Extra backfill filter, `{}` placeholders bound from import params
    #[serde(default)]
    pub etl_condition: Option<String>,
    /// Physical shards of the main table, scanned one by one on backfill
    #[serde(default)]
    pub tables: Vec<String>,
    /// Refreshed by an external timestamp job; incremental sync skips it
    #[serde(default)]
    pub sync_by_timestamp: bool,
}

fn default_doc_type() -> String {
    "_doc".to_string()
}

fn default_commit_batch_size() -> usize {
    DEFAULT_COMMIT_BATCH_SIZE
}

impl MappingConfig {
    pub fn new(index: impl Into<String>, primary_key: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: default_doc_type(),
            primary_key: primary_key.into(),
            id_field: None,
            routing_field: None,
            upsert: false,
            skip_fields: BTreeSet::new(),
            relations: BTreeMap::new(),
            commit_batch_size: DEFAULT_COMMIT_BATCH_SIZE,
            sql: sql.into(),
            object_fields: BTreeMap::new(),
            etl_condition: None,
            tables: Vec::new(),
            sync_by_timestamp: false,
        }
    }

    /// Field resolving the document identity (`id_field`, else `primary_key`)
    pub fn id_field_name(&self) -> &str {
        self.id_field.as_deref().unwrap_or(&self.primary_key)
    }

    pub fn is_id_field(&self, field: &str) -> bool {
        self.id_field.as_deref() == Some(field)
    }

    pub fn is_skipped(&self, field: &str) -> bool {
        self.skip_fields.contains(field)
    }

    pub fn routing(&self) -> Option<&str> {
        self.routing_field.as_deref().filter(|r| !r.trim().is_empty())
    }
}

/// Configuration of one destination → index mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub data_source_key: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub env: Environment,
    #[serde(default = "default_delay_threshold_ms")]
    pub delay_threshold_ms: i64,
    pub mapping: MappingConfig,
    #[serde(default)]
    pub schema: Option<SchemaGraph>,
}

fn default_delay_threshold_ms() -> i64 {
    DEFAULT_DELAY_THRESHOLD_MS
}

impl SyncConfig {
    pub fn new(data_source_key: impl Into<String>, mapping: MappingConfig) -> Self {
        Self {
            data_source_key: data_source_key.into(),
            destination: String::new(),
            env: Environment::default(),
            delay_threshold_ms: DEFAULT_DELAY_THRESHOLD_MS,
            mapping,
            schema: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_schema(mut self, schema: SchemaGraph) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn schema(&self) -> Result<&SchemaGraph> {
        self.schema.as_ref().ok_or_else(|| {
            SyncError::Schema(format!(
                "No schema graph attached to mapping of index {}",
                self.mapping.index
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        let mapping = &self.mapping;
        if mapping.index.trim().is_empty() {
            return Err(SyncError::config("Mapping index name is empty"));
        }
        if mapping.sql.trim().is_empty() {
            return Err(SyncError::config(format!(
                "Mapping of index {} has no sql",
                mapping.index
            )));
        }
        if mapping.commit_batch_size == 0 {
            return Err(SyncError::config(format!(
                "Mapping of index {} has commit_batch_size 0",
                mapping.index
            )));
        }
        for (field, kind) in &mapping.object_fields {
            if !matches!(kind.as_str(), "object" | "array") && !kind.starts_with("array:") {
                return Err(SyncError::config(format!(
                    "Unknown object field kind {} for field {}",
                    kind, field
                )));
            }
        }

        let schema = self.schema()?;
        schema.validate()?;

        let require = |field: &str, role: &str| -> Result<()> {
            if schema.select_field(field).is_none() {
                return Err(SyncError::config(format!(
                    "{} field {} of index {} is not in the select list",
                    role, field, mapping.index
                )));
            }
            Ok(())
        };

        require(&mapping.primary_key, "Primary key")?;
        if let Some(id) = &mapping.id_field {
            require(id, "Id")?;
        }
        if let Some(routing) = mapping.routing() {
            require(routing, "Routing")?;
        }
        for relation in mapping.relations.values() {
            if let Some(parent) = &relation.parent {
                require(parent, "Parent")?;
            }
        }
        Ok(())
    }
}

/// Retry behaviour of a failing backfill page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// `None` retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Whether another attempt follows `failed_attempts` failures
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| failed_attempts < max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOptions {
    /// Shard count; defaults to twice the available cores
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            workers: None,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl BackfillOptions {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| num_cpus::get() * 2).max(1)
    }
}
