//! Mapping and data source registries
//!
//! Both are loaded once at startup and read-only afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use searchsync_storage::DataSource;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Sync configs keyed by mapping name
#[derive(Clone, Default)]
pub struct MappingRegistry {
    configs: BTreeMap<String, Arc<SyncConfig>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `config` under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, config: SyncConfig) -> Result<()> {
        config.validate()?;
        let name = name.into();
        info!(
            "Registered mapping {}: index {}, destination {}",
            name, config.mapping.index, config.destination
        );
        self.configs.insert(name, Arc::new(config));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SyncConfig>> {
        self.configs.get(name).cloned()
    }

    /// Every mapping of `destination` whose query reads `table`
    pub fn configs_for(&self, destination: &str, table: &str) -> Vec<Arc<SyncConfig>> {
        self.configs
            .values()
            .filter(|config| config.destination == destination)
            .filter(|config| {
                config
                    .schema
                    .as_ref()
                    .is_some_and(|schema| schema.references_table(table))
            })
            .cloned()
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Relational sources keyed by `data_source_key`
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, source: Arc<dyn DataSource>) {
        self.sources.insert(key.into(), source);
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn DataSource>> {
        self.sources
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::config(format!("No data source registered for key {}", key)))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
