/*
 * Searchsync Engine - relational to search index synchronization
 *
 * Turns row-level change records into index mutations and repopulates
 * indexes from their defining query.
 *
 * Architecture:
 * - Strategy classification per (index, table), cached
 * - Field value resolution against declared index types
 * - Bulk commit buffer with not-found tolerance
 * - Sharded, paged backfill with per-page retry
 */

// Public modules
pub mod backfill;
pub mod bulk;
pub mod config;
pub mod error;
pub mod field_types;
pub mod logging;
pub mod mutation;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod sql;
pub mod strategy;
pub mod sync;
pub mod writer;

// Re-exports
pub use backfill::{partition, ImportResult, ImportService, Shard};
pub use bulk::{BulkBuffer, FlushReport};
pub use config::{
    BackfillOptions, Environment, MappingConfig, RelationMapping, RetryPolicy, SyncConfig,
};
pub use error::{ErrorCategory, Result, SyncError};
pub use field_types::{FieldTypeCache, FieldTypes};
pub use logging::init_tracing;
pub use mutation::{DocumentDraft, MutationBuilder};
pub use record::{ChangeRecord, Operation};
pub use registry::{DataSourceRegistry, MappingRegistry};
pub use resolver::FieldValueResolver;
pub use schema::{ColumnRef, RelationKey, SchemaGraph, SelectField, TableItem};
pub use strategy::{classify, Strategy, StrategyCache};
pub use sync::{SyncReport, SyncService};
pub use writer::DocumentWriter;
