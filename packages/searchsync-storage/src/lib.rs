//! searchsync-storage: collaborator boundary of the search index sync engine
//!
//! The engine never talks to a database driver or a search cluster directly.
//! It consumes three ports defined here:
//!
//! 1. **DataSource**: parametrised SQL against the relational source
//! 2. **IndexStore**: bulk document writes, term search, field mappings
//! 3. **AlertSink**: operational alerts (delay, failure, empty requery)
//!
//! ## Adapters
//!
//! - `SqliteDataSource` (feature `sqlite`)
//! - `MemoryIndexStore`
//! - `TracingAlertSink`, `RecordingAlertSink`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use searchsync_storage::{DataSource, IndexStore, MemoryIndexStore, SqliteDataSource};
//!
//! let db = SqliteDataSource::in_memory()?;
//! db.execute_batch("CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//! let store = MemoryIndexStore::new();
//! store.set_field_mapping("users", "_doc", json!({"name": {"type": "keyword"}}));
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    scalar_to_string, AlertSink, BulkItemResult, DataSource, IndexMutation, IndexStore,
    ItemStatus, MutationKind, Row, Value,
};

pub use infrastructure::{MemoryIndexStore, RecordingAlertSink, StoredDocument, TracingAlertSink};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteDataSource;
