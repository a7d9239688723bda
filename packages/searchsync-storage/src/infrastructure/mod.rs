//! Infrastructure layer - collaborator adapters
//!
//! - `sqlite`: relational source (feature `sqlite`)
//! - `memory`: in-process index store
//! - `alert`: log-backed and recording alert sinks

pub mod alert;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use alert::{RecordingAlertSink, TracingAlertSink};
pub use memory::{MemoryIndexStore, StoredDocument};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDataSource;
