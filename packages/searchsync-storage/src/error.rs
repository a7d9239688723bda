//! Failures raised by the relational source and the index store

use std::fmt;
use thiserror::Error;

/// Which side of the sync pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Could not reach or open the relational source
    Database,
    /// A row or document could not be converted to/from JSON
    Serialization,
    /// Statement preparation, execution or row decoding failed
    Query,
    /// The search cluster rejected a request
    IndexStore,
    /// No field mapping is registered for an index/type pair
    MappingNotFound,
}

impl ErrorKind {
    /// Stable tag used in log lines and alert text
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Query => "query",
            ErrorKind::IndexStore => "index_store",
            ErrorKind::MappingNotFound => "mapping_not_found",
        }
    }

    /// Whether the failure came from the source database rather than the index
    pub fn is_source_side(&self) -> bool {
        matches!(self, ErrorKind::Database | ErrorKind::Query)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every [`crate::DataSource`] and [`crate::IndexStore`] call
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the driver error that caused this one
    pub fn with_source(self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Some(Box::new(cause)),
            ..self
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }

    pub fn index_store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexStore, message)
    }

    pub fn mapping_not_found(index: impl Into<String>) -> Self {
        let index = index.into();
        Self::new(
            ErrorKind::MappingNotFound,
            format!("index `{}` has no field mapping", index),
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        let message = format!("sqlite: {}", err);
        Self::database(message).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        let message = format!("json: {}", err);
        Self::serialization(message).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
