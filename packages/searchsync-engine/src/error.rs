use searchsync_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Mapping config missing: {0}")]
    ConfigMissing(String),

    #[error("Value resolution failed: {0}")]
    ValueResolution(String),

    #[error("Requery failed: {source}, sql: {sql}")]
    Requery {
        sql: String,
        #[source]
        source: StorageError,
    },

    #[error("Bulk commit failed: {0}")]
    BulkCommit(String),

    #[error("Backfill page [{from}, {to}] failed: {message}")]
    BackfillPage { from: i64, to: i64, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl SyncError {
    pub fn requery(sql: impl Into<String>, source: StorageError) -> Self {
        Self::Requery {
            sql: sql.into(),
            source,
        }
    }

    pub fn schema<E: std::fmt::Display>(e: E) -> Self {
        Self::Schema(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Row-level problems: the row is skipped, the sync call continues
    pub fn is_row_level(&self) -> bool {
        matches!(self, SyncError::ValueResolution(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::ConfigMissing(_) | SyncError::ValueResolution(_) => ErrorCategory::Skipped,
            SyncError::BackfillPage { .. } => ErrorCategory::Retryable,
            SyncError::Storage(e) if e.kind.is_source_side() => ErrorCategory::Retryable,
            _ => ErrorCategory::Fatal,
        }
    }
}

/// How the caller is expected to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Logged and skipped; the rest of the call proceeds
    Skipped,
    /// Retried in place with backoff
    Retryable,
    /// Aborts the call; redelivery is up to the caller
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Skipped => "skipped",
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
