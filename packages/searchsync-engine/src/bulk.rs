//! Bulk commit buffer
//!
//! Accumulates mutations and sends them as one bulk request once the
//! threshold is reached or on `commit`. Per-item `NotFound` results are
//! benign (an update racing a delete) and only logged; any other item
//! failure fails the whole flush.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use searchsync_storage::{IndexMutation, IndexStore, ItemStatus};

use crate::config::DEFAULT_COMMIT_BATCH_SIZE;
use crate::error::{Result, SyncError};

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub succeeded: usize,
    pub not_found: usize,
    pub elapsed: Duration,
}

impl FlushReport {
    pub fn merge(&mut self, other: &FlushReport) {
        self.sent += other.sent;
        self.succeeded += other.succeeded;
        self.not_found += other.not_found;
        self.elapsed += other.elapsed;
    }
}

pub struct BulkBuffer {
    store: Arc<dyn IndexStore>,
    pending: Vec<IndexMutation>,
    threshold: usize,
}

impl BulkBuffer {
    pub fn new(store: Arc<dyn IndexStore>, threshold: usize) -> Self {
        Self {
            store,
            pending: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    pub fn with_default_threshold(store: Arc<dyn IndexStore>) -> Self {
        Self::new(store, DEFAULT_COMMIT_BATCH_SIZE)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Nothing buffered; flushes are awaited, so every sent batch is acknowledged
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Buffer a mutation, flushing once the threshold is reached
    pub async fn add(&mut self, mutation: IndexMutation) -> Result<Option<FlushReport>> {
        self.pending.push(mutation);
        if self.pending.len() >= self.threshold {
            return self.flush().await.map(Some);
        }
        Ok(None)
    }

    /// Drop buffered mutations without sending them, returning how many
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Send everything buffered regardless of the threshold
    pub async fn commit(&mut self) -> Result<FlushReport> {
        self.flush().await
    }

    /// Send the buffered mutations as one request.
    ///
    /// The batch leaves the buffer whether or not the request succeeds;
    /// redelivery of the originating change regenerates it.
    pub async fn flush(&mut self) -> Result<FlushReport> {
        if self.pending.is_empty() {
            return Ok(FlushReport::default());
        }

        let batch = std::mem::take(&mut self.pending);
        let started = Instant::now();
        let results = self.store.bulk(&batch).await?;

        let mut report = FlushReport {
            sent: batch.len(),
            elapsed: started.elapsed(),
            ..Default::default()
        };
        let mut failures = Vec::new();

        for result in &results {
            match &result.status {
                ItemStatus::Ok => report.succeeded += 1,
                ItemStatus::NotFound { .. } => {
                    report.not_found += 1;
                    if let Some(message) = result.failure_message() {
                        warn!("Bulk item skipped: {}", message);
                    }
                }
                ItemStatus::Failed { .. } => {
                    if let Some(message) = result.failure_message() {
                        failures.push(message);
                    }
                }
            }
        }

        if !failures.is_empty() {
            error!(
                "Bulk commit failed: {} of {} items rejected",
                failures.len(),
                batch.len()
            );
            return Err(SyncError::BulkCommit(failures.join("\n")));
        }

        debug!(
            "Bulk commit: {} items ({} not found) in {}ms",
            report.sent,
            report.not_found,
            report.elapsed.as_millis()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsync_storage::{MemoryIndexStore, MutationKind, Row};

    fn index(id: usize) -> IndexMutation {
        IndexMutation::index("users", "_doc", id.to_string(), Row::new())
    }

    fn update(id: &str) -> IndexMutation {
        IndexMutation::new(MutationKind::Update, "users", "_doc", Some(id.to_string()), Row::new())
    }

    #[tokio::test]
    async fn test_flush_at_threshold() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut buffer = BulkBuffer::new(store.clone(), 3);

        assert!(buffer.add(index(1)).await.unwrap().is_none());
        assert!(buffer.add(index(2)).await.unwrap().is_none());
        assert!(store.batch_sizes().is_empty());

        let report = buffer.add(index(3)).await.unwrap().unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.succeeded, 3);
        assert!(buffer.is_idle());
        assert_eq!(store.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn test_commit_below_threshold() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut buffer = BulkBuffer::with_default_threshold(store.clone());
        assert_eq!(buffer.threshold(), 1000);

        buffer.add(index(1)).await.unwrap();
        assert_eq!(buffer.len(), 1);

        let report = buffer.commit().await.unwrap();
        assert_eq!(report.sent, 1);
        assert!(buffer.is_empty());

        // Empty commit sends nothing
        assert_eq!(buffer.commit().await.unwrap(), FlushReport::default());
        assert_eq!(store.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_not_found_is_benign() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut buffer = BulkBuffer::new(store.clone(), 100);

        for id in 1..=4 {
            buffer.add(index(id)).await.unwrap();
        }
        buffer.add(update("missing")).await.unwrap();

        let report = buffer.commit().await.unwrap();
        assert_eq!(report.sent, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.not_found, 1);
        assert_eq!(store.document_count("users", "_doc"), 4);
    }

    #[tokio::test]
    async fn test_other_failure_is_hard() {
        let store = Arc::new(MemoryIndexStore::new());
        store.fail_item("3", 409, "version_conflict_engine_exception");
        let mut buffer = BulkBuffer::new(store.clone(), 100);

        for id in 1..=5 {
            buffer.add(index(id)).await.unwrap();
        }

        let err = buffer.commit().await.unwrap_err();
        match err {
            SyncError::BulkCommit(message) => assert!(message.contains("version_conflict")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let store = Arc::new(MemoryIndexStore::new());
        store.fail_next_bulk("connection reset");
        let mut buffer = BulkBuffer::new(store, 1);

        assert!(matches!(
            buffer.add(index(1)).await,
            Err(SyncError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_sends_nothing() {
        let store = Arc::new(MemoryIndexStore::new());
        let mut buffer = BulkBuffer::new(store.clone(), 10);
        buffer.add(index(1)).await.unwrap();
        buffer.add(index(2)).await.unwrap();

        assert_eq!(buffer.discard(), 2);
        assert_eq!(buffer.commit().await.unwrap().sent, 0);
        assert!(store.batch_sizes().is_empty());
    }

    #[test]
    fn test_report_merge() {
        let mut total = FlushReport::default();
        total.merge(&FlushReport {
            sent: 2,
            succeeded: 1,
            not_found: 1,
            elapsed: Duration::from_millis(3),
        });
        total.merge(&FlushReport {
            sent: 1,
            succeeded: 1,
            ..Default::default()
        });
        assert_eq!(total.sent, 3);
        assert_eq!(total.not_found, 1);
    }
}
