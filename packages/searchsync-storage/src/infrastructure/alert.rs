//! Alert sinks
//!
//! `TracingAlertSink` forwards alerts to the log; `RecordingAlertSink`
//! keeps them for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use crate::domain::AlertSink;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send_alert(&self, message: &str) -> Result<()> {
        warn!(target: "searchsync::alert", "{}", message);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send_alert(&self, message: &str) -> Result<()> {
        self.messages.lock().push(message.to_string());
        Ok(())
    }
}
