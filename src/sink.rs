//! Delivery of admitted request records to the persistence layer.

use crate::hooks::{EntityRef, HookResult};
use crate::request::RequestDetails;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Everything recorded for one admitted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRecord {
    pub details: RequestDetails,
    /// The authenticated user, as an entity of the configured user kind.
    pub user: Option<EntityRef>,
    /// Metadata hook results in registration order.
    pub meta: Vec<HookResult>,
    /// Relation hook results in registration order.
    pub relations: Vec<HookResult>,
}

/// Error from a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives admitted request records.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), SinkError>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}

/// Emits each record as a JSON `tracing` event.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), SinkError> {
        let payload = serde_json::to_string(record)?;
        info!(
            target: "server_analytics::record",
            ip = %record.details.ip,
            method = %record.details.method,
            path = %record.details.path,
            record = %payload,
            "Request recorded"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AnalyticsRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<AnalyticsRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalyticsSink for MemorySink {
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestDetailsConfig;
    use crate::request::InboundRequest;

    fn record() -> AnalyticsRecord {
        let request = InboundRequest::new("1.2.3.4", "GET", "/").with_user("7");
        AnalyticsRecord {
            details: RequestDetails::from_request(&request, &RequestDetailsConfig::default()),
            user: Some(EntityRef::new("user", "7")),
            meta: vec![HookResult::meta("k", "v")],
            relations: vec![],
        }
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.record(&record()).await.unwrap();
        sink.record(&record()).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[0], record());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_record() {
        assert!(TracingSink.record(&record()).await.is_ok());
        assert_eq!(TracingSink.name(), "tracing");
    }

    #[test]
    fn test_record_serializes() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["details"]["ip"], "1.2.3.4");
        assert_eq!(value["user"]["kind"], "user");
        assert_eq!(value["meta"][0]["key"], "k");
    }
}
