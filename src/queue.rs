//! Durable work queue over the state store's stream primitives.

use crate::error::Result;
use crate::models::LogEvent;
use crate::store::{PendingEntry, StateStore, StreamMessage};
use std::sync::Arc;

pub const STREAM_KEY: &str = "logs_stream";
pub const GROUP_NAME: &str = "ingest_group";
pub const DLQ_STREAM_KEY: &str = "logs_dlq";

/// Ordered event queue with one consumer group and acknowledgement.
pub struct EventQueue {
    store: Arc<dyn StateStore>,
}

impl EventQueue {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        EventQueue { store }
    }

    /// Append an event as a single-field `{"data": <json>}` entry.
    pub async fn push(&self, event: &LogEvent) -> Result<String> {
        let payload = serde_json::to_string(event)?;
        self.store
            .stream_add(STREAM_KEY, vec![("data".to_string(), payload)])
            .await
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn ensure_group(&self) -> Result<()> {
        self.store.group_create(STREAM_KEY, GROUP_NAME).await
    }

    pub async fn read(
        &self,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>> {
        self.store
            .group_read(STREAM_KEY, GROUP_NAME, consumer, count, block_ms)
            .await
    }

    pub async fn ack(&self, id: &str) -> Result<()> {
        self.store.ack(STREAM_KEY, GROUP_NAME, id).await
    }

    pub async fn pending(&self, count: usize) -> Result<Vec<PendingEntry>> {
        self.store.pending(STREAM_KEY, GROUP_NAME, count).await
    }

    pub async fn claim(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamMessage>> {
        self.store
            .claim(STREAM_KEY, GROUP_NAME, consumer, min_idle_ms, ids)
            .await
    }

    /// Move a poisoned payload to the dead-letter stream.
    pub async fn dead_letter(&self, source_id: &str, payload: &str, error: &str) -> Result<()> {
        self.store
            .stream_add(
                DLQ_STREAM_KEY,
                vec![
                    ("data".to_string(), payload.to_string()),
                    ("error".to_string(), error.to_string()),
                    ("source_id".to_string(), source_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}
