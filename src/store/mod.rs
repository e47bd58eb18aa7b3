//! Ephemeral state store abstraction.
//!
//! Everything stateful in the pipeline (rate-limit counters, brute-force
//! windows, correlation phase flags, the blocklist, and the work queue
//! stream) goes through [`StateStore`], so workers stay stateless and the
//! detection logic is a pure function of `(event, store)`.

mod memory;
mod redis_store;

pub use memory::MemoryStateStore;
pub use redis_store::RedisStateStore;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// One delivered stream entry.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Pending-entry metadata for a consumer group, used for redelivery.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    pub idle_ms: u64,
    pub deliveries: u64,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically increment an integer key, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a TTL in seconds on an existing key.
    async fn expire(&self, key: &str, seconds: u64) -> Result<()>;

    /// Set a string value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Remaining TTL in seconds, if the key exists and has one.
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    /// Add a member to a set; returns true if it was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// Append an entry to a stream with an auto-generated ID.
    async fn stream_add(&self, stream: &str, fields: Vec<(String, String)>) -> Result<String>;

    /// Create a consumer group; creating an existing group is not an error.
    async fn group_create(&self, stream: &str, group: &str) -> Result<()>;

    /// Read up to `count` never-delivered entries for a consumer, blocking up
    /// to `block_ms`.
    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    /// Inspect the group's pending entries (unacknowledged deliveries).
    async fn pending(&self, stream: &str, group: &str, count: usize)
        -> Result<Vec<PendingEntry>>;

    /// Take over pending entries idle for at least `min_idle_ms`.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamMessage>>;
}
