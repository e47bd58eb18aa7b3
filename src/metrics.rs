//! Pipeline counters exposed as a JSON snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-scoped counters, shared by handlers and the worker loop.
#[derive(Debug)]
pub struct PipelineMetrics {
    start_time: Instant,
    pub queued: AtomicU64,
    pub processed: AtomicU64,
    pub indexed: AtomicU64,
    pub alerts: AtomicU64,
    pub incidents: AtomicU64,
    pub blocked: AtomicU64,
    pub errors: AtomicU64,
    pub dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub queued: u64,
    pub processed: u64,
    pub indexed: u64,
    pub alerts: u64,
    pub incidents: u64,
    pub blocked: u64,
    pub errors: u64,
    pub dead_lettered: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        PipelineMetrics {
            start_time: Instant::now(),
            queued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
            incidents: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            queued: self.queued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            incidents: self.incidents.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
