//! Aegis SIEM Detection Pipeline
//!
//! An asynchronous log-processing engine: structured and raw events enter
//! through an HTTP frontend, pass through a durable stream, and are processed
//! by stateless workers that normalize, enrich, detect, correlate, decide a
//! response, and persist.
//!
//! ```text
//! ingest API --> logs_stream --> worker: normalize -> enrich -> rules
//!     |   ^                          -> anomaly -> correlate -> respond
//!     |   |                          -> event index
//!     v   |
//!  state store (rate limits, blocklist, counters, phase flags)
//! ```
//!
//! All stateful detection keys live in the state store, keyed by IP or
//! (user, IP), so workers scale horizontally and any worker can advance any
//! attack chain.
//!
//! # Modules
//!
//! - [`config`] - environment settings and YAML rule/response policies
//! - [`models`] - the event envelope and severity scale
//! - [`store`] - state store abstraction (Redis and in-memory)
//! - [`queue`] - the durable work queue over the store's stream
//! - [`normalization`] - source-keyed raw message parsers
//! - [`enrichment`] - geolocation, IP reputation, user-agent details
//! - [`detection`] - declarative rules and anomaly scoring
//! - [`correlation`] - the three-phase attack state machine
//! - [`response`] - risk scoring and blocklist publication
//! - [`worker`] - the stream-consuming pipeline
//! - [`storage`] - the durable event index
//! - [`handlers`] / [`router`] - the HTTP surface
//! - [`metrics`] - pipeline counters
//! - [`error`] - error taxonomy and HTTP mapping

pub mod config;
pub mod correlation;
pub mod detection;
pub mod enrichment;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod normalization;
pub mod queue;
pub mod response;
pub mod router;
pub mod storage;
pub mod store;
pub mod worker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Prelude for the binary and tests.
pub mod prelude {
    pub use crate::config::{ResponseConfig, RulesConfig, Settings};
    pub use crate::correlation::Correlator;
    pub use crate::detection::{AnomalyScorer, RuleEngine};
    pub use crate::enrichment::Enricher;
    pub use crate::error::{PipelineError, Result};
    pub use crate::handlers::AppState;
    pub use crate::metrics::PipelineMetrics;
    pub use crate::models::{LogEvent, Severity};
    pub use crate::queue::EventQueue;
    pub use crate::response::Responder;
    pub use crate::router::build_router;
    pub use crate::storage::EventIndex;
    pub use crate::store::{MemoryStateStore, RedisStateStore, StateStore};
    pub use crate::worker::WorkerPipeline;
}
