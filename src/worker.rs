//! Stream-consuming worker: pulls event batches off the queue and runs the
//! full processing chain per event.
//!
//! Stage order: normalize -> enrich -> rules -> anomaly -> correlate ->
//! respond -> persist -> ack. Each event is isolated: a failing event is left
//! unacknowledged and picked up again from the group's pending list; after
//! too many deliveries it moves to the dead-letter stream instead of cycling
//! forever.

use crate::detection::{AnomalyScorer, RuleEngine};
use crate::correlation::Correlator;
use crate::enrichment::Enricher;
use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::models::{LogEvent, Severity};
use crate::normalization::Normalizer;
use crate::queue::EventQueue;
use crate::response::Responder;
use crate::storage::EventIndex;
use crate::store::StreamMessage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const BATCH_SIZE: usize = 10;
const BLOCK_MS: u64 = 2000;
const DEFAULT_MAX_DELIVERIES: u64 = 3;
const DEFAULT_CLAIM_IDLE_MS: u64 = 30_000;

pub struct WorkerPipeline {
    consumer: String,
    queue: Arc<EventQueue>,
    index: Arc<EventIndex>,
    normalizer: Normalizer,
    enricher: Arc<Enricher>,
    rules: RuleEngine,
    scorer: AnomalyScorer,
    correlator: Correlator,
    responder: Responder,
    metrics: Arc<PipelineMetrics>,
    max_deliveries: u64,
    claim_idle_ms: u64,
}

impl WorkerPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: String,
        queue: Arc<EventQueue>,
        index: Arc<EventIndex>,
        enricher: Arc<Enricher>,
        rules: RuleEngine,
        scorer: AnomalyScorer,
        correlator: Correlator,
        responder: Responder,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        WorkerPipeline {
            consumer,
            queue,
            index,
            normalizer: Normalizer::new(),
            enricher,
            rules,
            scorer,
            correlator,
            responder,
            metrics,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
        }
    }

    /// Override redelivery tuning (tests use a zero idle deadline).
    pub fn with_redelivery(mut self, max_deliveries: u64, claim_idle_ms: u64) -> Self {
        self.max_deliveries = max_deliveries;
        self.claim_idle_ms = claim_idle_ms;
        self
    }

    /// Run forever; fatal read errors back off for a second and retry.
    pub async fn run(&self) -> Result<()> {
        self.queue.ensure_group().await?;
        info!(
            "Worker {} listening on the ingest stream (batch {}, block {}ms)",
            self.consumer, BATCH_SIZE, BLOCK_MS
        );
        loop {
            if let Err(e) = self.poll_once().await {
                error!("Worker loop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// One read-process-ack cycle; returns how many events were processed
    /// successfully.
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self
            .queue
            .read(&self.consumer, BATCH_SIZE, BLOCK_MS)
            .await?;

        let mut processed = 0;
        for message in messages {
            match self.handle_message(&message).await {
                Ok(()) => {
                    self.queue.ack(&message.id).await?;
                    processed += 1;
                    PipelineMetrics::incr(&self.metrics.processed);
                }
                Err(e) => {
                    // Left pending: redelivered via the claim pass below.
                    PipelineMetrics::incr(&self.metrics.errors);
                    error!("Failed to process message {}: {}", message.id, e);
                }
            }
        }

        processed += self.reclaim_stale().await?;
        Ok(processed)
    }

    /// Re-drive pending messages whose consumer went quiet; dead-letter the
    /// ones that keep failing.
    async fn reclaim_stale(&self) -> Result<usize> {
        let pending = self.queue.pending(BATCH_SIZE * 10).await?;
        let mut processed = 0;

        for entry in pending {
            if entry.idle_ms < self.claim_idle_ms {
                continue;
            }
            let claimed = self
                .queue
                .claim(&self.consumer, self.claim_idle_ms, &[entry.id.clone()])
                .await?;
            for message in claimed {
                if entry.deliveries >= self.max_deliveries {
                    let payload = message
                        .fields
                        .get("data")
                        .cloned()
                        .unwrap_or_default();
                    warn!(
                        "Dead-lettering message {} after {} deliveries",
                        message.id, entry.deliveries
                    );
                    self.queue
                        .dead_letter(&message.id, &payload, "max deliveries exceeded")
                        .await?;
                    self.queue.ack(&message.id).await?;
                    PipelineMetrics::incr(&self.metrics.dead_lettered);
                    continue;
                }
                match self.handle_message(&message).await {
                    Ok(()) => {
                        self.queue.ack(&message.id).await?;
                        processed += 1;
                        PipelineMetrics::incr(&self.metrics.processed);
                    }
                    Err(e) => {
                        PipelineMetrics::incr(&self.metrics.errors);
                        error!(
                            "Redelivered message {} failed again (delivery {}): {}",
                            message.id,
                            entry.deliveries + 1,
                            e
                        );
                    }
                }
            }
        }
        Ok(processed)
    }

    async fn handle_message(&self, message: &StreamMessage) -> Result<()> {
        let raw = message
            .fields
            .get("data")
            .ok_or_else(|| PipelineError::queue("stream entry without data field"))?;
        let mut event: LogEvent = serde_json::from_str(raw)?;

        self.process_event(&mut event).await?;
        self.index.persist(&event).await?;
        PipelineMetrics::incr(&self.metrics.indexed);
        debug!(
            "Indexed event: {} - {}",
            event.timestamp.as_deref().unwrap_or("-"),
            event.message
        );
        Ok(())
    }

    /// Run the in-memory stages; persistence is the caller's last step.
    pub async fn process_event(&self, event: &mut LogEvent) -> Result<()> {
        // 1. Normalize and settle on one IP for all later stages.
        let extracted = self.normalizer.parse(&event.message, &event.source);
        if !extracted.is_empty() {
            event.merge_extracted(extracted);
        }
        event.resolve_ip();

        // 2. Enrich (best effort).
        self.enricher.enrich(event).await;

        // 3. Rule-based detection.
        let (alerts, severity) = self.rules.check(event).await?;
        if !alerts.is_empty() {
            PipelineMetrics::add(&self.metrics.alerts, alerts.len() as u64);
            event.alerts.extend(alerts);
            event.escalate(severity);
        }

        // 4. Anomaly scoring.
        let verdict = self.scorer.score(event).await?;
        event.anomaly_score = Some(verdict.score);
        event.anomaly_explanation = Some(verdict.explanation.clone());
        if verdict.score > 0.7 {
            event.ml_anomaly = Some(true);
            event
                .alerts
                .push(format!("ML Detection: {}", verdict.explanation));
            PipelineMetrics::incr(&self.metrics.alerts);
        }

        // 5. Correlation.
        let incidents = self.correlator.process(event).await?;
        if !incidents.is_empty() {
            PipelineMetrics::add(&self.metrics.incidents, incidents.len() as u64);
            event.incidents.extend(incidents);
            event.escalate(Severity::Critical);
        }

        // 6. Automated response.
        if let Some(action) = self.responder.evaluate(event).await? {
            if action.action == "block" {
                PipelineMetrics::incr(&self.metrics.blocked);
            }
            event.response_action = Some(action);
        }

        Ok(())
    }
}
