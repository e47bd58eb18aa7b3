//! Anomaly scoring with a pre-trained isolation forest.
//!
//! The model is trained offline and shipped as a JSON artifact holding the
//! trees together with the feature baselines, so scorer and trainer stay in
//! sync. A missing artifact disables scoring rather than failing startup.

use crate::error::Result;
use crate::models::LogEvent;
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const FEATURE_LABELS: [&str; 4] = [
    "Time of Day",
    "Message Size",
    "Protocol",
    "Request Frequency",
];

fn default_means() -> Vec<f64> {
    vec![14.0, 60.0, 0.0, 5.0]
}

fn default_stds() -> Vec<f64> {
    vec![4.0, 20.0, 1.0, 5.0]
}

/// One node of an isolation tree. `left < 0` marks a leaf; `size` is the
/// number of training samples that reached the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

impl IsolationTree {
    /// Path length from the root to the leaf isolating `features`, with the
    /// standard correction for unsplit leaf populations.
    fn path_length(&self, features: &[f64; 4]) -> f64 {
        let mut index = 0usize;
        let mut depth = 0.0;
        loop {
            let node = match self.nodes.get(index) {
                Some(node) => node,
                None => return depth,
            };
            if node.left < 0 {
                return depth + average_path_length(node.size);
            }
            index = if features[node.feature] < node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
            depth += 1.0;
        }
    }
}

/// Serialized model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub trees: Vec<IsolationTree>,
    pub max_samples: usize,
    #[serde(default = "default_means")]
    pub means: Vec<f64>,
    #[serde(default = "default_stds")]
    pub stds: Vec<f64>,
}

/// Expected path length of an unsuccessful BST search among `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            // Euler-Mascheroni constant.
            const GAMMA: f64 = 0.577_215_664_901_532_9;
            let m = (n - 1) as f64;
            2.0 * (m.ln() + GAMMA) - 2.0 * m / n as f64
        }
    }
}

impl ModelArtifact {
    /// Signed decision value in the sklearn convention: negative values are
    /// anomalous, positive values normal.
    pub fn decision(&self, features: &[f64; 4]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(features))
            .sum();
        let mean_depth = total / self.trees.len() as f64;
        let denominator = average_path_length(self.max_samples).max(f64::MIN_POSITIVE);
        0.5 - 2f64.powf(-mean_depth / denominator)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyVerdict {
    pub score: f64,
    pub explanation: String,
}

pub struct AnomalyScorer {
    store: Arc<dyn StateStore>,
    model: Option<ModelArtifact>,
}

impl AnomalyScorer {
    pub fn new(store: Arc<dyn StateStore>, model: Option<ModelArtifact>) -> Self {
        AnomalyScorer { store, model }
    }

    /// Load the artifact from disk; absence disables scoring.
    pub fn load(store: Arc<dyn StateStore>, path: &str) -> Self {
        let model = if Path::new(path).exists() {
            match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<ModelArtifact>(&content).map_err(|e| e.to_string())
                }) {
                Ok(artifact) => {
                    info!(
                        "Anomaly model loaded from {} ({} trees)",
                        path,
                        artifact.trees.len()
                    );
                    Some(artifact)
                }
                Err(e) => {
                    warn!("Failed to load anomaly model from {}: {}", path, e);
                    None
                }
            }
        } else {
            info!("No anomaly model at {}, ML scoring disabled", path);
            None
        };
        AnomalyScorer::new(store, model)
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Score an event: 0..1 with a one-sentence explanation.
    pub async fn score(&self, event: &LogEvent) -> Result<AnomalyVerdict> {
        let model = match &self.model {
            Some(model) => model,
            None => {
                return Ok(AnomalyVerdict {
                    score: 0.0,
                    explanation: "Model not loaded".to_string(),
                })
            }
        };

        let features = self.extract_features(event).await?;
        let decision = model.decision(&features);
        let score = if decision < 0.0 {
            (0.5 + 2.0 * decision.abs()).min(1.0)
        } else {
            (0.5 - 2.0 * decision).max(0.0)
        };
        let score = (score * 100.0).round() / 100.0;

        let explanation = if score > 0.6 {
            explain(&features, &model.means, &model.stds)
        } else {
            "Normal".to_string()
        };

        Ok(AnomalyVerdict { score, explanation })
    }

    async fn extract_features(&self, event: &LogEvent) -> Result<[f64; 4]> {
        let hour = event
            .timestamp
            .as_deref()
            .and_then(parse_hour)
            .unwrap_or(12) as f64;
        let msg_len = event.message.len() as f64;
        let is_ssh = if event.source == "ssh" { 1.0 } else { 0.0 };

        let login_rate = match event.effective_ip() {
            Some(ip) => self
                .store
                .get(&format!("rate_limit:{}", ip))
                .await?
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
            None => 0.0,
        };

        Ok([hour, msg_len, is_ssh, login_rate])
    }
}

fn parse_hour(timestamp: &str) -> Option<u32> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(timestamp) {
        use chrono::Timelike;
        return Some(parsed.hour());
    }
    // Loose fallback for bare ISO strings without an offset.
    let time_part = timestamp.split('T').nth(1)?;
    time_part.split(':').next()?.parse().ok()
}

/// Pick the feature with the largest normalized deviation from baseline.
fn explain(features: &[f64; 4], means: &[f64], stds: &[f64]) -> String {
    let mut best_index = 0;
    let mut best_deviation = f64::MIN;
    for i in 0..4 {
        let mean = means.get(i).copied().unwrap_or(0.0);
        let std = stds.get(i).copied().unwrap_or(1.0);
        let deviation = (features[i] - mean).abs() / (std + 0.1);
        if deviation > best_deviation {
            best_deviation = deviation;
            best_index = i;
        }
    }
    format!("Anomalous {} detected", FEATURE_LABELS[best_index])
}
