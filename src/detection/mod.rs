//! Detection stages: declarative rules and anomaly scoring.

pub mod anomaly;
pub mod rules;

pub use anomaly::{AnomalyScorer, AnomalyVerdict};
pub use rules::RuleEngine;
