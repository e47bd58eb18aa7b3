//! Event envelope and enrichment data models.
//!
//! A [`LogEvent`] is created by the ingest API, mutated in place by the worker
//! stages, and persisted once. Unknown wire fields are preserved through the
//! flattened `extra` map so a round-trip through the index keeps everything
//! the submitter sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Escalating severity scale shared by rules, correlation, and response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric weight used for risk scoring and comparisons.
    pub fn score(self) -> u32 {
        match self {
            Severity::Info => 10,
            Severity::Low => 20,
            Severity::Medium => 30,
            Severity::High => 40,
            Severity::Critical => 50,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Geolocation attached by the enricher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
}

/// Reputation data attached by the enricher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntel {
    pub abuse_score: u32,
    pub is_tor: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
}

/// Parsed user-agent details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UaDetails {
    pub browser: String,
    pub os: String,
    pub device: String,
}

/// Automated response decision attached by the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action: String,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn default_level() -> String {
    "INFO".to_string()
}

/// The mutable event envelope that flows through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub source: String,
    #[serde(default = "default_level")]
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,

    // Fields added by normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    // Fields added by enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_intel: Option<ThreatIntel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua_details: Option<UaDetails>,

    // Detection outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_anomaly: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incidents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_action: Option<ResponseAction>,

    /// Passthrough keys preserved verbatim from the wire form.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEvent {
    /// Build a minimal event; used by the raw-ingest wrapper and tests.
    pub fn new(source: &str, message: &str) -> Self {
        LogEvent {
            source: source.to_string(),
            level: default_level(),
            message: message.to_string(),
            timestamp: None,
            metadata: Map::new(),
            ip: None,
            user: None,
            event_type: None,
            status: None,
            bytes: None,
            user_agent: None,
            path: None,
            verb: None,
            dst: None,
            proto: None,
            action: None,
            geo: None,
            threat_intel: None,
            ua_details: None,
            alerts: Vec::new(),
            severity: Severity::Info,
            anomaly_score: None,
            anomaly_explanation: None,
            ml_anomaly: None,
            incidents: Vec::new(),
            response_action: None,
            extra: Map::new(),
        }
    }

    /// The event's effective source IP: top-level `ip`, else `metadata.ip`.
    pub fn effective_ip(&self) -> Option<String> {
        if let Some(ip) = &self.ip {
            return Some(ip.clone());
        }
        self.metadata
            .get("ip")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Back-fill the top-level `ip` from metadata so every later stage
    /// resolves the same address.
    pub fn resolve_ip(&mut self) {
        if self.ip.is_none() {
            if let Some(ip) = self
                .metadata
                .get("ip")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
            {
                self.ip = Some(ip);
            }
        }
    }

    /// Effective user-agent: top-level field, else `metadata.user_agent`.
    pub fn effective_user_agent(&self) -> Option<String> {
        if let Some(ua) = &self.user_agent {
            return Some(ua.clone());
        }
        self.metadata
            .get("user_agent")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Merge normalizer output at the top level. Existing fields win; keys
    /// without a typed slot land in `extra`.
    pub fn merge_extracted(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            match key.as_str() {
                "ip" => Self::fill_str(&mut self.ip, value),
                "user" => Self::fill_str(&mut self.user, value),
                "event_type" => Self::fill_str(&mut self.event_type, value),
                "user_agent" => Self::fill_str(&mut self.user_agent, value),
                "path" => Self::fill_str(&mut self.path, value),
                "verb" => Self::fill_str(&mut self.verb, value),
                "dst" => Self::fill_str(&mut self.dst, value),
                "proto" => Self::fill_str(&mut self.proto, value),
                "action" => Self::fill_str(&mut self.action, value),
                "status" => Self::fill_u64(&mut self.status, value),
                "bytes" => Self::fill_u64(&mut self.bytes, value),
                // `source` is required on the wire, so it always wins.
                "source" => {}
                _ => {
                    self.extra.entry(key).or_insert(value);
                }
            }
        }
    }

    /// Escalate severity; it never moves downward.
    pub fn escalate(&mut self, severity: Severity) {
        if severity > self.severity {
            self.severity = severity;
        }
    }

    fn fill_str(slot: &mut Option<String>, value: Value) {
        if slot.is_none() {
            if let Some(s) = value.as_str() {
                *slot = Some(s.to_string());
            }
        }
    }

    fn fill_u64(slot: &mut Option<u64>, value: Value) {
        if slot.is_none() {
            if let Some(n) = value.as_u64() {
                *slot = Some(n);
            }
        }
    }
}

/// Wire form accepted by `POST /ingest/logs`: one event or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LogsPayload {
    One(Box<LogEvent>),
    Many(Vec<LogEvent>),
}

impl LogsPayload {
    pub fn into_vec(self) -> Vec<LogEvent> {
        match self {
            LogsPayload::One(event) => vec![*event],
            LogsPayload::Many(events) => events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
        assert_eq!(Severity::Critical.score(), 50);
        assert_eq!(Severity::Info.score(), 10);
    }

    #[test]
    fn test_escalate_is_monotonic() {
        let mut event = LogEvent::new("ssh", "test");
        event.escalate(Severity::High);
        assert_eq!(event.severity, Severity::High);
        event.escalate(Severity::Low);
        assert_eq!(event.severity, Severity::High);
        event.escalate(Severity::Critical);
        assert_eq!(event.severity, Severity::Critical);
    }

    #[test]
    fn test_effective_ip_precedence() {
        let mut event = LogEvent::new("ssh", "test");
        assert_eq!(event.effective_ip(), None);

        event
            .metadata
            .insert("ip".to_string(), json!("10.0.0.1"));
        assert_eq!(event.effective_ip().as_deref(), Some("10.0.0.1"));

        event.ip = Some("192.168.1.1".to_string());
        assert_eq!(event.effective_ip().as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn test_resolve_ip_backfills_from_metadata() {
        let mut event = LogEvent::new("ssh", "test");
        event
            .metadata
            .insert("ip".to_string(), json!("203.0.113.9"));
        event.resolve_ip();
        assert_eq!(event.ip.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_merge_is_non_destructive() {
        let mut event = LogEvent::new("ssh", "test");
        event.ip = Some("1.1.1.1".to_string());

        let mut fields = Map::new();
        fields.insert("ip".to_string(), json!("2.2.2.2"));
        fields.insert("user".to_string(), json!("root"));
        fields.insert("status".to_string(), json!(200));
        fields.insert("remote_user".to_string(), json!("-"));
        event.merge_extracted(fields);

        assert_eq!(event.ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(event.user.as_deref(), Some("root"));
        assert_eq!(event.status, Some(200));
        assert_eq!(event.extra.get("remote_user"), Some(&json!("-")));
    }

    #[test]
    fn test_wire_roundtrip_preserves_extras() {
        let raw = json!({
            "source": "nginx",
            "message": "GET / HTTP/1.1",
            "custom_tag": "edge-7",
            "metadata": {"host": "web-01"}
        });
        let event: LogEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.level, "INFO");
        assert_eq!(event.extra.get("custom_tag"), Some(&json!("edge-7")));

        let out = serde_json::to_value(&event).unwrap();
        assert_eq!(out.get("custom_tag"), Some(&json!("edge-7")));
    }

    #[test]
    fn test_logs_payload_accepts_single_and_batch() {
        let one: LogsPayload =
            serde_json::from_str(r#"{"source":"ssh","message":"x"}"#).unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: LogsPayload = serde_json::from_str(
            r#"[{"source":"ssh","message":"x"},{"source":"nginx","message":"y"}]"#,
        )
        .unwrap();
        assert_eq!(many.into_vec().len(), 2);
    }
}
