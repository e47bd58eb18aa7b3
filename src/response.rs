//! Automated response: risk scoring and timed blocklist publication.
//!
//! The blocklist is enforced upstream by the ingest gates; this module only
//! decides and publishes. Whitelisted networks never reach the block path.

use crate::config::ResponseConfig;
use crate::error::Result;
use crate::models::{LogEvent, ResponseAction, Severity};
use crate::store::StateStore;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

pub struct Responder {
    store: Arc<dyn StateStore>,
    whitelist: Vec<IpNetwork>,
    block_threshold: u32,
    block_duration_seconds: u64,
}

impl Responder {
    pub fn new(store: Arc<dyn StateStore>, config: &ResponseConfig) -> Self {
        let whitelist = config
            .whitelist
            .cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNetwork>() {
                Ok(network) => Some(network),
                Err(e) => {
                    warn!("Ignoring invalid whitelist CIDR {}: {}", cidr, e);
                    None
                }
            })
            .collect();
        Responder {
            store,
            whitelist,
            block_threshold: config.policy.block_threshold,
            block_duration_seconds: config.policy.block_duration_seconds,
        }
    }

    fn is_whitelisted(&self, ip: &str) -> bool {
        match ip.parse::<IpAddr>() {
            Ok(addr) => self.whitelist.iter().any(|network| network.contains(addr)),
            Err(_) => false,
        }
    }

    fn risk_score(event: &LogEvent) -> u32 {
        let mut score = match event.severity {
            Severity::Critical => 100,
            Severity::High => 70,
            Severity::Medium => 40,
            _ => 10,
        };
        if !event.incidents.is_empty() {
            score += 10;
        }
        score
    }

    /// Decide the response for a fully decorated event.
    pub async fn evaluate(&self, event: &LogEvent) -> Result<Option<ResponseAction>> {
        let ip = match event.effective_ip() {
            Some(ip) => ip,
            None => return Ok(None),
        };

        if self.is_whitelisted(&ip) {
            return Ok(Some(ResponseAction {
                action: "monitor".to_string(),
                score: Self::risk_score(event),
                reason: None,
            }));
        }

        let score = Self::risk_score(event);
        if score >= self.block_threshold {
            let key = format!("blocked:{}", ip);
            self.store
                .set_ex(
                    &key,
                    &format!("Risk Score: {}", score),
                    self.block_duration_seconds,
                )
                .await?;
            warn!(
                "Blocked {} for {}s (risk score {})",
                ip, self.block_duration_seconds, score
            );
            return Ok(Some(ResponseAction {
                action: "block".to_string(),
                score,
                reason: Some(format!(
                    "Risk Score {} >= Threshold {}",
                    score, self.block_threshold
                )),
            }));
        }

        Ok(Some(ResponseAction {
            action: "monitor".to_string(),
            score,
            reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseConfig;
    use crate::store::MemoryStateStore;

    fn responder_with(cidrs: Vec<&str>) -> (Responder, Arc<dyn StateStore>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut config = ResponseConfig::default();
        config.whitelist.cidrs = cidrs.into_iter().map(|s| s.to_string()).collect();
        (Responder::new(store.clone(), &config), store)
    }

    fn critical_event(ip: &str) -> LogEvent {
        let mut event = LogEvent::new("ssh", "Accepted password for admin");
        event.ip = Some(ip.to_string());
        event.severity = Severity::Critical;
        event
    }

    #[tokio::test]
    async fn test_critical_event_blocks() {
        let (responder, store) = responder_with(vec![]);
        let action = responder
            .evaluate(&critical_event("192.168.100.66"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(action.action, "block");
        assert_eq!(action.score, 100);
        assert!(action.reason.unwrap().contains("Risk Score 100"));

        let value = store.get("blocked:192.168.100.66").await.unwrap().unwrap();
        assert_eq!(value, "Risk Score: 100");
        let ttl = store.ttl("blocked:192.168.100.66").await.unwrap().unwrap();
        assert!(ttl <= 300);
    }

    #[tokio::test]
    async fn test_whitelisted_ip_is_never_blocked() {
        let (responder, store) = responder_with(vec!["10.0.0.0/8"]);
        let action = responder
            .evaluate(&critical_event("10.0.0.5"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(action.action, "monitor");
        assert!(!store.exists("blocked:10.0.0.5").await.unwrap());
    }

    #[tokio::test]
    async fn test_risk_scores_by_severity() {
        let (responder, store) = responder_with(vec![]);

        let mut event = LogEvent::new("nginx", "GET / HTTP/1.1");
        event.ip = Some("1.2.3.4".to_string());

        event.severity = Severity::Info;
        assert_eq!(responder.evaluate(&event).await.unwrap().unwrap().score, 10);
        event.severity = Severity::Medium;
        assert_eq!(responder.evaluate(&event).await.unwrap().unwrap().score, 40);
        event.severity = Severity::High;
        let action = responder.evaluate(&event).await.unwrap().unwrap();
        assert_eq!(action.score, 70);
        // 70 is below the default threshold of 80.
        assert_eq!(action.action, "monitor");
        assert!(!store.exists("blocked:1.2.3.4").await.unwrap());
    }

    #[tokio::test]
    async fn test_incident_bonus_crosses_threshold() {
        let (responder, store) = responder_with(vec![]);
        let mut event = LogEvent::new("ssh", "Accepted password");
        event.ip = Some("5.6.7.8".to_string());
        event.severity = Severity::High;
        event
            .incidents
            .push("Suspicious Login after Brute Force (5.6.7.8)".to_string());

        // 70 + 10 == threshold 80: fires.
        let action = responder.evaluate(&event).await.unwrap().unwrap();
        assert_eq!(action.action, "block");
        assert_eq!(action.score, 80);
        assert!(store.exists("blocked:5.6.7.8").await.unwrap());
    }

    #[tokio::test]
    async fn test_event_without_ip_is_noop() {
        let (responder, _) = responder_with(vec![]);
        let mut event = LogEvent::new("app", "something critical");
        event.severity = Severity::Critical;
        assert!(responder.evaluate(&event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_cidr_is_ignored() {
        let (responder, store) = responder_with(vec!["not-a-cidr", "192.168.0.0/16"]);
        // The valid CIDR still applies.
        let action = responder
            .evaluate(&critical_event("192.168.1.1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(action.action, "monitor");
        assert!(!store.exists("blocked:192.168.1.1").await.unwrap());
    }
}
