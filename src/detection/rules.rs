//! Rule-based detection over a closed, declaratively configured rule set.
//!
//! Rules are evaluated in declared order; every rule that matches appends an
//! alert and votes on severity (max wins). Stateful rules keep their counters
//! and sets in the state store, keyed by IP or user, so any worker can
//! evaluate any event.

use crate::config::RuleSet;
use crate::error::Result;
use crate::models::{LogEvent, Severity};
use crate::store::StateStore;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub struct RuleEngine {
    store: Arc<dyn StateStore>,
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn StateStore>, rules: RuleSet) -> Self {
        RuleEngine { store, rules }
    }

    /// Evaluate all enabled rules; returns the alerts and the maximum
    /// severity any of them voted for.
    pub async fn check(&self, event: &LogEvent) -> Result<(Vec<String>, Severity)> {
        let mut alerts = Vec::new();
        let mut max_severity = Severity::Info;

        let ip = event.effective_ip();
        let user = event.user.clone().or_else(|| {
            event
                .metadata
                .get("user")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        });

        // 1. SSH brute force: windowed counter per source IP.
        let rule = &self.rules.ssh_brute_force;
        if rule.enabled {
            if let (Some(ip), Some("ssh_login_failed")) = (&ip, event.event_type.as_deref()) {
                let key = format!("risk:brute:{}", ip);
                let count = self.store.incr(&key).await?;
                if count == 1 {
                    self.store.expire(&key, rule.window_seconds).await?;
                }
                if count as u64 >= rule.threshold {
                    alerts.push(format!(
                        "SSH Brute Force Detected from {} ({} failures)",
                        ip, count
                    ));
                    max_severity = max_severity.max(parse_severity(&rule.severity, Severity::High));
                }
            }
        }

        // 2. Sudo usage anywhere in the message.
        let rule = &self.rules.sudo_usage;
        if rule.enabled {
            let msg = event.message.to_lowercase();
            if msg.contains("sudo") && !msg.contains("command not found") {
                alerts.push("Suspicious Sudo Command Detection".to_string());
                max_severity = max_severity.max(parse_severity(&rule.severity, Severity::Medium));
            }
        }

        // 3. Admin login from an IP never seen for that user.
        let rule = &self.rules.suspicious_admin;
        if rule.enabled {
            if let (Some(user), Some(ip)) = (&user, &ip) {
                if rule.admin_users.iter().any(|u| u == user) {
                    let known_key = format!("state:admin_ips:{}", user);
                    if !self.store.sismember(&known_key, ip).await? {
                        alerts.push(format!(
                            "Suspicious Admin Login (New IP): User {} from {}",
                            user, ip
                        ));
                        max_severity =
                            max_severity.max(parse_severity(&rule.severity, Severity::Critical));
                        // Learn the IP so the next login from it is quiet.
                        self.store.sadd(&known_key, ip).await?;
                    }
                }
            }
        }

        if !alerts.is_empty() {
            debug!("Rules fired {} alert(s), max severity {}", alerts.len(), max_severity);
        }
        Ok((alerts, max_severity))
    }
}

fn parse_severity(value: &str, fallback: Severity) -> Severity {
    Severity::from_str(value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::store::MemoryStateStore;
    use serde_json::json;

    fn engine() -> RuleEngine {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        RuleEngine::new(store, RulesConfig::default().rules)
    }

    fn failed_login(ip: &str) -> LogEvent {
        let mut event = LogEvent::new(
            "ssh",
            &format!("Failed password for invalid user hacker from {} port 22 ssh2", ip),
        );
        event.ip = Some(ip.to_string());
        event.user = Some("hacker".to_string());
        event.event_type = Some("ssh_login_failed".to_string());
        event
    }

    #[tokio::test]
    async fn test_brute_force_fires_at_exact_threshold() {
        let engine = engine();
        let event = failed_login("192.168.100.1");

        // Default threshold is 5: four failures stay quiet.
        for _ in 0..4 {
            let (alerts, severity) = engine.check(&event).await.unwrap();
            assert!(alerts.is_empty());
            assert_eq!(severity, Severity::Info);
        }

        // The fifth fires.
        let (alerts, severity) = engine.check(&event).await.unwrap();
        assert_eq!(
            alerts,
            vec!["SSH Brute Force Detected from 192.168.100.1 (5 failures)"]
        );
        assert_eq!(severity, Severity::High);

        // And keeps firing above the threshold.
        let (alerts, _) = engine.check(&event).await.unwrap();
        assert_eq!(
            alerts,
            vec!["SSH Brute Force Detected from 192.168.100.1 (6 failures)"]
        );
    }

    #[tokio::test]
    async fn test_brute_force_counters_are_per_ip() {
        let engine = engine();
        for _ in 0..4 {
            engine.check(&failed_login("10.1.1.1")).await.unwrap();
        }
        // A different IP starts from zero.
        let (alerts, _) = engine.check(&failed_login("10.2.2.2")).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_sudo_rule() {
        let engine = engine();
        let event = LogEvent::new("ssh", "sudo: root : TTY=pts/0 ; COMMAND=/bin/bash");
        let (alerts, severity) = engine.check(&event).await.unwrap();
        assert_eq!(alerts, vec!["Suspicious Sudo Command Detection"]);
        assert_eq!(severity, Severity::Medium);

        // Typos do not count.
        let event = LogEvent::new("ssh", "bash: sudo: command not found");
        let (alerts, _) = engine.check(&event).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_suspicious_admin_learns_ips() {
        let engine = engine();
        let mut event = LogEvent::new(
            "ssh",
            "Accepted password for admin from 192.168.100.66 port 22 ssh2",
        );
        event.ip = Some("192.168.100.66".to_string());
        event.user = Some("admin".to_string());
        event.event_type = Some("ssh_login_success".to_string());

        let (alerts, severity) = engine.check(&event).await.unwrap();
        assert_eq!(
            alerts,
            vec!["Suspicious Admin Login (New IP): User admin from 192.168.100.66"]
        );
        assert_eq!(severity, Severity::Critical);

        // Second login from the now-known IP is quiet.
        let (alerts, severity) = engine.check(&event).await.unwrap();
        assert!(alerts.is_empty());
        assert_eq!(severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_non_admin_user_is_ignored() {
        let engine = engine();
        let mut event = LogEvent::new("ssh", "Accepted password for alice from 1.2.3.4 port 22 ssh2");
        event.ip = Some("1.2.3.4".to_string());
        event.user = Some("alice".to_string());
        let (alerts, _) = engine.check(&event).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_user_from_metadata_counts() {
        let engine = engine();
        let mut event = LogEvent::new("ssh", "Accepted password for root from 5.6.7.8 port 22 ssh2");
        event.metadata.insert("ip".to_string(), json!("5.6.7.8"));
        event.metadata.insert("user".to_string(), json!("root"));
        let (alerts, _) = engine.check(&event).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("User root from 5.6.7.8"));
    }

    #[tokio::test]
    async fn test_disabled_rules_are_skipped() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut rules = RulesConfig::default().rules;
        rules.ssh_brute_force.enabled = false;
        rules.sudo_usage.enabled = false;
        rules.suspicious_admin.enabled = false;
        let engine = RuleEngine::new(store, rules);

        let mut event = failed_login("192.168.100.1");
        event.message.push_str(" sudo su -");
        for _ in 0..10 {
            let (alerts, severity) = engine.check(&event).await.unwrap();
            assert!(alerts.is_empty());
            assert_eq!(severity, Severity::Info);
        }
    }

    #[tokio::test]
    async fn test_multiple_rules_vote_max_severity() {
        let engine = engine();
        let mut event = LogEvent::new(
            "ssh",
            "Accepted password for root from 7.7.7.7 port 22 ssh2; sudo -l",
        );
        event.ip = Some("7.7.7.7".to_string());
        event.user = Some("root".to_string());

        let (alerts, severity) = engine.check(&event).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(severity, Severity::Critical);
    }
}
