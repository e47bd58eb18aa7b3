//! Multi-stage attack correlation.
//!
//! A three-phase state machine per source IP, held entirely in the state
//! store as TTL flags so any worker can advance any IP's chain:
//! brute force observed -> successful login -> privilege escalation.
//! The probes are independent; a single event may fire phase 2 and phase 3.

use crate::error::Result;
use crate::models::LogEvent;
use crate::store::StateStore;
use std::sync::Arc;
use tracing::warn;

/// Window to follow brute force with a successful login.
const PHASE_1_TTL: u64 = 300;
/// Window to escalate privileges after the suspicious login.
const PHASE_2_TTL: u64 = 300;

pub struct Correlator {
    store: Arc<dyn StateStore>,
}

impl Correlator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Correlator { store }
    }

    /// Advance the state machine for this event's IP; returns the newly
    /// detected incidents.
    pub async fn process(&self, event: &LogEvent) -> Result<Vec<String>> {
        let mut incidents = Vec::new();
        let ip = match event.effective_ip() {
            Some(ip) => ip,
            None => return Ok(incidents),
        };

        // Phase 1: the rule engine marks brute force via its alert string.
        let is_brute_force = event.alerts.iter().any(|a| a.contains("Brute Force"));
        if is_brute_force {
            let key = format!("risk:phase:1:{}", ip);
            self.store.set_ex(&key, "true", PHASE_1_TTL).await?;
        }

        // Phase 2: successful login while phase 1 is armed.
        if event.event_type.as_deref() == Some("ssh_login_success")
            && self.store.exists(&format!("risk:phase:1:{}", ip)).await?
        {
            let key = format!("risk:phase:2:{}", ip);
            self.store.set_ex(&key, "true", PHASE_2_TTL).await?;
            incidents.push(format!("Suspicious Login after Brute Force ({})", ip));
        }

        // Phase 3: sudo usage while phase 2 is armed.
        if event.message.to_lowercase().contains("sudo")
            && self.store.exists(&format!("risk:phase:2:{}", ip)).await?
        {
            incidents.push(format!(
                "CRITICAL: Privilege Escalation after Brute Force ({})",
                ip
            ));
        }

        if !incidents.is_empty() {
            warn!("Correlation incidents for {}: {:?}", ip, incidents);
        }
        Ok(incidents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use serde_json::json;

    fn correlator() -> (Correlator, Arc<dyn StateStore>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        (Correlator::new(store.clone()), store)
    }

    fn brute_force_event(ip: &str) -> LogEvent {
        let mut event = LogEvent::new(
            "ssh",
            &format!("Failed password for invalid user root from {} port 22 ssh2", ip),
        );
        event.ip = Some(ip.to_string());
        event.event_type = Some("ssh_login_failed".to_string());
        event
            .alerts
            .push(format!("SSH Brute Force Detected from {} (6 failures)", ip));
        event
    }

    fn login_event(ip: &str) -> LogEvent {
        let mut event = LogEvent::new(
            "ssh",
            &format!("Accepted password for root from {} port 22 ssh2", ip),
        );
        event.ip = Some(ip.to_string());
        event.event_type = Some("ssh_login_success".to_string());
        event
    }

    fn sudo_event(ip: &str) -> LogEvent {
        let mut event = LogEvent::new("ssh", "sudo cat /etc/shadow");
        event.metadata.insert("ip".to_string(), json!(ip));
        event
    }

    #[tokio::test]
    async fn test_full_chain() {
        let (correlator, store) = correlator();
        let ip = "192.168.100.88";

        // Phase 1: brute-force alert arms the flag, no incident yet.
        let incidents = correlator.process(&brute_force_event(ip)).await.unwrap();
        assert!(incidents.is_empty());
        assert!(store
            .exists(&format!("risk:phase:1:{}", ip))
            .await
            .unwrap());

        // Phase 2: successful login fires the first incident.
        let incidents = correlator.process(&login_event(ip)).await.unwrap();
        assert_eq!(
            incidents,
            vec![format!("Suspicious Login after Brute Force ({})", ip)]
        );
        assert!(store
            .exists(&format!("risk:phase:2:{}", ip))
            .await
            .unwrap());

        // Phase 3: sudo (IP via metadata) fires the critical incident.
        let incidents = correlator.process(&sudo_event(ip)).await.unwrap();
        assert_eq!(
            incidents,
            vec![format!(
                "CRITICAL: Privilege Escalation after Brute Force ({})",
                ip
            )]
        );
    }

    #[tokio::test]
    async fn test_login_without_brute_force_is_quiet() {
        let (correlator, _) = correlator();
        let incidents = correlator.process(&login_event("10.0.0.1")).await.unwrap();
        assert!(incidents.is_empty());
    }

    #[tokio::test]
    async fn test_sudo_without_phase_two_is_quiet() {
        let (correlator, _) = correlator();
        let incidents = correlator.process(&sudo_event("10.0.0.2")).await.unwrap();
        assert!(incidents.is_empty());
    }

    #[tokio::test]
    async fn test_phases_are_isolated_per_ip() {
        let (correlator, _) = correlator();
        correlator
            .process(&brute_force_event("1.1.1.1"))
            .await
            .unwrap();
        // Login from a different IP does not transition.
        let incidents = correlator.process(&login_event("2.2.2.2")).await.unwrap();
        assert!(incidents.is_empty());
    }

    #[tokio::test]
    async fn test_one_event_can_fire_both_transitions() {
        let (correlator, store) = correlator();
        let ip = "3.3.3.3";
        store
            .set_ex(&format!("risk:phase:1:{}", ip), "true", 300)
            .await
            .unwrap();

        // A successful login whose message also mentions sudo: phase 2 arms
        // on this very event and phase 3 probes the fresh flag.
        let mut event = login_event(ip);
        event.message = format!("Accepted password for root from {} port 22 ssh2; sudo -i", ip);
        let incidents = correlator.process(&event).await.unwrap();
        assert_eq!(incidents.len(), 2);
    }

    #[tokio::test]
    async fn test_no_ip_is_a_noop() {
        let (correlator, _) = correlator();
        let event = LogEvent::new("app", "sudo something");
        let incidents = correlator.process(&event).await.unwrap();
        assert!(incidents.is_empty());
    }
}
