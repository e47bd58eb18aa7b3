//! Durable event index: write-alias documents over the search store's HTTP
//! API, plus the read queries the dashboard endpoints are built on.
//!
//! Index lifecycle (rollover and retention) is declared externally against
//! the physical indices; this client only ever talks to the write aliases.

use crate::error::{PipelineError, Result};
use crate::models::LogEvent;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::error;

pub const LOG_ALIAS: &str = "logs-write";
pub const ALERT_ALIAS: &str = "alerts-write";
pub const INCIDENT_ALIAS: &str = "incidents-write";

pub struct EventIndex {
    client: Client,
    base_url: String,
}

impl EventIndex {
    pub fn new(base_url: &str) -> Self {
        EventIndex {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn index_doc(&self, alias: &str, doc: &Value) -> Result<()> {
        let url = format!("{}/{}/_doc", self.base_url, alias);
        let response = self.client.post(&url).json(doc).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::storage(format!(
                "index into {} failed: {} {}",
                alias, status, body
            )));
        }
        Ok(())
    }

    /// Persist a processed event: the full document, one lightweight doc per
    /// alert, and one doc per incident.
    pub async fn persist(&self, event: &LogEvent) -> Result<()> {
        let full_doc = serde_json::to_value(event)?;
        self.index_doc(LOG_ALIAS, &full_doc).await?;

        for alert in &event.alerts {
            let alert_doc = json!({
                "timestamp": event.timestamp,
                "source_ip": event.effective_ip(),
                "rule_name": alert,
                "severity": event.severity,
                "metadata": event.metadata,
            });
            self.index_doc(ALERT_ALIAS, &alert_doc).await?;
        }

        for incident in &event.incidents {
            let incident_doc = json!({
                "timestamp": event.timestamp,
                "incident": incident,
                "severity": "CRITICAL",
                "log_reference": full_doc,
            });
            self.index_doc(INCIDENT_ALIAS, &incident_doc).await?;
        }

        Ok(())
    }

    /// Document count for an alias, optionally filtered.
    pub async fn count(&self, alias: &str, query: Option<Value>) -> u64 {
        let url = format!("{}/{}/_count", self.base_url, alias);
        let request = match query {
            Some(body) => self.client.post(&url).json(&body),
            None => self.client.post(&url).json(&json!({})),
        };
        match request.send().await {
            Ok(response) => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("count").and_then(|c| c.as_u64()))
                .unwrap_or(0),
            Err(e) => {
                error!("Count query against {} failed: {}", alias, e);
                0
            }
        }
    }

    /// Run a search body against an alias and return the `_source` of each
    /// hit. Read failures degrade to an empty result set.
    pub async fn search(&self, alias: &str, body: Value) -> Vec<Value> {
        let url = format!("{}/{}/_search", self.base_url, alias);
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Search against {} failed: {}", alias, e);
                return Vec::new();
            }
        };
        let parsed: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                error!("Search response from {} unreadable: {}", alias, e);
                return Vec::new();
            }
        };
        parsed
            .pointer("/hits/hits")
            .and_then(|hits| hits.as_array())
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("_source").cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw search returning the whole response (used for aggregations).
    pub async fn search_raw(&self, alias: &str, body: Value) -> Option<Value> {
        let url = format!("{}/{}/_search", self.base_url, alias);
        match self.client.post(&url).json(&body).send().await {
            Ok(response) => response.json().await.ok(),
            Err(e) => {
                error!("Search against {} failed: {}", alias, e);
                None
            }
        }
    }

    pub async fn recent(&self, alias: &str, limit: usize) -> Vec<Value> {
        self.search(
            alias,
            json!({
                "size": limit,
                "sort": [{"timestamp": "desc"}],
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_writes_all_doc_families() {
        let server = wiremock::MockServer::start().await;
        for alias in [LOG_ALIAS, ALERT_ALIAS, INCIDENT_ALIAS] {
            wiremock::Mock::given(wiremock::matchers::method("POST"))
                .and(wiremock::matchers::path(format!("/{}/_doc", alias)))
                .respond_with(
                    wiremock::ResponseTemplate::new(201)
                        .set_body_json(json!({"result": "created"})),
                )
                .mount(&server)
                .await;
        }

        let index = EventIndex::new(&server.uri());
        let mut event = LogEvent::new("ssh", "Accepted password for root from 1.2.3.4 port 22 ssh2");
        event.timestamp = Some("2026-01-08T17:37:52Z".to_string());
        event.ip = Some("1.2.3.4".to_string());
        event.alerts.push("SSH Brute Force Detected from 1.2.3.4 (6 failures)".to_string());
        event
            .incidents
            .push("Suspicious Login after Brute Force (1.2.3.4)".to_string());
        index.persist(&event).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);

        let alert_req = requests
            .iter()
            .find(|r| r.url.path() == format!("/{}/_doc", ALERT_ALIAS))
            .unwrap();
        let alert_doc: Value = serde_json::from_slice(&alert_req.body).unwrap();
        assert_eq!(alert_doc["source_ip"], json!("1.2.3.4"));
        assert!(alert_doc["rule_name"]
            .as_str()
            .unwrap()
            .contains("SSH Brute Force"));

        let incident_req = requests
            .iter()
            .find(|r| r.url.path() == format!("/{}/_doc", INCIDENT_ALIAS))
            .unwrap();
        let incident_doc: Value = serde_json::from_slice(&incident_req.body).unwrap();
        assert_eq!(incident_doc["severity"], json!("CRITICAL"));
        assert_eq!(
            incident_doc["log_reference"]["source"],
            json!("ssh")
        );
    }

    #[tokio::test]
    async fn test_persist_surfaces_index_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let index = EventIndex::new(&server.uri());
        let event = LogEvent::new("nginx", "GET / HTTP/1.1");
        assert!(index.persist(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_search_degrades_to_empty() {
        // Nothing listening: reads must not error out.
        let index = EventIndex::new("http://127.0.0.1:1");
        let hits = index.recent(LOG_ALIAS, 10).await;
        assert!(hits.is_empty());
        assert_eq!(index.count(LOG_ALIAS, None).await, 0);
    }
}
