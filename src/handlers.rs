//! HTTP handlers: the ingest frontend and the dashboard read side.

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::models::{LogEvent, LogsPayload};
use crate::queue::EventQueue;
use crate::storage::{EventIndex, ALERT_ALIAS, INCIDENT_ALIAS, LOG_ALIAS};
use crate::store::StateStore;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Shared handles, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<EventQueue>,
    pub index: Arc<EventIndex>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Resolve the client address: forwarded header first, then the socket.
fn client_ip(headers: &HeaderMap, connect: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Ingress gates, in order: blocklist, then rate limit. Both run before the
/// body is even looked at.
async fn run_gates(state: &AppState, client: &str) -> Result<()> {
    if state
        .store
        .exists(&format!("blocked:{}", client))
        .await?
    {
        return Err(PipelineError::Blocked);
    }

    let key = format!("rate_limit:{}", client);
    let count = state.store.incr(&key).await?;
    if count == 1 {
        state.store.expire(&key, 60).await?;
    }
    if count as u64 > state.settings.rate_limit_per_minute {
        return Err(PipelineError::RateLimited);
    }
    Ok(())
}

/// Merge the infrastructure tag headers into event metadata.
fn apply_header_metadata(event: &mut LogEvent, headers: &HeaderMap) {
    if let Some(host) = headers.get("x-source-host").and_then(|v| v.to_str().ok()) {
        event
            .metadata
            .insert("source_host".to_string(), json!(host));
    }
    if let Some(app) = headers.get("x-app-name").and_then(|v| v.to_str().ok()) {
        event.metadata.insert("app_name".to_string(), json!(app));
    }
}

/// `POST /ingest/logs` - one structured event or a batch.
pub async fn ingest_logs(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let client = client_ip(&headers, connect.as_ref());
    run_gates(&state, &client).await?;

    let request_id = uuid::Uuid::new_v4().to_string();
    let payload: LogsPayload = serde_json::from_slice(&body)
        .map_err(|e| PipelineError::validation(format!("Invalid event payload: {}", e)))?;

    let timestamp = Utc::now().to_rfc3339();
    let mut queued = 0usize;
    for mut event in payload.into_vec() {
        if event.timestamp.is_none() {
            event.timestamp = Some(timestamp.clone());
        }
        apply_header_metadata(&mut event, &headers);

        state
            .queue
            .push(&event)
            .await
            .map_err(|e| PipelineError::queue(e.to_string()))?;
        queued += 1;
        PipelineMetrics::incr(&state.metrics.queued);
    }

    debug!(
        "Queued {} event(s) from {}, request_id: {}",
        queued, client, request_id
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "queued", "count": queued})),
    ))
}

/// `POST /ingest/raw` - plain-text body wrapped in a structured envelope.
pub async fn ingest_raw(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<Value>)> {
    let client = client_ip(&headers, connect.as_ref());
    run_gates(&state, &client).await?;

    let mut event = LogEvent::new("raw_ingest", &body);
    event.timestamp = Some(Utc::now().to_rfc3339());
    event
        .metadata
        .insert("source_ip".to_string(), json!(client));
    event
        .metadata
        .insert("raw_format".to_string(), json!("text"));
    apply_header_metadata(&mut event, &headers);

    state
        .queue
        .push(&event)
        .await
        .map_err(|e| PipelineError::queue(e.to_string()))?;
    PipelineMetrics::incr(&state.metrics.queued);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "queued", "message": "Raw log accepted"})),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub query: Option<String>,
}

/// `GET /dashboard/stats`
pub async fn dashboard_stats(State(state): State<AppState>) -> Json<Value> {
    let total_logs = state.index.count(LOG_ALIAS, None).await;
    let total_alerts = state.index.count(ALERT_ALIAS, None).await;
    let total_incidents = state.index.count(INCIDENT_ALIAS, None).await;
    let critical_last_24h = state
        .index
        .count(
            ALERT_ALIAS,
            Some(json!({
                "query": {
                    "bool": {
                        "must": [{"match": {"severity": "CRITICAL"}}],
                        "filter": [{"range": {"timestamp": {"gte": "now-24h"}}}]
                    }
                }
            })),
        )
        .await;

    Json(json!({
        "total_logs": total_logs,
        "total_alerts": total_alerts,
        "total_incidents": total_incidents,
        "critical_last_24h": critical_last_24h,
    }))
}

/// `GET /dashboard/incidents?limit=N`
pub async fn dashboard_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Value>> {
    Json(
        state
            .index
            .recent(INCIDENT_ALIAS, params.limit.unwrap_or(10))
            .await,
    )
}

/// `GET /dashboard/alerts?limit=N`
pub async fn dashboard_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Value>> {
    Json(
        state
            .index
            .recent(ALERT_ALIAS, params.limit.unwrap_or(20))
            .await,
    )
}

/// `GET /dashboard/logs?limit=N&query=Q`
pub async fn dashboard_logs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Value>> {
    let mut body = json!({
        "size": params.limit.unwrap_or(50),
        "sort": [{"timestamp": "desc"}],
    });
    if let Some(query) = &params.query {
        body["query"] = json!({"query_string": {"query": query}});
    }
    Json(state.index.search(LOG_ALIAS, body).await)
}

/// `GET /dashboard/activity` - hourly histogram of log volume.
pub async fn dashboard_activity(State(state): State<AppState>) -> Json<Vec<Value>> {
    let body = json!({
        "size": 0,
        "aggs": {
            "per_hour": {
                "date_histogram": {"field": "timestamp", "calendar_interval": "hour"}
            }
        }
    });
    let buckets = state
        .index
        .search_raw(LOG_ALIAS, body)
        .await
        .and_then(|response| {
            response
                .pointer("/aggregations/per_hour/buckets")
                .and_then(|b| b.as_array())
                .cloned()
        })
        .unwrap_or_default();

    Json(
        buckets
            .into_iter()
            .map(|bucket| {
                json!({
                    "hour": bucket.get("key_as_string").cloned().unwrap_or(Value::Null),
                    "count": bucket.get("doc_count").cloned().unwrap_or(json!(0)),
                })
            })
            .collect(),
    )
}

/// `GET /dashboard/map` - recent geo-bearing logs for the world map.
pub async fn dashboard_map(State(state): State<AppState>) -> Json<Vec<Value>> {
    let hits = state
        .index
        .search(
            LOG_ALIAS,
            json!({
                "size": 100,
                "sort": [{"timestamp": "desc"}],
                "query": {"exists": {"field": "geo"}},
            }),
        )
        .await;

    Json(
        hits.into_iter()
            .filter_map(|doc| {
                let geo = doc.get("geo")?;
                Some(json!({
                    "ip": doc.get("ip").cloned().unwrap_or(Value::Null),
                    "lat": geo.get("lat").cloned().unwrap_or(json!(0.0)),
                    "lon": geo.get("lon").cloned().unwrap_or(json!(0.0)),
                    "severity": doc.get("severity").cloned().unwrap_or(json!("INFO")),
                }))
            })
            .collect(),
    )
}

/// `GET /` - service banner.
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"message": format!("Welcome to {}", state.settings.project_name)}))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics` - JSON counter snapshot.
pub async fn metrics_snapshot(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.metrics.snapshot()).unwrap_or(Value::Null))
}
