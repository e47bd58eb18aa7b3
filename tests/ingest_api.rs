//! Router-level tests for the ingest frontend and its gates.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use siem_detection_pipeline::prelude::*;
use siem_detection_pipeline::queue::{GROUP_NAME, STREAM_KEY};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: axum::Router,
    store: Arc<dyn StateStore>,
}

fn test_app(rate_limit: u64) -> TestApp {
    let mut settings = Settings::from_env();
    settings.rate_limit_per_minute = rate_limit;
    settings.api_v1_str = "/api/v1".to_string();

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let queue = Arc::new(EventQueue::new(store.clone()));
    let state = AppState {
        settings: Arc::new(settings),
        store: store.clone(),
        queue,
        // Read side is not exercised here.
        index: Arc::new(EventIndex::new("http://127.0.0.1:1")),
        metrics: Arc::new(PipelineMetrics::new()),
    };

    TestApp {
        router: build_router(state),
        store,
    }
}

fn logs_request(client: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/ingest/logs")
        .header("content-type", "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn queued_events(store: &Arc<dyn StateStore>) -> Vec<LogEvent> {
    store.group_create(STREAM_KEY, GROUP_NAME).await.unwrap();
    store
        .group_read(STREAM_KEY, GROUP_NAME, "test_reader", 100, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| serde_json::from_str(m.fields.get("data").unwrap()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_single_event_is_queued() {
    let app = test_app(1000);
    let response = app
        .router
        .clone()
        .oneshot(logs_request(
            "1.2.3.4",
            r#"{"source":"ssh","message":"Failed password for root from 5.5.5.5 port 22 ssh2"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("queued"));
    assert_eq!(body["count"], json!(1));

    let events = queued_events(&app.store).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, "ssh");
    // Timestamp assigned at ingest.
    assert!(events[0].timestamp.is_some());
}

#[tokio::test]
async fn test_batch_ingest_counts_all() {
    let app = test_app(1000);
    let batch = json!([
        {"source": "ssh", "message": "one"},
        {"source": "nginx", "message": "two"},
        {"source": "firewall", "message": "three"}
    ]);
    let response = app
        .router
        .clone()
        .oneshot(logs_request("1.2.3.4", &batch.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["count"], json!(3));
    assert_eq!(queued_events(&app.store).await.len(), 3);
}

#[tokio::test]
async fn test_header_metadata_is_merged() {
    let app = test_app(1000);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/ingest/logs")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "1.2.3.4")
        .header("x-source-host", "web-01")
        .header("x-app-name", "sshd")
        .body(Body::from(
            r#"{"source":"ssh","message":"x","timestamp":"2026-01-08T10:00:00Z"}"#,
        ))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let events = queued_events(&app.store).await;
    assert_eq!(events[0].metadata.get("source_host"), Some(&json!("web-01")));
    assert_eq!(events[0].metadata.get("app_name"), Some(&json!("sshd")));
    // Client-provided timestamp is kept.
    assert_eq!(events[0].timestamp.as_deref(), Some("2026-01-08T10:00:00Z"));
}

#[tokio::test]
async fn test_raw_ingest_wraps_body() {
    let app = test_app(1000);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/ingest/raw")
        .header("content-type", "text/plain")
        .header("x-forwarded-for", "7.7.7.7")
        .body(Body::from("[UFW BLOCK] SRC=1.2.3.4 DST=5.6.7.8 PROTO=TCP"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let events = queued_events(&app.store).await;
    assert_eq!(events[0].source, "raw_ingest");
    assert_eq!(events[0].level, "INFO");
    assert_eq!(events[0].message, "[UFW BLOCK] SRC=1.2.3.4 DST=5.6.7.8 PROTO=TCP");
    assert_eq!(events[0].metadata.get("source_ip"), Some(&json!("7.7.7.7")));
    assert_eq!(events[0].metadata.get("raw_format"), Some(&json!("text")));
}

#[tokio::test]
async fn test_invalid_payload_is_rejected() {
    let app = test_app(1000);
    let response = app
        .router
        .clone()
        .oneshot(logs_request("1.2.3.4", r#"{"message": "no source field"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(queued_events(&app.store).await.is_empty());
}

#[tokio::test]
async fn test_blocked_client_is_rejected_before_rate_limit() {
    let app = test_app(1000);
    app.store
        .set_ex("blocked:9.9.9.9", "Risk Score: 100", 300)
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(logs_request("9.9.9.9", r#"{"source":"ssh","message":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The blocklist gate ran first: the rate-limit counter was never touched.
    assert!(!app.store.exists("rate_limit:9.9.9.9").await.unwrap());
    assert!(queued_events(&app.store).await.is_empty());
}

#[tokio::test]
async fn test_rate_limit_fires_past_threshold() {
    let app = test_app(5);
    for i in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(logs_request("4.4.4.4", r#"{"source":"ssh","message":"x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED, "request {}", i);
    }

    let response = app
        .router
        .clone()
        .oneshot(logs_request("4.4.4.4", r#"{"source":"ssh","message":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // The counter carries a one-minute window.
    let ttl = app.store.ttl("rate_limit:4.4.4.4").await.unwrap();
    assert!(ttl.unwrap() <= 60);

    // Another client is unaffected.
    let response = app
        .router
        .clone()
        .oneshot(logs_request("4.4.4.5", r#"{"source":"ssh","message":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let app = test_app(1000);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], json!("healthy"));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("processed").is_some());
}
