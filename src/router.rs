//! HTTP router assembly.

use crate::handlers::{self, AppState};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application router with middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let api = Router::new()
        .route("/ingest/logs", post(handlers::ingest_logs))
        .route("/ingest/raw", post(handlers::ingest_raw))
        .route("/dashboard/stats", get(handlers::dashboard_stats))
        .route("/dashboard/incidents", get(handlers::dashboard_incidents))
        .route("/dashboard/alerts", get(handlers::dashboard_alerts))
        .route("/dashboard/logs", get(handlers::dashboard_logs))
        .route("/dashboard/activity", get(handlers::dashboard_activity))
        .route("/dashboard/map", get(handlers::dashboard_map));

    let api_prefix = state.settings.api_v1_str.clone();

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_snapshot))
        .nest(&api_prefix, api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
