use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: source address is blocked")]
    Blocked,

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match &self {
            PipelineError::Blocked => (
                StatusCode::FORBIDDEN,
                "Access Denied: Your IP is blocked due to suspicious activity".to_string(),
                "BLOCKED",
            ),
            PipelineError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests: rate limit exceeded".to_string(),
                "RATE_LIMIT",
            ),
            PipelineError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                "VALIDATION_ERROR",
            ),
            PipelineError::Config(_) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                "CONFIG_ERROR",
            ),
            PipelineError::Queue(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to queue event".to_string(),
                "QUEUE_ERROR",
            ),
            PipelineError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage operation failed".to_string(),
                "STORAGE_ERROR",
            ),
            PipelineError::Redis(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "State store operation failed".to_string(),
                "REDIS_ERROR",
            ),
            PipelineError::Http(_) => (
                StatusCode::BAD_GATEWAY,
                "Upstream HTTP request failed".to_string(),
                "HTTP_ERROR",
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": error_message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

impl PipelineError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PipelineError::Config(msg.into())
    }

    pub fn queue<S: Into<String>>(msg: S) -> Self {
        PipelineError::Queue(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PipelineError::Storage(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        PipelineError::Validation(msg.into())
    }
}
