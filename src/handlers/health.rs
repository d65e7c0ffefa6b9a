use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Instant;

use crate::handlers::AppState;

/// Component health status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

/// Individual component health details
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: ComponentStatus,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub database: ComponentHealth,
}

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Basic liveness probe - just checks if the service is running
async fn liveness_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness probe - checks the backing store
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db {
        Some(db) => {
            let started = Instant::now();
            let result = crate::db::check_connection(db).await;
            let latency_ms = Some(started.elapsed().as_millis() as u64);
            match result {
                Ok(()) => ComponentHealth {
                    status: ComponentStatus::Up,
                    message: "Connection successful".to_string(),
                    latency_ms,
                },
                Err(e) => ComponentHealth {
                    status: ComponentStatus::Down,
                    message: format!("Connection failed: {}", e),
                    latency_ms,
                },
            }
        }
        None => ComponentHealth {
            status: ComponentStatus::Up,
            message: "in-memory store".to_string(),
            latency_ms: None,
        },
    };

    let status_code = match database.status {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: database.status.clone(),
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_secs: get_uptime_secs(),
            database,
        }),
    )
}

/// Creates the router for health check endpoints
///
/// Endpoints:
/// - GET /health         - Basic liveness probe (always returns 200 if server is running)
/// - GET /health/ready   - Readiness probe (checks database connectivity)
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness_check))
        .route("/ready", get(readiness_check))
}
