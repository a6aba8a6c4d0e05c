use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::db;
use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "eLive Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "runtime": "rust"
    }))
}

/// Cache stats
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStats {
    entries: usize,
    mirrored: bool,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    postgres: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    redis: Option<bool>,
    cache: CacheStats,
    playlists: usize,
    selection: String,
}

async fn redis_ok(state: &AppState) -> Option<bool> {
    match &state.redis {
        Some(redis) => Some(redis.ping().await.unwrap_or(false)),
        None => None,
    }
}

/// GET /health - Advanced health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let postgres_ok = db::health_check(&state.pool).await;
    let redis = redis_ok(&state).await;

    // PostgreSQL feeds the playlist set; Redis is only a mirror
    let status = match (postgres_ok, redis) {
        (false, _) => "unhealthy",
        (true, Some(false)) => "degraded",
        (true, _) => "ok",
    };

    let snapshot = state.controller.snapshot();

    Json(HealthResponse {
        status,
        uptime,
        postgres: postgres_ok,
        redis,
        cache: CacheStats {
            entries: state.cache.len(),
            mirrored: state.cache.has_mirror(),
        },
        playlists: state.controller.playlists().len(),
        selection: snapshot.phase.to_string(),
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness probe (for Kubernetes)
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let postgres_ok = db::health_check(&state.pool).await;

    match (postgres_ok, redis_ok(&state).await) {
        (true, Some(false)) => (StatusCode::OK, "ready (redis degraded)"),
        (true, _) => (StatusCode::OK, "ready"),
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "not ready - postgres unavailable"),
    }
}

/// Liveness probe (for Kubernetes)
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
