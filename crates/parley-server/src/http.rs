//! Side HTTP endpoint. Serves `/health` only.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::hub::HubHandle;
use crate::registry::RegistryStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` while the hub is running, `"stopping"` after.
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    /// Connections that have joined.
    pub participants: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, stats: RegistryStats) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        participants: stats.participants,
    }
}

#[derive(Clone)]
struct HttpState {
    hub: HubHandle,
    start_time: Instant,
}

pub(crate) fn router(hub: HubHandle, start_time: Instant) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(HttpState { hub, start_time })
        .layer(CorsLayer::permissive())
}

async fn health_handler(State(state): State<HttpState>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(health_check(state.start_time, stats)).into_response(),
        Err(_) => {
            let body = HealthResponse {
                status: "stopping".into(),
                ..health_check(state.start_time, RegistryStats::default())
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}
