//! Health check endpoints
//!
//! Provides Kubernetes-style health probes:
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (is the service ready for traffic?)
//!
//! Liveness returns 200 whenever the service is running. Readiness requires
//! the award store to be backed by MongoDB, unless dev mode is enabled (the
//! in-memory store is acceptable there). Circuit breaker health is reported
//! informationally and never blocks readiness: an open breaker means the
//! service is degrading gracefully, not that it should be pulled from the
//! pool.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::breaker::BreakerStats;
use crate::routes::{authenticate, error_response, json_response};
use crate::server::AppState;

/// Health response body
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// 'online' when fully operational, 'degraded' when a dependency is down
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Current timestamp
    pub timestamp: String,
    /// Operating mode
    pub mode: String,
    /// Node identifier
    pub node_id: String,
    /// Whether the award store is MongoDB-backed
    pub storage_connected: bool,
    /// Dependency breaker states
    pub dependencies: Vec<DependencyHealth>,
}

/// One dependency's breaker view
#[derive(Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub state: String,
    pub failure_count: u32,
}

async fn build_health_response(state: &AppState) -> HealthResponse {
    let breakers = state.breakers.all_stats().await;
    let any_open = breakers
        .iter()
        .any(|b| b.state != crate::breaker::CircuitState::Closed);

    let status = if any_open { "degraded" } else { "online" };

    HealthResponse {
        healthy: true,
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        node_id: state.args.node_id.to_string(),
        storage_connected: state.mongo.is_some(),
        dependencies: breakers
            .into_iter()
            .map(|b| DependencyHealth {
                name: b.dependency,
                state: b.state.to_string(),
                failure_count: b.failure_count,
            })
            .collect(),
    }
}

/// Handle liveness probe (/health, /healthz)
pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state).await;
    json_response(StatusCode::OK, &response)
}

/// Handle readiness probe (/ready, /readyz)
pub async fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state).await;

    let is_ready = response.storage_connected || state.args.dev_mode;
    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    json_response(status, &response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "laurel",
    };
    json_response(StatusCode::OK, &response)
}

#[derive(Serialize)]
struct BreakersResponse {
    breakers: Vec<BreakerStats>,
}

/// Handle GET /admin/breakers: full breaker stats for operators
pub async fn handle_breakers(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if let Err(e) = authenticate(&state, &req) {
        return error_response(&e);
    }

    let breakers = state.breakers.all_stats().await;
    json_response(StatusCode::OK, &BreakersResponse { breakers })
}
