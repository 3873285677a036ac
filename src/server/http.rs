//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Routing is a plain
//! (method, path) match; the surface is small enough that a router crate
//! would be overhead.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::TokenVerifier;
use crate::awards::{AwardEngine, BulkOrchestrator};
use crate::breaker::BreakerManager;
use crate::config::Args;
use crate::db::MongoClient;
use crate::governor::ThroughputGovernor;
use crate::routes;
use crate::types::LaurelError;

/// Shared application state.
///
/// Constructed once at process start and passed into every request handler;
/// the engine and orchestrator receive their collaborators through it rather
/// than through ambient globals, so the whole core runs against fakes in
/// tests.
pub struct AppState {
    pub args: Args,
    pub mongo: Option<MongoClient>,
    pub engine: Arc<AwardEngine>,
    pub bulk: Arc<BulkOrchestrator>,
    pub governor: Arc<ThroughputGovernor>,
    pub breakers: Arc<BreakerManager>,
    pub verifier: TokenVerifier,
    pub started_at: Instant,
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), LaurelError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| LaurelError::Config(format!("bind {}: {}", state.args.listen, e)))?;

    info!(
        "Laurel listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - using insecure defaults");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if the service is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state)).await
        }

        // Readiness probe - requires the award store to be available
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state)).await
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // Circuit breaker health for operators
        (Method::GET, "/admin/breakers") => {
            routes::handle_breakers(Arc::clone(&state), req).await
        }

        (Method::GET, "/api/awards") => {
            routes::handle_list_awards(Arc::clone(&state), req).await
        }

        (Method::POST, "/api/awards") => routes::handle_award(Arc::clone(&state), req).await,

        (Method::POST, "/api/awards/revoke") => {
            routes::handle_revoke(Arc::clone(&state), req).await
        }

        (Method::POST, "/api/awards/bulk") => routes::handle_bulk(Arc::clone(&state), req).await,

        (Method::POST, "/api/definitions") => {
            routes::handle_create_definition(Arc::clone(&state), req).await
        }

        (Method::POST, path_str) if is_deactivate_path(path_str) => {
            // /api/definitions/{id}/deactivate
            let definition_id = path_str
                .trim_start_matches("/api/definitions/")
                .trim_end_matches("/deactivate")
                .to_string();
            routes::handle_deactivate_definition(Arc::clone(&state), req, &definition_id).await
        }

        _ => not_found_response(&path),
    };

    Ok(response)
}

fn is_deactivate_path(path: &str) -> bool {
    path.strip_prefix("/api/definitions/")
        .and_then(|rest| rest.strip_suffix("/deactivate"))
        .map(|id| !id.is_empty() && !id.contains('/'))
        .unwrap_or(false)
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = format!(r#"{{"error":{{"kind":"not_found","message":"no route for {}"}}}}"#, path);
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deactivate_path_matching() {
        assert!(is_deactivate_path("/api/definitions/abc-123/deactivate"));
        assert!(!is_deactivate_path("/api/definitions//deactivate"));
        assert!(!is_deactivate_path("/api/definitions/deactivate"));
        assert!(!is_deactivate_path("/api/definitions/a/b/deactivate"));
        assert!(!is_deactivate_path("/api/awards"));
    }
}
