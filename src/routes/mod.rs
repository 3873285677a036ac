//! HTTP routes for Laurel

pub mod awards;
pub mod definitions;
pub mod health;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{extract_token_from_header, ActorContext};
use crate::server::AppState;
use crate::types::LaurelError;

pub use awards::{handle_award, handle_bulk, handle_list_awards, handle_revoke};
pub use definitions::{handle_create_definition, handle_deactivate_definition};
pub use health::{handle_breakers, health_check, readiness_check, version_info};

/// Maximum accepted request body (1 MiB covers the largest bulk batch)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":{"kind":"serialization_failure"}}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Map a service error to its HTTP response
pub fn error_response(err: &LaurelError) -> Response<Full<Bytes>> {
    let status = match err {
        LaurelError::Validation(_) | LaurelError::BulkLimitExceeded { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LaurelError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
        LaurelError::NotFound(_) => StatusCode::NOT_FOUND,
        LaurelError::DuplicateAward
        | LaurelError::DuplicateDefinition
        | LaurelError::BadgeInactive => StatusCode::CONFLICT,
        LaurelError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        LaurelError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LaurelError::Transaction(_) | LaurelError::Database(_) | LaurelError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let retry_after = err.retry_after_secs();
    let mut response = json_response(
        status,
        &ErrorBody {
            error: ErrorDetail {
                kind: err.kind(),
                message: err.to_string(),
                retry_after,
            },
        },
    );

    if let Some(secs) = retry_after {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

/// Derive the actor context from the request's bearer token and metadata
pub fn authenticate(
    state: &AppState,
    req: &Request<Incoming>,
) -> Result<ActorContext, LaurelError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| LaurelError::AuthorizationDenied("missing bearer token".into()))?;

    let token = extract_token_from_header(header)
        .ok_or_else(|| LaurelError::AuthorizationDenied("malformed bearer token".into()))?;

    let mut actor = state.verifier.verify(token)?;

    if let Some(origin) = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        actor = actor.with_origin(origin.split(',').next().unwrap_or(origin).trim());
    }
    if let Some(client) = req
        .headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
    {
        actor = actor.with_client(client);
    }
    Ok(actor)
}

/// Collect and parse a JSON request body
pub async fn read_json_body<T: DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, LaurelError> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| LaurelError::Validation(format!("failed to read body: {}", e)))?
        .to_bytes();

    if body.len() > MAX_BODY_BYTES {
        return Err(LaurelError::Validation("request body too large".into()));
    }

    serde_json::from_slice(&body)
        .map_err(|e| LaurelError::Validation(format!("invalid JSON body: {}", e)))
}
