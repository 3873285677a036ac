//! Award, revocation, and bulk endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use crate::awards::{BulkAction, BulkItem};
use crate::routes::{authenticate, error_response, json_response, read_json_body};
use crate::server::AppState;

/// GET /api/awards - awards within the actor's data scope
pub async fn handle_list_awards(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    match state.engine.list_awards(&actor).await {
        Ok(awards) => json_response(StatusCode::OK, &awards),
        Err(e) => error_response(&e),
    }
}

/// POST /api/awards
pub async fn handle_award(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    let request = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    match state.engine.award(request, &actor).await {
        Ok(award) => json_response(StatusCode::CREATED, &award),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct RevokeRequest {
    award_id: String,
    reason: String,
}

/// POST /api/awards/revoke
pub async fn handle_revoke(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    let request: RevokeRequest = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    match state
        .engine
        .revoke(&request.award_id, &request.reason, &actor)
        .await
    {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct BulkRequest {
    action: BulkAction,
    items: Vec<BulkItem>,
    #[serde(default)]
    preview: bool,
}

/// POST /api/awards/bulk
pub async fn handle_bulk(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    let request: BulkRequest = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    match state
        .bulk
        .run(request.items, request.action, request.preview, &actor)
        .await
    {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(e) => error_response(&e),
    }
}
