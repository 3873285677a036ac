//! Badge definition management endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::{authenticate, error_response, json_response, read_json_body};
use crate::server::AppState;

/// POST /api/definitions
pub async fn handle_create_definition(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    let input = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    match state.engine.create_definition(input, &actor).await {
        Ok(definition) => json_response(StatusCode::CREATED, &definition),
        Err(e) => error_response(&e),
    }
}

#[derive(Serialize)]
struct DeactivateResponse<'a> {
    definition_id: &'a str,
    is_active: bool,
}

/// POST /api/definitions/{id}/deactivate
pub async fn handle_deactivate_definition(
    state: Arc<AppState>,
    req: Request<Incoming>,
    definition_id: &str,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    match state
        .engine
        .deactivate_definition(definition_id, &actor)
        .await
    {
        Ok(()) => json_response(
            StatusCode::OK,
            &DeactivateResponse {
                definition_id,
                is_active: false,
            },
        ),
        Err(e) => error_response(&e),
    }
}
