//! Request authentication for the public and internal surfaces.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{body::Body, Json};
use serde_json::json;

use gatrix_edge_core::ApiTokenRecord;

use crate::state::AppState;

pub const API_TOKEN_HEADER: &str = "x-api-token";
pub const APPLICATION_NAME_HEADER: &str = "x-application-name";
pub const ENVIRONMENT_HEADER: &str = "x-environment";
pub const BYPASS_TOKEN_HEADER: &str = "x-bypass-token";

/// Authenticated scope injected into request extensions by
/// [`client_auth`]: the token record and the single environment this
/// request may read. Handlers never see any other environment.
#[derive(Clone)]
pub struct ClientScope {
    pub token: Arc<ApiTokenRecord>,
    pub environment_id: String,
}

/// Public-surface authentication.
///
/// Pipeline: token header → mirror lookup → application-name check →
/// environment resolution. Rejections are deliberately generic: the body
/// never reveals whether the token was unknown, the application wrong,
/// or the environment disallowed.
pub async fn client_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token_value) = header_str(&req, API_TOKEN_HEADER) else {
        return unauthorized();
    };
    let Some(record) = state.mirror.get(token_value) else {
        tracing::debug!("request with unknown api token");
        return unauthorized();
    };

    match header_str(&req, APPLICATION_NAME_HEADER) {
        Some(name) if name == record.application_name => {}
        _ => {
            tracing::debug!(token_id = %record.id, "application name mismatch");
            return unauthorized();
        }
    }

    let environment_id = match header_str(&req, ENVIRONMENT_HEADER) {
        Some(requested) => {
            if !record.allows_environment(requested) {
                tracing::debug!(
                    token_id = %record.id,
                    environment = %requested,
                    "environment not permitted for token"
                );
                return forbidden();
            }
            requested.to_string()
        }
        None => record.default_environment_id.clone(),
    };

    req.extensions_mut().insert(ClientScope {
        token: record,
        environment_id,
    });
    next.run(req).await
}

/// Internal-surface gate: shared bypass secret, 403 on any mismatch.
pub async fn internal_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match header_str(&req, BYPASS_TOKEN_HEADER) {
        Some(provided) if provided == state.config.bypass_token => next.run(req).await,
        _ => {
            tracing::warn!(path = %req.uri().path(), "internal request rejected");
            forbidden()
        }
    }
}

fn header_str<'a>(req: &'a Request<Body>, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"status": "error", "message": "Unauthorized"})),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"status": "error", "message": "Forbidden"})),
    )
        .into_response()
}
