//! Client-facing HTTP surface.
//!
//! Health endpoints are unauthenticated; everything under
//! `/api/v1/client` goes through the token-mirror pipeline and reads
//! exclusively from the cache, scoped to the request's environment.

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use gatrix_edge_core::{format_rfc3339, now_utc, EntityKind};

use super::auth::{self, ClientScope};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let client_routes = Router::new()
        .route("/versions", get(client_versions))
        .route("/banners", get(banners))
        .route("/notices", get(notices))
        .route("/game-worlds", get(game_worlds))
        .layer(middleware::from_fn_with_state(state.clone(), auth::client_auth));

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/live", get(live))
        .nest("/api/v1/client", client_routes)
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response {
    let response = next.run(req).await;
    crate::metrics::record_http_request("public", response.status().as_u16());
    response
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": format_rfc3339(now_utc()),
        "summary": super::cache_summary(&state.store),
    }))
}

async fn ready(State(state): State<AppState>) -> Response {
    let readiness = state.engine.readiness();
    if readiness.ready {
        (StatusCode::OK, Json(json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "state": readiness.state.as_str(),
                "stale": readiness.stale,
            })),
        )
            .into_response()
    }
}

async fn live() -> impl IntoResponse {
    Json(json!({"status": "alive"}))
}

/// Serve one collection scoped to the authenticated environment. Entity
/// ids may collide across environments; the scope makes cross-tenant
/// leakage structurally impossible.
fn collection_response(state: &AppState, scope: &ClientScope, kind: EntityKind) -> Json<Value> {
    let items = state.store.list(&scope.environment_id, kind);
    let data: Vec<&Value> = items.iter().map(|item| &**item).collect();
    Json(json!({"status": "success", "data": data}))
}

async fn client_versions(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
) -> Json<Value> {
    collection_response(&state, &scope, EntityKind::ClientVersion)
}

async fn banners(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
) -> Json<Value> {
    collection_response(&state, &scope, EntityKind::Banner)
}

async fn notices(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
) -> Json<Value> {
    collection_response(&state, &scope, EntityKind::Notice)
}

async fn game_worlds(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
) -> Json<Value> {
    collection_response(&state, &scope, EntityKind::GameWorld)
}
