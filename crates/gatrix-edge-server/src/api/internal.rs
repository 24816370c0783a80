//! Administrative HTTP surface.
//!
//! Bound to its own listener at `EDGE_PORT + 10` as a network-level
//! blast-radius reduction; it must never be reachable from outside the
//! deployment. All routes sit behind the bypass secret.

use axum::extract::State;
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use gatrix_edge_core::format_rfc3339;

use super::auth;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cache", get(cache_status))
        .route("/cache/refresh", post(cache_refresh))
        .layer(middleware::from_fn_with_state(state.clone(), auth::internal_auth))
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response {
    let response = next.run(req).await;
    crate::metrics::record_http_request("internal", response.status().as_u16());
    response
}

/// Cache status: the health summary plus per-environment detail.
async fn cache_status(State(state): State<AppState>) -> Json<Value> {
    let mut detail = Map::new();
    for environment_id in state.store.tracked_environments() {
        let counts: Map<String, Value> = state
            .store
            .counts(&environment_id)
            .into_iter()
            .map(|(kind, count)| (kind.summary_key().to_string(), json!(count)))
            .collect();
        let status = state.store.status(&environment_id).unwrap_or_default();
        detail.insert(
            environment_id,
            json!({
                "counts": counts,
                "lastRefreshedAt": status.last_refreshed_at.map(format_rfc3339),
                "lastError": status.last_error,
            }),
        );
    }

    Json(json!({
        "status": "ok",
        "timestamp": format_rfc3339(gatrix_edge_core::now_utc()),
        "syncMethod": state.engine.sync_method().as_str(),
        "engineState": state.engine.state().as_str(),
        "lastRefreshedAt": state.store.latest_refresh().map(format_rfc3339),
        "apiTokens": state.mirror.len(),
        "summary": super::cache_summary(&state.store),
        "detail": detail,
    }))
}

/// Forced full refresh, independent of the configured sync method.
/// Concurrent calls collapse into one backend fetch sequence; this
/// handler blocks until the (possibly shared) run completes.
async fn cache_refresh(State(state): State<AppState>) -> Json<Value> {
    let outcome = state.engine.force_refresh("forced").await;
    let status = if outcome.failed.is_empty() && outcome.discovery_error.is_none() {
        "ok"
    } else {
        "partial"
    };
    Json(json!({
        "status": status,
        "result": outcome,
    }))
}
