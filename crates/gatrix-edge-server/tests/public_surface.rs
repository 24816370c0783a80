mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use gatrix_edge_server::api;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn client_request(path: &str, token: Option<&str>, environment: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder
            .header("X-API-Token", token)
            .header("X-Application-Name", "game");
    }
    if let Some(environment) = environment {
        builder = builder.header("X-Environment", environment);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_summary_counts() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["summary"]["gameWorlds"]["dev"], 1);
    assert_eq!(body["summary"]["gameWorlds"]["qa"], 1);
    assert_eq!(body["summary"]["clientVersions"]["dev"], 1);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn readiness_follows_engine_state() {
    let backend = common::seeded_backend();

    // Before bootstrap: not ready.
    let cfg = common::test_config();
    let store = std::sync::Arc::new(gatrix_edge_server::cache::CacheStore::new());
    let mirror = std::sync::Arc::new(gatrix_edge_server::cache::TokenMirror::new());
    let engine = std::sync::Arc::new(gatrix_edge_server::sync::SyncEngine::new(
        store.clone(),
        mirror.clone(),
        backend.clone(),
        gatrix_edge_server::sync::EngineOptions::from_config(&cfg),
    ));
    let state = gatrix_edge_server::AppState {
        config: std::sync::Arc::new(cfg),
        store,
        mirror,
        engine: engine.clone(),
    };

    let app = api::public::router(state);
    let response = app
        .clone()
        .oneshot(client_request("/health/ready", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "not_ready");
    assert_eq!(body["state"], "bootstrapping");

    engine.bootstrap().await;
    let response = app
        .oneshot(client_request("/health/ready", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn liveness_needs_no_auth() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);
    let response = app
        .oneshot(client_request("/health/live", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_or_unknown_token_is_generic_401() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);

    let response = app
        .clone()
        .oneshot(client_request("/api/v1/client/versions", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let missing_body = body_json(response).await;

    let response = app
        .oneshot(client_request("/api/v1/client/versions", Some("nope"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let unknown_body = body_json(response).await;

    // Identical bodies: the reason for the rejection is never disclosed.
    assert_eq!(missing_body, unknown_body);
}

#[tokio::test]
async fn wrong_application_name_is_rejected() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);

    let request = Request::builder()
        .uri("/api/v1/client/versions")
        .header("X-API-Token", "t-dev")
        .header("X-Application-Name", "other-app")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn environment_header_is_honored_when_allowed() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);

    let response = app
        .oneshot(client_request(
            "/api/v1/client/game-worlds",
            Some("t-multi"),
            Some("qa"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"][0]["name"], "qa world");
}

#[tokio::test]
async fn disallowed_environment_is_generic_403() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);

    let response = app
        .oneshot(client_request(
            "/api/v1/client/game-worlds",
            Some("t-dev"),
            Some("qa"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Forbidden");
}

#[tokio::test]
async fn tenant_isolation_with_colliding_ids() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state);

    // Both environments hold a game world with id "w1"; the default
    // environment of t-dev is dev, so only the dev entity may appear.
    let response = app
        .oneshot(client_request("/api/v1/client/game-worlds", Some("t-dev"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["name"], "dev world");
}

#[tokio::test]
async fn deleted_token_stops_validating() {
    let state = common::seeded_state(common::seeded_backend()).await;
    let app = api::public::router(state.clone());

    let response = app
        .clone()
        .oneshot(client_request("/api/v1/client/versions", Some("t-dev"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The sync pipeline applies an api_token.deleted; the very next
    // request with that token must fail.
    state.mirror.remove_by_id("1");
    let response = app
        .oneshot(client_request("/api/v1/client/versions", Some("t-dev"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reads_are_served_from_cache_without_backend_calls() {
    let backend = common::seeded_backend();
    let state = common::seeded_state(backend.clone()).await;
    let app = api::public::router(state);

    // Change the backend after bootstrap; the cache must keep serving
    // the mirrored snapshot until a sync applies the change.
    backend.set_entities("dev", gatrix_edge_core::EntityKind::ClientVersion, vec![]);

    let response = app
        .oneshot(client_request("/api/v1/client/versions", Some("t-dev"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
