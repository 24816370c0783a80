#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use gatrix_edge_config::EdgeConfig;
use gatrix_edge_core::{ApiTokenRecord, EntityKind, Environment};
use gatrix_edge_server::backend::{BackendApi, BackendError};
use gatrix_edge_server::cache::{CacheStore, TokenMirror};
use gatrix_edge_server::sync::{EngineOptions, SyncEngine};
use gatrix_edge_server::AppState;

pub const BYPASS_TOKEN: &str = "bypass-secret";

/// Seeded in-process backend for surface tests.
#[derive(Default)]
pub struct SeedBackend {
    pub environments: Mutex<Vec<Environment>>,
    pub entities: Mutex<HashMap<(String, EntityKind), Vec<Value>>>,
    pub tokens: Mutex<Vec<ApiTokenRecord>>,
}

impl SeedBackend {
    pub fn set_entities(&self, env: &str, kind: EntityKind, items: Vec<Value>) {
        self.entities.lock().insert((env.to_string(), kind), items);
    }
}

#[async_trait]
impl BackendApi for SeedBackend {
    async fn list_environments(&self) -> Result<Vec<Environment>, BackendError> {
        Ok(self.environments.lock().clone())
    }

    async fn list_entities(
        &self,
        environment_id: &str,
        kind: EntityKind,
    ) -> Result<Vec<Value>, BackendError> {
        Ok(self
            .entities
            .lock()
            .get(&(environment_id.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_entity(
        &self,
        environment_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Value>, BackendError> {
        Ok(self
            .entities
            .lock()
            .get(&(environment_id.to_string(), kind))
            .and_then(|items| items.iter().find(|item| item["id"] == json!(id)).cloned()))
    }

    async fn list_api_tokens(&self) -> Result<Vec<ApiTokenRecord>, BackendError> {
        Ok(self.tokens.lock().clone())
    }

    async fn fetch_api_token(&self, id: &str) -> Result<Option<ApiTokenRecord>, BackendError> {
        Ok(self.tokens.lock().iter().find(|t| t.id == id).cloned())
    }
}

pub fn test_config() -> EdgeConfig {
    let env = HashMap::from([
        ("EDGE_BYPASS_TOKEN", BYPASS_TOKEN),
        ("EDGE_ENVIRONMENTS", "dev,qa"),
        ("GATRIX_URL", "http://backend.local"),
        ("CACHE_SYNC_METHOD", "manual"),
    ]);
    EdgeConfig::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap()
}

pub fn token(id: &str, value: &str, app: &str, default_env: &str, allowed: &[&str]) -> ApiTokenRecord {
    ApiTokenRecord {
        id: id.into(),
        token: value.into(),
        application_name: app.into(),
        default_environment_id: default_env.into(),
        allowed_environment_ids: allowed.iter().map(|s| s.to_string()).collect(),
    }
}

/// A seeded backend: same game-world id in both environments (tenant
/// isolation probe), one client version in dev, two tokens.
pub fn seeded_backend() -> Arc<SeedBackend> {
    let backend = Arc::new(SeedBackend::default());
    backend.set_entities(
        "dev",
        EntityKind::GameWorld,
        vec![json!({"id": "w1", "name": "dev world"})],
    );
    backend.set_entities(
        "qa",
        EntityKind::GameWorld,
        vec![json!({"id": "w1", "name": "qa world"})],
    );
    backend.set_entities(
        "dev",
        EntityKind::ClientVersion,
        vec![json!({"id": "v1", "version": "1.2.3"})],
    );
    *backend.tokens.lock() = vec![
        token("1", "t-dev", "game", "dev", &[]),
        token("2", "t-multi", "game", "dev", &["qa"]),
    ];
    backend
}

/// Fully bootstrapped application state over the seeded backend.
pub async fn seeded_state(backend: Arc<SeedBackend>) -> AppState {
    let cfg = test_config();
    let store = Arc::new(CacheStore::new());
    let mirror = Arc::new(TokenMirror::new());
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        mirror.clone(),
        backend,
        EngineOptions::from_config(&cfg),
    ));
    engine.bootstrap().await;

    AppState {
        config: Arc::new(cfg),
        store,
        mirror,
        engine,
    }
}
