//! HTTP collaborator wrapper for the Gatrix backend.
//!
//! The backend is an opaque external system of record; everything the
//! edge needs from it goes through [`BackendApi`], so the sync engine is
//! tested against an in-process fake instead of a live server.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use gatrix_edge_core::{ApiTokenRecord, EntityKind, Environment};

/// Failures talking to the backend. All of these are soft from the sync
/// engine's point of view: the stale cache keeps serving and the failure
/// is recorded per environment.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend transport error: {0}")]
    Transport(String),

    #[error("Backend returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Backend response decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// The environment list, used for discovery when tracking `*`.
    async fn list_environments(&self) -> Result<Vec<Environment>, BackendError>;

    /// Full entity list for one `(environment, kind)` collection.
    async fn list_entities(
        &self,
        environment_id: &str,
        kind: EntityKind,
    ) -> Result<Vec<Value>, BackendError>;

    /// Single entity fetch, used by delta events. `Ok(None)` when the
    /// entity no longer exists (it vanished between event and fetch).
    async fn fetch_entity(
        &self,
        environment_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Value>, BackendError>;

    /// All API token records. Tokens are global entities; their
    /// environment scoping lives inside each record.
    async fn list_api_tokens(&self) -> Result<Vec<ApiTokenRecord>, BackendError>;

    async fn fetch_api_token(&self, id: &str) -> Result<Option<ApiTokenRecord>, BackendError>;
}
