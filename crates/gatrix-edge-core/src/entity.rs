use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// An environment is the tenant boundary: every cached collection is
/// partitioned by environment id and requests are scoped to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub name: String,
}

impl Environment {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The entity types mirrored from the backend.
///
/// Each kind maps to one cache collection per environment. The wire name
/// (`game_world`) is the prefix used in pub/sub event types, the path
/// segment (`game-worlds`) is used in backend and client URLs, and the
/// summary key (`gameWorlds`) appears in health/status payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    ClientVersion,
    GameWorld,
    PopupNotice,
    Survey,
    Banner,
    Notice,
    StoreProduct,
    Whitelist,
    ApiToken,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::ClientVersion,
        EntityKind::GameWorld,
        EntityKind::PopupNotice,
        EntityKind::Survey,
        EntityKind::Banner,
        EntityKind::Notice,
        EntityKind::StoreProduct,
        EntityKind::Whitelist,
        EntityKind::ApiToken,
    ];

    /// The kinds cached per environment. API tokens are global records
    /// (each carries its own environment scoping) and live in the token
    /// mirror instead of the per-environment collections.
    pub const PER_ENVIRONMENT: [EntityKind; 8] = [
        EntityKind::ClientVersion,
        EntityKind::GameWorld,
        EntityKind::PopupNotice,
        EntityKind::Survey,
        EntityKind::Banner,
        EntityKind::Notice,
        EntityKind::StoreProduct,
        EntityKind::Whitelist,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ClientVersion => "client_version",
            Self::GameWorld => "game_world",
            Self::PopupNotice => "popup_notice",
            Self::Survey => "survey",
            Self::Banner => "banner",
            Self::Notice => "notice",
            Self::StoreProduct => "store_product",
            Self::Whitelist => "whitelist",
            Self::ApiToken => "api_token",
        }
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::ClientVersion => "client-versions",
            Self::GameWorld => "game-worlds",
            Self::PopupNotice => "popup-notices",
            Self::Survey => "surveys",
            Self::Banner => "banners",
            Self::Notice => "notices",
            Self::StoreProduct => "store-products",
            Self::Whitelist => "whitelists",
            Self::ApiToken => "api-tokens",
        }
    }

    pub fn summary_key(&self) -> &'static str {
        match self {
            Self::ClientVersion => "clientVersions",
            Self::GameWorld => "gameWorlds",
            Self::PopupNotice => "popupNotices",
            Self::Survey => "surveys",
            Self::Banner => "banners",
            Self::Notice => "notices",
            Self::StoreProduct => "storeProducts",
            Self::Whitelist => "whitelists",
            Self::ApiToken => "apiTokens",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.wire_name() == name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_name(s).ok_or_else(|| CoreError::unknown_entity_kind(s))
    }
}

/// A mirrored API token. Lives in the token mirror and is sourced from the
/// same sync pipeline as every other entity, never fetched per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTokenRecord {
    /// Backend entity id; delta events address tokens by this, never by
    /// the token value itself.
    pub id: String,
    pub token: String,
    pub application_name: String,
    pub default_environment_id: String,
    #[serde(default)]
    pub allowed_environment_ids: Vec<String>,
}

impl ApiTokenRecord {
    /// Whether this token may read the given environment.
    ///
    /// The default environment is always permitted; the allow-list extends
    /// it for tokens shared across environments.
    pub fn allows_environment(&self, environment_id: &str) -> bool {
        self.default_environment_id == environment_id
            || self
                .allowed_environment_ids
                .iter()
                .any(|id| id == environment_id)
    }
}

/// Extract the cache key of a backend entity.
///
/// Backend payloads carry an `id` field that is either a string or a
/// number; both are accepted and normalized to a string key.
pub fn entity_id_of(entity: &Value) -> Option<String> {
    match entity.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
