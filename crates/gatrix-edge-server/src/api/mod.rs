//! HTTP surfaces.
//!
//! Three listeners with distinct trust levels:
//! - public (`EDGE_PORT`): client reads behind mirrored API tokens
//! - internal (`EDGE_PORT + 10`): admin status and forced refresh behind
//!   the bypass secret; never exposed publicly
//! - metrics (`EDGE_METRICS_PORT`): Prometheus scrape target

pub mod auth;
pub mod internal;
pub mod metrics_surface;
pub mod public;

use serde_json::{json, Map, Value};

use gatrix_edge_core::EntityKind;

use crate::cache::CacheStore;

/// Entity kinds surfaced in health/status summaries.
const SUMMARY_KINDS: [EntityKind; 3] = [
    EntityKind::ClientVersion,
    EntityKind::GameWorld,
    EntityKind::StoreProduct,
];

/// Per-kind `{environment: count}` maps for health and admin status.
pub(crate) fn cache_summary(store: &CacheStore) -> Value {
    let environments = store.tracked_environments();
    let mut summary = Map::new();
    for kind in SUMMARY_KINDS {
        let mut by_env = Map::new();
        for environment_id in &environments {
            let count = store.counts(environment_id)[&kind];
            by_env.insert(environment_id.clone(), json!(count));
        }
        summary.insert(kind.summary_key().to_string(), Value::Object(by_env));
    }
    Value::Object(summary)
}
