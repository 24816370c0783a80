use std::sync::Arc;

use gatrix_edge_config::EdgeConfig;

use crate::cache::{CacheStore, TokenMirror};
use crate::sync::SyncEngine;

/// Shared application state threaded into every HTTP surface.
///
/// All components are explicit instances composed at process start; the
/// API layers are read-only consumers of the store and mirror, and reach
/// the engine only for readiness and forced refresh.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EdgeConfig>,
    pub store: Arc<CacheStore>,
    pub mirror: Arc<TokenMirror>,
    pub engine: Arc<SyncEngine>,
}
