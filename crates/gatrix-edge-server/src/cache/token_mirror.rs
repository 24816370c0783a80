//! In-memory replica of API token records.
//!
//! The mirror validates every public request with an O(1) map lookup;
//! it is populated exclusively through the sync pipeline (`api_token.*`
//! events or polls) and never consults the backend per request.
//!
//! This is a performance mirror, not a cryptographic boundary: lookups
//! are plain hash-map gets, not constant-time comparisons.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use gatrix_edge_core::ApiTokenRecord;

#[derive(Debug, Default)]
struct MirrorSnapshot {
    by_token: HashMap<String, Arc<ApiTokenRecord>>,
    /// Entity id -> token value, so delta deletes (addressed by entity
    /// id) can evict the token entry.
    by_id: HashMap<String, String>,
}

impl MirrorSnapshot {
    fn build(records: impl IntoIterator<Item = ApiTokenRecord>) -> Self {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.by_id.insert(record.id.clone(), record.token.clone());
            snapshot
                .by_token
                .insert(record.token.clone(), Arc::new(record));
        }
        snapshot
    }
}

pub struct TokenMirror {
    snapshot: ArcSwap<MirrorSnapshot>,
    writer: Mutex<()>,
}

impl TokenMirror {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(MirrorSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Hot-path lookup, executed on every authenticated public request.
    pub fn get(&self, token: &str) -> Option<Arc<ApiTokenRecord>> {
        let snapshot = self.snapshot.load();
        let record = snapshot.by_token.get(token).cloned();
        crate::metrics::record_token_lookup(record.is_some());
        record
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomic full swap from a bootstrap or forced refresh.
    pub fn replace_all(&self, records: Vec<ApiTokenRecord>) {
        let _writer = self.writer.lock();
        self.snapshot.store(Arc::new(MirrorSnapshot::build(records)));
    }

    /// Upsert one record (`api_token.created` / `api_token.updated`).
    ///
    /// A token rotation (same entity id, new token value) evicts the old
    /// token entry so the stale credential stops validating immediately.
    pub fn upsert(&self, record: ApiTokenRecord) {
        let _writer = self.writer.lock();
        let current = self.snapshot.load();

        let mut by_token = current.by_token.clone();
        let mut by_id = current.by_id.clone();

        if let Some(previous_token) = by_id.get(&record.id) {
            if *previous_token != record.token {
                by_token.remove(previous_token);
            }
        }
        by_id.insert(record.id.clone(), record.token.clone());
        by_token.insert(record.token.clone(), Arc::new(record));

        self.snapshot
            .store(Arc::new(MirrorSnapshot { by_token, by_id }));
    }

    /// Remove by backend entity id (`api_token.deleted`). Removing an
    /// unknown id is a no-op.
    pub fn remove_by_id(&self, id: &str) {
        let _writer = self.writer.lock();
        let current = self.snapshot.load();
        let Some(token) = current.by_id.get(id) else {
            return;
        };

        let mut by_token = current.by_token.clone();
        let mut by_id = current.by_id.clone();
        by_token.remove(token);
        by_id.remove(id);

        self.snapshot
            .store(Arc::new(MirrorSnapshot { by_token, by_id }));
    }
}

impl Default for TokenMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, token: &str) -> ApiTokenRecord {
        ApiTokenRecord {
            id: id.into(),
            token: token.into(),
            application_name: "game".into(),
            default_environment_id: "dev".into(),
            allowed_environment_ids: vec![],
        }
    }

    #[test]
    fn replace_all_then_get() {
        let mirror = TokenMirror::new();
        mirror.replace_all(vec![record("1", "t1"), record("2", "t2")]);

        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.get("t1").unwrap().id, "1");
        assert!(mirror.get("unknown").is_none());
    }

    #[test]
    fn upsert_and_remove_by_id() {
        let mirror = TokenMirror::new();
        mirror.upsert(record("1", "t1"));
        assert!(mirror.get("t1").is_some());

        mirror.remove_by_id("1");
        assert!(mirror.get("t1").is_none());
        assert!(mirror.is_empty());

        // Removing an unknown id is a no-op.
        mirror.remove_by_id("1");
        assert!(mirror.is_empty());
    }

    #[test]
    fn token_rotation_evicts_old_value() {
        let mirror = TokenMirror::new();
        mirror.upsert(record("1", "old-token"));
        mirror.upsert(record("1", "new-token"));

        assert!(mirror.get("old-token").is_none());
        assert_eq!(mirror.get("new-token").unwrap().id, "1");
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn replace_all_drops_absent_tokens() {
        let mirror = TokenMirror::new();
        mirror.replace_all(vec![record("1", "t1"), record("2", "t2")]);
        mirror.replace_all(vec![record("2", "t2")]);

        assert!(mirror.get("t1").is_none());
        assert!(mirror.get("t2").is_some());
    }
}
