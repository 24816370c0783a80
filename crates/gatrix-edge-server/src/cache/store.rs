//! Per-environment entity collections with atomic replace/delta semantics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;

use gatrix_edge_core::{entity_id_of, now_utc, ChangeKind, EntityKind};

/// One immutable collection snapshot. Readers hold the whole snapshot via
/// `Arc`, so iteration is consistent and restartable even while a writer
/// installs a successor.
#[derive(Debug)]
struct Collection {
    entries: HashMap<String, Arc<Value>>,
    generation: u64,
    updated_at: OffsetDateTime,
}

impl Collection {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            generation: 0,
            updated_at: now_utc(),
        }
    }
}

/// Storage slot for one `(environment, entity kind)` pair.
///
/// The writer mutex serializes mutations to this slot only; distinct
/// pairs mutate concurrently with no shared lock.
struct Slot {
    snapshot: ArcSwap<Collection>,
    writer: Mutex<()>,
}

impl Slot {
    fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Collection::empty()),
            writer: Mutex::new(()),
        }
    }
}

/// Per-environment refresh metadata surfaced by health and admin status.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStatus {
    pub last_refreshed_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

/// The per-environment, per-entity-kind cache.
pub struct CacheStore {
    slots: DashMap<(String, EntityKind), Arc<Slot>>,
    status: DashMap<String, SnapshotStatus>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            status: DashMap::new(),
        }
    }

    /// Start tracking an environment. Idempotent; existing status and
    /// collections are preserved.
    pub fn register_environment(&self, environment_id: &str) {
        self.status
            .entry(environment_id.to_string())
            .or_default();
    }

    /// Drop an environment's snapshot entirely (environment deleted on
    /// the backend while tracking `*`).
    pub fn drop_environment(&self, environment_id: &str) {
        self.status.remove(environment_id);
        self.slots
            .retain(|(env, _), _| env != environment_id);
    }

    pub fn is_tracked(&self, environment_id: &str) -> bool {
        self.status.contains_key(environment_id)
    }

    pub fn tracked_environments(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.status.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn slot(&self, environment_id: &str, kind: EntityKind) -> Arc<Slot> {
        self.slots
            .entry((environment_id.to_string(), kind))
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Look up one entity. `None` for unknown id, kind, or environment.
    pub fn get(&self, environment_id: &str, kind: EntityKind, id: &str) -> Option<Arc<Value>> {
        let slot = self.slots.get(&(environment_id.to_string(), kind))?;
        let snapshot = slot.snapshot.load();
        snapshot.entries.get(id).cloned()
    }

    /// Snapshot-consistent listing of one collection.
    pub fn list(&self, environment_id: &str, kind: EntityKind) -> Vec<Arc<Value>> {
        match self.slots.get(&(environment_id.to_string(), kind)) {
            Some(slot) => {
                let snapshot = slot.snapshot.load();
                snapshot.entries.values().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Atomically replace a whole collection. Readers see either the old
    /// generation or the new one, never a mix and never an empty
    /// collection mid-swap.
    ///
    /// Items without a usable `id` are skipped with a warning rather than
    /// poisoning the swap.
    pub fn replace_all(&self, environment_id: &str, kind: EntityKind, items: Vec<Value>) {
        let slot = self.slot(environment_id, kind);
        let _writer = slot.writer.lock();

        let mut entries = HashMap::with_capacity(items.len());
        for item in items {
            match entity_id_of(&item) {
                Some(id) => {
                    entries.insert(id, Arc::new(item));
                }
                None => {
                    tracing::warn!(
                        environment = %environment_id,
                        entity = %kind,
                        "skipping entity without id in replace_all"
                    );
                }
            }
        }

        let generation = slot.snapshot.load().generation + 1;
        slot.snapshot.store(Arc::new(Collection {
            entries,
            generation,
            updated_at: now_utc(),
        }));
    }

    /// Apply a single-entity mutation.
    ///
    /// Idempotent: re-applying an identical create/update, or deleting an
    /// absent id, leaves the collection (including its generation)
    /// unchanged.
    pub fn apply_delta(
        &self,
        environment_id: &str,
        kind: EntityKind,
        change: ChangeKind,
        id: &str,
        entity: Option<Value>,
    ) {
        let slot = self.slot(environment_id, kind);
        let _writer = slot.writer.lock();

        let current = slot.snapshot.load_full();
        let next_entries = match change {
            ChangeKind::Create | ChangeKind::Update => {
                let Some(entity) = entity else {
                    tracing::warn!(
                        environment = %environment_id,
                        entity = %kind,
                        entity_id = %id,
                        "create/update delta without payload ignored"
                    );
                    return;
                };
                if current
                    .entries
                    .get(id)
                    .is_some_and(|existing| **existing == entity)
                {
                    return;
                }
                let mut entries = current.entries.clone();
                entries.insert(id.to_string(), Arc::new(entity));
                entries
            }
            ChangeKind::Delete => {
                if !current.entries.contains_key(id) {
                    return;
                }
                let mut entries = current.entries.clone();
                entries.remove(id);
                entries
            }
        };

        slot.snapshot.store(Arc::new(Collection {
            entries: next_entries,
            generation: current.generation + 1,
            updated_at: now_utc(),
        }));
    }

    /// Entity counts for one environment, keyed by kind.
    pub fn counts(&self, environment_id: &str) -> BTreeMap<EntityKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in EntityKind::PER_ENVIRONMENT {
            let count = self
                .slots
                .get(&(environment_id.to_string(), kind))
                .map(|slot| slot.snapshot.load().entries.len())
                .unwrap_or(0);
            counts.insert(kind, count);
        }
        counts
    }

    pub fn status(&self, environment_id: &str) -> Option<SnapshotStatus> {
        self.status.get(environment_id).map(|s| s.clone())
    }

    /// Record a successful refresh: clears the error flag.
    pub fn mark_refreshed(&self, environment_id: &str) {
        let mut entry = self.status.entry(environment_id.to_string()).or_default();
        entry.last_refreshed_at = Some(now_utc());
        entry.last_error = None;
    }

    /// Record a soft failure; the last-known-good snapshot keeps serving.
    pub fn mark_error(&self, environment_id: &str, error: impl Into<String>) {
        let mut entry = self.status.entry(environment_id.to_string()).or_default();
        entry.last_error = Some(error.into());
    }

    /// Most recent refresh across all tracked environments, for the admin
    /// status surface.
    pub fn latest_refresh(&self) -> Option<OffsetDateTime> {
        self.status
            .iter()
            .filter_map(|s| s.last_refreshed_at)
            .max()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn world(id: &str, name: &str) -> Value {
        json!({"id": id, "name": name})
    }

    #[test]
    fn replace_all_then_list_and_get() {
        let store = CacheStore::new();
        store.register_environment("dev");

        let items = vec![world("w1", "alpha"), world("w2", "beta")];
        store.replace_all("dev", EntityKind::GameWorld, items);

        let listed = store.list("dev", EntityKind::GameWorld);
        assert_eq!(listed.len(), 2);

        let got = store.get("dev", EntityKind::GameWorld, "w1").unwrap();
        assert_eq!(got["name"], "alpha");
        assert!(store.get("dev", EntityKind::GameWorld, "w9").is_none());
    }

    #[test]
    fn replace_all_swaps_whole_generation() {
        let store = CacheStore::new();
        store.replace_all("dev", EntityKind::Banner, vec![world("b1", "old")]);
        store.replace_all("dev", EntityKind::Banner, vec![world("b2", "new")]);

        assert!(store.get("dev", EntityKind::Banner, "b1").is_none());
        assert_eq!(store.list("dev", EntityKind::Banner).len(), 1);
    }

    #[test]
    fn replace_all_skips_items_without_id() {
        let store = CacheStore::new();
        store.replace_all(
            "dev",
            EntityKind::Notice,
            vec![world("n1", "kept"), json!({"name": "no id"})],
        );
        assert_eq!(store.list("dev", EntityKind::Notice).len(), 1);
    }

    #[test]
    fn apply_delta_create_update_delete() {
        let store = CacheStore::new();
        store.apply_delta(
            "dev",
            EntityKind::GameWorld,
            ChangeKind::Create,
            "w1",
            Some(world("w1", "alpha")),
        );
        assert!(store.get("dev", EntityKind::GameWorld, "w1").is_some());

        store.apply_delta(
            "dev",
            EntityKind::GameWorld,
            ChangeKind::Update,
            "w1",
            Some(world("w1", "renamed")),
        );
        assert_eq!(
            store.get("dev", EntityKind::GameWorld, "w1").unwrap()["name"],
            "renamed"
        );

        store.apply_delta("dev", EntityKind::GameWorld, ChangeKind::Delete, "w1", None);
        assert!(store.get("dev", EntityKind::GameWorld, "w1").is_none());
    }

    #[test]
    fn apply_delta_is_idempotent() {
        let store = CacheStore::new();
        let slot_gen = |store: &CacheStore| {
            store
                .slots
                .get(&("dev".to_string(), EntityKind::Survey))
                .map(|s| s.snapshot.load().generation)
                .unwrap_or(0)
        };

        store.apply_delta(
            "dev",
            EntityKind::Survey,
            ChangeKind::Create,
            "s1",
            Some(world("s1", "poll")),
        );
        let gen_after_create = slot_gen(&store);

        // Same create again: identical state, generation untouched.
        store.apply_delta(
            "dev",
            EntityKind::Survey,
            ChangeKind::Create,
            "s1",
            Some(world("s1", "poll")),
        );
        assert_eq!(slot_gen(&store), gen_after_create);

        // Delete of an absent id is a no-op.
        store.apply_delta("dev", EntityKind::Survey, ChangeKind::Delete, "nope", None);
        assert_eq!(slot_gen(&store), gen_after_create);
        assert_eq!(store.list("dev", EntityKind::Survey).len(), 1);
    }

    #[test]
    fn environments_are_isolated() {
        let store = CacheStore::new();
        store.replace_all("dev", EntityKind::GameWorld, vec![world("w1", "dev world")]);
        store.replace_all("qa", EntityKind::GameWorld, vec![world("w1", "qa world")]);

        assert_eq!(
            store.get("dev", EntityKind::GameWorld, "w1").unwrap()["name"],
            "dev world"
        );
        assert_eq!(
            store.get("qa", EntityKind::GameWorld, "w1").unwrap()["name"],
            "qa world"
        );
    }

    #[test]
    fn drop_environment_removes_everything() {
        let store = CacheStore::new();
        store.register_environment("qa");
        store.replace_all("qa", EntityKind::GameWorld, vec![world("w1", "x")]);
        store.mark_refreshed("qa");

        store.drop_environment("qa");
        assert!(!store.is_tracked("qa"));
        assert!(store.list("qa", EntityKind::GameWorld).is_empty());
        assert!(store.status("qa").is_none());
    }

    #[test]
    fn status_tracks_refresh_and_error() {
        let store = CacheStore::new();
        store.register_environment("dev");
        assert!(store.status("dev").unwrap().last_refreshed_at.is_none());

        store.mark_error("dev", "backend unreachable");
        assert_eq!(
            store.status("dev").unwrap().last_error.as_deref(),
            Some("backend unreachable")
        );

        store.mark_refreshed("dev");
        let status = store.status("dev").unwrap();
        assert!(status.last_refreshed_at.is_some());
        assert!(status.last_error.is_none());
    }

    #[test]
    fn counts_cover_all_per_environment_kinds() {
        let store = CacheStore::new();
        store.replace_all("dev", EntityKind::GameWorld, vec![world("w1", "a"), world("w2", "b")]);
        let counts = store.counts("dev");
        assert_eq!(counts[&EntityKind::GameWorld], 2);
        assert_eq!(counts[&EntityKind::Banner], 0);
        assert_eq!(counts.len(), EntityKind::PER_ENVIRONMENT.len());
    }

    #[test]
    fn list_snapshot_is_stable_across_concurrent_replace() {
        let store = Arc::new(CacheStore::new());
        store.replace_all("dev", EntityKind::Notice, vec![world("n1", "a"), world("n2", "b")]);

        let listed = store.list("dev", EntityKind::Notice);
        store.replace_all("dev", EntityKind::Notice, vec![world("n3", "c")]);

        // The snapshot taken before the swap still holds both entries.
        assert_eq!(listed.len(), 2);
        assert_eq!(store.list("dev", EntityKind::Notice).len(), 1);
    }
}
