//! The sync engine: bootstrap, event dispatch, polling, forced refresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use gatrix_edge_config::{EdgeConfig, EnvironmentSelection, ResyncScope, SyncMethod};
use gatrix_edge_core::{now_utc, ChangeKind, EngineState, EntityKind, SyncEvent, SyncEventKind};

use crate::backend::BackendApi;
use crate::cache::{CacheStore, TokenMirror};
use crate::sync::StreamItem;

/// Backoff bounds for bootstrap retries and reconnect resync retries.
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Engine settings extracted from [`EdgeConfig`] so tests can construct
/// an engine without a full configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub environments: EnvironmentSelection,
    pub sync_method: SyncMethod,
    pub polling_interval: Duration,
    pub staleness_threshold: Duration,
    pub resync_scope: ResyncScope,
}

impl EngineOptions {
    pub fn from_config(cfg: &EdgeConfig) -> Self {
        Self {
            environments: cfg.environments.clone(),
            sync_method: cfg.sync_method,
            polling_interval: cfg.polling_interval,
            staleness_threshold: cfg.staleness_threshold,
            resync_scope: cfg.resync_scope,
        }
    }
}

/// Result of one full refresh pass, returned to forced-refresh callers
/// and reported by the internal API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub refreshed: Vec<String>,
    pub failed: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_error: Option<String>,
    pub duration_ms: u64,
}

impl RefreshOutcome {
    fn interrupted() -> Self {
        Self {
            refreshed: Vec::new(),
            failed: BTreeMap::new(),
            discovery_error: Some("refresh interrupted".into()),
            token_error: None,
            duration_ms: 0,
        }
    }

    /// A pass good enough to serve from: discovery worked and either at
    /// least one environment refreshed or there was nothing to refresh.
    pub fn serviceable(&self) -> bool {
        self.discovery_error.is_none()
            && (!self.refreshed.is_empty() || self.failed.is_empty())
    }
}

/// Readiness as reported by `/health/ready`.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub ready: bool,
    pub state: EngineState,
    pub stale: bool,
}

pub struct SyncEngine {
    store: Arc<CacheStore>,
    mirror: Arc<TokenMirror>,
    backend: Arc<dyn BackendApi>,
    options: EngineOptions,
    state_tx: watch::Sender<EngineState>,
    /// Instant of the last successful sync activity (full refresh or
    /// applied event). Drives the staleness readiness policy.
    last_sync: Mutex<Instant>,
    /// When the event transport dropped, for scope=stale resyncs.
    degraded_since: Mutex<Option<OffsetDateTime>>,
    /// Single-flight slot: `Some` while a refresh is in flight; joiners
    /// subscribe and observe the same completion.
    refresh_slot: Mutex<Option<broadcast::Sender<RefreshOutcome>>>,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        store: Arc<CacheStore>,
        mirror: Arc<TokenMirror>,
        backend: Arc<dyn BackendApi>,
        options: EngineOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Bootstrapping);
        Self {
            store,
            mirror,
            backend,
            options,
            state_tx,
            last_sync: Mutex::new(Instant::now()),
            degraded_since: Mutex::new(None),
            refresh_slot: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn sync_method(&self) -> SyncMethod {
        self.options.sync_method
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&self, next: EngineState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        tracing::info!(from = %previous, to = %next, "engine state transition");
        self.state_tx.send_replace(next);
    }

    fn touch(&self) {
        *self.last_sync.lock() = Instant::now();
    }

    pub fn readiness(&self) -> Readiness {
        let state = self.state();
        let stale = !self.options.staleness_threshold.is_zero()
            && self.last_sync.lock().elapsed() > self.options.staleness_threshold;
        Readiness {
            ready: state.is_serving() && !stale,
            state,
            stale,
        }
    }

    /// Request shutdown: background loops stop, in-flight work gets the
    /// grace period the caller chooses to wait.
    pub fn shutdown(&self) {
        self.set_state(EngineState::ShuttingDown);
        self.cancel.cancel();
    }

    /// Run the engine to completion: bootstrap, then the configured sync
    /// mode until shutdown. `events` must be `Some` in event mode.
    pub fn start(
        self: Arc<Self>,
        events: Option<mpsc::Receiver<StreamItem>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.bootstrap().await;
            if self.cancel.is_cancelled() {
                return;
            }
            match self.options.sync_method {
                SyncMethod::Event => match events {
                    Some(rx) => self.run_event_loop(rx).await,
                    None => {
                        tracing::error!("event sync configured without a transport");
                    }
                },
                SyncMethod::Polling => self.run_polling_loop().await,
                SyncMethod::Manual => self.cancel.cancelled().await,
            }
        })
    }

    /// Populate every tracked environment before reporting Ready.
    ///
    /// Retries with backoff while the backend is entirely unreachable;
    /// a partial bootstrap (some environments failed) still flips Ready
    /// with the failed environments error-flagged, matching the
    /// soft-failure rule of the polling path.
    pub async fn bootstrap(&self) {
        let mut backoff = RETRY_BACKOFF_INITIAL;
        loop {
            // Through the single-flight gate: a forced refresh arriving
            // during bootstrap joins this pass instead of doubling it.
            let outcome = self.force_refresh("bootstrap").await;
            if outcome.serviceable() {
                self.set_state(EngineState::Ready);
                tracing::info!(
                    environments = outcome.refreshed.len(),
                    tokens = self.mirror.len(),
                    "bootstrap complete"
                );
                return;
            }
            tracing::warn!(
                error = outcome.discovery_error.as_deref().unwrap_or("all environments failed"),
                backoff_secs = backoff.as_secs(),
                "bootstrap failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
        }
    }

    /// Forced refresh with single-flight semantics: concurrent callers
    /// collapse into one backend fetch sequence and every caller
    /// observes that run's completion.
    pub async fn force_refresh(&self, trigger: &'static str) -> RefreshOutcome {
        let joined = {
            let mut slot = self.refresh_slot.lock();
            match slot.as_ref() {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *slot = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = joined {
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => RefreshOutcome::interrupted(),
            };
        }

        let outcome = self.refresh_all(trigger).await;
        if outcome.serviceable() {
            self.touch();
        }
        let tx = self.refresh_slot.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    /// One full refresh pass: reconcile the tracked environment set,
    /// replace every per-environment collection, then the token mirror.
    async fn refresh_all(&self, trigger: &'static str) -> RefreshOutcome {
        let started = Instant::now();
        let mut outcome = RefreshOutcome {
            refreshed: Vec::new(),
            failed: BTreeMap::new(),
            discovery_error: None,
            token_error: None,
            duration_ms: 0,
        };

        let environments = match self.resolve_environments().await {
            Ok(ids) => ids,
            Err(message) => {
                outcome.discovery_error = Some(message);
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };
        crate::metrics::record_tracked_environments(environments.len());

        for environment_id in &environments {
            match self.refresh_environment(environment_id).await {
                Ok(()) => {
                    self.store.mark_refreshed(environment_id);
                    outcome.refreshed.push(environment_id.clone());
                }
                Err(message) => {
                    tracing::warn!(
                        environment = %environment_id,
                        error = %message,
                        "environment refresh failed, keeping last-known-good snapshot"
                    );
                    self.store.mark_error(environment_id, message.clone());
                    crate::metrics::record_sync_failure(environment_id);
                    outcome.failed.insert(environment_id.clone(), message);
                }
            }
        }

        match self.backend.list_api_tokens().await {
            Ok(records) => self.mirror.replace_all(records),
            Err(e) => {
                tracing::warn!(error = %e, "api token refresh failed, keeping mirrored set");
                outcome.token_error = Some(e.to_string());
            }
        }

        crate::metrics::record_sync_cycle(trigger);
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Resolve the tracked environment set, registering additions and
    /// dropping removals when tracking `*`.
    async fn resolve_environments(&self) -> Result<Vec<String>, String> {
        match &self.options.environments {
            EnvironmentSelection::Explicit(ids) => {
                for id in ids {
                    self.store.register_environment(id);
                }
                Ok(ids.clone())
            }
            EnvironmentSelection::All => {
                let discovered = self
                    .backend
                    .list_environments()
                    .await
                    .map_err(|e| e.to_string())?;
                let ids: Vec<String> = discovered.into_iter().map(|e| e.id).collect();

                for tracked in self.store.tracked_environments() {
                    if !ids.contains(&tracked) {
                        tracing::info!(environment = %tracked, "environment removed, dropping snapshot");
                        self.store.drop_environment(&tracked);
                    }
                }
                for id in &ids {
                    self.store.register_environment(id);
                }
                Ok(ids)
            }
        }
    }

    async fn refresh_environment(&self, environment_id: &str) -> Result<(), String> {
        for kind in EntityKind::PER_ENVIRONMENT {
            let items = self
                .backend
                .list_entities(environment_id, kind)
                .await
                .map_err(|e| e.to_string())?;
            crate::metrics::record_cache_entries(environment_id, kind.summary_key(), items.len());
            self.store.replace_all(environment_id, kind, items);
        }
        Ok(())
    }

    /// Event-mode main loop. Consumes the transport stream; connection
    /// edges drive the Ready ⇄ Degraded transitions.
    pub async fn run_event_loop(&self, mut events: mpsc::Receiver<StreamItem>) {
        let mut needs_resync = false;
        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return,
                item = events.recv() => item,
            };
            match item {
                None => return,
                Some(StreamItem::Connected) => {
                    if needs_resync {
                        self.resync_after_reconnect().await;
                        needs_resync = false;
                    }
                }
                Some(StreamItem::Disconnected) => {
                    tracing::warn!("event transport lost, serving stale data until resync");
                    *self.degraded_since.lock() = Some(now_utc());
                    needs_resync = true;
                    if self.state() == EngineState::Ready {
                        self.set_state(EngineState::Degraded);
                    }
                }
                Some(StreamItem::Event(event)) => self.handle_event(event).await,
            }
        }
    }

    /// Missed events cannot be replayed, so correctness after a
    /// reconnect is restored only by refreshing from the backend. Ready
    /// is reported again strictly after the resync lands.
    async fn resync_after_reconnect(&self) {
        let mut backoff = RETRY_BACKOFF_INITIAL;
        loop {
            let outcome = match self.options.resync_scope {
                ResyncScope::Full => self.force_refresh("resync").await,
                ResyncScope::Stale => self.resync_stale().await,
            };
            if outcome.serviceable() {
                self.touch();
                self.set_state(EngineState::Ready);
                tracing::info!(
                    refreshed = outcome.refreshed.len(),
                    "resync after reconnect complete"
                );
                return;
            }
            tracing::warn!(
                error = outcome.discovery_error.as_deref().unwrap_or("all environments failed"),
                backoff_secs = backoff.as_secs(),
                "resync failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
        }
    }

    /// Scope=stale resync: refresh only environments whose last
    /// successful refresh predates the disconnect. Tokens are always
    /// refreshed; the mirror has no per-environment timestamps.
    async fn resync_stale(&self) -> RefreshOutcome {
        let since = *self.degraded_since.lock();
        let started = Instant::now();
        let mut outcome = RefreshOutcome {
            refreshed: Vec::new(),
            failed: BTreeMap::new(),
            discovery_error: None,
            token_error: None,
            duration_ms: 0,
        };

        for environment_id in self.store.tracked_environments() {
            let fresh_enough = match (since, self.store.status(&environment_id)) {
                (Some(since), Some(status)) => status
                    .last_refreshed_at
                    .is_some_and(|refreshed| refreshed > since),
                _ => false,
            };
            if fresh_enough {
                continue;
            }
            match self.refresh_environment(&environment_id).await {
                Ok(()) => {
                    self.store.mark_refreshed(&environment_id);
                    outcome.refreshed.push(environment_id);
                }
                Err(message) => {
                    self.store.mark_error(&environment_id, message.clone());
                    crate::metrics::record_sync_failure(&environment_id);
                    outcome.failed.insert(environment_id, message);
                }
            }
        }

        if let Err(e) = self
            .backend
            .list_api_tokens()
            .await
            .map(|records| self.mirror.replace_all(records))
        {
            outcome.token_error = Some(e.to_string());
        }

        crate::metrics::record_sync_cycle("resync");
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Dispatch one pub/sub event into the mutation surface.
    async fn handle_event(&self, event: SyncEvent) {
        crate::metrics::record_sync_event(&event.event_type);
        match event.kind() {
            SyncEventKind::EntityChanged {
                kind: EntityKind::ApiToken,
                change,
            } => self.handle_token_event(&event, change).await,
            SyncEventKind::EntityChanged { kind, change } => {
                self.handle_entity_event(&event, kind, change).await
            }
            SyncEventKind::WhitelistUpdated => self.handle_whitelist_event(&event).await,
            SyncEventKind::EnvironmentCreated | SyncEventKind::EnvironmentDeleted => {
                self.handle_environment_event().await
            }
            SyncEventKind::Unknown => {
                tracing::debug!(event_type = %event.event_type, "ignoring unknown event type");
            }
        }
    }

    async fn handle_token_event(&self, event: &SyncEvent, change: ChangeKind) {
        let Some(id) = event.entity_id.as_deref() else {
            tracing::warn!(event_type = %event.event_type, "token event without entity id");
            return;
        };
        match change {
            ChangeKind::Delete => {
                self.mirror.remove_by_id(id);
                self.touch();
            }
            ChangeKind::Create | ChangeKind::Update => {
                match self.backend.fetch_api_token(id).await {
                    Ok(Some(record)) => {
                        self.mirror.upsert(record);
                        self.touch();
                    }
                    // The token vanished between event and fetch.
                    Ok(None) => {
                        self.mirror.remove_by_id(id);
                        self.touch();
                    }
                    Err(e) => {
                        tracing::warn!(token_id = %id, error = %e, "token fetch failed");
                    }
                }
            }
        }
    }

    async fn handle_entity_event(&self, event: &SyncEvent, kind: EntityKind, change: ChangeKind) {
        let Some(environment_id) = event.environment_id.as_deref() else {
            tracing::warn!(event_type = %event.event_type, "entity event without environment id");
            return;
        };
        if !self.store.is_tracked(environment_id) {
            tracing::debug!(
                environment = %environment_id,
                event_type = %event.event_type,
                "event for untracked environment ignored"
            );
            return;
        }
        let Some(id) = event.entity_id.as_deref() else {
            tracing::warn!(event_type = %event.event_type, "entity event without entity id");
            return;
        };

        match change {
            ChangeKind::Delete => {
                self.store
                    .apply_delta(environment_id, kind, ChangeKind::Delete, id, None);
                self.touch();
            }
            ChangeKind::Create | ChangeKind::Update => {
                match self.backend.fetch_entity(environment_id, kind, id).await {
                    Ok(Some(entity)) => {
                        self.store
                            .apply_delta(environment_id, kind, change, id, Some(entity));
                        self.touch();
                    }
                    Ok(None) => {
                        self.store
                            .apply_delta(environment_id, kind, ChangeKind::Delete, id, None);
                        self.touch();
                    }
                    Err(e) => {
                        tracing::warn!(
                            environment = %environment_id,
                            entity = %kind,
                            entity_id = %id,
                            error = %e,
                            "entity fetch failed"
                        );
                        self.store.mark_error(environment_id, e.to_string());
                    }
                }
            }
        }
    }

    /// Whitelist events are coarse: no entity id, so the whole
    /// collection is refetched and swapped.
    async fn handle_whitelist_event(&self, event: &SyncEvent) {
        let Some(environment_id) = event.environment_id.as_deref() else {
            tracing::warn!("whitelist event without environment id");
            return;
        };
        if !self.store.is_tracked(environment_id) {
            return;
        }
        match self
            .backend
            .list_entities(environment_id, EntityKind::Whitelist)
            .await
        {
            Ok(items) => {
                self.store
                    .replace_all(environment_id, EntityKind::Whitelist, items);
                self.touch();
            }
            Err(e) => {
                tracing::warn!(environment = %environment_id, error = %e, "whitelist refresh failed");
                self.store.mark_error(environment_id, e.to_string());
            }
        }
    }

    /// Environment lifecycle events reconcile the tracked set against
    /// the backend's list; new environments bootstrap immediately.
    async fn handle_environment_event(&self) {
        if self.options.environments != EnvironmentSelection::All {
            tracing::debug!("environment event ignored, tracked set is explicit");
            return;
        }
        let known: Vec<String> = self.store.tracked_environments();
        match self.resolve_environments().await {
            Ok(ids) => {
                for id in ids {
                    if !known.contains(&id) {
                        tracing::info!(environment = %id, "new environment discovered, bootstrapping");
                        match self.refresh_environment(&id).await {
                            Ok(()) => self.store.mark_refreshed(&id),
                            Err(message) => self.store.mark_error(&id, message),
                        }
                    }
                }
                self.touch();
            }
            Err(e) => {
                tracing::warn!(error = %e, "environment reconciliation failed");
            }
        }
    }

    /// Polling-mode main loop: every tick is a full refresh through the
    /// single-flight gate, so ticks and forced refreshes never overlap.
    pub async fn run_polling_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.polling_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; bootstrap just refreshed.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.force_refresh("poll").await;
                }
            }
        }
    }
}
