//! Cache freshness orchestration.
//!
//! The engine owns the `Bootstrapping → Ready ⇄ Degraded → ShuttingDown`
//! state machine and is the only writer of the cache store and token
//! mirror. Both sync modes funnel into the same mutation surface:
//! pub/sub deltas and poll ticks end up in `replace_all`/`apply_delta`,
//! so the state machine is driven identically by the Redis transport and
//! by an in-process fake channel in tests.

pub mod engine;
pub mod redis;

pub use engine::{EngineOptions, RefreshOutcome, SyncEngine};
pub use self::redis::RedisEventStream;

use gatrix_edge_core::SyncEvent;

/// What the event transport feeds the engine.
///
/// Connection edges are first-class items: the reconnect-then-resync rule
/// is the central correctness guarantee of event mode, so the engine must
/// see transport state changes in-band with the events themselves.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// Subscription established (initial connect or reconnect).
    Connected,
    /// A message from the shared channel.
    Event(SyncEvent),
    /// Subscription lost; events published from now on are missed.
    Disconnected,
}
