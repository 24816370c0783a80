//! Redis pub/sub transport for event-mode sync.
//!
//! A dedicated `redis::Client` connection is used for SUBSCRIBE (pooled
//! connections cannot subscribe). The consumer task owns reconnection:
//! it emits `Connected`/`Disconnected` edges into the engine's stream so
//! the engine can degrade and resync; it never interprets events itself.

use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gatrix_edge_core::{SyncEvent, EVENT_CHANNEL};

use super::StreamItem;

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RedisTransportError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Redis message error: {0}")]
    Message(String),

    #[error("Redis pub/sub stream ended")]
    StreamEnded,
}

/// Spawns the pub/sub consumer and hands back the stream the engine
/// consumes. The task exits when `cancel` fires or the engine drops the
/// receiver.
pub struct RedisEventStream;

impl RedisEventStream {
    pub fn spawn(redis_url: String, cancel: CancellationToken) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            consume(redis_url, tx, cancel).await;
        });
        rx
    }
}

async fn consume(redis_url: String, tx: mpsc::Sender<StreamItem>, cancel: CancellationToken) {
    let mut backoff = RECONNECT_BACKOFF_INITIAL;
    let mut was_connected = false;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = subscribe_once(&redis_url, &tx, &mut backoff, &mut was_connected) => result,
        };
        match result {
            Ok(()) => return, // receiver dropped, engine is gone
            Err(e) => {
                if was_connected {
                    if tx.send(StreamItem::Disconnected).await.is_err() {
                        return;
                    }
                    was_connected = false;
                }
                tracing::error!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "event subscription lost, reconnecting"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

/// One subscription attempt: connect, subscribe, announce `Connected`,
/// then pump messages until the connection drops. `was_connected` flips
/// only once the subscription is established, so failed connect attempts
/// never produce a spurious `Disconnected`.
async fn subscribe_once(
    redis_url: &str,
    tx: &mpsc::Sender<StreamItem>,
    backoff: &mut Duration,
    was_connected: &mut bool,
) -> Result<(), RedisTransportError> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| RedisTransportError::Connection(e.to_string()))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| RedisTransportError::Connection(e.to_string()))?;
    pubsub
        .subscribe(EVENT_CHANNEL)
        .await
        .map_err(|e| RedisTransportError::Subscribe(e.to_string()))?;

    tracing::info!(channel = EVENT_CHANNEL, "subscribed to event channel");
    *backoff = RECONNECT_BACKOFF_INITIAL;
    *was_connected = true;
    if tx.send(StreamItem::Connected).await.is_err() {
        return Ok(());
    }

    let mut stream = pubsub.on_message();
    loop {
        match stream.next().await {
            Some(msg) => {
                let payload: String = msg
                    .get_payload()
                    .map_err(|e| RedisTransportError::Message(e.to_string()))?;
                match serde_json::from_str::<SyncEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(StreamItem::Event(event)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            payload = %payload,
                            "failed to decode event payload"
                        );
                    }
                }
            }
            None => return Err(RedisTransportError::StreamEnded),
        }
    }
}
