use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityKind;

/// Redis channel the backend publishes change notifications on.
pub const EVENT_CHANNEL: &str = "gatrix-sdk-events";

/// The mutation applied by a delta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    fn from_action(action: &str) -> Option<Self> {
        match action {
            "created" => Some(Self::Create),
            "updated" => Some(Self::Update),
            "deleted" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A message consumed from the pub/sub channel.
///
/// `event_type` is the routing key (`game_world.created`,
/// `environment.deleted`, ...). The remaining fields are optional on the
/// wire; which ones are present depends on the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Routed form of a [`SyncEvent`].
///
/// Unknown event types are preserved rather than rejected so that newer
/// backends can add types without breaking older edge instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEventKind {
    EnvironmentCreated,
    EnvironmentDeleted,
    /// Per-entity delta (`game_world.updated`, `api_token.deleted`, ...).
    EntityChanged {
        kind: EntityKind,
        change: ChangeKind,
    },
    /// Coarse event: the whole whitelist collection must be refetched.
    WhitelistUpdated,
    Unknown,
}

impl SyncEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            environment_id: None,
            entity_type: None,
            entity_id: None,
            payload: None,
        }
    }

    pub fn with_environment(mut self, environment_id: impl Into<String>) -> Self {
        self.environment_id = Some(environment_id.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Route the event by its type string.
    pub fn kind(&self) -> SyncEventKind {
        match self.event_type.as_str() {
            "environment.created" => return SyncEventKind::EnvironmentCreated,
            "environment.deleted" => return SyncEventKind::EnvironmentDeleted,
            "whitelist.updated" => return SyncEventKind::WhitelistUpdated,
            _ => {}
        }

        let Some((prefix, action)) = self.event_type.rsplit_once('.') else {
            return SyncEventKind::Unknown;
        };
        match (EntityKind::from_wire_name(prefix), ChangeKind::from_action(action)) {
            (Some(kind), Some(change)) => SyncEventKind::EntityChanged { kind, change },
            _ => SyncEventKind::Unknown,
        }
    }
}
