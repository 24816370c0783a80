pub mod entity;
pub mod error;
pub mod event;
pub mod state;
pub mod time;

pub use entity::{ApiTokenRecord, EntityKind, Environment, entity_id_of};
pub use error::{CoreError, Result};
pub use event::{ChangeKind, SyncEvent, SyncEventKind, EVENT_CHANNEL};
pub use state::EngineState;
pub use self::time::{format_rfc3339, now_utc};
