use thiserror::Error;

/// Errors shared across the edge crates.
///
/// Transport- and surface-specific failures (backend HTTP, Redis, request
/// authorization) have their own enums next to the code that produces
/// them; this covers the model-level failures everything else builds on.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Entity has no usable id: {0}")]
    MissingEntityId(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    pub fn unknown_entity_kind(kind: impl Into<String>) -> Self {
        Self::UnknownEntityKind(kind.into())
    }

    pub fn missing_entity_id(context: impl Into<String>) -> Self {
        Self::MissingEntityId(context.into())
    }
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = CoreError::unknown_entity_kind("gadget");
        assert_eq!(err.to_string(), "Unknown entity kind: gadget");

        let err = CoreError::missing_entity_id("game_world payload");
        assert!(err.to_string().contains("game_world payload"));
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::JsonError(_)));
    }
}
