use serde::{Deserialize, Serialize};

/// Lifecycle state of the sync engine.
///
/// `Bootstrapping → Ready ⇄ Degraded → ShuttingDown`. Readiness is only
/// ever reported from `Ready`; `Degraded` keeps serving stale data while
/// the event transport is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Bootstrapping,
    Ready,
    Degraded,
    ShuttingDown,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrapping => "bootstrapping",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Whether cached data may be served. Stale data from `Degraded` is
    /// still served; only a bootstrapping or terminating instance is not
    /// a valid read target.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serving_states() {
        assert!(!EngineState::Bootstrapping.is_serving());
        assert!(EngineState::Ready.is_serving());
        assert!(EngineState::Degraded.is_serving());
        assert!(!EngineState::ShuttingDown.is_serving());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&EngineState::ShuttingDown).unwrap();
        assert_eq!(json, "\"shutting_down\"");
    }
}
