//! Server lifecycle state.

use serde::Serialize;

/// Server operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    /// Wiring stores and services.
    Starting,
    /// Accepting requests.
    Running,
    /// Draining open connections, refusing new work.
    ShuttingDown,
    Stopped,
}

impl ServerState {
    /// Check if the server is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServerState::Running)
    }

    /// Check if the server is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Starting => "STARTING",
            ServerState::Running => "RUNNING",
            ServerState::ShuttingDown => "SHUTTING_DOWN",
            ServerState::Stopped => "STOPPED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts_requests() {
        assert!(ServerState::Running.accepts_requests());
        assert!(!ServerState::Starting.accepts_requests());
        assert!(!ServerState::ShuttingDown.accepts_requests());
        assert!(ServerState::Stopped.is_terminal());
    }

    #[test]
    fn test_json_matches_as_str() {
        for state in [ServerState::Starting, ServerState::ShuttingDown] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
        }
    }
}
