//! Lifecycle state of the subscriber session.
//!
//! ```text
//! Initialized ──> Connecting ──(success)──> Connected ──(signal)──> ShuttingDown ──> Disconnected
//!                   │  ▲ ▲                        │                     ▲
//!                   └──┘ └──────(session lost)────┘                     │
//!                   failed attempt, after backoff                       │
//!                   └───────────────(signal while connecting)───────────┘
//! ```
//!
//! The controller publishes every transition through a watch channel, so
//! tests and diagnostics can follow the session without polling.

use std::fmt;

/// Represents the current state of the subscriber session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created from configuration; no connection attempt made yet.
    Initialized,

    /// Attempting to connect, or waiting out the backoff between attempts.
    Connecting,

    /// A connect attempt succeeded and messages are being logged.
    Connected,

    /// Shutdown triggered; the disconnect call is in progress.
    ShuttingDown,

    /// Disconnect returned. Terminal.
    Disconnected,
}

impl SessionState {
    /// Returns a short static identifier for the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initialized => "Initialized",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::ShuttingDown => "ShuttingDown",
            SessionState::Disconnected => "Disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// True once shutdown has started; no further transitions except to
    /// `Disconnected` are allowed.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, SessionState::ShuttingDown | SessionState::Disconnected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(SessionState::Initialized.as_str(), "Initialized");
        assert_eq!(SessionState::Connecting.as_str(), "Connecting");
        assert_eq!(SessionState::Connected.to_string(), "Connected");
        assert_eq!(SessionState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(SessionState::Disconnected.to_string(), "Disconnected");
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connecting.is_connected());

        assert!(SessionState::ShuttingDown.is_shutting_down());
        assert!(SessionState::Disconnected.is_shutting_down());
        assert!(!SessionState::Connected.is_shutting_down());

        assert!(SessionState::Disconnected.is_terminal());
        assert!(!SessionState::ShuttingDown.is_terminal());
    }
}
