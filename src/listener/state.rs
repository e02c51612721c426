//! Listener states and the status snapshot published to observers

use std::fmt;
use tracing::{debug, info};

/// Phase of the listener's connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerState {
    /// Created, `listen` not yet running
    Idle,
    /// Opening a session
    Connecting,
    /// Subscribing every registered topic
    Subscribing,
    /// Running backlog handlers on the fresh session
    RecoveringBacklog,
    /// Blocked on the next notification
    Waiting,
    /// A handler is running
    Dispatching,
    /// Releasing the current session
    Closing,
    /// Sleeping before the next connect attempt
    BackingOff,
    /// Shut down; terminal
    Stopped,
}

impl ListenerState {
    /// True while a fully established session is delivering notifications
    pub fn is_live(self) -> bool {
        matches!(self, ListenerState::Waiting | ListenerState::Dispatching)
    }

    /// True while a session is open
    pub fn has_session(self) -> bool {
        matches!(
            self,
            ListenerState::Subscribing
                | ListenerState::RecoveringBacklog
                | ListenerState::Waiting
                | ListenerState::Dispatching
                | ListenerState::Closing
        )
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Idle => "idle",
            ListenerState::Connecting => "connecting",
            ListenerState::Subscribing => "subscribing",
            ListenerState::RecoveringBacklog => "recovering_backlog",
            ListenerState::Waiting => "waiting",
            ListenerState::Dispatching => "dispatching",
            ListenerState::Closing => "closing",
            ListenerState::BackingOff => "backing_off",
            ListenerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Snapshot of a listener, published on every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStatus {
    pub state: ListenerState,
    /// Failures since the last fully established session
    pub consecutive_failures: u32,
    /// Sessions opened since `listen` started
    pub sessions_opened: u64,
    /// Notifications handed to a handler
    pub notifications_dispatched: u64,
    /// Handler invocations that returned an error
    pub handler_errors: u64,
}

impl Default for ListenerStatus {
    fn default() -> Self {
        Self {
            state: ListenerState::Idle,
            consecutive_failures: 0,
            sessions_opened: 0,
            notifications_dispatched: 0,
            handler_errors: 0,
        }
    }
}

/// Log a state transition
pub(crate) fn log_transition(from: ListenerState, to: ListenerState) {
    match (from, to) {
        (ListenerState::RecoveringBacklog, ListenerState::Waiting) => {
            info!("Session established, dispatching notifications");
        }
        (ListenerState::Waiting, ListenerState::Closing) => {
            info!("Session ending");
        }
        (_, ListenerState::Stopped) => {
            info!("Listener stopped");
        }
        // Waiting <-> Dispatching happens per notification
        (ListenerState::Waiting, ListenerState::Dispatching)
        | (ListenerState::Dispatching, ListenerState::Waiting) => {}
        _ => {
            debug!("Listener state: {} -> {}", from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_states() {
        assert!(ListenerState::Waiting.is_live());
        assert!(ListenerState::Dispatching.is_live());
        assert!(!ListenerState::RecoveringBacklog.is_live());
        assert!(!ListenerState::BackingOff.is_live());
        assert!(!ListenerState::Stopped.is_live());
    }

    #[test]
    fn test_session_states() {
        assert!(ListenerState::Subscribing.has_session());
        assert!(ListenerState::Closing.has_session());
        assert!(!ListenerState::Connecting.has_session());
        assert!(!ListenerState::BackingOff.has_session());
        assert!(!ListenerState::Idle.has_session());
    }

    #[test]
    fn test_display() {
        assert_eq!(ListenerState::RecoveringBacklog.to_string(), "recovering_backlog");
        assert_eq!(ListenerState::BackingOff.to_string(), "backing_off");
    }

    #[test]
    fn test_default_status() {
        let status = ListenerStatus::default();
        assert_eq!(status.state, ListenerState::Idle);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.sessions_opened, 0);
    }
}
