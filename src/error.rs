//! Error types for the notification listener
//!
//! The listener never returns these to its caller. Every error it encounters is
//! classified here and handed to the configured
//! [`ErrorObserver`](crate::observer::ErrorObserver), then absorbed by the
//! reconnect loop.

use thiserror::Error;

/// Boxed error used at collaborator boundaries (transports and handlers)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by notification and backlog handlers
pub type HandlerError = BoxError;

/// Errors observed by a running [`Listener`](crate::listener::Listener)
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("connect failed")]
    Connect(#[source] BoxError),

    #[error("subscribe to topic {topic} failed")]
    Subscribe {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("backlog recovery for topic {topic} failed")]
    Backlog {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("waiting for notification failed")]
    Receive(#[source] BoxError),

    #[error("handler for topic {topic} failed")]
    Handler {
        topic: String,
        #[source]
        source: HandlerError,
    },

    #[error("no handler registered for topic {topic}")]
    MissingHandler { topic: String },
}

impl ListenerError {
    /// True for errors that end the current session and trigger a reconnect.
    ///
    /// Backlog errors count as session failures here even when the listener is
    /// configured to skip them; the policy decides, not the error.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            ListenerError::Connect(_)
                | ListenerError::Subscribe { .. }
                | ListenerError::Backlog { .. }
                | ListenerError::Receive(_)
        )
    }

    /// Topic the error relates to, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            ListenerError::Subscribe { topic, .. }
            | ListenerError::Backlog { topic, .. }
            | ListenerError::Handler { topic, .. }
            | ListenerError::MissingHandler { topic } => Some(topic),
            ListenerError::Connect(_) | ListenerError::Receive(_) => None,
        }
    }

    pub(crate) fn connect<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connect(Box::new(error))
    }

    pub(crate) fn subscribe<E>(topic: &str, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Subscribe {
            topic: topic.to_string(),
            source: Box::new(error),
        }
    }

    pub(crate) fn backlog(topic: &str, source: HandlerError) -> Self {
        Self::Backlog {
            topic: topic.to_string(),
            source,
        }
    }

    pub(crate) fn receive<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Receive(Box::new(error))
    }

    pub(crate) fn handler(topic: &str, source: HandlerError) -> Self {
        Self::Handler {
            topic: topic.to_string(),
            source,
        }
    }

    pub(crate) fn missing_handler(topic: &str) -> Self {
        Self::MissingHandler {
            topic: topic.to_string(),
        }
    }
}
