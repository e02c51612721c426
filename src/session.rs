//! Transport abstraction the listener drives
//!
//! A [`Connector`] opens [`Session`]s; the listener owns each session for its
//! whole lifetime and closes it exactly once. Implementations are expected to
//! be cancel-safe: the listener races every call here against its shutdown
//! token and drops the future when shutdown wins.

use crate::notification::Notification;
use async_trait::async_trait;

/// Opens notification sessions against the remote service
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open one new session
    async fn connect(&self) -> Result<Self::Session, Self::Error>;
}

/// One live connection to the notification service
#[async_trait]
pub trait Session: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register server-side interest in `topic`
    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Wait until the next notification arrives or the session fails
    async fn next_notification(&mut self) -> Result<Notification, Self::Error>;

    /// Release the session. Must be idempotent.
    async fn close(&mut self);
}
