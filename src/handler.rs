//! Handler capabilities and the topic registry
//!
//! Every handler can handle a notification. A handler may also recover backlog:
//! it advertises that by returning itself from [`Handler::backlog`], which the
//! listener checks once per new session.
//!
//! ```rust
//! use async_trait::async_trait;
//! use notify_listener::handler::{BacklogHandler, Handler};
//! use notify_listener::testing::MockSession;
//! use notify_listener::{HandlerError, Notification};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Jobs;
//!
//! #[async_trait]
//! impl Handler<MockSession> for Jobs {
//!     async fn handle(
//!         &self,
//!         _shutdown: &CancellationToken,
//!         notification: &Notification,
//!         _session: &mut MockSession,
//!     ) -> Result<(), HandlerError> {
//!         println!("job {}", notification.payload());
//!         Ok(())
//!     }
//!
//!     fn backlog(&self) -> Option<&dyn BacklogHandler<MockSession>> {
//!         Some(self)
//!     }
//! }
//!
//! #[async_trait]
//! impl BacklogHandler<MockSession> for Jobs {
//!     async fn recover_backlog(
//!         &self,
//!         _shutdown: &CancellationToken,
//!         _topic: &str,
//!         _session: &mut MockSession,
//!     ) -> Result<(), HandlerError> {
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::HandlerError;
use crate::notification::Notification;
use crate::session::Session;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handles notifications for one topic
#[async_trait]
pub trait Handler<S: Session>: Send + Sync {
    /// Handle a single notification.
    ///
    /// Runs inline on the listener task; the next notification is not read
    /// until this returns. Long waits should observe `shutdown`.
    async fn handle(
        &self,
        shutdown: &CancellationToken,
        notification: &Notification,
        session: &mut S,
    ) -> Result<(), HandlerError>;

    /// Backlog recovery capability, if this handler has one
    fn backlog(&self) -> Option<&dyn BacklogHandler<S>> {
        None
    }
}

/// Catches up on work missed while no session was open
#[async_trait]
pub trait BacklogHandler<S: Session>: Send + Sync {
    /// Called once per new session, after every topic is subscribed and
    /// before any live notification is dispatched.
    async fn recover_backlog(
        &self,
        shutdown: &CancellationToken,
        topic: &str,
        session: &mut S,
    ) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`Handler`] without backlog recovery
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

/// Build a [`FnHandler`] from a closure taking the notification and the
/// listener's shutdown token
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Notification, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler::new(f)
}

#[async_trait]
impl<S, F, Fut> Handler<S> for FnHandler<F>
where
    S: Session,
    F: Fn(Notification, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        shutdown: &CancellationToken,
        notification: &Notification,
        _session: &mut S,
    ) -> Result<(), HandlerError> {
        (self.f)(notification.clone(), shutdown.clone()).await
    }
}

/// Topic to handler mapping, iterated in registration order
pub struct HandlerRegistry<S: Session> {
    entries: Vec<(String, Arc<dyn Handler<S>>)>,
    index: HashMap<String, usize>,
}

impl<S: Session> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert or replace the handler for `topic`.
    ///
    /// A replaced topic keeps its original position.
    pub fn insert(&mut self, topic: impl Into<String>, handler: Arc<dyn Handler<S>>) {
        let topic = topic.into();
        match self.index.get(&topic) {
            Some(&position) => self.entries[position].1 = handler,
            None => {
                self.index.insert(topic.clone(), self.entries.len());
                self.entries.push((topic, handler));
            }
        }
    }

    pub fn get(&self, topic: &str) -> Option<&Arc<dyn Handler<S>>> {
        self.index
            .get(topic)
            .map(|&position| &self.entries[position].1)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.index.contains_key(topic)
    }

    /// Registered topics in registration order
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(topic, _)| topic.as_str())
    }

    /// Handlers in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Handler<S>>)> {
        self.entries
            .iter()
            .map(|(topic, handler)| (topic.as_str(), handler))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Session> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
