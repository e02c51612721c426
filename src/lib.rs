//! Notify Listener
//!
//! A resilient dispatcher for server-push publish/subscribe notifications.
//!
//! # Overview
//!
//! A [`Listener`] keeps one session open against a notification service and
//! routes every incoming [`Notification`] to the handler registered for its
//! topic. When the session fails it is closed, the listener backs off and
//! opens a fresh one, resubscribing every topic and giving handlers a chance
//! to recover notifications missed while disconnected.
//!
//! This crate provides:
//! - the reconnecting listener and its handler capabilities
//! - an MQTT v5 transport
//! - TOML configuration and structured logging setup
//! - an in-memory broker for tests
//!
//! # Quick Start
//!
//! ```rust
//! use notify_listener::testing::MockBroker;
//! use notify_listener::{BackoffPolicy, Listener};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let broker = MockBroker::new();
//! let mut listener = Listener::new(broker.connector())
//!     .with_backoff(BackoffPolicy::fixed(Duration::from_millis(10)));
//!
//! listener.handle_fn("jobs", |notification, _shutdown| async move {
//!     println!("job {}", notification.payload());
//!     Ok(())
//! });
//!
//! let shutdown = CancellationToken::new();
//! shutdown.cancel();
//! listener.listen(shutdown).await;
//! # });
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod notification;
pub mod observer;
pub mod session;
pub mod testing;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use config::{ConfigError, ListenerConfig};
pub use error::{BoxError, HandlerError, ListenerError};
pub use handler::{handler_fn, BacklogHandler, FnHandler, Handler, HandlerRegistry};
pub use listener::{BacklogFailurePolicy, Listener, ListenerState, ListenerStatus};
pub use notification::Notification;
pub use observer::{ErrorObserver, TracingObserver};
pub use session::{Connector, Session};
pub use transport::mqtt::{MqttConnector, MqttSession};
