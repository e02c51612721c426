//! Error observation hook
//!
//! Every non-fatal error the listener absorbs (connect, subscribe, backlog,
//! receive, handler, missing handler) is passed to an [`ErrorObserver`].
//! Observers only watch: whatever they do, the listener's control flow is the
//! same. They also get the listener's shutdown token, so errors raised while
//! shutting down can be told apart from steady-state ones.
//!
//! # Example
//! ```rust
//! use notify_listener::observer::ErrorObserver;
//! use notify_listener::ListenerError;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tokio_util::sync::CancellationToken;
//!
//! struct CountingObserver(AtomicUsize);
//!
//! impl ErrorObserver for CountingObserver {
//!     fn on_error(&self, shutdown: &CancellationToken, _error: &ListenerError) {
//!         if !shutdown.is_cancelled() {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//! }
//! ```

use crate::error::ListenerError;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Receives every error the listener recovers from
pub trait ErrorObserver: Send + Sync {
    /// `shutdown` is the token passed to [`listen`](crate::Listener::listen)
    fn on_error(&self, shutdown: &CancellationToken, error: &ListenerError);
}

impl<F> ErrorObserver for F
where
    F: Fn(&CancellationToken, &ListenerError) + Send + Sync,
{
    fn on_error(&self, shutdown: &CancellationToken, error: &ListenerError) {
        self(shutdown, error)
    }
}

/// Observer that writes errors to `tracing`.
///
/// Session failures are logged at `error`, handler-level problems at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ErrorObserver for TracingObserver {
    fn on_error(&self, shutdown: &CancellationToken, err: &ListenerError) {
        let cause = source_chain(err);
        let shutting_down = shutdown.is_cancelled();
        if err.is_session_failure() && !shutting_down {
            error!(topic = err.topic(), cause = %cause, "{}", err);
        } else {
            warn!(topic = err.topic(), cause = %cause, shutting_down, "{}", err);
        }
    }
}

/// Render the `source()` chain of an error as `a: b: c`
pub fn source_chain(err: &dyn std::error::Error) -> String {
    let mut parts = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
