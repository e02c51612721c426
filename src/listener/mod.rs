//! Reconnecting topic listener
//!
//! [`Listener::listen`] drives one session at a time through
//! connect → subscribe → backlog recovery → dispatch. Any session-level failure
//! closes the session, waits according to the [`BackoffPolicy`], and starts
//! over with a fresh one. It returns only when the shutdown token is cancelled.
//!
//! ```text
//! Idle → Connecting → Subscribing → RecoveringBacklog → Waiting ⇄ Dispatching
//!            ▲   │          │               │              │
//!            │   └──────────┴───────┬───────┴──────────────┘
//!            │                      ▼
//!        BackingOff ◄──────────── Closing ──► Stopped (shutdown)
//! ```
//!
//! Every blocking step is raced against the shutdown token. Handlers are the
//! exception: a running handler is allowed to finish and should watch the
//! token itself.

pub mod state;

pub use state::{ListenerState, ListenerStatus};

use crate::backoff::BackoffPolicy;
use crate::error::{HandlerError, ListenerError};
use crate::handler::{handler_fn, Handler, HandlerRegistry};
use crate::notification::Notification;
use crate::observer::{ErrorObserver, TracingObserver};
use crate::session::{Connector, Session};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Upper bound on how long closing a session may take
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// What to do when a backlog handler fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklogFailurePolicy {
    /// Treat it as a session failure: close, back off, reconnect
    #[default]
    Reconnect,
    /// Report it and continue with the remaining handlers and live dispatch
    Skip,
}

/// Dispatches notifications from a reconnecting session to topic handlers
pub struct Listener<C: Connector> {
    connector: C,
    handlers: HandlerRegistry<C::Session>,
    backoff: BackoffPolicy,
    backlog_failure: BacklogFailurePolicy,
    observer: Option<Arc<dyn ErrorObserver>>,
    status: watch::Sender<ListenerStatus>,
    running: AtomicBool,
}

impl<C: Connector> Listener<C> {
    pub fn new(connector: C) -> Self {
        let (status, _) = watch::channel(ListenerStatus::default());
        Self {
            connector,
            handlers: HandlerRegistry::new(),
            backoff: BackoffPolicy::default(),
            backlog_failure: BacklogFailurePolicy::default(),
            observer: Some(Arc::new(TracingObserver)),
            status,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_backlog_failure_policy(mut self, policy: BacklogFailurePolicy) -> Self {
        self.backlog_failure = policy;
        self
    }

    /// Replace the default [`TracingObserver`]
    pub fn with_error_observer(mut self, observer: impl ErrorObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn without_error_observer(mut self) -> Self {
        self.observer = None;
        self
    }

    /// Register `handler` for `topic`, replacing any previous handler.
    ///
    /// Registration needs `&mut self` and [`listen`](Self::listen) borrows
    /// `&self`, so the registry cannot change under a running loop.
    /// Only one `listen` call runs at a time; see [`listen`](Self::listen).
    pub fn handle(&mut self, topic: impl Into<String>, handler: impl Handler<C::Session> + 'static) {
        self.handlers.insert(topic, Arc::new(handler));
    }

    /// Register a handler that is also held elsewhere
    pub fn handle_shared(&mut self, topic: impl Into<String>, handler: Arc<dyn Handler<C::Session>>) {
        self.handlers.insert(topic, handler);
    }

    /// Register an async closure as the handler for `topic`
    pub fn handle_fn<F, Fut>(&mut self, topic: impl Into<String>, f: F)
    where
        F: Fn(Notification, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handle(topic, handler_fn(f));
    }

    pub fn handlers(&self) -> &HandlerRegistry<C::Session> {
        &self.handlers
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Current status snapshot
    pub fn status(&self) -> ListenerStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status change
    pub fn subscribe_status(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    /// True while a `listen` call is driving this listener
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Connection, subscription, backlog and receive failures are reported to
    /// the error observer and retried; none of them end the loop. On shutdown
    /// the open session, if any, is closed before returning.
    ///
    /// A listener holds at most one session. A call made while another `listen`
    /// on the same listener is still running logs a warning and returns
    /// without connecting.
    pub async fn listen(&self, shutdown: CancellationToken) {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            warn!("Listener is already running; ignoring concurrent listen call");
            return;
        };

        let span = info_span!("listener", topics = self.handlers.len());
        self.run(shutdown).instrument(span).await
    }

    async fn run(&self, shutdown: CancellationToken) {
        self.status.send_modify(|status| {
            status.consecutive_failures = 0;
            status.sessions_opened = 0;
            status.notifications_dispatched = 0;
            status.handler_errors = 0;
        });

        if self.handlers.is_empty() {
            warn!("No handlers registered; idle until shutdown");
            shutdown.cancelled().await;
            self.set_state(ListenerState::Stopped);
            return;
        }

        let mut driver = Driver {
            listener: self,
            shutdown,
            failures: 0,
        };
        let mut phase = Phase::Connecting;

        loop {
            self.set_state(phase.state());
            phase = match phase {
                Phase::Connecting => driver.connect().await,
                Phase::Subscribing(session) => driver.subscribe(session).await,
                Phase::RecoveringBacklog(session) => driver.recover_backlog(session).await,
                Phase::Waiting(session) => driver.wait(session).await,
                Phase::Dispatching(session, notification) => {
                    driver.dispatch(session, notification).await
                }
                Phase::Closing(session, next) => driver.close(session, next).await,
                Phase::BackingOff => driver.back_off().await,
                Phase::Stopped => break,
            };
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            state::log_transition(status.state, state);
            status.state = state;
            true
        });
    }

    fn report(&self, shutdown: &CancellationToken, error: ListenerError) {
        if let Some(observer) = &self.observer {
            observer.on_error(shutdown, &error);
        }
    }
}

/// Marks a listener as running until dropped, including when the `listen`
/// future is dropped mid-flight
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Where to go once a session is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterClose {
    Reconnect,
    Stop,
}

/// State machine position; owns the session while one is open
enum Phase<S> {
    Connecting,
    Subscribing(S),
    RecoveringBacklog(S),
    Waiting(S),
    Dispatching(S, Notification),
    Closing(S, AfterClose),
    BackingOff,
    Stopped,
}

impl<S> Phase<S> {
    fn state(&self) -> ListenerState {
        match self {
            Phase::Connecting => ListenerState::Connecting,
            Phase::Subscribing(_) => ListenerState::Subscribing,
            Phase::RecoveringBacklog(_) => ListenerState::RecoveringBacklog,
            Phase::Waiting(_) => ListenerState::Waiting,
            Phase::Dispatching(..) => ListenerState::Dispatching,
            Phase::Closing(..) => ListenerState::Closing,
            Phase::BackingOff => ListenerState::BackingOff,
            Phase::Stopped => ListenerState::Stopped,
        }
    }
}

/// Resolve to `None` as soon as `shutdown` is cancelled, otherwise to the
/// output of `future`. Cancellation wins ties.
async fn until_cancelled<F: Future>(shutdown: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        output = future => Some(output),
    }
}

/// Per-`listen` mutable state: one step function per phase
struct Driver<'a, C: Connector> {
    listener: &'a Listener<C>,
    shutdown: CancellationToken,
    failures: u32,
}

impl<'a, C: Connector> Driver<'a, C> {
    fn report(&self, error: ListenerError) {
        self.listener.report(&self.shutdown, error);
    }

    async fn connect(&mut self) -> Phase<C::Session> {
        let listener = self.listener;
        match until_cancelled(&self.shutdown, listener.connector.connect()).await {
            None => Phase::Stopped,
            Some(Ok(session)) => {
                listener.status.send_modify(|status| status.sessions_opened += 1);
                debug!("Session opened");
                Phase::Subscribing(session)
            }
            Some(Err(e)) => {
                self.report(ListenerError::connect(e));
                Phase::BackingOff
            }
        }
    }

    async fn subscribe(&mut self, mut session: C::Session) -> Phase<C::Session> {
        let listener = self.listener;
        let result = until_cancelled(&self.shutdown, async {
            for topic in listener.handlers.topics() {
                session
                    .subscribe(topic)
                    .await
                    .map_err(|e| ListenerError::subscribe(topic, e))?;
                debug!(topic, "Subscribed");
            }
            Ok::<(), ListenerError>(())
        })
        .await;

        match result {
            None => Phase::Closing(session, AfterClose::Stop),
            Some(Ok(())) => Phase::RecoveringBacklog(session),
            Some(Err(e)) => {
                self.report(e);
                Phase::Closing(session, AfterClose::Reconnect)
            }
        }
    }

    async fn recover_backlog(&mut self, mut session: C::Session) -> Phase<C::Session> {
        let listener = self.listener;
        let shutdown = &self.shutdown;
        let result = until_cancelled(shutdown, async {
            for (topic, handler) in listener.handlers.iter() {
                let Some(backlog) = handler.backlog() else {
                    continue;
                };
                debug!(topic, "Recovering backlog");
                if let Err(source) = backlog.recover_backlog(shutdown, topic, &mut session).await {
                    let error = ListenerError::backlog(topic, source);
                    match listener.backlog_failure {
                        BacklogFailurePolicy::Reconnect => return Err(error),
                        BacklogFailurePolicy::Skip => listener.report(shutdown, error),
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            None => Phase::Closing(session, AfterClose::Stop),
            Some(Ok(())) => {
                self.failures = 0;
                listener
                    .status
                    .send_modify(|status| status.consecutive_failures = 0);
                Phase::Waiting(session)
            }
            Some(Err(e)) => {
                self.report(e);
                Phase::Closing(session, AfterClose::Reconnect)
            }
        }
    }

    async fn wait(&mut self, mut session: C::Session) -> Phase<C::Session> {
        match until_cancelled(&self.shutdown, session.next_notification()).await {
            None => Phase::Closing(session, AfterClose::Stop),
            Some(Ok(notification)) => Phase::Dispatching(session, notification),
            Some(Err(e)) => {
                self.report(ListenerError::receive(e));
                Phase::Closing(session, AfterClose::Reconnect)
            }
        }
    }

    async fn dispatch(
        &mut self,
        mut session: C::Session,
        notification: Notification,
    ) -> Phase<C::Session> {
        let listener = self.listener;
        let topic = notification.topic();

        let Some(handler) = listener.handlers.get(topic) else {
            warn!(topic, "Discarding notification for unregistered topic");
            self.report(ListenerError::missing_handler(topic));
            return Phase::Waiting(session);
        };

        debug!(topic, "Dispatching notification");
        let result = handler
            .handle(&self.shutdown, &notification, &mut session)
            .await;

        let failed = result.is_err();
        if let Err(source) = result {
            self.report(ListenerError::handler(topic, source));
        }
        listener.status.send_modify(|status| {
            status.notifications_dispatched += 1;
            if failed {
                status.handler_errors += 1;
            }
        });

        Phase::Waiting(session)
    }

    async fn close(&mut self, mut session: C::Session, next: AfterClose) -> Phase<C::Session> {
        if tokio::time::timeout(CLOSE_TIMEOUT, session.close())
            .await
            .is_err()
        {
            warn!("Session close timed out after {:?}", CLOSE_TIMEOUT);
        }
        drop(session);
        debug!("Session closed");

        match next {
            AfterClose::Reconnect => Phase::BackingOff,
            AfterClose::Stop => Phase::Stopped,
        }
    }

    async fn back_off(&mut self) -> Phase<C::Session> {
        let listener = self.listener;
        let delay = listener.backoff.delay(self.failures);

        info!(
            failures = self.failures,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after delay"
        );

        if until_cancelled(&self.shutdown, tokio::time::sleep(delay))
            .await
            .is_none()
        {
            return Phase::Stopped;
        }

        self.failures = self.failures.saturating_add(1);
        let failures = self.failures;
        listener
            .status
            .send_modify(|status| status.consecutive_failures = failures);
        Phase::Connecting
    }
}
