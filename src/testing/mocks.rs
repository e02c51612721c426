//! In-memory broker, connector and session
//!
//! [`MockBroker`] stands in for the notification service. Each session it
//! opens gets its own delivery queue; [`MockBroker::publish`] pushes to every
//! open session subscribed to the topic at that moment, the way a real
//! pub/sub service drops messages for topics nobody listens to.

use crate::notification::Notification;
use crate::session::{Connector, Session};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures injected by [`MockBroker`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    #[error("mock broker refused the connection")]
    ConnectRefused,

    #[error("mock broker rejected subscription to {0}")]
    SubscribeRejected(String),

    #[error("mock session disconnected")]
    Disconnected,

    #[error("mock session is closed")]
    Closed,
}

type Delivery = Result<Notification, MockError>;

#[derive(Debug)]
struct SessionSlot {
    topics: HashSet<String>,
    sender: mpsc::UnboundedSender<Delivery>,
    open: bool,
    close_calls: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    sessions: Vec<SessionSlot>,
    connect_attempts: u32,
    failing_connects: u32,
    failing_subscribes: u32,
    block_connects: bool,
    block_subscribes: bool,
    subscribe_log: Vec<(usize, String)>,
    published: Vec<Notification>,
}

/// Shared in-memory broker; clones refer to the same broker
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock(&self.state)
    }

    /// Connector that opens sessions on this broker
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            broker: self.clone(),
        }
    }

    /// Open a session directly, bypassing connect failure injection
    pub fn open_session(&self) -> MockSession {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.sessions.len();
        state.sessions.push(SessionSlot {
            topics: HashSet::new(),
            sender,
            open: true,
            close_calls: 0,
        });
        MockSession {
            id,
            broker: self.clone(),
            receiver,
        }
    }

    /// Publish `payload` on `topic`; returns how many sessions received it
    pub fn publish(&self, topic: &str, payload: &str) -> usize {
        self.publish_notification(Notification::new(topic, payload))
    }

    pub fn publish_notification(&self, notification: Notification) -> usize {
        let mut state = self.lock();
        state.published.push(notification.clone());

        let mut delivered = 0;
        for slot in state.sessions.iter().filter(|slot| slot.open) {
            if slot.topics.contains(notification.topic())
                && slot.sender.send(Ok(notification.clone())).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver to every open session whether or not it subscribed the topic
    pub fn inject(&self, notification: Notification) -> usize {
        let state = self.lock();
        state
            .sessions
            .iter()
            .filter(|slot| slot.open && slot.sender.send(Ok(notification.clone())).is_ok())
            .count()
    }

    /// Break every open session: its next receive fails
    pub fn disconnect_all(&self) {
        let state = self.lock();
        for slot in state.sessions.iter().filter(|slot| slot.open) {
            let _ = slot.sender.send(Err(MockError::Disconnected));
        }
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// Reject the next `count` subscribe calls
    pub fn fail_next_subscribes(&self, count: u32) {
        self.lock().failing_subscribes = count;
    }

    /// Make connection attempts hang until the caller gives up
    pub fn block_connects(&self, block: bool) {
        self.lock().block_connects = block;
    }

    /// Make subscribe calls hang until the caller gives up
    pub fn block_subscribes(&self, block: bool) {
        self.lock().block_subscribes = block;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Sessions opened so far, including closed ones
    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Sessions that received at least one close call
    pub fn sessions_closed(&self) -> usize {
        self.lock()
            .sessions
            .iter()
            .filter(|slot| slot.close_calls > 0)
            .count()
    }

    /// Number of `close` calls per session, in opening order
    pub fn close_calls(&self) -> Vec<u32> {
        self.lock()
            .sessions
            .iter()
            .map(|slot| slot.close_calls)
            .collect()
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.iter().filter(|slot| slot.open).count()
    }

    /// Successful subscriptions as `(session index, topic)`, in call order
    pub fn subscriptions(&self) -> Vec<(usize, String)> {
        self.lock().subscribe_log.clone()
    }

    /// Every notification published, delivered or not
    pub fn published(&self) -> Vec<Notification> {
        self.lock().published.clone()
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    // a panicking test thread must not cascade into unrelated assertions
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`Connector`] backed by a [`MockBroker`]
#[derive(Debug, Clone)]
pub struct MockConnector {
    broker: MockBroker,
}

impl MockConnector {
    pub fn broker(&self) -> &MockBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockSession;
    type Error = MockError;

    async fn connect(&self) -> Result<MockSession, MockError> {
        let blocked = {
            let mut state = self.broker.lock();
            state.connect_attempts += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(MockError::ConnectRefused);
            }
            state.block_connects
        };

        if blocked {
            std::future::pending::<()>().await;
        }
        Ok(self.broker.open_session())
    }
}

/// One session on a [`MockBroker`]
#[derive(Debug)]
pub struct MockSession {
    id: usize,
    broker: MockBroker,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl MockSession {
    /// Index of this session in opening order
    pub fn id(&self) -> usize {
        self.id
    }

    /// Topics this session is subscribed to
    pub fn subscribed_topics(&self) -> Vec<String> {
        let state = self.broker.lock();
        let mut topics: Vec<String> = state.sessions[self.id].topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_open(&self) -> bool {
        self.broker.lock().sessions[self.id].open
    }
}

#[async_trait]
impl Session for MockSession {
    type Error = MockError;

    async fn subscribe(&mut self, topic: &str) -> Result<(), MockError> {
        let blocked = {
            let mut state = self.broker.lock();
            if !state.sessions[self.id].open {
                return Err(MockError::Closed);
            }
            if state.failing_subscribes > 0 {
                state.failing_subscribes -= 1;
                return Err(MockError::SubscribeRejected(topic.to_string()));
            }
            state.block_subscribes
        };

        if blocked {
            std::future::pending::<()>().await;
        }

        let mut state = self.broker.lock();
        state.sessions[self.id].topics.insert(topic.to_string());
        state.subscribe_log.push((self.id, topic.to_string()));
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Notification, MockError> {
        if !self.is_open() {
            return Err(MockError::Closed);
        }
        match self.receiver.recv().await {
            Some(delivery) => delivery,
            None => Err(MockError::Closed),
        }
    }

    async fn close(&mut self) {
        let mut state = self.broker.lock();
        let slot = &mut state.sessions[self.id];
        slot.open = false;
        slot.close_calls += 1;
        slot.topics.clear();
    }
}
