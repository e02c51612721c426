//! Dispatch tests
//!
//! Notifications reach the handler registered for their topic, in delivery
//! order, and a failing handler never takes the session down with it.


use async_trait::async_trait;
use notify_listener::testing::{MockBroker, MockSession};
use notify_listener::{Handler, HandlerError, Listener, Notification};
use std::sync::{Arc, Mutex};
use test_helpers::{fast_backoff, recv_n, ErrorLog, RunningListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_notifications_reach_their_topic_handlers_in_order() {
    let broker = MockBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut listener = Listener::new(broker.connector()).with_backoff(fast_backoff());
    for topic in ["foo", "bar"] {
        let tx = tx.clone();
        listener.handle_fn(topic, move |notification: Notification, _shutdown| {
            let tx = tx.clone();
            async move {
                tx.send(format!("{}:{}", notification.topic(), notification.payload()))?;
                Ok::<(), HandlerError>(())
            }
        });
    }

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    broker.publish("foo", "1");
    broker.publish("bar", "2");
    broker.publish("foo", "3");

    assert_eq!(recv_n(&mut rx, 3).await, vec!["foo:1", "bar:2", "foo:3"]);

    let listener = running.stop().await;
    assert_eq!(listener.status().notifications_dispatched, 3);
    assert_eq!(broker.sessions_opened(), 1);
    assert_eq!(broker.close_calls(), vec![1]);
}

#[tokio::test]
async fn test_two_topics_two_handlers_end_to_end() {
    let broker = MockBroker::new();
    let (foo_tx, mut foo_rx) = mpsc::unbounded_channel();
    let (bar_tx, mut bar_rx) = mpsc::unbounded_channel();

    let mut listener = Listener::new(broker.connector()).with_backoff(fast_backoff());
    for (topic, tx) in [("foo", foo_tx), ("bar", bar_tx)] {
        listener.handle_fn(topic, move |notification: Notification, _shutdown| {
            let tx = tx.clone();
            async move {
                tx.send(notification.payload().to_string())?;
                Ok::<(), HandlerError>(())
            }
        });
    }

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    for (topic, payload) in [("foo", "a"), ("foo", "b"), ("bar", "c"), ("foo", "d"), ("bar", "e")] {
        assert_eq!(broker.publish(topic, payload), 1);
    }

    assert_eq!(recv_n(&mut foo_rx, 3).await, vec!["a", "b", "d"]);
    assert_eq!(recv_n(&mut bar_rx, 2).await, vec!["c", "e"]);

    let listener = running.stop().await;
    assert!(foo_rx.try_recv().is_err());
    assert!(bar_rx.try_recv().is_err());
    assert_eq!(listener.status().notifications_dispatched, 5);
    assert_eq!(listener.status().handler_errors, 0);
}

#[tokio::test]
async fn test_sender_id_is_passed_through() {
    let broker = MockBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut listener = Listener::new(broker.connector()).with_backoff(fast_backoff());
    listener.handle_fn("jobs", move |notification: Notification, _shutdown| {
        let tx = tx.clone();
        async move {
            tx.send(notification.sender_id())?;
            Ok::<(), HandlerError>(())
        }
    });

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    broker.publish_notification(Notification::new("jobs", "42").with_sender_id(4711));
    broker.publish("jobs", "43");

    assert_eq!(recv_n(&mut rx, 2).await, vec![Some(4711), None]);
    running.stop().await;
}

#[tokio::test]
async fn test_handler_error_is_isolated() {
    let broker = MockBroker::new();
    let errors = ErrorLog::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut listener = Listener::new(broker.connector())
        .with_backoff(fast_backoff())
        .with_error_observer(errors.observer());
    listener.handle_fn("jobs", move |notification: Notification, _shutdown| {
        let tx = tx.clone();
        async move {
            if notification.payload() == "bad" {
                return Err("malformed job".into());
            }
            tx.send(notification.payload().to_string())?;
            Ok::<(), HandlerError>(())
        }
    });

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    broker.publish("jobs", "1");
    broker.publish("jobs", "bad");
    broker.publish("jobs", "2");

    assert_eq!(recv_n(&mut rx, 2).await, vec!["1", "2"]);

    let status = running.wait_for(|s| s.notifications_dispatched == 3).await;
    assert_eq!(status.handler_errors, 1);
    assert_eq!(status.sessions_opened, 1);
    assert_eq!(errors.entries(), vec!["handler for topic jobs failed"]);

    running.stop().await;
    assert_eq!(broker.sessions_opened(), 1);
}

#[tokio::test]
async fn test_unregistered_topic_is_reported_and_skipped() {
    let broker = MockBroker::new();
    let errors = ErrorLog::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut listener = Listener::new(broker.connector())
        .with_backoff(fast_backoff())
        .with_error_observer(errors.observer());
    listener.handle_fn("jobs", move |notification: Notification, _shutdown| {
        let tx = tx.clone();
        async move {
            tx.send(notification.payload().to_string())?;
            Ok::<(), HandlerError>(())
        }
    });

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    assert_eq!(broker.inject(Notification::new("stray", "x")), 1);
    broker.publish("jobs", "after");

    assert_eq!(recv_n(&mut rx, 1).await, vec!["after"]);
    assert_eq!(errors.entries(), vec!["no handler registered for topic stray"]);

    let listener = running.stop().await;
    assert_eq!(listener.status().notifications_dispatched, 1);
    assert_eq!(broker.sessions_opened(), 1);
}

#[tokio::test]
async fn test_last_registration_wins() {
    let broker = MockBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut listener = Listener::new(broker.connector()).with_backoff(fast_backoff());
    let first = tx.clone();
    listener.handle_fn("jobs", move |_n: Notification, _shutdown| {
        let tx = first.clone();
        async move {
            tx.send("first")?;
            Ok::<(), HandlerError>(())
        }
    });
    listener.handle_fn("jobs", move |_n: Notification, _shutdown| {
        let tx = tx.clone();
        async move {
            tx.send("second")?;
            Ok::<(), HandlerError>(())
        }
    });
    assert_eq!(listener.handlers().len(), 1);

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    broker.publish("jobs", "1");
    assert_eq!(recv_n(&mut rx, 1).await, vec!["second"]);
    running.stop().await;
}

/// Records which topics its session was subscribed to when it ran
struct SessionInspector {
    seen: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl Handler<MockSession> for SessionInspector {
    async fn handle(
        &self,
        _shutdown: &CancellationToken,
        _notification: &Notification,
        session: &mut MockSession,
    ) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(session.subscribed_topics());
        Ok(())
    }
}

#[tokio::test]
async fn test_handler_receives_the_live_session() {
    let broker = MockBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut listener = Listener::new(broker.connector()).with_backoff(fast_backoff());
    listener.handle("b", SessionInspector { seen: seen.clone() });
    listener.handle("a", SessionInspector { seen: seen.clone() });

    let mut running = RunningListener::spawn(listener);
    running.wait_until_live(1).await;

    broker.publish("a", "x");
    running.wait_for(|s| s.notifications_dispatched == 1).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec!["a".to_string(), "b".to_string()]]
    );
    running.stop().await;
}
