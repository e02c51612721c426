//! MQTT v5 implementation of [`Connector`] and [`Session`]
//!
//! Each session owns its own rumqttc client and event loop. The event loop is
//! polled only from inside session calls, so nothing runs in the background
//! and dropping the session drops the connection. Reconnecting is the
//! listener's job; rumqttc's own reconnect-on-poll is never used because a
//! failed poll ends the session.

use super::connection::{configure_mqtt_options, validate_topic, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::notification::Notification;
use crate::session::{Connector, Session};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capacity of the client's request channel
const REQUEST_CAPACITY: usize = 64;

/// How long `close` waits for the DISCONNECT to be flushed
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens MQTT sessions against one broker
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: MqttSection,
}

impl MqttConnector {
    /// Create a connector, checking the broker URL up front
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        super::connection::parse_broker_url(&config.broker_url)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MqttSection {
        &self.config
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Session = MqttSession;
    type Error = MqttError;

    async fn connect(&self) -> Result<MqttSession, MqttError> {
        let options = configure_mqtt_options(&self.config)?;
        let client_id = options.client_id();
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| MqttError::ConnectTimeout(timeout))??;

        info!(
            broker = %self.config.broker_url,
            client_id = %client_id,
            "Connected to MQTT broker"
        );

        Ok(MqttSession {
            client,
            eventloop,
            pending: VecDeque::new(),
            closed: false,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), MqttError> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged => return Ok(()),
            EventRoute::ConnectionRefused(code) => return Err(MqttError::ConnectionRefused(code)),
            route => debug!(target: "mqtt_transport", "Event before ConnAck: {:?}", route),
        }
    }
}

/// One MQTT connection
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Publishes received while waiting for a SubAck
    pending: VecDeque<Notification>,
    closed: bool,
}

impl MqttSession {
    /// Poll the event loop once, mapping failures to session errors
    async fn poll_route(&mut self) -> Result<EventRoute, MqttError> {
        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| MqttError::ConnectionLost(Box::new(e)))?;
        Ok(MessageHandler::route_mqtt_event(&event))
    }
}

#[async_trait]
impl Session for MqttSession {
    type Error = MqttError;

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        if self.closed {
            return Err(MqttError::Closed);
        }
        validate_topic(topic)?;

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        // One subscribe is in flight at a time, so the next SubAck is ours
        loop {
            match self.poll_route().await? {
                EventRoute::SubscriptionConfirmed { rejected, .. } => {
                    if rejected.is_empty() {
                        debug!(target: "mqtt_transport", "Subscribed to {}", topic);
                        return Ok(());
                    }
                    return Err(MqttError::SubscriptionRejected {
                        topic: topic.to_string(),
                        reason: rejected.join(", "),
                    });
                }
                EventRoute::NotificationReceived(notification) => {
                    self.pending.push_back(notification);
                }
                EventRoute::Disconnected(reason) => {
                    warn!(target: "mqtt_transport", "Broker disconnected during subscribe: {}", reason);
                    return Err(MqttError::Disconnected);
                }
                route => debug!(target: "mqtt_transport", "MQTT event: {:?}", route),
            }
        }
    }

    async fn next_notification(&mut self) -> Result<Notification, MqttError> {
        if self.closed {
            return Err(MqttError::Closed);
        }
        if let Some(notification) = self.pending.pop_front() {
            return Ok(notification);
        }

        loop {
            match self.poll_route().await? {
                EventRoute::NotificationReceived(notification) => return Ok(notification),
                EventRoute::Disconnected(reason) => {
                    warn!(target: "mqtt_transport", "Broker disconnected: {}", reason);
                    return Err(MqttError::Disconnected);
                }
                route => debug!(target: "mqtt_transport", "MQTT event: {:?}", route),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();

        if let Err(e) = self.client.disconnect().await {
            debug!(target: "mqtt_transport", "Disconnect request not queued: {}", e);
            return;
        }

        // Flush the DISCONNECT; the broker may already be gone
        let deadline = Instant::now() + CLOSE_FLUSH_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(event)) => {
                    if let EventRoute::DisconnectSent = MessageHandler::route_mqtt_event(&event) {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    debug!(target: "mqtt_transport", "Connection ended during close: {}", e);
                    break;
                }
                Err(_) => {
                    debug!(target: "mqtt_transport", "DISCONNECT not flushed within {:?}", CLOSE_FLUSH_TIMEOUT);
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT session closed");
    }
}
