//! Pure routing of MQTT events
//!
//! The session's poll loops only decide what to do with a routed event; the
//! decoding of rumqttc packets happens here.

use crate::notification::Notification;
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, Packet, Publish, PublishProperties, SubscribeReasonCode,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// User property carrying the publisher's numeric id
pub const SENDER_ID_PROPERTY: &str = "sender-id";

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the action a session takes for it
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => {
                    if matches!(connack.code, ConnectReturnCode::Success) {
                        EventRoute::ConnectionAcknowledged
                    } else {
                        EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                    }
                }
                Packet::Publish(publish) => {
                    EventRoute::NotificationReceived(Self::notification_from_publish(publish))
                }
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: Self::rejected_reason_codes(&suback.return_codes),
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Convert an incoming publish into a notification
    ///
    /// Non-UTF-8 bytes in topic or payload are replaced, never rejected.
    pub fn notification_from_publish(publish: &Publish) -> Notification {
        let topic = String::from_utf8_lossy(&publish.topic).into_owned();
        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
        let notification = Notification::new(topic, payload);

        match publish.properties.as_ref().and_then(Self::sender_id) {
            Some(sender_id) => notification.with_sender_id(sender_id),
            None => notification,
        }
    }

    /// Extract the `sender-id` user property, if present and numeric
    pub fn sender_id(properties: &PublishProperties) -> Option<u32> {
        properties
            .user_properties
            .iter()
            .find(|(key, _)| key == SENDER_ID_PROPERTY)
            .and_then(|(_, value)| value.trim().parse().ok())
    }

    /// Reason codes that denote a refused subscription, formatted for errors
    pub fn rejected_reason_codes(codes: &[SubscribeReasonCode]) -> Vec<String> {
        codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .map(|code| format!("{code:?}"))
            .collect()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to subscribe
    ConnectionAcknowledged,
    /// ConnAck with a failure code
    ConnectionRefused(String),
    /// Publish on a subscribed topic
    NotificationReceived(Notification),
    /// SubAck; `rejected` lists the failure codes, empty on success
    SubscriptionConfirmed { packet_id: u16, rejected: Vec<String> },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Our DISCONNECT went out
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
