//! Pure connection configuration for the MQTT transport
//!
//! Broker URL parsing, option building and topic validation. Nothing here
//! touches the network.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker refused connection: {0}")]
    ConnectionRefused(String),
    #[error("No ConnAck within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },
    #[error("Subscription to {topic} failed")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Broker rejected subscription to {topic}: {reason}")]
    SubscriptionRejected { topic: String, reason: String },
    #[error("Disconnected by broker")]
    Disconnected,
    #[error("Connection lost")]
    ConnectionLost(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Session is closed")]
    Closed,
}

/// Broker address extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Client id for one session: `{prefix}-{uuid}`
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Build MQTT options for a new session
///
/// Every call gets a fresh client id so a reconnect never collides with the
/// broker's view of the previous session.
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let address = parse_broker_url(&config.broker_url)?;

    let client_id = generate_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // Password without username is ignored
    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

/// Check a topic can be subscribed as an exact name
pub fn validate_topic(topic: &str) -> Result<(), MqttError> {
    let reason = if topic.is_empty() {
        "topic must not be empty"
    } else if topic.contains(['+', '#']) {
        "wildcards are not supported"
    } else if topic.contains('\0') {
        "topic must not contain NUL"
    } else {
        return Ok(());
    };

    Err(MqttError::InvalidTopic {
        topic: topic.to_string(),
        reason,
    })
}
