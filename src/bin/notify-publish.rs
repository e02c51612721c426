//! Notification publishing utility
//!
//! Publishes a single notification for manual testing of a running
//! `notify-listener`.
//!
//! ## Usage
//!
//! ```bash
//! # Plain notification
//! notify-publish --topic jobs/created --payload 42
//!
//! # With sender id, against a TLS broker
//! notify-publish --broker-url mqtts://broker.example.com --topic jobs/created \
//!   --payload 42 --sender-id 7
//! ```

use clap::Parser;
use notify_listener::config::MqttSection;
use notify_listener::transport::mqtt::{configure_mqtt_options, validate_topic, SENDER_ID_PROPERTY};
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "notify-publish",
    about = "Publish one notification to an MQTT broker"
)]
struct Args {
    /// MQTT broker URL
    #[arg(long, env = "NOTIFY_BROKER_URL", default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Topic to publish on
    #[arg(long, required = true)]
    topic: String,

    /// Notification payload
    #[arg(long, default_value = "")]
    payload: String,

    /// Sender id attached as a user property
    #[arg(long)]
    sender_id: Option<u32>,

    /// Environment variable containing username
    #[arg(long)]
    username_env: Option<String>,

    /// Environment variable containing password
    #[arg(long)]
    password_env: Option<String>,

    /// Seconds to wait for the broker to acknowledge
    #[arg(long, default_value = "10")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = publish(&args).await {
        eprintln!("Failed to publish: {e}");
        process::exit(1);
    }
}

async fn publish(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    validate_topic(&args.topic)?;

    let mut section = MqttSection::new(args.broker_url.clone());
    section.client_id_prefix = "notify-publish".to_string();
    section.username_env = args.username_env.clone();
    section.password_env = args.password_env.clone();

    let options = configure_mqtt_options(&section)?;
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let mut properties = PublishProperties::default();
    if let Some(sender_id) = args.sender_id {
        properties
            .user_properties
            .push((SENDER_ID_PROPERTY.to_string(), sender_id.to_string()));
    }

    println!("Connecting to MQTT broker {}...", args.broker_url);
    client
        .publish_with_properties(
            args.topic.clone(),
            QoS::AtLeastOnce,
            false,
            args.payload.clone().into_bytes(),
            properties,
        )
        .await?;

    // The publish is queued; drive the event loop until the broker acks it
    let timeout = Duration::from_secs(args.timeout_secs);
    tokio::time::timeout(timeout, wait_for_puback(&mut eventloop))
        .await
        .map_err(|_| format!("no acknowledgement within {timeout:?}"))??;

    println!("Published to {}", args.topic);

    client.disconnect().await?;
    // best effort flush of the DISCONNECT
    let _ = tokio::time::timeout(Duration::from_millis(500), eventloop.poll()).await;

    Ok(())
}

async fn wait_for_puback(eventloop: &mut EventLoop) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::PubAck(_)) => return Ok(()),
            Event::Incoming(Packet::Disconnect(disconnect)) => {
                return Err(format!("broker disconnected: {:?}", disconnect.reason_code).into());
            }
            _ => {}
        }
    }
}
