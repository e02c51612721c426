//! MQTT v5 transport for the listener
//!
//! Split into pure and impure parts:
//!
//! - [`connection`] - broker URL parsing, option building, topic validation
//! - [`message_handler`] - routing of rumqttc events
//! - [`session`] - the [`Connector`](crate::session::Connector) and
//!   [`Session`](crate::session::Session) implementations doing the I/O
//!
//! # Usage
//!
//! ```rust,no_run
//! use notify_listener::config::MqttSection;
//! use notify_listener::transport::mqtt::MqttConnector;
//! use notify_listener::Listener;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let connector = MqttConnector::new(MqttSection::new("mqtt://localhost:1883"))?;
//! let mut listener = Listener::new(connector);
//! listener.handle_fn("jobs/created", |notification, _shutdown| async move {
//!     println!("{}", notification.payload());
//!     Ok(())
//! });
//! listener.listen(CancellationToken::new()).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod message_handler;
pub mod session;

pub use connection::{configure_mqtt_options, validate_topic, BrokerAddress, MqttError};
pub use message_handler::{EventRoute, MessageHandler, SENDER_ID_PROPERTY};
pub use session::{MqttConnector, MqttSession};
