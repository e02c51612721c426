//! Transport implementations of [`Connector`](crate::session::Connector)
//!
//! MQTT is the only transport shipped; tests use
//! [`testing::MockConnector`](crate::testing::MockConnector).

pub mod mqtt;
