//! Testing utilities and mock implementations
//!
//! An in-memory broker for exercising listeners and handlers without a real
//! MQTT broker.

pub mod mocks;

pub use mocks::*;
