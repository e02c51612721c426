//! Notification value delivered by a session

use serde::{Deserialize, Serialize};

/// A single message received on a subscribed topic.
///
/// Produced by a [`Session`](crate::session::Session) and consumed exactly once
/// by dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    topic: String,
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_id: Option<u32>,
}

impl Notification {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            sender_id: None,
        }
    }

    /// Attach the identity of the publisher, when the transport knows it
    pub fn with_sender_id(mut self, sender_id: u32) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn sender_id(&self) -> Option<u32> {
        self.sender_id
    }
}
