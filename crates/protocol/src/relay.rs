//! Framing between bus clients and the relay server.
//!
//! The relay is a minimal publish/subscribe hub: a client subscribes to a
//! channel under its identity, publishes opaque JSON messages to it, and
//! receives everyone else's messages plus join/leave presence for the channel.

use serde::{Deserialize, Serialize};

use crate::constants::PresenceAction;

/// A frame on the relay WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Client -> relay: join `channel` as `uuid`. Must be the first frame.
    Subscribe { channel: String, uuid: String },
    /// Client -> relay: broadcast `message` on `channel`.
    Publish {
        channel: String,
        message: serde_json::Value,
    },
    /// Relay -> client: a message published by another subscriber.
    Message {
        channel: String,
        message: serde_json::Value,
    },
    /// Relay -> client: a subscriber joined or left.
    Presence {
        channel: String,
        action: PresenceAction,
        uuid: String,
    },
}

impl RelayFrame {
    /// Returns the channel this frame refers to.
    pub fn channel(&self) -> &str {
        match self {
            RelayFrame::Subscribe { channel, .. }
            | RelayFrame::Publish { channel, .. }
            | RelayFrame::Message { channel, .. }
            | RelayFrame::Presence { channel, .. } => channel,
        }
    }
}
