use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bus channel every peer subscribes to for signaling and presence.
pub const BUS_CHANNEL: &str = "get-my-file2";

/// Label of the data channel opened by the initiating peer.
pub const DATA_CHANNEL_LABEL: &str = "rtc-pubnub-fshare";

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Maximum number of chunk indices drawn into a single request round.
pub const DEFAULT_REQUEST_MAX: usize = 90;

/// Outstanding-request level below which the receiver refills its window.
pub const DEFAULT_REQUEST_THRESHOLD: usize = 70;

/// Delay after which an unanswered chunk request is considered lost.
pub const DEFAULT_EXPIRE_TIME: Duration = Duration::from_millis(2000);

/// Bandwidth token found in locally generated descriptions.
pub const SDP_BANDWIDTH_DEFAULT: &str = "b=AS:30";

/// Replacement for [`SDP_BANDWIDTH_DEFAULT`].
pub const SDP_BANDWIDTH_PATCHED: &str = "b=AS:1638400";

/// How often bus clients ping the relay.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Silence after which a bus connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum relay frame size in bytes (1 MB).
///
/// Only signaling crosses the relay, so frames stay small.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
    /// Forward compatibility: unknown kinds deserialize here.
    #[serde(other)]
    Unknown,
}

/// Out-of-band control signal carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlAction {
    /// The peer could not apply our session description.
    #[serde(rename = "err-reject", alias = "reject")]
    Reject,
    /// The peer abandoned the share before the data channel opened.
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(other)]
    Unknown,
}

/// Presence transition reported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Join,
    Leave,
    Timeout,
    #[serde(other)]
    Unknown,
}

impl PresenceAction {
    /// Returns `true` if the peer is reachable after this transition.
    pub fn is_available(self) -> bool {
        matches!(self, PresenceAction::Join)
    }
}
