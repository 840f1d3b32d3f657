//! Wire protocol shared by every fshare peer.
//!
//! Three message families cross process boundaries:
//!
//! - [`signal`]: negotiation, candidate and control messages published on the
//!   bootstrap bus, plus presence notifications.
//! - [`channel`]: chunk request/response traffic on the peer data channel.
//! - [`relay`]: the framing used between bus clients and the relay server.
//!
//! The constants both peers must agree on live in [`constants`].

pub mod channel;
pub mod constants;
pub mod relay;
pub mod signal;

pub use channel::ChannelMessage;
pub use constants::{ControlAction, DescriptionKind, PresenceAction};
pub use relay::RelayFrame;
pub use signal::{
    FileMetadata, IceCandidate, PresenceEvent, SessionDescription, SignalBody, SignalMessage,
};

/// Errors produced while decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid chunk index: {0}")]
    InvalidIndex(String),
}
