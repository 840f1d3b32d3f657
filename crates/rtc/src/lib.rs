//! WebRTC implementation of the fshare peer transport.
//!
//! [`WebRtcFactory`] hands out one [`WebRtcTransport`] per session epoch.
//! The underlying peer connection is built lazily on first use so creating
//! a transport stays synchronous and cheap.

mod channel;
mod convert;
mod transport;

pub use channel::WebRtcChannel;
pub use transport::{WebRtcFactory, WebRtcTransport};

/// STUN server used when none is configured.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
