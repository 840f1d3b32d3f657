//! Public types for sessions.

use std::fmt;
use std::time::Duration;

use fshare_protocol::FileMetadata;
use fshare_transfer::ReceivedFile;

/// Which side of the share a session plays. Decided by who offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Offers a file and serves chunks.
    Initiator,
    /// Accepts an offer and requests chunks.
    Responder,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No negotiation in progress.
    Idle,
    /// A description exchange is in flight.
    Negotiating,
    /// Our offer was produced and published.
    Offering,
    /// The user accepted an offer; our answer is being produced.
    Answering,
    /// The data channel is open.
    Connected,
    /// Chunks are being requested and served.
    Transferring,
    /// The receiver holds every chunk.
    Completed,
    /// Teardown in progress. Always followed by `Idle`.
    Resetting,
}

/// Which user actions make sense right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Affordances {
    pub can_offer: bool,
    pub can_accept: bool,
    pub can_cancel: bool,
}

/// Reason a share ended early, surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The peer could not apply our description.
    PeerRejected,
    /// The peer cancelled the share.
    PeerCancelled,
    /// The peer went away while connected.
    PeerLeft,
    /// The data channel closed or failed while connected.
    ChannelFailed,
    /// A local negotiation step failed.
    NegotiationFailed(String),
    /// The received file could not be assembled.
    TransferFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PeerRejected => f.write_str("unable to communicate with peer"),
            Notice::PeerCancelled => f.write_str("peer cancelled the share"),
            Notice::PeerLeft => f.write_str("peer left during the share"),
            Notice::ChannelFailed => f.write_str("a communication error occurred"),
            Notice::NegotiationFailed(e) => write!(f, "negotiation failed: {e}"),
            Notice::TransferFailed(e) => write!(f, "transfer failed: {e}"),
        }
    }
}

/// An event emitted by a session.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// The remote peer the session talks to.
    pub peer: String,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    StateChanged {
        state: SessionState,
        affordances: Affordances,
    },
    /// The peer's presence changed.
    Availability(bool),
    /// The peer offered a file; call `accept` to receive it.
    OfferReceived(FileMetadata),
    /// A new chunk was stored.
    Progress {
        received: usize,
        expected: usize,
        bytes: u64,
        bytes_per_second: f64,
    },
    /// The receiver assembled the file.
    FileReady(ReceivedFile),
    /// The sender learned the receiver holds every chunk.
    ShareCompleted { elapsed: Option<Duration> },
    /// The share ended early.
    Notice(Notice),
}

/// Point-in-time view of a session, mostly for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub role: Option<Role>,
    pub epoch: u64,
    pub available: bool,
    pub connected: bool,
    pub affordances: Affordances,
    pub has_channel: bool,
    pub expected_chunks: usize,
    pub received_chunks: usize,
    pub missing_chunks: usize,
    pub num_requested: usize,
    pub pending_local_candidates: usize,
    pub pending_remote_candidates: usize,
}
