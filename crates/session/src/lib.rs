//! Per-peer share sessions.
//!
//! A [`ShareClient`] routes bus traffic to one [`TransferSession`] per remote
//! peer. Each session negotiates a peer transport through the bus, then runs
//! the chunked transfer over the resulting data channel, either serving a
//! staged file (initiator) or requesting and reassembling one (responder).
//!
//! Transports and the bus are abstract ([`transport`]); [`memory`] provides
//! in-process implementations used by the tests.

mod client;
mod config;
mod error;
pub mod memory;
mod session;
pub mod signaling;
pub mod transport;
mod types;

pub use client::{EVENT_BUFFER, ShareClient};
pub use config::{DEFAULT_MAX_CHUNKS, SessionConfig};
pub use error::{SessionError, TransportError};
pub use session::{SessionHandle, TransferSession};
pub use signaling::{PendingCandidates, patch_bandwidth};
pub use transport::{
    BusEvent, DataChannel, PeerTransport, PeerTransportFactory, SignalBus, TransportEvent,
    TransportEvents, TransportFuture,
};
pub use types::{
    Affordances, Notice, Role, SessionEvent, SessionEventKind, SessionSnapshot, SessionState,
};
