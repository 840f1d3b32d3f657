//! Collaborator interfaces consumed by sessions.
//!
//! A session never touches the network directly. It drives an opaque
//! [`PeerTransport`] (one per negotiation attempt, created through a
//! [`PeerTransportFactory`]), sends text over a [`DataChannel`], and publishes
//! signaling through a process-wide [`SignalBus`].
//!
//! Transports report asynchronous happenings through [`TransportEvents`]. Each
//! handle is stamped with the epoch of the transport it was created for, so
//! events from a transport that was replaced by a reset are dropped by the
//! session.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use fshare_protocol::{IceCandidate, PresenceEvent, SessionDescription, SignalMessage};

use crate::TransportError;
use crate::session::Input;
use crate::types::Role;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// The peer-to-peer negotiation primitive.
///
/// Operations are issued one at a time, in order, by the owning session.
pub trait PeerTransport: Send + Sync {
    /// Produces an offer (`Initiator`) or an answer (`Responder`).
    fn create_local_description(&self, role: Role) -> TransportFuture<'_, SessionDescription>;

    /// Applies a description previously produced by this transport.
    fn set_local_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()>;

    /// Applies the peer's description.
    fn apply_remote_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()>;

    /// Adds a candidate discovered by the peer.
    fn add_remote_candidate(&self, candidate: IceCandidate) -> TransportFuture<'_, ()>;

    /// Creates the data channel the transfer runs over. Only the initiator
    /// calls this; the responder receives the channel through
    /// [`TransportEvent::IncomingChannel`].
    fn open_channel(&self, label: &str) -> TransportFuture<'_, Arc<dyn DataChannel>>;

    /// Tears the transport down. No events are expected afterwards.
    fn close(&self) -> TransportFuture<'_, ()>;
}

/// Creates fresh, inert transports.
pub trait PeerTransportFactory: Send + Sync {
    fn create(&self, events: TransportEvents) -> Arc<dyn PeerTransport>;
}

/// A message-oriented text channel between the two peers.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Queues `text` for delivery. Never blocks.
    fn send(&self, text: String) -> Result<(), TransportError>;

    fn close(&self);
}

/// The shared bootstrap bus.
pub trait SignalBus: Send + Sync {
    /// Publishes a signaling message. Never blocks.
    fn publish(&self, message: SignalMessage) -> Result<(), TransportError>;
}

/// Inbound traffic from the bootstrap bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Signal(SignalMessage),
    Presence(PresenceEvent),
    /// The bus connection was lost.
    Disconnected,
}

/// Something a transport observed.
pub enum TransportEvent {
    /// A local candidate to forward to the peer.
    LocalCandidate(IceCandidate),
    /// The peer opened a data channel towards us.
    IncomingChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    ChannelMessage(String),
    ChannelClosed,
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::IncomingChannel(ch) => f.debug_tuple("IncomingChannel").field(&ch.label()).finish(),
            Self::ChannelOpen => f.write_str("ChannelOpen"),
            Self::ChannelMessage(m) => f.debug_tuple("ChannelMessage").field(&m.len()).finish(),
            Self::ChannelClosed => f.write_str("ChannelClosed"),
        }
    }
}

/// Sink a transport reports its events into.
#[derive(Clone)]
pub struct TransportEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl TransportEvents {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { epoch, tx }
    }

    /// Epoch of the transport this sink belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Forwards `event` to the owning session. Returns `false` once the
    /// session has shut down.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Input::Transport {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}
