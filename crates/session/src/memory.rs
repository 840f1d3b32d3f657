//! In-process peer transport and signaling bus.
//!
//! [`MemoryNetwork`] imitates the negotiation rules of a real peer
//! connection closely enough to exercise the session state machine:
//! descriptions must be applied in offer/answer order, remote candidates are
//! refused until the remote description is set, and two endpoints connect
//! only once each has its local description, the peer's description and one
//! of the peer's candidates. The data channel opened by the offering side is
//! then announced to the answering side and opened on both.
//!
//! Descriptions carry the endpoint id in an `o=memory <id>` line and the
//! `b=AS:30` bandwidth token real stacks emit, so bandwidth patching can be
//! observed on the bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use fshare_protocol::{
    DescriptionKind, IceCandidate, PresenceAction, PresenceEvent, SessionDescription,
    SignalMessage,
};

use crate::TransportError;
use crate::transport::{
    BusEvent, DataChannel, PeerTransport, PeerTransportFactory, SignalBus, TransportEvent,
    TransportEvents, TransportFuture,
};
use crate::types::Role;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn describe(id: u64) -> String {
    format!("v=0\r\no=memory {id}\r\nb=AS:30\r\nm=application 9 memory\r\n")
}

fn endpoint_of(sdp: &str) -> Option<u64> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("o=memory "))
        .and_then(|id| id.trim().parse().ok())
}

fn candidate_for(id: u64) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:memory {id}"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

// ---------------------------------------------------------------------------
// MemoryNetwork
// ---------------------------------------------------------------------------

type DropFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A shared medium transports created from the same network can connect over.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Default)]
struct NetworkInner {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
    drop_filter: Option<DropFilter>,
    fail_remote_descriptions: bool,
}

struct Endpoint {
    events: TransportEvents,
    local: Option<DescriptionKind>,
    remote: Option<(u64, DescriptionKind)>,
    has_peer_candidate: bool,
    connected: bool,
    channel: Option<Arc<ChannelShared>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every data-channel message for which `filter` returns `true`.
    pub fn set_drop_filter(&self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) {
        lock(&self.inner).drop_filter = Some(Arc::new(filter));
    }

    /// Closes every data channel on the network, as a failed link would.
    pub fn break_channels(&self) {
        let channels: Vec<_> = lock(&self.inner)
            .endpoints
            .values()
            .filter_map(|ep| ep.channel.clone())
            .collect();
        for channel in channels {
            channel.close();
        }
    }

    /// Makes every `apply_remote_description` fail.
    pub fn fail_remote_descriptions(&self, fail: bool) {
        lock(&self.inner).fail_remote_descriptions = fail;
    }

    /// Number of transports created and not yet closed.
    pub fn live_transports(&self) -> usize {
        lock(&self.inner).endpoints.len()
    }

    fn should_drop(&self, text: &str) -> bool {
        let filter = lock(&self.inner).drop_filter.clone();
        filter.is_some_and(|f| f(text))
    }
}

impl PeerTransportFactory for MemoryNetwork {
    fn create(&self, events: TransportEvents) -> Arc<dyn PeerTransport> {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.endpoints.insert(
            id,
            Endpoint {
                events,
                local: None,
                remote: None,
                has_peer_candidate: false,
                connected: false,
                channel: None,
            },
        );
        trace!(id, "memory transport created");
        Arc::new(MemoryTransport {
            id,
            network: self.clone(),
        })
    }
}

impl NetworkInner {
    fn endpoint(&mut self, id: u64) -> Result<&mut Endpoint, TransportError> {
        self.endpoints.get_mut(&id).ok_or(TransportError::Closed)
    }

    /// Returns the peer `id` is waiting to connect to, if `id` has done its
    /// part of the negotiation.
    fn ready_peer(&self, id: u64) -> Option<u64> {
        let ep = self.endpoints.get(&id)?;
        if ep.connected || ep.local.is_none() || !ep.has_peer_candidate {
            return None;
        }
        ep.remote.map(|(peer, _)| peer)
    }

    fn try_connect(&mut self, id: u64, network: &MemoryNetwork) {
        let Some(peer) = self.ready_peer(id) else {
            return;
        };
        if self.ready_peer(peer) != Some(id) {
            return;
        }
        let channel_of = |ep: u64| {
            self.endpoints
                .get(&ep)
                .and_then(|endpoint| endpoint.channel.clone())
        };
        let opened = match (channel_of(id), channel_of(peer)) {
            (Some(ch), _) => Some((id, peer, ch)),
            (None, Some(ch)) => Some((peer, id, ch)),
            (None, None) => None,
        };
        self.mark_connected(id, peer);
        let Some((opener, answerer, shared)) = opened else {
            return;
        };
        trace!(opener, answerer, "memory transports connected");

        let (Some(opener_events), Some(answerer_ep)) = (
            self.endpoints.get(&opener).map(|ep| ep.events.clone()),
            self.endpoints.get_mut(&answerer),
        ) else {
            return;
        };
        answerer_ep.channel = Some(Arc::clone(&shared));
        let answerer_events = answerer_ep.events.clone();
        shared.attach(answerer_events.clone());
        answerer_events.emit(TransportEvent::IncomingChannel(Arc::new(MemoryChannel {
            shared: Arc::clone(&shared),
            side: 1,
            network: network.clone(),
        })));
        shared.open.store(true, Ordering::SeqCst);
        opener_events.emit(TransportEvent::ChannelOpen);
        answerer_events.emit(TransportEvent::ChannelOpen);
    }

    fn mark_connected(&mut self, a: u64, b: u64) {
        for id in [a, b] {
            if let Some(ep) = self.endpoints.get_mut(&id) {
                ep.connected = true;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: u64,
    network: MemoryNetwork,
}

impl MemoryTransport {
    fn create_description(&self, role: Role) -> Result<SessionDescription, TransportError> {
        let mut inner = lock(&self.network.inner);
        let ep = inner.endpoint(self.id)?;
        match role {
            Role::Initiator => Ok(SessionDescription::offer(describe(self.id))),
            Role::Responder => match ep.remote {
                Some((_, DescriptionKind::Offer)) => Ok(SessionDescription::answer(describe(self.id))),
                _ => Err(TransportError::InvalidState(
                    "cannot answer without a remote offer".into(),
                )),
            },
        }
    }

    fn set_local(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        let mut inner = lock(&self.network.inner);
        if endpoint_of(&desc.sdp) != Some(self.id) {
            return Err(TransportError::InvalidDescription(
                "description was not created by this transport".into(),
            ));
        }
        let ep = inner.endpoint(self.id)?;
        match (desc.kind, ep.local, ep.remote) {
            (DescriptionKind::Offer, None, None) => {}
            (DescriptionKind::Answer, None, Some((_, DescriptionKind::Offer))) => {}
            _ => {
                return Err(TransportError::InvalidState(format!(
                    "cannot apply local {:?} now",
                    desc.kind
                )));
            }
        }
        ep.local = Some(desc.kind);
        ep.events.emit(TransportEvent::LocalCandidate(candidate_for(self.id)));
        inner.try_connect(self.id, &self.network);
        Ok(())
    }

    fn apply_remote(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        let mut inner = lock(&self.network.inner);
        if inner.fail_remote_descriptions {
            return Err(TransportError::InvalidDescription("rejected".into()));
        }
        let peer = endpoint_of(&desc.sdp).ok_or_else(|| {
            TransportError::InvalidDescription("missing memory origin line".into())
        })?;
        let ep = inner.endpoint(self.id)?;
        match (desc.kind, ep.local) {
            (DescriptionKind::Offer, None) => {}
            (DescriptionKind::Answer, Some(DescriptionKind::Offer)) => {}
            _ => {
                return Err(TransportError::InvalidState(format!(
                    "cannot apply remote {:?} now",
                    desc.kind
                )));
            }
        }
        ep.remote = Some((peer, desc.kind));
        inner.try_connect(self.id, &self.network);
        Ok(())
    }

    fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let mut inner = lock(&self.network.inner);
        let ep = inner.endpoint(self.id)?;
        let Some((peer, _)) = ep.remote else {
            return Err(TransportError::InvalidState(
                "remote description not set".into(),
            ));
        };
        let from = candidate
            .candidate
            .strip_prefix("candidate:memory ")
            .and_then(|id| id.parse::<u64>().ok());
        if from != Some(peer) {
            return Err(TransportError::InvalidCandidate(candidate.candidate.clone()));
        }
        ep.has_peer_candidate = true;
        inner.try_connect(self.id, &self.network);
        Ok(())
    }

    fn open(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
        let mut inner = lock(&self.network.inner);
        let ep = inner.endpoint(self.id)?;
        if ep.channel.is_some() {
            return Err(TransportError::InvalidState("channel already open".into()));
        }
        let shared = Arc::new(ChannelShared::new(label, ep.events.clone()));
        ep.channel = Some(Arc::clone(&shared));
        Ok(Arc::new(MemoryChannel {
            shared,
            side: 0,
            network: self.network.clone(),
        }))
    }

    fn shut(&self) {
        let removed = lock(&self.network.inner).endpoints.remove(&self.id);
        if let Some(channel) = removed.and_then(|ep| ep.channel) {
            channel.close();
        }
        trace!(id = self.id, "memory transport closed");
    }
}

impl PeerTransport for MemoryTransport {
    fn create_local_description(&self, role: Role) -> TransportFuture<'_, SessionDescription> {
        Box::pin(async move { self.create_description(role) })
    }

    fn set_local_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.set_local(&desc) })
    }

    fn apply_remote_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.apply_remote(&desc) })
    }

    fn add_remote_candidate(&self, candidate: IceCandidate) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.add_candidate(&candidate) })
    }

    fn open_channel(&self, label: &str) -> TransportFuture<'_, Arc<dyn DataChannel>> {
        let result = self.open(label);
        Box::pin(async move { result })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.shut();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

struct ChannelShared {
    label: String,
    ends: Mutex<[Option<TransportEvents>; 2]>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl ChannelShared {
    fn new(label: &str, opener: TransportEvents) -> Self {
        Self {
            label: label.to_string(),
            ends: Mutex::new([Some(opener), None]),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn attach(&self, answerer: TransportEvents) {
        lock(&self.ends)[1] = Some(answerer);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        for events in lock(&self.ends).iter().flatten() {
            events.emit(TransportEvent::ChannelClosed);
        }
    }
}

/// One end of an in-memory data channel.
pub struct MemoryChannel {
    shared: Arc<ChannelShared>,
    side: usize,
    network: MemoryNetwork,
}

impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.shared.label
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        if self.network.should_drop(&text) {
            trace!("memory channel dropped a message");
            return Ok(());
        }
        let peer = lock(&self.shared.ends)[1 - self.side].clone();
        match peer {
            Some(events) => {
                events.emit(TransportEvent::ChannelMessage(text));
                Ok(())
            }
            None => Err(TransportError::NotOpen),
        }
    }

    fn close(&self) {
        self.shared.close();
    }
}

// ---------------------------------------------------------------------------
// MemoryBus
// ---------------------------------------------------------------------------

/// A broadcast bus with join/leave presence, shared by in-process clients.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    members: HashMap<String, mpsc::UnboundedSender<BusEvent>>,
    published: Vec<SignalMessage>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `uuid`.
    ///
    /// The newcomer is told about every current member, and every current
    /// member is told about the newcomer.
    pub fn join(&self, uuid: &str) -> (MemoryBusClient, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        for (member, member_tx) in &inner.members {
            let _ = tx.send(BusEvent::Presence(PresenceEvent {
                action: PresenceAction::Join,
                uuid: member.clone(),
            }));
            let _ = member_tx.send(BusEvent::Presence(PresenceEvent {
                action: PresenceAction::Join,
                uuid: uuid.to_string(),
            }));
        }
        inner.members.insert(uuid.to_string(), tx);
        let client = MemoryBusClient {
            uuid: uuid.to_string(),
            bus: self.clone(),
        };
        (client, rx)
    }

    /// Unsubscribes `uuid` and announces its departure.
    pub fn leave(&self, uuid: &str) {
        let mut inner = lock(&self.inner);
        if inner.members.remove(uuid).is_none() {
            return;
        }
        for member_tx in inner.members.values() {
            let _ = member_tx.send(BusEvent::Presence(PresenceEvent {
                action: PresenceAction::Leave,
                uuid: uuid.to_string(),
            }));
        }
    }

    /// Every message published so far, in order.
    pub fn published(&self) -> Vec<SignalMessage> {
        lock(&self.inner).published.clone()
    }
}

/// A member's publishing handle on a [`MemoryBus`].
pub struct MemoryBusClient {
    uuid: String,
    bus: MemoryBus,
}

impl SignalBus for MemoryBusClient {
    fn publish(&self, message: SignalMessage) -> Result<(), TransportError> {
        let mut inner = lock(&self.bus.inner);
        if !inner.members.contains_key(&self.uuid) {
            return Err(TransportError::Closed);
        }
        inner.published.push(message.clone());
        for (member, tx) in &inner.members {
            if *member != self.uuid {
                let _ = tx.send(BusEvent::Signal(message.clone()));
            }
        }
        Ok(())
    }
}
