//! Per-peer transfer session.
//!
//! A session is a single task that owns everything about one remote peer:
//! the current transport, negotiation progress, the file being served or
//! received, and the request window. Every input (user action, bus message,
//! transport callback, timer) is funnelled through one queue and handled to
//! completion before the next, so no state is shared with other tasks.
//!
//! `reset` is the only way back to `Idle`. It bumps the epoch, cancels every
//! timer and in-flight transport operation of the old epoch, and swaps in a
//! fresh transport. Inputs stamped with an older epoch are discarded.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use fshare_protocol::{
    ChannelMessage, ControlAction, DescriptionKind, FileMetadata, PresenceAction,
    SessionDescription, SignalBody, SignalMessage,
};
use fshare_transfer::{
    IncomingFile, OutgoingFile, RequestWindow, ShareTimer, SpeedCalculator, StagedFile,
    package_data_message, package_done_message, package_request_message, unpack_message,
};

use crate::config::SessionConfig;
use crate::signaling::{OpOutcome, SignalingManager};
use crate::transport::{
    DataChannel, PeerTransport, PeerTransportFactory, SignalBus, TransportEvent, TransportEvents,
};
use crate::types::{
    Affordances, Notice, Role, SessionEvent, SessionEventKind, SessionSnapshot, SessionState,
};
use crate::SessionError;

/// Everything a session reacts to.
pub(crate) enum Input {
    OfferFile(StagedFile),
    Accept,
    Cancel,
    Signal(SignalMessage),
    Presence(PresenceAction),
    Transport { epoch: u64, event: TransportEvent },
    Op { epoch: u64, outcome: OpOutcome },
    RequestExpired { epoch: u64, batch: Vec<u32> },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cheap, cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    peer: String,
    tx: mpsc::UnboundedSender<Input>,
}

impl SessionHandle {
    /// The remote peer this session talks to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&self, input: Input) -> Result<(), SessionError> {
        self.tx.send(input).map_err(|_| SessionError::Closed)
    }

    /// Stages `file` and offers it to the peer.
    pub fn offer_file(&self, file: StagedFile) -> Result<(), SessionError> {
        self.send(Input::OfferFile(file))
    }

    /// Accepts the pending offer.
    pub fn accept(&self) -> Result<(), SessionError> {
        self.send(Input::Accept)
    }

    /// Abandons the current share and tells the peer.
    pub fn cancel(&self) -> Result<(), SessionError> {
        self.send(Input::Cancel)
    }

    /// Delivers a bus message addressed to us by this peer.
    pub fn handle_signal(&self, msg: SignalMessage) -> Result<(), SessionError> {
        self.send(Input::Signal(msg))
    }

    /// Delivers a presence change of this peer.
    pub fn handle_presence(&self, action: PresenceAction) -> Result<(), SessionError> {
        self.send(Input::Presence(action))
    }

    /// Returns the session's current state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Snapshot(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stops the session task, closing its transport.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// TransferSession
// ---------------------------------------------------------------------------

pub struct TransferSession {
    me: String,
    peer: String,
    config: SessionConfig,
    factory: Arc<dyn PeerTransportFactory>,
    bus: Arc<dyn SignalBus>,
    events: mpsc::Sender<SessionEvent>,
    inputs: mpsc::UnboundedSender<Input>,

    epoch: u64,
    cancel: CancellationToken,
    transport: Arc<dyn PeerTransport>,
    signaling: SignalingManager,

    state: SessionState,
    role: Option<Role>,
    available: bool,
    /// Set once we committed to a share (description published or offer
    /// accepted), cleared by completion and reset.
    connected: bool,
    offer_pending: bool,
    channel: Option<Arc<dyn DataChannel>>,

    outgoing: Option<OutgoingFile>,
    incoming: Option<IncomingFile>,
    window: RequestWindow,
    timer: ShareTimer,
    speed: SpeedCalculator,
}

impl TransferSession {
    /// Spawns a session for `peer` on the current tokio runtime.
    pub fn spawn(
        me: impl Into<String>,
        peer: impl Into<String>,
        config: SessionConfig,
        factory: Arc<dyn PeerTransportFactory>,
        bus: Arc<dyn SignalBus>,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let peer = peer.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self::new(
            me.into(),
            peer.clone(),
            config,
            factory,
            bus,
            events,
            tx.clone(),
        );
        tokio::spawn(session.run(rx));
        SessionHandle { peer, tx }
    }

    fn new(
        me: String,
        peer: String,
        config: SessionConfig,
        factory: Arc<dyn PeerTransportFactory>,
        bus: Arc<dyn SignalBus>,
        events: mpsc::Sender<SessionEvent>,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> Self {
        let epoch = 0;
        let cancel = CancellationToken::new();
        let transport = factory.create(TransportEvents::new(epoch, inputs.clone()));
        let signaling = SignalingManager::start(
            Arc::clone(&transport),
            inputs.clone(),
            epoch,
            cancel.clone(),
            config.patch_bandwidth,
        );
        let window = RequestWindow::new(config.window());
        Self {
            me,
            peer,
            config,
            factory,
            bus,
            events,
            inputs,
            epoch,
            cancel,
            transport,
            signaling,
            state: SessionState::Idle,
            role: None,
            available: false,
            connected: false,
            offer_pending: false,
            channel: None,
            outgoing: None,
            incoming: None,
            window,
            timer: ShareTimer::default(),
            speed: SpeedCalculator::default(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        debug!(peer = %self.peer, "session started");
        while let Some(input) = rx.recv().await {
            if let Input::Shutdown = input {
                break;
            }
            self.handle(input);
        }
        self.release_transport();
        debug!(peer = %self.peer, "session stopped");
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::OfferFile(file) => self.offer_file(file),
            Input::Accept => self.accept(),
            Input::Cancel => self.cancel(),
            Input::Signal(msg) => self.on_signal(msg),
            Input::Presence(action) => self.on_presence(action),
            Input::Transport { epoch, event } => {
                if self.is_current(epoch) {
                    self.on_transport_event(event);
                }
            }
            Input::Op { epoch, outcome } => {
                if self.is_current(epoch) {
                    self.on_op(outcome);
                }
            }
            Input::RequestExpired { epoch, batch } => {
                if self.is_current(epoch) {
                    self.on_request_expired(batch);
                }
            }
            Input::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Input::Shutdown => {}
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        if epoch != self.epoch {
            trace!(peer = %self.peer, epoch, current = self.epoch, "dropping stale input");
            return false;
        }
        true
    }

    // -- User actions -------------------------------------------------------

    fn offer_file(&mut self, file: StagedFile) {
        if self.state != SessionState::Idle || self.connected {
            warn!(peer = %self.peer, state = ?self.state, "share already in progress, ignoring offer");
            return;
        }
        if !self.available {
            debug!(peer = %self.peer, "offering to a peer not announced as present");
        }
        let outgoing = match file.stage(self.config.chunk_size) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                self.notice(Notice::TransferFailed(e.to_string()));
                return;
            }
        };
        info!(
            peer = %self.peer,
            file = %outgoing.metadata().name,
            chunks = outgoing.chunk_count(),
            "offering file"
        );
        self.role = Some(Role::Initiator);
        self.outgoing = Some(outgoing);
        self.signaling.open_channel(&self.config.channel_label);
        self.signaling.create_description(Role::Initiator);
        self.set_state(SessionState::Negotiating);
    }

    fn accept(&mut self) {
        if !self.offer_pending {
            warn!(peer = %self.peer, "no pending offer to accept");
            return;
        }
        info!(peer = %self.peer, "accepting offer");
        self.offer_pending = false;
        self.role = Some(Role::Responder);
        self.connected = true;
        self.signaling.create_description(Role::Responder);
        self.set_state(SessionState::Answering);
    }

    fn cancel(&mut self) {
        info!(peer = %self.peer, "cancelling share");
        self.publish(SignalMessage::control(
            &self.me,
            &self.peer,
            ControlAction::Cancel,
        ));
        self.reset();
    }

    // -- Bus input ----------------------------------------------------------

    fn on_signal(&mut self, msg: SignalMessage) {
        let metadata = msg.metadata();
        match msg.body {
            SignalBody::Description { desc, .. } => self.on_remote_description(desc, metadata),
            SignalBody::Candidate { candidate } => {
                if self.signaling.add_remote_candidate(candidate) {
                    trace!(peer = %self.peer, "forwarded remote candidate");
                } else {
                    trace!(peer = %self.peer, "buffered remote candidate");
                }
            }
            SignalBody::Control { action } => self.on_control(action),
        }
    }

    fn on_remote_description(&mut self, desc: SessionDescription, metadata: Option<FileMetadata>) {
        debug!(peer = %self.peer, kind = ?desc.kind, "remote description received");
        if desc.kind == DescriptionKind::Offer && self.state == SessionState::Idle {
            self.set_state(SessionState::Negotiating);
        }
        self.signaling.apply_remote(desc, metadata);
    }

    fn on_control(&mut self, action: ControlAction) {
        let notice = match action {
            ControlAction::Reject => Notice::PeerRejected,
            ControlAction::Cancel => Notice::PeerCancelled,
            ControlAction::Unknown => {
                debug!(peer = %self.peer, "ignoring unknown control action");
                return;
            }
        };
        if self.is_quiescent() {
            debug!(peer = %self.peer, ?action, "control signal with nothing in progress");
            return;
        }
        self.notice(notice);
        self.reset();
    }

    fn on_presence(&mut self, action: PresenceAction) {
        let available = action.is_available();
        if available != self.available {
            self.available = available;
            debug!(peer = %self.peer, available, "presence changed");
            self.emit(SessionEventKind::Availability(available));
            self.emit_state();
        }
        if !available && self.connected {
            warn!(peer = %self.peer, "peer left during the share");
            self.notice(Notice::PeerLeft);
            self.reset();
        }
    }

    // -- Transport operation outcomes ---------------------------------------

    fn on_op(&mut self, outcome: OpOutcome) {
        match outcome {
            OpOutcome::DescriptionCreated(Ok(desc)) => {
                self.signaling.on_description_created(desc);
                if self.role == Some(Role::Initiator) {
                    self.set_state(SessionState::Offering);
                }
            }
            OpOutcome::LocalApplied(Ok(desc)) => {
                let metadata = match self.role {
                    Some(Role::Initiator) => self.outgoing.as_ref().map(OutgoingFile::metadata),
                    _ => None,
                };
                let msg = SignalMessage::description(&self.me, &self.peer, desc, metadata);
                self.publish(msg);
                self.connected = true;
                self.emit_state();
            }
            OpOutcome::DescriptionCreated(Err(e)) | OpOutcome::LocalApplied(Err(e)) => {
                error!(peer = %self.peer, error = %e, "local description failed");
                self.notice(Notice::NegotiationFailed(e.to_string()));
                self.reset();
            }
            OpOutcome::RemoteApplied {
                desc,
                metadata,
                result: Ok(()),
            } => self.on_remote_applied(desc.kind, metadata),
            OpOutcome::RemoteApplied { result: Err(e), .. } => {
                warn!(peer = %self.peer, error = %e, "could not apply remote description");
                self.reject();
            }
            OpOutcome::CandidateAdded(Ok(())) => {}
            OpOutcome::CandidateAdded(Err(e)) => {
                warn!(peer = %self.peer, error = %e, "could not add remote candidate");
            }
            OpOutcome::ChannelCreated(Ok(channel)) => {
                debug!(peer = %self.peer, label = channel.label(), "data channel created");
                self.channel = Some(channel);
            }
            OpOutcome::ChannelCreated(Err(e)) => {
                error!(peer = %self.peer, error = %e, "could not create data channel");
                self.notice(Notice::NegotiationFailed(e.to_string()));
                self.reset();
            }
        }
    }

    fn on_remote_applied(&mut self, kind: DescriptionKind, metadata: Option<FileMetadata>) {
        let flushed = self.signaling.on_remote_applied();
        debug!(peer = %self.peer, ?kind, flushed, "remote description applied");
        match kind {
            DescriptionKind::Offer => {
                let Some(metadata) = metadata else {
                    warn!(peer = %self.peer, "offer carries no transfer metadata");
                    self.reject();
                    return;
                };
                let expected = match self.check_offer(&metadata) {
                    Ok(expected) => expected,
                    Err(reason) => {
                        warn!(peer = %self.peer, file = %metadata.name, %reason, "refusing offer");
                        self.reject();
                        return;
                    }
                };
                info!(
                    peer = %self.peer,
                    file = %metadata.name,
                    chunks = expected,
                    "offer received"
                );
                self.window.reset(expected);
                self.incoming = Some(IncomingFile::new(metadata.clone()));
                self.offer_pending = true;
                self.emit(SessionEventKind::OfferReceived(metadata));
                self.emit_state();
            }
            DescriptionKind::Answer => {
                debug!(peer = %self.peer, "answer applied, serving only");
            }
            _ => {}
        }
    }

    /// Returns the announced chunk count if the offer is one we can hold.
    ///
    /// Every chunk carries at least one byte, so a count above the announced
    /// size cannot be honest.
    fn check_offer(&self, metadata: &FileMetadata) -> Result<u32, String> {
        let chunks = metadata.chunk_count;
        if chunks > self.config.max_chunks {
            return Err(format!(
                "{chunks} chunks exceeds the limit of {}",
                self.config.max_chunks
            ));
        }
        if let Some(size) = metadata.total_bytes {
            let consistent = match size {
                0 => chunks == 0,
                _ => chunks > 0 && chunks as u64 <= size,
            };
            if !consistent {
                return Err(format!("{chunks} chunks do not fit {size} bytes"));
            }
        }
        u32::try_from(chunks).map_err(|_| format!("{chunks} chunks exceeds the index range"))
    }

    /// Tells the peer its description was unusable, then resets.
    fn reject(&mut self) {
        self.publish(SignalMessage::control(
            &self.me,
            &self.peer,
            ControlAction::Reject,
        ));
        self.reset();
    }

    // -- Transport events ---------------------------------------------------

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.signaling.record_local_candidate(candidate.clone());
                self.publish(SignalMessage::candidate(&self.me, &self.peer, candidate));
            }
            TransportEvent::IncomingChannel(channel) => {
                debug!(peer = %self.peer, label = channel.label(), "peer opened data channel");
                self.channel = Some(channel);
            }
            TransportEvent::ChannelOpen => self.on_channel_open(),
            TransportEvent::ChannelMessage(text) => self.on_channel_message(&text),
            TransportEvent::ChannelClosed => {
                if self.connected {
                    warn!(peer = %self.peer, "data channel closed during the share");
                    self.notice(Notice::ChannelFailed);
                    self.reset();
                } else {
                    debug!(peer = %self.peer, "data channel closed");
                }
            }
        }
    }

    fn on_channel_open(&mut self) {
        info!(peer = %self.peer, role = ?self.role, "data channel open");
        self.set_state(SessionState::Connected);
        match self.role {
            Some(Role::Responder) => {
                self.set_state(SessionState::Transferring);
                if self.incoming.as_ref().is_some_and(IncomingFile::is_complete) {
                    self.complete();
                } else {
                    self.request_round();
                }
            }
            Some(Role::Initiator) => self.timer.start(),
            None => warn!(peer = %self.peer, "data channel opened outside a share"),
        }
    }

    fn on_channel_message(&mut self, text: &str) {
        let msg = match unpack_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "dropping malformed channel message");
                return;
            }
        };
        match msg {
            ChannelMessage::Data { id, content } => self.on_data(id, &content),
            ChannelMessage::Request { ids } => self.on_request(&ids),
            ChannelMessage::Done => self.on_done(),
            ChannelMessage::Unknown => {
                debug!(peer = %self.peer, "ignoring unknown channel action");
            }
        }
    }

    // -- Receiving ----------------------------------------------------------

    fn on_data(&mut self, id: u32, content: &str) {
        let Some(incoming) = self.incoming.as_mut() else {
            trace!(peer = %self.peer, id, "chunk without a transfer in progress");
            return;
        };
        let before = incoming.store().received_bytes();
        match incoming.accept(id, content) {
            Ok(true) => {}
            Ok(false) => {
                trace!(peer = %self.peer, id, "duplicate chunk");
                return;
            }
            Err(e) => {
                warn!(peer = %self.peer, id, error = %e, "dropping invalid chunk");
                return;
            }
        }
        let store = incoming.store();
        let (received, expected, bytes) =
            (store.received(), store.expected(), store.received_bytes());
        let complete = incoming.is_complete();

        self.window.on_chunk_received(id);
        self.speed.add_sample(bytes - before);
        trace!(peer = %self.peer, id, received, expected, "chunk stored");
        self.emit(SessionEventKind::Progress {
            received,
            expected,
            bytes,
            bytes_per_second: self.speed.bytes_per_second(),
        });

        if complete {
            self.complete();
        } else if self.window.should_refill() {
            self.request_round();
        }
    }

    fn request_round(&mut self) {
        let Some(channel) = self.channel.clone() else {
            warn!(peer = %self.peer, "no data channel to request chunks on");
            return;
        };
        let Some(batch) = self.window.next_round() else {
            if self.window.is_saturated() && self.window.missing_len() > 0 {
                warn!(
                    peer = %self.peer,
                    outstanding = self.window.num_requested(),
                    missing = self.window.missing_len(),
                    "request window saturated"
                );
            }
            return;
        };
        match package_request_message(&batch) {
            Ok(text) => {
                if let Err(e) = channel.send(text) {
                    warn!(peer = %self.peer, error = %e, "failed to send chunk request");
                }
            }
            Err(e) => warn!(peer = %self.peer, error = %e, "failed to encode chunk request"),
        }
        trace!(
            peer = %self.peer,
            count = batch.len(),
            outstanding = self.window.num_requested(),
            "requested chunks"
        );
        self.schedule_expiry(batch);
    }

    fn schedule_expiry(&self, batch: Vec<u32>) {
        let inputs = self.inputs.clone();
        let cancel = self.cancel.clone();
        let epoch = self.epoch;
        let delay = self.config.expire_time;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = inputs.send(Input::RequestExpired { epoch, batch });
                }
            }
        });
    }

    fn on_request_expired(&mut self, batch: Vec<u32>) {
        let Some(incoming) = self.incoming.as_ref() else {
            return;
        };
        let expiry = self.window.expire(&batch, incoming.store());
        if expiry.expired > 0 {
            debug!(
                peer = %self.peer,
                expired = expiry.expired,
                outstanding = self.window.num_requested(),
                "chunk requests expired"
            );
        }
        if expiry.refill {
            self.request_round();
        } else if expiry.expired > 0 && self.window.is_saturated() {
            warn!(
                peer = %self.peer,
                outstanding = self.window.num_requested(),
                "request window saturated, waiting for outstanding chunks"
            );
        }
    }

    fn complete(&mut self) {
        info!(peer = %self.peer, "last chunk received");
        if let Some(channel) = &self.channel {
            match package_done_message() {
                Ok(text) => {
                    if let Err(e) = channel.send(text) {
                        warn!(peer = %self.peer, error = %e, "failed to send done");
                    }
                }
                Err(e) => warn!(peer = %self.peer, error = %e, "failed to encode done"),
            }
        }
        self.set_state(SessionState::Completed);
        match self.incoming.as_ref().map(IncomingFile::finalize) {
            Some(Ok(file)) => {
                info!(
                    peer = %self.peer,
                    file = %file.name,
                    bytes = file.bytes.len(),
                    checksum = %file.checksum,
                    "file received"
                );
                self.emit(SessionEventKind::FileReady(file));
            }
            Some(Err(e)) => {
                error!(peer = %self.peer, error = %e, "could not assemble file");
                self.notice(Notice::TransferFailed(e.to_string()));
            }
            None => {}
        }
        self.connected = false;
        self.reset();
    }

    // -- Sending ------------------------------------------------------------

    fn on_request(&mut self, ids: &[u32]) {
        if self.outgoing.is_none() {
            warn!(peer = %self.peer, "chunk request without a staged file");
            return;
        }
        if self.state == SessionState::Connected {
            self.set_state(SessionState::Transferring);
        }
        let (Some(outgoing), Some(channel)) = (&self.outgoing, &self.channel) else {
            warn!(peer = %self.peer, "chunk request without a data channel");
            return;
        };
        for &id in ids {
            let Some(bytes) = outgoing.chunk(id) else {
                warn!(peer = %self.peer, id, "requested chunk out of range");
                continue;
            };
            let sent = package_data_message(id, bytes)
                .map_err(|e| e.to_string())
                .and_then(|text| channel.send(text).map_err(|e| e.to_string()));
            if let Err(e) = sent {
                warn!(peer = %self.peer, id, error = %e, "failed to serve chunk");
            }
        }
        trace!(peer = %self.peer, count = ids.len(), "served chunk request");
    }

    fn on_done(&mut self) {
        if self.role != Some(Role::Initiator) {
            debug!(peer = %self.peer, "ignoring done outside a served share");
            return;
        }
        let elapsed = self.timer.stop();
        info!(peer = %self.peer, ?elapsed, "share completed");
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.connected = false;
        self.set_state(SessionState::Completed);
        self.emit(SessionEventKind::ShareCompleted { elapsed });
        self.reset();
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Drops all share state and replaces the transport with a fresh one.
    ///
    /// Safe to call from any state, any number of times.
    fn reset(&mut self) {
        debug!(peer = %self.peer, epoch = self.epoch, "resetting session");
        self.set_state(SessionState::Resetting);
        self.release_transport();

        self.epoch += 1;
        self.cancel = CancellationToken::new();
        self.transport = self
            .factory
            .create(TransportEvents::new(self.epoch, self.inputs.clone()));
        self.signaling = SignalingManager::start(
            Arc::clone(&self.transport),
            self.inputs.clone(),
            self.epoch,
            self.cancel.clone(),
            self.config.patch_bandwidth,
        );

        self.role = None;
        self.connected = false;
        self.offer_pending = false;
        self.outgoing = None;
        self.incoming = None;
        self.window.clear();
        self.timer = ShareTimer::default();
        self.speed.reset();
        self.set_state(SessionState::Idle);
    }

    /// Cancels the current epoch and closes its channel and transport.
    fn release_transport(&mut self) {
        self.cancel.cancel();
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "closing transport");
            }
        });
    }

    // -- Helpers ------------------------------------------------------------

    /// No share is being negotiated, offered or run.
    fn is_quiescent(&self) -> bool {
        self.state == SessionState::Idle && !self.connected && !self.offer_pending
    }

    fn affordances(&self) -> Affordances {
        Affordances {
            can_offer: self.state == SessionState::Idle && self.available,
            can_accept: self.offer_pending,
            can_cancel: !self.is_quiescent() && self.state != SessionState::Resetting,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(peer = %self.peer, from = ?self.state, to = ?state, "state changed");
        self.state = state;
        self.emit_state();
    }

    fn emit_state(&self) {
        self.emit(SessionEventKind::StateChanged {
            state: self.state,
            affordances: self.affordances(),
        });
    }

    fn notice(&self, notice: Notice) {
        info!(peer = %self.peer, %notice, "share ended");
        self.emit(SessionEventKind::Notice(notice));
    }

    fn emit(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            peer: self.peer.clone(),
            kind,
        };
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(peer = %self.peer, event = ?event.kind, "event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(peer = %self.peer, "event receiver gone");
            }
        }
    }

    fn publish(&self, msg: SignalMessage) {
        if let Err(e) = self.bus.publish(msg) {
            warn!(peer = %self.peer, error = %e, "failed to publish signal");
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let (expected_chunks, received_chunks) = match (&self.incoming, &self.outgoing) {
            (Some(incoming), _) => (incoming.store().expected(), incoming.store().received()),
            (None, Some(outgoing)) => (outgoing.chunk_count(), 0),
            (None, None) => (0, 0),
        };
        let pending = self.signaling.pending();
        SessionSnapshot {
            state: self.state,
            role: self.role,
            epoch: self.epoch,
            available: self.available,
            connected: self.connected,
            affordances: self.affordances(),
            has_channel: self.channel.is_some(),
            expected_chunks,
            received_chunks,
            missing_chunks: self.window.missing_len(),
            num_requested: self.window.num_requested(),
            pending_local_candidates: pending.local.len(),
            pending_remote_candidates: pending.remote.len(),
        }
    }
}
