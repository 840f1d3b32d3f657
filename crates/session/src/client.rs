use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use fshare_protocol::{PresenceEvent, SignalMessage};

use crate::config::SessionConfig;
use crate::session::{SessionHandle, TransferSession};
use crate::transport::{BusEvent, PeerTransportFactory, SignalBus};
use crate::types::SessionEvent;
use crate::SessionError;

/// Capacity of the session event queue.
pub const EVENT_BUFFER: usize = 1024;

/// Routes bus traffic to one session per remote peer.
pub struct ShareClient {
    me: String,
    config: SessionConfig,
    factory: Arc<dyn PeerTransportFactory>,
    bus: Arc<dyn SignalBus>,
    events: mpsc::Sender<SessionEvent>,
    sessions: HashMap<String, SessionHandle>,
}

impl ShareClient {
    /// Creates a client identified as `me`.
    ///
    /// Returns the client and the receiver all its sessions report into.
    pub fn new(
        me: impl Into<String>,
        config: SessionConfig,
        factory: Arc<dyn PeerTransportFactory>,
        bus: Arc<dyn SignalBus>,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        config.validate()?;
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let client = Self {
            me: me.into(),
            config,
            factory,
            bus,
            events,
            sessions: HashMap::new(),
        };
        Ok((client, events_rx))
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    /// Returns the session for `peer`, starting one if needed.
    pub fn add_peer(&mut self, peer: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.get(peer) {
            return handle.clone();
        }
        debug!(%peer, "adding peer");
        let handle = TransferSession::spawn(
            self.me.clone(),
            peer,
            self.config.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.bus),
            self.events.clone(),
        );
        self.sessions.insert(peer.to_string(), handle.clone());
        handle
    }

    pub fn session(&self, peer: &str) -> Option<&SessionHandle> {
        self.sessions.get(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Signal(msg) => self.handle_signal(msg),
            BusEvent::Presence(ev) => self.handle_presence(ev),
            BusEvent::Disconnected => warn!(me = %self.me, "bus disconnected"),
        }
    }

    /// Delivers a bus message to the session of its sender.
    ///
    /// Our own messages, messages addressed to someone else, and messages
    /// from peers we have no session for are dropped.
    pub fn handle_signal(&mut self, msg: SignalMessage) {
        if !msg.is_for(&self.me) {
            trace!(source = %msg.source, target = %msg.target, "signal not for us");
            return;
        }
        let Some(handle) = self.sessions.get(&msg.source) else {
            warn!(peer = %msg.source, "signal from unknown peer");
            return;
        };
        if let Err(e) = handle.handle_signal(msg) {
            warn!(peer = %handle.peer(), error = %e, "session unavailable");
        }
    }

    /// Forwards a presence change, starting a session for newly joined peers.
    pub fn handle_presence(&mut self, ev: PresenceEvent) {
        if ev.uuid == self.me {
            return;
        }
        let handle = match self.sessions.get(&ev.uuid) {
            Some(handle) => handle.clone(),
            None if ev.action.is_available() => self.add_peer(&ev.uuid),
            None => {
                trace!(peer = %ev.uuid, action = ?ev.action, "presence of unknown peer");
                return;
            }
        };
        if let Err(e) = handle.handle_presence(ev.action) {
            warn!(peer = %ev.uuid, error = %e, "session unavailable");
        }
    }

    /// Stops every session.
    pub fn shutdown(&mut self) {
        for (_, handle) in self.sessions.drain() {
            handle.shutdown();
        }
    }
}

impl Drop for ShareClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
