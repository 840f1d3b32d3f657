use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use fshare_session::{DataChannel, TransportError, TransportEvent, TransportEvents};

/// A WebRTC data channel carrying text messages.
///
/// Sends are queued to a writer task so they reach the wire in call order
/// without blocking the session. Closing goes through the same queue, so
/// everything sent before `close` is written first.
pub struct WebRtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
    open_gate: Arc<OpenGate>,
}

enum Outbound {
    Text(String),
    Close,
}

/// Writer tasks of a transport's channels, awaited before the peer
/// connection is closed.
pub(crate) type Writers = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Holds back the open event until the session knows about the channel.
struct OpenGate {
    events: TransportEvents,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    armed: bool,
    open: bool,
    emitted: bool,
}

impl OpenGate {
    fn update(&self, f: impl FnOnce(&mut GateState)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        if state.armed && state.open && !state.emitted {
            state.emitted = true;
            self.events.emit(TransportEvent::ChannelOpen);
        }
    }
}

impl WebRtcChannel {
    /// Wraps `dc`, routing its callbacks to `events`. Must be called from
    /// within a tokio runtime.
    ///
    /// No [`TransportEvent::ChannelOpen`] is emitted before [`arm`](Self::arm).
    pub(crate) fn attach(dc: Arc<RTCDataChannel>, events: TransportEvents, writers: &Writers) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let open_gate = Arc::new(OpenGate {
            events: events.clone(),
            state: Mutex::new(GateState::default()),
        });
        attach_handlers(&dc, events, Arc::clone(&closed), Arc::clone(&open_gate));

        let (outbound, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(Arc::clone(&dc), rx));
        writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(writer);

        Self {
            label: dc.label().to_string(),
            dc,
            outbound,
            closed,
            open_gate,
        }
    }

    /// Lets the open event through, emitting it now if the channel is
    /// already open.
    pub(crate) fn arm(&self) {
        let open = self.dc.ready_state() == RTCDataChannelState::Open;
        self.open_gate.update(|state| {
            state.armed = true;
            state.open |= open;
        });
    }
}

async fn write_loop(dc: Arc<RTCDataChannel>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Text(text) => {
                if let Err(e) = dc.send_text(text).await {
                    warn!(label = dc.label(), "data channel send failed: {e}");
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = dc.close().await {
                    debug!(label = dc.label(), "closing data channel: {e}");
                }
                break;
            }
        }
    }
    trace!(label = dc.label(), "data channel writer stopped");
}

fn attach_handlers(
    dc: &Arc<RTCDataChannel>,
    events: TransportEvents,
    closed: Arc<AtomicBool>,
    open_gate: Arc<OpenGate>,
) {
    let on_message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = on_message_events.clone();
        Box::pin(async move {
            if !msg.is_string {
                trace!(len = msg.data.len(), "ignoring binary data channel message");
                return;
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    events.emit(TransportEvent::ChannelMessage(text));
                }
                Err(e) => warn!("non UTF-8 text message on data channel: {e}"),
            }
        })
    }));

    let label = dc.label().to_string();
    dc.on_close(Box::new(move || {
        let events = events.clone();
        let closed = Arc::clone(&closed);
        let label = label.clone();
        Box::pin(async move {
            if !closed.swap(true, Ordering::SeqCst) {
                debug!(%label, "data channel closed");
            }
            events.emit(TransportEvent::ChannelClosed);
        })
    }));

    dc.on_open(Box::new(move || {
        Box::pin(async move {
            open_gate.update(|state| state.open = true);
        })
    }));
}

impl DataChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.dc.ready_state() != RTCDataChannelState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
    }
}
