use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use fshare_protocol::{IceCandidate, SessionDescription};
use fshare_session::{
    DataChannel, PeerTransport, PeerTransportFactory, Role, TransportError, TransportEvent,
    TransportEvents, TransportFuture,
};

use crate::DEFAULT_ICE_SERVER;
use crate::channel::{WebRtcChannel, Writers};
use crate::convert::{
    backend, from_rtc_candidate, from_rtc_description, to_rtc_candidate, to_rtc_description,
};

/// Creates [`WebRtcTransport`]s sharing one ICE server list.
#[derive(Debug, Clone)]
pub struct WebRtcFactory {
    ice_servers: Vec<String>,
}

impl WebRtcFactory {
    /// `ice_servers` are STUN/TURN URLs; an empty list falls back to
    /// [`DEFAULT_ICE_SERVER`].
    pub fn new(ice_servers: Vec<String>) -> Self {
        let ice_servers = if ice_servers.is_empty() {
            vec![DEFAULT_ICE_SERVER.to_string()]
        } else {
            ice_servers
        };
        Self { ice_servers }
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }
}

impl Default for WebRtcFactory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PeerTransportFactory for WebRtcFactory {
    fn create(&self, events: TransportEvents) -> Arc<dyn PeerTransport> {
        Arc::new(WebRtcTransport::new(self.ice_servers.clone(), events))
    }
}

/// How long `close` waits for queued channel messages to be written.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A peer connection negotiated over the bus.
pub struct WebRtcTransport {
    ice_servers: Vec<String>,
    events: TransportEvents,
    pc: OnceCell<Arc<RTCPeerConnection>>,
    writers: Writers,
    closed: AtomicBool,
}

impl WebRtcTransport {
    pub fn new(ice_servers: Vec<String>, events: TransportEvents) -> Self {
        Self {
            ice_servers,
            events,
            pc: OnceCell::new(),
            writers: Writers::default(),
            closed: AtomicBool::new(false),
        }
    }

    async fn peer_connection(&self) -> Result<&Arc<RTCPeerConnection>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.pc.get_or_try_init(|| self.build()).await
    }

    async fn build(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(backend)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                username: String::new(),
                credential: String::new(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(backend)?);
        debug!(epoch = self.events.epoch(), "peer connection created");

        let events = self.events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        events.emit(TransportEvent::LocalCandidate(from_rtc_candidate(init)));
                    }
                    Err(e) => warn!("failed to serialize local candidate: {e}"),
                }
            })
        }));

        let events = self.events.clone();
        let writers = Arc::clone(&self.writers);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let writers = Arc::clone(&writers);
            Box::pin(async move {
                debug!(label = dc.label(), "incoming data channel");
                let channel = Arc::new(WebRtcChannel::attach(dc, events.clone(), &writers));
                events.emit(TransportEvent::IncomingChannel(channel.clone()));
                channel.arm();
            })
        }));

        let events = self.events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => info!("peer connection established"),
                    RTCPeerConnectionState::Failed => {
                        warn!("peer connection failed");
                        events.emit(TransportEvent::ChannelClosed);
                    }
                    RTCPeerConnectionState::Disconnected => {
                        debug!("peer connection interrupted, ICE may recover");
                    }
                    _ => {}
                }
            })
        }));

        Ok(pc)
    }
}

impl PeerTransport for WebRtcTransport {
    fn create_local_description(&self, role: Role) -> TransportFuture<'_, SessionDescription> {
        Box::pin(async move {
            let pc = self.peer_connection().await?;
            let desc = match role {
                Role::Initiator => pc.create_offer(None).await,
                Role::Responder => pc.create_answer(None).await,
            }
            .map_err(|e| TransportError::InvalidState(e.to_string()))?;
            from_rtc_description(desc)
        })
    }

    fn set_local_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let pc = self.peer_connection().await?;
            let desc = to_rtc_description(&desc)?;
            pc.set_local_description(desc)
                .await
                .map_err(|e| TransportError::InvalidDescription(e.to_string()))
        })
    }

    fn apply_remote_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let pc = self.peer_connection().await?;
            let desc = to_rtc_description(&desc)?;
            pc.set_remote_description(desc)
                .await
                .map_err(|e| TransportError::InvalidDescription(e.to_string()))
        })
    }

    fn add_remote_candidate(&self, candidate: IceCandidate) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let pc = self.peer_connection().await?;
            let text = candidate.candidate.clone();
            pc.add_ice_candidate(to_rtc_candidate(candidate))
                .await
                .map_err(|e| TransportError::InvalidCandidate(format!("{text}: {e}")))
        })
    }

    fn open_channel(&self, label: &str) -> TransportFuture<'_, Arc<dyn DataChannel>> {
        let label = label.to_string();
        Box::pin(async move {
            let pc = self.peer_connection().await?;
            let dc = pc.create_data_channel(&label, None).await.map_err(backend)?;
            let channel = Arc::new(WebRtcChannel::attach(dc, self.events.clone(), &self.writers));
            channel.arm();
            let channel: Arc<dyn DataChannel> = channel;
            Ok(channel)
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let writers = std::mem::take(
                &mut *self.writers.lock().unwrap_or_else(PoisonError::into_inner),
            );
            for writer in writers {
                if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                    debug!("data channel writer still busy, closing anyway");
                }
            }
            if let Some(pc) = self.pc.get() {
                pc.close().await.map_err(backend)?;
                debug!(epoch = self.events.epoch(), "peer connection closed");
            }
            Ok(())
        })
    }
}
