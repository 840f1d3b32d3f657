//! Signaling relay.
//!
//! Listens on a TCP port and upgrades every connection to WebSocket. A
//! connection must open with a `subscribe` frame; from then on its `publish`
//! frames are forwarded to every other subscriber of the same channel, and
//! joins and leaves are announced as `presence` frames. A newcomer is told
//! about everyone already subscribed.
//!
//! The relay never interprets published messages.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fshare_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use fshare_protocol::{PresenceAction, RelayFrame};

use crate::pumps::write::write_pump;
use crate::{SEND_BUFFER_SIZE, ServerError};

/// Relay configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

struct Subscriber {
    conn: u64,
    frames: mpsc::Sender<tungstenite::Message>,
}

type Channels = HashMap<String, HashMap<String, Subscriber>>;

/// The relay server.
pub struct RelayServer {
    port: u16,
    channels: Mutex<Channels>,
    next_conn: AtomicU64,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            port: config.port,
            channels: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Identities currently subscribed to `channel`, sorted.
    pub async fn subscribers(&self, channel: &str) -> Vec<String> {
        let channels = self.channels.lock().await;
        let mut uuids: Vec<String> = channels
            .get(channel)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default();
        uuids.sort();
        uuids
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the relay until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("relay listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("relay shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => warn!("accept error: {e}"),
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        let (sink, mut stream) = ws_stream.split();
        debug!(%peer_addr, "WebSocket connection established");

        let (frames, frames_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let cancel = self.cancel.child_token();
        let writer = tokio::spawn(write_pump(
            sink,
            frames_rx,
            cancel.clone(),
            peer_addr.to_string(),
        ));

        let (channel, uuid) = match tokio::time::timeout(WS_PONG_WAIT, stream.next()).await {
            Err(_) => {
                cancel.cancel();
                return Err(ServerError::SubscribeTimeout);
            }
            Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Subscribe { channel, uuid }) => (channel, uuid),
                    _ => {
                        cancel.cancel();
                        return Err(ServerError::NotSubscribed);
                    }
                }
            }
            Ok(Some(Err(e))) => {
                cancel.cancel();
                return Err(e.into());
            }
            Ok(_) => {
                cancel.cancel();
                return Err(ServerError::NotSubscribed);
            }
        };

        let conn = self.subscribe(&channel, &uuid, frames.clone()).await;
        info!(%peer_addr, %channel, %uuid, "subscribed");

        let result = self
            .read_loop(&mut stream, &channel, &uuid, &frames, &cancel)
            .await;

        self.unsubscribe(&channel, &uuid, conn).await;
        info!(%peer_addr, %channel, %uuid, "unsubscribed");
        drop(frames);
        cancel.cancel();
        let _ = writer.await;
        result
    }

    async fn read_loop<S>(
        &self,
        stream: &mut S,
        channel: &str,
        uuid: &str,
        frames: &mpsc::Sender<tungstenite::Message>,
        cancel: &CancellationToken,
    ) -> Result<(), ServerError>
    where
        S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        let deadline = tokio::time::sleep(WS_PONG_WAIT);
        tokio::pin!(deadline);

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                () = &mut deadline => {
                    warn!(%uuid, "subscriber silent for {WS_PONG_WAIT:?}, dropping");
                    return Ok(());
                }
                msg = stream.next() => msg,
            };
            let msg = match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            };
            deadline
                .as_mut()
                .reset(tokio::time::Instant::now() + WS_PONG_WAIT);

            match msg {
                tungstenite::Message::Text(text) => match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Publish {
                        channel: target,
                        message,
                    }) if target == channel => {
                        self.forward(channel, uuid, message).await;
                    }
                    Ok(frame) => {
                        debug!(%uuid, channel = frame.channel(), "ignoring unexpected frame");
                    }
                    Err(e) => warn!(%uuid, "malformed frame: {e}"),
                },
                tungstenite::Message::Ping(data) => {
                    let _ = frames.send(tungstenite::Message::Pong(data)).await;
                }
                tungstenite::Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
    }

    /// Registers a subscriber, replacing an older connection with the same
    /// identity. Returns the connection id.
    async fn subscribe(
        &self,
        channel: &str,
        uuid: &str,
        frames: mpsc::Sender<tungstenite::Message>,
    ) -> u64 {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.lock().await;
        let subs = channels.entry(channel.to_string()).or_default();

        if let Some(old) = subs.remove(uuid) {
            debug!(%uuid, "replacing previous connection");
            let _ = old.frames.try_send(tungstenite::Message::Close(None));
        } else {
            let join = presence(channel, PresenceAction::Join, uuid);
            for sub in subs.values() {
                deliver(&sub.frames, &join);
            }
        }
        for member in subs.keys() {
            deliver(&frames, &presence(channel, PresenceAction::Join, member));
        }
        subs.insert(uuid.to_string(), Subscriber { conn, frames });
        conn
    }

    async fn unsubscribe(&self, channel: &str, uuid: &str, conn: u64) {
        let mut channels = self.channels.lock().await;
        let Some(subs) = channels.get_mut(channel) else {
            return;
        };
        if subs.get(uuid).is_none_or(|sub| sub.conn != conn) {
            return;
        }
        subs.remove(uuid);
        let leave = presence(channel, PresenceAction::Leave, uuid);
        for sub in subs.values() {
            deliver(&sub.frames, &leave);
        }
        if subs.is_empty() {
            channels.remove(channel);
        }
    }

    async fn forward(&self, channel: &str, from: &str, message: serde_json::Value) {
        let frame = RelayFrame::Message {
            channel: channel.to_string(),
            message,
        };
        let Some(text) = encode(&frame) else {
            return;
        };
        let channels = self.channels.lock().await;
        let Some(subs) = channels.get(channel) else {
            return;
        };
        let mut delivered = 0;
        for (uuid, sub) in subs {
            if uuid != from {
                deliver(&sub.frames, &text);
                delivered += 1;
            }
        }
        trace!(%from, %channel, delivered, "forwarded message");
    }
}

fn presence(channel: &str, action: PresenceAction, uuid: &str) -> String {
    encode(&RelayFrame::Presence {
        channel: channel.to_string(),
        action,
        uuid: uuid.to_string(),
    })
    .unwrap_or_default()
}

fn encode(frame: &RelayFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("failed to encode relay frame: {e}");
            None
        }
    }
}

fn deliver(frames: &mpsc::Sender<tungstenite::Message>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Err(mpsc::error::TrySendError::Full(_)) =
        frames.try_send(tungstenite::Message::Text(text.to_string().into()))
    {
        warn!("subscriber send buffer full, dropping frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::SinkExt;
    use fshare_protocol::{ControlAction, PresenceEvent, SignalMessage};
    use fshare_session::{BusEvent, SignalBus};

    use crate::BusClient;

    async fn start() -> (Arc<RelayServer>, tokio::task::JoinHandle<()>, String) {
        let server = RelayServer::new(ServerConfig { port: 0 });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });
        let mut port = 0;
        for _ in 0..100 {
            port = server.port().await;
            if port != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(port > 0, "relay should bind");
        (server, handle, format!("ws://127.0.0.1:{port}"))
    }

    async fn next_event(events: &mut mpsc::Receiver<BusEvent>) -> BusEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("event queue closed")
    }

    fn joined(uuid: &str) -> BusEvent {
        BusEvent::Presence(PresenceEvent {
            action: PresenceAction::Join,
            uuid: uuid.into(),
        })
    }

    #[tokio::test]
    async fn relays_presence_and_messages() {
        let (server, handle, url) = start().await;

        let (alice, mut alice_events) = BusClient::connect(&url, "c", "alice").await.unwrap();
        let (bob, mut bob_events) = BusClient::connect(&url, "c", "bob").await.unwrap();

        assert_eq!(next_event(&mut alice_events).await, joined("bob"));
        assert_eq!(next_event(&mut bob_events).await, joined("alice"));
        assert_eq!(server.subscribers("c").await, vec!["alice", "bob"]);

        let msg = SignalMessage::control("alice", "bob", ControlAction::Cancel);
        alice.publish(msg.clone()).unwrap();
        assert_eq!(next_event(&mut bob_events).await, BusEvent::Signal(msg));

        // The publisher does not hear its own message.
        let echo = tokio::time::timeout(Duration::from_millis(200), alice_events.recv()).await;
        assert!(echo.is_err());

        drop(bob);
        assert_eq!(
            next_event(&mut alice_events).await,
            BusEvent::Presence(PresenceEvent {
                action: PresenceAction::Leave,
                uuid: "bob".into(),
            })
        );
        assert_eq!(server.subscribers("c").await, vec!["alice"]);

        alice.close().await;
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let (server, handle, url) = start().await;

        let (alice, mut alice_events) = BusClient::connect(&url, "one", "alice").await.unwrap();
        let (_bob, mut bob_events) = BusClient::connect(&url, "two", "bob").await.unwrap();
        let (_carol, _carol_events) = BusClient::connect(&url, "one", "carol").await.unwrap();

        assert_eq!(next_event(&mut alice_events).await, joined("carol"));
        alice
            .publish(SignalMessage::control("alice", "bob", ControlAction::Cancel))
            .unwrap();
        let leaked = tokio::time::timeout(Duration::from_millis(200), bob_events.recv()).await;
        assert!(leaked.is_err());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connection_must_subscribe_first() {
        let (server, handle, url) = start().await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let publish = RelayFrame::Publish {
            channel: "c".into(),
            message: serde_json::json!({}),
        };
        ws.send(tungstenite::Message::Text(
            serde_json::to_string(&publish).unwrap().into(),
        ))
        .await
        .unwrap();

        // The relay closes the connection without registering anyone.
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        assert!(server.subscribers("c").await.is_empty());

        server.shutdown();
        handle.await.unwrap();
    }
}
