//! WebSocket client side of the bus.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fshare_protocol::RelayFrame;
use fshare_protocol::SignalMessage;
use fshare_protocol::constants::WS_MAX_MESSAGE_SIZE;
use fshare_session::{BusEvent, SignalBus, TransportError};

use crate::pumps::{ping::ping_pump, read::read_pump, write::write_pump};
use crate::{BusError, EVENT_BUFFER_SIZE, SEND_BUFFER_SIZE};

/// A peer's subscription to one relay channel.
///
/// Publishing never blocks: frames are queued for the write pump and a full
/// queue is reported as an error. Dropping the client closes the connection,
/// which the relay announces to the other subscribers as a leave.
pub struct BusClient {
    uuid: String,
    channel: String,
    frames: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
    ping_handle: JoinHandle<()>,
}

impl BusClient {
    /// Connects to the relay at `url` and subscribes to `channel` as `uuid`.
    ///
    /// Returns the client and the queue of events the relay delivers to it.
    pub async fn connect(
        url: &str,
        channel: &str,
        uuid: &str,
    ) -> Result<(Self, mpsc::Receiver<BusEvent>), BusError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (sink, stream) = ws_stream.split();

        let (frames, frames_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let cancel = CancellationToken::new();

        let subscribe = RelayFrame::Subscribe {
            channel: channel.to_string(),
            uuid: uuid.to_string(),
        };
        frames
            .send(tungstenite::Message::Text(serde_json::to_string(&subscribe)?.into()))
            .await
            .map_err(|_| BusError::Closed)?;

        let write_handle = tokio::spawn(write_pump(
            sink,
            frames_rx,
            cancel.clone(),
            url.to_string(),
        ));
        let read_handle = tokio::spawn(read_pump(
            stream,
            channel.to_string(),
            events,
            frames.clone(),
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(ping_pump(frames.clone(), cancel.clone()));

        info!(%url, %channel, %uuid, "connected to relay");
        let client = Self {
            uuid: uuid.to_string(),
            channel: channel.to_string(),
            frames,
            cancel,
            read_handle,
            write_handle,
            ping_handle,
        };
        Ok((client, events_rx))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Sends a close frame and stops the pumps.
    pub async fn close(&self) {
        debug!(uuid = %self.uuid, "closing bus connection");
        let _ = self.frames.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }

    fn encode(&self, message: &SignalMessage) -> Result<String, serde_json::Error> {
        let frame = RelayFrame::Publish {
            channel: self.channel.clone(),
            message: serde_json::to_value(message)?,
        };
        serde_json::to_string(&frame)
    }
}

impl SignalBus for BusClient {
    fn publish(&self, message: SignalMessage) -> Result<(), TransportError> {
        let text = self
            .encode(&message)
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        self.frames
            .try_send(tungstenite::Message::Text(text.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::Backend("bus send buffer full".into())
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
        self.ping_handle.abort();
    }
}
