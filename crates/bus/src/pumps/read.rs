//! Inbound frame pump of the bus client.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use fshare_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use fshare_protocol::{PresenceEvent, RelayFrame, SignalMessage};
use fshare_session::BusEvent;

/// Reads relay frames and turns them into [`BusEvent`]s.
///
/// Any incoming frame pushes the dead-connection deadline back by
/// [`WS_PONG_WAIT`]. When the loop ends for any reason other than
/// cancellation, [`BusEvent::Disconnected`] is delivered last.
pub(crate) async fn read_pump<S>(
    mut stream: S,
    channel: String,
    events: mpsc::Sender<BusEvent>,
    frames: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut deadline => {
                warn!("relay silent for {WS_PONG_WAIT:?}, closing");
                break;
            }

            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("bus read error: {e}");
                        break;
                    }
                    None => {
                        debug!("relay closed the stream");
                        break;
                    }
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => {
                        if let Some(event) = decode_frame(&text, &channel) {
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    tungstenite::Message::Ping(data) => {
                        let _ = frames.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("pong"),
                    tungstenite::Message::Close(_) => {
                        debug!("relay sent close");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = events.send(BusEvent::Disconnected).await;
}

/// Decodes one relay frame into a bus event for `channel`.
pub(crate) fn decode_frame(text: &str, channel: &str) -> Option<BusEvent> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("frame too large ({} bytes), dropping", text.len());
        return None;
    }
    let frame: RelayFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("malformed relay frame: {e}");
            return None;
        }
    };
    if frame.channel() != channel {
        trace!(channel = frame.channel(), "frame for another channel");
        return None;
    }
    match frame {
        RelayFrame::Message { message, .. } => match serde_json::from_value::<SignalMessage>(message) {
            Ok(msg) => Some(BusEvent::Signal(msg)),
            Err(e) => {
                debug!("ignoring unrecognized bus message: {e}");
                None
            }
        },
        RelayFrame::Presence { action, uuid, .. } => {
            Some(BusEvent::Presence(PresenceEvent { action, uuid }))
        }
        RelayFrame::Subscribe { .. } | RelayFrame::Publish { .. } => {
            trace!("ignoring client frame from relay");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fshare_protocol::{ControlAction, PresenceAction};
    use futures_util::stream;
    use std::time::Duration;

    #[test]
    fn decodes_messages_and_presence() {
        let text = r#"{"type":"message","channel":"c","message":{"uuid":"a","target":"b","action":"cancel"}}"#;
        assert_eq!(
            decode_frame(text, "c"),
            Some(BusEvent::Signal(SignalMessage::control(
                "a",
                "b",
                ControlAction::Cancel
            )))
        );

        let text = r#"{"type":"presence","channel":"c","action":"join","uuid":"bob"}"#;
        assert_eq!(
            decode_frame(text, "c"),
            Some(BusEvent::Presence(PresenceEvent {
                action: PresenceAction::Join,
                uuid: "bob".into()
            }))
        );
    }

    #[test]
    fn drops_foreign_and_malformed_frames() {
        let text = r#"{"type":"presence","channel":"other","action":"join","uuid":"bob"}"#;
        assert_eq!(decode_frame(text, "c"), None);
        assert_eq!(decode_frame("{", "c"), None);
        let text = r#"{"type":"message","channel":"c","message":{"hello":1}}"#;
        assert_eq!(decode_frame(text, "c"), None);
    }

    #[tokio::test]
    async fn stream_end_reports_disconnect() {
        let frames = vec![Ok(tungstenite::Message::Text(
            r#"{"type":"presence","channel":"c","action":"leave","uuid":"bob"}"#.into(),
        ))];
        let (events_tx, mut events) = mpsc::channel(4);
        let (frames_tx, _frames) = mpsc::channel(4);
        read_pump(
            stream::iter(frames),
            "c".into(),
            events_tx,
            frames_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(events.recv().await, Some(BusEvent::Presence(_))));
        assert_eq!(events.recv().await, Some(BusEvent::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_relay_is_declared_dead() {
        let (events_tx, mut events) = mpsc::channel(4);
        let (frames_tx, _frames) = mpsc::channel(4);
        let handle = tokio::spawn(read_pump(
            stream::pending::<Result<tungstenite::Message, tungstenite::Error>>(),
            "c".into(),
            events_tx,
            frames_tx,
            CancellationToken::new(),
        ));

        let start = tokio::time::Instant::now();
        assert_eq!(events.recv().await, Some(BusEvent::Disconnected));
        assert!(start.elapsed() >= WS_PONG_WAIT);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
