//! Outbound frame pump, shared by the client and the relay.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Drains `frames` into the socket until cancelled or the queue closes, then
/// sends a close frame.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut frames: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
    peer: String,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        let closing = frame.is_close();
        if let Err(e) = sink.send(frame).await {
            warn!(%peer, "bus write error: {e}");
            return;
        }
        if closing {
            debug!(%peer, "close frame sent");
            return;
        }
    }
    let _ = sink.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::time::Duration;

    fn capture() -> (
        impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
        mpsc::UnboundedReceiver<tungstenite::Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        });
        (Box::pin(sink), rx)
    }

    #[tokio::test]
    async fn frames_are_written_in_order_then_closed() {
        let (sink, mut written) = capture();
        let (tx, rx) = mpsc::channel(8);
        tx.send(tungstenite::Message::Text("a".into())).await.unwrap();
        tx.send(tungstenite::Message::Text("b".into())).await.unwrap();
        drop(tx);

        write_pump(sink, rx, CancellationToken::new(), "test".into()).await;

        assert_eq!(written.recv().await, Some(tungstenite::Message::Text("a".into())));
        assert_eq!(written.recv().await, Some(tungstenite::Message::Text("b".into())));
        assert!(matches!(written.recv().await, Some(tungstenite::Message::Close(_))));
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (sink, mut written) = capture();
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(sink, rx, cancel.clone(), "test".into()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
        assert!(matches!(written.recv().await, Some(tungstenite::Message::Close(_))));
    }
}
