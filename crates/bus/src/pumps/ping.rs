use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use fshare_protocol::constants::WS_PING_PERIOD;

/// Queues a ping every [`WS_PING_PERIOD`] so the relay keeps the
/// subscription alive. The first ping goes out one period after start.
pub(crate) async fn ping_pump(
    frames: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    // No catch-up bursts after a stalled write queue.
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while cancel.run_until_cancelled(ticks.tick()).await.is_some() {
        let ping = tungstenite::Message::Ping(Vec::new().into());
        if frames.send(ping).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pings_on_period() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, cancel.clone()));

        let start = Instant::now();
        let first = rx.recv().await;
        assert!(matches!(first, Some(tungstenite::Message::Ping(_))));
        assert!(start.elapsed() >= WS_PING_PERIOD);

        cancel.cancel();
        handle.await.unwrap();
    }
}
