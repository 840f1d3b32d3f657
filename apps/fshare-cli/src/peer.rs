//! `send` and `receive`: one client on the relay, driven until the share ends.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fshare_bus::BusClient;
use fshare_rtc::WebRtcFactory;
use fshare_session::{BusEvent, SessionEvent, SessionEventKind, ShareClient};
use fshare_transfer::StagedFile;

use crate::config::Config;
use crate::downloads::save_download;

/// A connected client and the queues it is driven from.
struct Peer {
    bus: Arc<BusClient>,
    client: ShareClient,
    bus_events: mpsc::Receiver<BusEvent>,
    events: mpsc::Receiver<SessionEvent>,
}

impl Peer {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        let (bus, bus_events) =
            BusClient::connect(&config.relay_url, &config.bus_channel, &config.name)
                .await
                .with_context(|| format!("connecting to relay {}", config.relay_url))?;
        let bus = Arc::new(bus);
        let factory = Arc::new(WebRtcFactory::new(config.ice_servers.clone()));
        let (client, events) = ShareClient::new(
            config.name.clone(),
            config.session_config(),
            factory,
            bus.clone(),
        )?;
        Ok(Self {
            bus,
            client,
            bus_events,
            events,
        })
    }

    /// Waits for the next session event, routing bus traffic meanwhile.
    async fn next_event(&mut self) -> anyhow::Result<SessionEvent> {
        loop {
            tokio::select! {
                event = self.bus_events.recv() => match event {
                    Some(BusEvent::Disconnected) | None => anyhow::bail!("relay connection lost"),
                    Some(event) => self.client.handle_bus_event(event),
                },
                event = self.events.recv() => {
                    return event.context("session event stream closed");
                }
            }
        }
    }

    async fn close(mut self) {
        self.client.shutdown();
        self.bus.close().await;
    }
}

/// Offers `file` to `peer` once it is online and waits for the share to finish.
pub async fn send(config: &Config, peer: &str, file: &Path) -> anyhow::Result<()> {
    let staged = StagedFile::from_path(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let mut p = Peer::connect(config).await?;
    let session = p.client.add_peer(peer);
    let mut pending = Some(staged);
    info!(%peer, file = %file.display(), "waiting for peer");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, cancelling share");
                if session.cancel().is_ok() {
                    // Queued behind the cancel, so the peer is told before the bus closes.
                    let _ = session.snapshot().await;
                }
                break Ok(());
            }
            event = p.next_event() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => break Err(e),
        };
        if event.peer != peer {
            continue;
        }

        match event.kind {
            SessionEventKind::Availability(true) => {
                if let Some(staged) = pending.take() {
                    info!(%peer, name = %staged.name, bytes = staged.bytes.len(), "peer online, offering file");
                    if let Err(e) = session.offer_file(staged) {
                        break Err(e.into());
                    }
                }
            }
            SessionEventKind::Availability(false) => info!(%peer, "peer went offline"),
            SessionEventKind::StateChanged { state, .. } => debug!(%peer, ?state, "state changed"),
            SessionEventKind::ShareCompleted { elapsed } => {
                match elapsed {
                    Some(d) => info!(%peer, "share completed in {:.2}s", d.as_secs_f64()),
                    None => info!(%peer, "share completed"),
                }
                break Ok(());
            }
            SessionEventKind::Notice(notice) => break Err(anyhow::anyhow!("share failed: {notice}")),
            _ => {}
        }
    };

    p.close().await;
    result
}

/// Accepts every offer and writes received files to the download directory.
///
/// With `once`, returns after the first file is saved.
pub async fn receive(config: &Config, once: bool) -> anyhow::Result<()> {
    let mut p = Peer::connect(config).await?;
    info!(name = %config.name, dir = %config.download_dir.display(), "waiting for offers");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted");
                break Ok(());
            }
            event = p.next_event() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => break Err(e),
        };
        let peer = event.peer;

        match event.kind {
            SessionEventKind::Availability(online) => info!(%peer, online, "presence"),
            SessionEventKind::OfferReceived(meta) => {
                info!(
                    %peer,
                    name = %meta.name,
                    mime = %meta.mime,
                    chunks = meta.chunk_count,
                    "accepting offer"
                );
                match p.client.session(&peer) {
                    Some(session) => {
                        if let Err(e) = session.accept() {
                            warn!(%peer, error = %e, "failed to accept offer");
                        }
                    }
                    None => warn!(%peer, "offer from a peer without a session"),
                }
            }
            SessionEventKind::Progress {
                received,
                expected,
                bytes_per_second,
                ..
            } => debug!(%peer, received, expected, "{:.0} B/s", bytes_per_second),
            SessionEventKind::FileReady(file) => {
                match save_download(&config.download_dir, &file).await {
                    Ok(path) => {
                        info!(%peer, path = %path.display(), checksum = %file.checksum, "file saved");
                        if once {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(%peer, name = %file.name, "failed to save download: {e:#}");
                        if once {
                            break Err(e);
                        }
                    }
                }
            }
            SessionEventKind::Notice(notice) => warn!(%peer, "{notice}"),
            SessionEventKind::StateChanged { state, .. } => debug!(%peer, ?state, "state changed"),
            SessionEventKind::ShareCompleted { .. } => {}
        }
    };

    p.close().await;
    result
}
