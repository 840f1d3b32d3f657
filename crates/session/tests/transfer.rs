//! End-to-end shares between two clients over the in-memory network and bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use fshare_protocol::{SignalBody, SignalMessage};
use fshare_session::memory::{MemoryBus, MemoryNetwork};
use fshare_session::{
    Notice, PeerTransport, PeerTransportFactory, SessionConfig, SessionEvent, SessionEventKind,
    SessionHandle, SessionSnapshot, SessionState, ShareClient, TransportEvent, TransportEvents,
};
use fshare_transfer::StagedFile;

const WAIT: Duration = Duration::from_secs(30);

struct Peer {
    session: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
}

/// Joins `me` to the bus and starts a session towards `other`.
fn spawn_peer(me: &str, other: &str, bus: &MemoryBus, net: &MemoryNetwork) -> Peer {
    let (bus_client, mut bus_rx) = bus.join(me);
    let (mut client, events) = ShareClient::new(
        me,
        SessionConfig::default(),
        Arc::new(net.clone()),
        Arc::new(bus_client),
    )
    .unwrap();
    let session = client.add_peer(other);
    tokio::spawn(async move {
        while let Some(event) = bus_rx.recv().await {
            client.handle_bus_event(event);
        }
    });
    Peer { session, events }
}

async fn next_matching<F>(events: &mut mpsc::Receiver<SessionEvent>, mut pred: F) -> SessionEventKind
where
    F: FnMut(&SessionEventKind) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event.kind) {
                return event.kind;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Offers `bytes` from alice to bob and has bob accept it.
async fn offer_and_accept(alice: &Peer, bob: &mut Peer, bytes: Vec<u8>) {
    alice
        .session
        .offer_file(StagedFile::new("photo.png", "image/png", bytes))
        .unwrap();
    next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::OfferReceived(_))).await;
    bob.session.accept().unwrap();
}

#[tokio::test(start_paused = true)]
async fn file_is_shared_end_to_end() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let mut alice = spawn_peer("alice", "bob", &bus, &net);
    let mut bob = spawn_peer("bob", "alice", &bus, &net);

    let bytes = sample_bytes(130_000);
    alice
        .session
        .offer_file(StagedFile::new("photo.png", "image/png", bytes.clone()))
        .unwrap();
    let offered = next_matching(&mut bob.events, |k| {
        matches!(k, SessionEventKind::OfferReceived(_))
    })
    .await;
    match offered {
        SessionEventKind::OfferReceived(meta) => {
            assert_eq!(meta.name, "photo.png");
            assert_eq!(meta.mime, "image/png");
            assert_eq!(meta.chunk_count, 3);
            assert_eq!(meta.total_bytes, Some(130_000));
        }
        other => panic!("unexpected event {other:?}"),
    }
    bob.session.accept().unwrap();

    let ready = next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::FileReady(_))).await;
    match ready {
        SessionEventKind::FileReady(file) => {
            assert_eq!(file.name, "photo.png");
            assert_eq!(file.bytes, bytes);
        }
        other => panic!("unexpected event {other:?}"),
    }
    next_matching(&mut alice.events, |k| {
        matches!(k, SessionEventKind::ShareCompleted { elapsed: Some(_) })
    })
    .await;

    let offer = bus
        .published()
        .into_iter()
        .find(|m| m.source == "alice" && m.metadata().is_some())
        .expect("offer published");
    assert_eq!(offer.target, "bob");
    assert_eq!(offer.metadata().unwrap().chunk_count, 3);
    match offer.body {
        SignalBody::Description { desc, .. } => {
            assert!(desc.sdp.contains("b=AS:1638400"));
            assert!(!desc.sdp.contains("b=AS:30\r"));
        }
        other => panic!("unexpected body {other:?}"),
    }

    let a = alice.session.snapshot().await.unwrap();
    let b = bob.session.snapshot().await.unwrap();
    assert_eq!(a.state, SessionState::Idle);
    assert_eq!(b.state, SessionState::Idle);
    assert!(!a.connected && !b.connected);
    assert!(a.epoch >= 1 && b.epoch >= 1);
    assert_eq!(b.role, None);
    assert!(!b.has_channel);
    assert_eq!(b.missing_chunks, 0);
    assert_eq!(b.num_requested, 0);
    assert_eq!(b.received_chunks, 0);
    assert_eq!(b.pending_local_candidates, 0);
    assert_eq!(b.pending_remote_candidates, 0);

    // Old transports are closed, only the fresh one per session is left.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(net.live_transports(), 2);
}

#[tokio::test(start_paused = true)]
async fn lost_chunk_is_requested_again_after_expiry() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);
    net.set_drop_filter(move |text| {
        text.contains(r#""action":"data","id":1,"#) && !flag.swap(true, Ordering::SeqCst)
    });

    let mut alice = spawn_peer("alice", "bob", &bus, &net);
    let mut bob = spawn_peer("bob", "alice", &bus, &net);
    let bytes = sample_bytes(130_000);
    offer_and_accept(&alice, &mut bob, bytes.clone()).await;

    match next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::FileReady(_))).await {
        SessionEventKind::FileReady(file) => assert_eq!(file.bytes, bytes),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(dropped.load(Ordering::SeqCst));

    match next_matching(&mut alice.events, |k| {
        matches!(k, SessionEventKind::ShareCompleted { .. })
    })
    .await
    {
        SessionEventKind::ShareCompleted { elapsed } => {
            let elapsed = elapsed.expect("share was timed");
            assert!(elapsed >= SessionConfig::default().expire_time);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unusable_offer_is_rejected() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    net.fail_remote_descriptions(true);
    let mut alice = spawn_peer("alice", "bob", &bus, &net);
    let _bob = spawn_peer("bob", "alice", &bus, &net);

    alice
        .session
        .offer_file(StagedFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();
    let notice = next_matching(&mut alice.events, |k| matches!(k, SessionEventKind::Notice(_))).await;
    assert!(matches!(notice, SessionEventKind::Notice(Notice::PeerRejected)));

    let snapshot = alice.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.epoch, 1);
    assert!(snapshot.role.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_before_accept_reaches_the_peer() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let alice = spawn_peer("alice", "bob", &bus, &net);
    let mut bob = spawn_peer("bob", "alice", &bus, &net);

    alice
        .session
        .offer_file(StagedFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();
    next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::OfferReceived(_))).await;
    let pending = bob.session.snapshot().await.unwrap();
    assert!(pending.affordances.can_accept);

    alice.session.cancel().unwrap();
    let notice = next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::Notice(_))).await;
    assert!(matches!(notice, SessionEventKind::Notice(Notice::PeerCancelled)));

    let snapshot = bob.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(!snapshot.affordances.can_accept);
    assert_eq!(snapshot.expected_chunks, 0);
}

#[tokio::test(start_paused = true)]
async fn peer_leaving_mid_share_resets() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let mut alice = spawn_peer("alice", "bob", &bus, &net);
    let mut bob = spawn_peer("bob", "alice", &bus, &net);

    alice
        .session
        .offer_file(StagedFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();
    next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::OfferReceived(_))).await;

    bus.leave("bob");
    let notice = next_matching(&mut alice.events, |k| matches!(k, SessionEventKind::Notice(_))).await;
    assert!(matches!(notice, SessionEventKind::Notice(Notice::PeerLeft)));

    let snapshot = alice.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(!snapshot.available);
    assert!(!snapshot.affordances.can_offer);
}

#[tokio::test(start_paused = true)]
async fn empty_file_completes_without_requests() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let mut alice = spawn_peer("alice", "bob", &bus, &net);
    let mut bob = spawn_peer("bob", "alice", &bus, &net);

    offer_and_accept(&alice, &mut bob, Vec::new()).await;
    match next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::FileReady(_))).await {
        SessionEventKind::FileReady(file) => {
            assert!(file.bytes.is_empty());
            assert_eq!(file.name, "photo.png");
        }
        other => panic!("unexpected event {other:?}"),
    }
    next_matching(&mut alice.events, |k| {
        matches!(k, SessionEventKind::ShareCompleted { .. })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn sessions_are_reusable_after_a_share() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let mut alice = spawn_peer("alice", "bob", &bus, &net);
    let mut bob = spawn_peer("bob", "alice", &bus, &net);

    for len in [10_000, 75_000] {
        let bytes = sample_bytes(len);
        offer_and_accept(&alice, &mut bob, bytes.clone()).await;
        match next_matching(&mut bob.events, |k| matches!(k, SessionEventKind::FileReady(_))).await
        {
            SessionEventKind::FileReady(file) => assert_eq!(file.bytes, bytes),
            other => panic!("unexpected event {other:?}"),
        }
        next_matching(&mut alice.events, |k| {
            matches!(k, SessionEventKind::ShareCompleted { .. })
        })
        .await;
        // Let both sessions finish resetting before the next offer.
        alice.session.snapshot().await.unwrap();
        bob.session.snapshot().await.unwrap();
    }
}

/// Waits until `source` has published an offer carrying file metadata.
async fn published_offer(bus: &MemoryBus, source: &str) -> SignalMessage {
    timeout(WAIT, async {
        loop {
            let offer = bus
                .published()
                .into_iter()
                .find(|m| m.source == source && m.metadata().is_some());
            if let Some(offer) = offer {
                return offer;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for offer")
}

/// Sends alice's real offer to carol with its metadata rewritten by `edit`,
/// and returns carol's state once alice learned the offer was refused.
async fn refused_offer(edit: impl FnOnce(&mut Option<usize>, &mut Option<u64>)) -> SessionSnapshot {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let mut alice = spawn_peer("alice", "carol", &bus, &net);

    // Carol's bus traffic is not routed, so only the rewritten offer reaches her.
    let (carol_bus, _carol_rx) = bus.join("carol");
    let (mut carol_client, mut carol_events) = ShareClient::new(
        "carol",
        SessionConfig::default(),
        Arc::new(net.clone()),
        Arc::new(carol_bus),
    )
    .unwrap();
    let carol = carol_client.add_peer("alice");

    alice
        .session
        .offer_file(StagedFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();
    let mut offer = published_offer(&bus, "alice").await;
    match &mut offer.body {
        SignalBody::Description {
            chunk_count,
            total_bytes,
            ..
        } => edit(chunk_count, total_bytes),
        other => panic!("unexpected body {other:?}"),
    }
    carol.handle_signal(offer).unwrap();

    let notice = next_matching(&mut alice.events, |k| matches!(k, SessionEventKind::Notice(_))).await;
    assert!(matches!(notice, SessionEventKind::Notice(Notice::PeerRejected)));

    let snapshot = timeout(WAIT, carol.snapshot())
        .await
        .expect("session stopped answering")
        .unwrap();
    while let Ok(event) = carol_events.try_recv() {
        assert!(!matches!(event.kind, SessionEventKind::OfferReceived(_)));
    }
    snapshot
}

#[tokio::test(start_paused = true)]
async fn offer_above_chunk_limit_is_refused() {
    let snapshot = refused_offer(|chunks, size| {
        *chunks = Some(usize::MAX / 2);
        *size = None;
    })
    .await;
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.epoch, 1);
    assert_eq!(snapshot.expected_chunks, 0);
    assert_eq!(snapshot.missing_chunks, 0);
    assert!(!snapshot.affordances.can_accept);
}

#[tokio::test(start_paused = true)]
async fn offer_with_more_chunks_than_bytes_is_refused() {
    let snapshot = refused_offer(|chunks, size| {
        *chunks = Some(10);
        *size = Some(5);
    })
    .await;
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.expected_chunks, 0);
    assert!(!snapshot.affordances.can_accept);
}

/// Starts a share whose chunks never arrive, and returns once bob is
/// requesting them.
async fn stalled_share(bus: &MemoryBus, net: &MemoryNetwork) -> (Peer, Peer) {
    net.set_drop_filter(|text| text.contains(r#""action":"data""#));
    let alice = spawn_peer("alice", "bob", bus, net);
    let mut bob = spawn_peer("bob", "alice", bus, net);
    offer_and_accept(&alice, &mut bob, sample_bytes(130_000)).await;
    next_matching(&mut bob.events, |k| {
        matches!(
            k,
            SessionEventKind::StateChanged {
                state: SessionState::Transferring,
                ..
            }
        )
    })
    .await;
    let snapshot = bob.session.snapshot().await.unwrap();
    assert_eq!(snapshot.expected_chunks, 3);
    assert_eq!(snapshot.num_requested, 3);
    (alice, bob)
}

fn assert_cleared(snapshot: &SessionSnapshot) {
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(!snapshot.connected);
    assert!(!snapshot.has_channel);
    assert_eq!(snapshot.role, None);
    assert_eq!(snapshot.expected_chunks, 0);
    assert_eq!(snapshot.received_chunks, 0);
    assert_eq!(snapshot.missing_chunks, 0);
    assert_eq!(snapshot.num_requested, 0);
}

#[tokio::test(start_paused = true)]
async fn channel_failure_mid_share_resets_both_sides() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let (mut alice, mut bob) = stalled_share(&bus, &net).await;

    net.break_channels();
    for peer in [&mut alice, &mut bob] {
        let notice = next_matching(&mut peer.events, |k| matches!(k, SessionEventKind::Notice(_))).await;
        assert!(matches!(notice, SessionEventKind::Notice(Notice::ChannelFailed)));
        assert_cleared(&peer.session.snapshot().await.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn local_cancel_mid_share_resets_both_sides() {
    let bus = MemoryBus::new();
    let net = MemoryNetwork::new();
    let (mut alice, bob) = stalled_share(&bus, &net).await;
    let before = bob.session.snapshot().await.unwrap();

    bob.session.cancel().unwrap();
    let after = bob.session.snapshot().await.unwrap();
    assert_cleared(&after);
    assert_eq!(after.epoch, before.epoch + 1);
    assert!(
        bus.published()
            .iter()
            .any(|m| m.source == "bob" && matches!(m.body, SignalBody::Control { .. }))
    );

    // The closing channel can overtake the cancel on the bus.
    let notice = next_matching(&mut alice.events, |k| matches!(k, SessionEventKind::Notice(_))).await;
    assert!(matches!(
        notice,
        SessionEventKind::Notice(Notice::PeerCancelled | Notice::ChannelFailed)
    ));
    assert_cleared(&alice.session.snapshot().await.unwrap());
}

/// Hands out memory transports and remembers the event sink of each.
#[derive(Clone, Default)]
struct RecordingFactory {
    net: MemoryNetwork,
    sinks: Arc<Mutex<Vec<TransportEvents>>>,
}

impl PeerTransportFactory for RecordingFactory {
    fn create(&self, events: TransportEvents) -> Arc<dyn PeerTransport> {
        self.sinks.lock().unwrap().push(events.clone());
        self.net.create(events)
    }
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_transport_are_ignored() {
    let bus = MemoryBus::new();
    let (bus_client, _bus_rx) = bus.join("alice");
    let factory = RecordingFactory::default();
    let (mut client, mut events) = ShareClient::new(
        "alice",
        SessionConfig::default(),
        Arc::new(factory.clone()),
        Arc::new(bus_client),
    )
    .unwrap();
    let session = client.add_peer("bob");

    session
        .offer_file(StagedFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();
    session.cancel().unwrap();
    let before = session.snapshot().await.unwrap();
    assert_eq!(before.state, SessionState::Idle);
    assert_eq!(before.epoch, 1);

    let stale = factory.sinks.lock().unwrap()[0].clone();
    assert_eq!(stale.epoch(), 0);
    assert!(stale.emit(TransportEvent::ChannelOpen));
    assert!(stale.emit(TransportEvent::ChannelMessage(
        r#"{"action":"request","ids":[0]}"#.into()
    )));
    assert!(stale.emit(TransportEvent::ChannelClosed));

    assert_eq!(session.snapshot().await.unwrap(), before);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(
            event.kind,
            SessionEventKind::StateChanged {
                state: SessionState::Connected,
                ..
            } | SessionEventKind::Notice(_)
        ));
    }
}
