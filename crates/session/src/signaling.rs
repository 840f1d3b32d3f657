//! Description and candidate exchange against a [`PeerTransport`].
//!
//! Transport operations are queued to a per-transport worker that runs them
//! strictly in order and reports each outcome back to the session, tagged
//! with the transport's epoch. A reset cancels the worker; outcomes of
//! operations still in flight are never delivered.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use fshare_protocol::constants::{SDP_BANDWIDTH_DEFAULT, SDP_BANDWIDTH_PATCHED};
use fshare_protocol::{FileMetadata, IceCandidate, SessionDescription};

use crate::TransportError;
use crate::session::Input;
use crate::transport::{DataChannel, PeerTransport};
use crate::types::Role;

/// Raises the default bandwidth cap token in a locally generated description.
///
/// Only the first occurrence is replaced. Descriptions without the token are
/// returned unchanged.
pub fn patch_bandwidth(sdp: &str) -> String {
    sdp.replacen(SDP_BANDWIDTH_DEFAULT, SDP_BANDWIDTH_PATCHED, 1)
}

// ---------------------------------------------------------------------------
// Candidate buffers
// ---------------------------------------------------------------------------

/// Candidates that cannot be acted on yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCandidates {
    /// Local candidates published before the peer's description was applied.
    pub local: Vec<IceCandidate>,
    /// Peer candidates received before the peer's description was applied.
    pub remote: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Operation worker
// ---------------------------------------------------------------------------

pub(crate) enum TransportOp {
    CreateDescription(Role),
    SetLocal(SessionDescription),
    ApplyRemote {
        desc: SessionDescription,
        metadata: Option<FileMetadata>,
    },
    AddCandidate(IceCandidate),
    OpenChannel(String),
}

pub(crate) enum OpOutcome {
    DescriptionCreated(Result<SessionDescription, TransportError>),
    LocalApplied(Result<SessionDescription, TransportError>),
    RemoteApplied {
        desc: SessionDescription,
        metadata: Option<FileMetadata>,
        result: Result<(), TransportError>,
    },
    CandidateAdded(Result<(), TransportError>),
    ChannelCreated(Result<Arc<dyn DataChannel>, TransportError>),
}

async fn execute(transport: &dyn PeerTransport, op: TransportOp) -> OpOutcome {
    match op {
        TransportOp::CreateDescription(role) => {
            OpOutcome::DescriptionCreated(transport.create_local_description(role).await)
        }
        TransportOp::SetLocal(desc) => {
            let result = transport.set_local_description(desc.clone()).await;
            OpOutcome::LocalApplied(result.map(|()| desc))
        }
        TransportOp::ApplyRemote { desc, metadata } => {
            let result = transport.apply_remote_description(desc.clone()).await;
            OpOutcome::RemoteApplied {
                desc,
                metadata,
                result,
            }
        }
        TransportOp::AddCandidate(candidate) => {
            OpOutcome::CandidateAdded(transport.add_remote_candidate(candidate).await)
        }
        TransportOp::OpenChannel(label) => {
            OpOutcome::ChannelCreated(transport.open_channel(&label).await)
        }
    }
}

async fn run_ops(
    transport: Arc<dyn PeerTransport>,
    mut ops: mpsc::UnboundedReceiver<TransportOp>,
    inputs: mpsc::UnboundedSender<Input>,
    epoch: u64,
    cancel: CancellationToken,
) {
    loop {
        let op = tokio::select! {
            _ = cancel.cancelled() => break,
            op = ops.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = execute(transport.as_ref(), op) => outcome,
        };
        if inputs.send(Input::Op { epoch, outcome }).is_err() {
            break;
        }
    }
    trace!(epoch, "transport worker stopped");
}

// ---------------------------------------------------------------------------
// SignalingManager
// ---------------------------------------------------------------------------

/// Negotiation state bound to one transport.
pub(crate) struct SignalingManager {
    pending: PendingCandidates,
    remote_applied: bool,
    patch: bool,
    ops: mpsc::UnboundedSender<TransportOp>,
}

impl SignalingManager {
    /// Starts the operation worker for `transport`.
    pub fn start(
        transport: Arc<dyn PeerTransport>,
        inputs: mpsc::UnboundedSender<Input>,
        epoch: u64,
        cancel: CancellationToken,
        patch: bool,
    ) -> Self {
        let (ops, ops_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_ops(transport, ops_rx, inputs, epoch, cancel));
        Self {
            pending: PendingCandidates::default(),
            remote_applied: false,
            patch,
            ops,
        }
    }

    fn queue(&self, op: TransportOp) {
        if self.ops.send(op).is_err() {
            trace!("transport worker gone, dropping operation");
        }
    }

    pub fn pending(&self) -> &PendingCandidates {
        &self.pending
    }

    pub fn create_description(&self, role: Role) {
        debug!(?role, "creating local description");
        self.queue(TransportOp::CreateDescription(role));
    }

    pub fn open_channel(&self, label: &str) {
        self.queue(TransportOp::OpenChannel(label.to_string()));
    }

    /// Adjusts a freshly created description and queues it for local
    /// application. Returns the description as it will be applied.
    pub fn on_description_created(&self, mut desc: SessionDescription) -> SessionDescription {
        if self.patch {
            desc.sdp = patch_bandwidth(&desc.sdp);
        }
        self.queue(TransportOp::SetLocal(desc.clone()));
        desc
    }

    pub fn apply_remote(&self, desc: SessionDescription, metadata: Option<FileMetadata>) {
        debug!(kind = ?desc.kind, "applying remote description");
        self.queue(TransportOp::ApplyRemote { desc, metadata });
    }

    /// Marks the remote description applied and flushes buffered candidates
    /// into the transport. Returns how many were flushed.
    pub fn on_remote_applied(&mut self) -> usize {
        self.remote_applied = true;
        self.pending.local.clear();
        let drained: Vec<_> = self.pending.remote.drain(..).collect();
        let n = drained.len();
        for candidate in drained {
            self.queue(TransportOp::AddCandidate(candidate));
        }
        n
    }

    /// Buffers a peer candidate, or forwards it right away once the remote
    /// description is in place. Returns `true` if it was forwarded.
    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) -> bool {
        if self.remote_applied {
            self.queue(TransportOp::AddCandidate(candidate));
            true
        } else {
            self.pending.remote.push(candidate);
            false
        }
    }

    /// Remembers a published local candidate until the remote description is
    /// known.
    pub fn record_local_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_applied {
            self.pending.local.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::memory::MemoryNetwork;
    use crate::transport::{PeerTransportFactory, TransportEvent, TransportEvents};

    async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<Input>) -> OpOutcome {
        loop {
            match rx.recv().await {
                Some(Input::Op { outcome, .. }) => return outcome,
                Some(_) => continue,
                None => panic!("input queue closed"),
            }
        }
    }

    /// Produces an applied offer and its candidate from a second endpoint.
    async fn remote_offer(net: &MemoryNetwork) -> (SessionDescription, IceCandidate) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let offerer = net.create(TransportEvents::new(0, tx));
        let offer = offerer
            .create_local_description(Role::Initiator)
            .await
            .unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();
        let candidate = loop {
            if let Some(Input::Transport {
                event: TransportEvent::LocalCandidate(c),
                ..
            }) = rx.recv().await
            {
                break c;
            }
        };
        (offer, candidate)
    }

    #[tokio::test]
    async fn remote_candidates_wait_for_remote_description() {
        let net = MemoryNetwork::new();
        let (offer, candidate) = remote_offer(&net).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = net.create(TransportEvents::new(0, tx.clone()));
        let mut mgr = SignalingManager::start(transport, tx, 0, CancellationToken::new(), true);

        assert!(!mgr.add_remote_candidate(candidate.clone()));
        assert_eq!(mgr.pending().remote, vec![candidate.clone()]);

        mgr.apply_remote(offer, None);
        match next_outcome(&mut rx).await {
            OpOutcome::RemoteApplied { result, .. } => result.unwrap(),
            _ => panic!("expected remote description outcome"),
        }
        assert_eq!(mgr.on_remote_applied(), 1);
        assert!(mgr.pending().is_empty());
        assert!(matches!(
            next_outcome(&mut rx).await,
            OpOutcome::CandidateAdded(Ok(()))
        ));

        // Once the remote description is in place candidates go straight through.
        assert!(mgr.add_remote_candidate(candidate));
        assert!(mgr.pending().remote.is_empty());
        assert!(matches!(
            next_outcome(&mut rx).await,
            OpOutcome::CandidateAdded(Ok(()))
        ));

        mgr.create_description(Role::Responder);
        let desc = match next_outcome(&mut rx).await {
            OpOutcome::DescriptionCreated(result) => result.unwrap(),
            _ => panic!("expected created description"),
        };
        let applied = mgr.on_description_created(desc);
        assert!(applied.sdp.contains("b=AS:1638400"));
        assert!(!applied.sdp.contains("b=AS:30\r"));
        match next_outcome(&mut rx).await {
            OpOutcome::LocalApplied(result) => assert_eq!(result.unwrap(), applied),
            _ => panic!("expected local description outcome"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_worker_reports_nothing() {
        let net = MemoryNetwork::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = net.create(TransportEvents::new(3, tx.clone()));
        let cancel = CancellationToken::new();
        let mgr = SignalingManager::start(transport, tx, 3, cancel.clone(), false);
        cancel.cancel();
        mgr.create_description(Role::Initiator);
        let res = tokio::time::timeout(Duration::from_secs(1), next_outcome(&mut rx)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn local_candidates_are_kept_until_remote_description() {
        let net = MemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = net.create(TransportEvents::new(0, tx.clone()));
        let mut mgr = SignalingManager::start(transport, tx, 0, CancellationToken::new(), true);
        mgr.record_local_candidate(IceCandidate::new("a"));
        assert_eq!(mgr.pending().local.len(), 1);
        mgr.on_remote_applied();
        assert!(mgr.pending().local.is_empty());
        mgr.record_local_candidate(IceCandidate::new("b"));
        assert!(mgr.pending().local.is_empty());
    }

    #[test]
    fn patch_replaces_first_token_only() {
        let sdp = "v=0\r\nb=AS:30\r\nm=application\r\nb=AS:30\r\n";
        assert_eq!(
            patch_bandwidth(sdp),
            "v=0\r\nb=AS:1638400\r\nm=application\r\nb=AS:30\r\n"
        );
    }

    #[test]
    fn patch_leaves_other_descriptions_alone() {
        let sdp = "v=0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";
        assert_eq!(patch_bandwidth(sdp), sdp);
    }

    #[test]
    fn pending_candidates_empty() {
        let mut pending = PendingCandidates::default();
        assert!(pending.is_empty());
        pending.remote.push(IceCandidate::new("c"));
        assert!(!pending.is_empty());
    }
}
