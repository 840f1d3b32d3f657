//! Messages published on the bootstrap bus.
//!
//! Field names follow the browser client so both implementations can share a
//! bus: the sender identity travels as `uuid`, descriptions as `desc`, and the
//! transfer metadata attached to an offer as `fName` / `fType` / `nChunks`.

use serde::{Deserialize, Serialize};

use crate::constants::{ControlAction, DescriptionKind, PresenceAction};

/// A negotiated session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    /// Creates an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Creates an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network candidate discovered by one side of the peer transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Creates a candidate with only the candidate line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Transfer metadata announced by the initiating peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub mime: String,
    pub chunk_count: usize,
    /// Total size in bytes, when the sender announced it.
    pub total_bytes: Option<u64>,
}

/// Payload of a bus message, discriminated by which field is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalBody {
    Description {
        desc: SessionDescription,
        #[serde(rename = "fName", default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(rename = "fType", default, skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
        #[serde(rename = "nChunks", default, skip_serializing_if = "Option::is_none")]
        chunk_count: Option<usize>,
        #[serde(rename = "fSize", default, skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },
    Candidate {
        candidate: IceCandidate,
    },
    Control {
        action: ControlAction,
    },
}

/// A signaling message addressed from one peer to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "uuid")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(flatten)]
    pub body: SignalBody,
}

impl SignalMessage {
    /// Builds a description message, attaching transfer metadata when given.
    pub fn description(
        source: impl Into<String>,
        target: impl Into<String>,
        desc: SessionDescription,
        metadata: Option<&FileMetadata>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            body: SignalBody::Description {
                desc,
                file_name: metadata.map(|m| m.name.clone()),
                file_type: metadata.map(|m| m.mime.clone()),
                chunk_count: metadata.map(|m| m.chunk_count),
                total_bytes: metadata.and_then(|m| m.total_bytes),
            },
        }
    }

    /// Builds a candidate message.
    pub fn candidate(
        source: impl Into<String>,
        target: impl Into<String>,
        candidate: IceCandidate,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            body: SignalBody::Candidate { candidate },
        }
    }

    /// Builds a control message.
    pub fn control(
        source: impl Into<String>,
        target: impl Into<String>,
        action: ControlAction,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            body: SignalBody::Control { action },
        }
    }

    /// Returns the transfer metadata carried by an offer, if complete.
    ///
    /// A name and a chunk count are required; a missing MIME type defaults to
    /// the empty string like the browser client does.
    pub fn metadata(&self) -> Option<FileMetadata> {
        match &self.body {
            SignalBody::Description {
                file_name: Some(name),
                file_type,
                chunk_count: Some(chunk_count),
                total_bytes,
                ..
            } => Some(FileMetadata {
                name: name.clone(),
                mime: file_type.clone().unwrap_or_default(),
                chunk_count: *chunk_count,
                total_bytes: *total_bytes,
            }),
            _ => None,
        }
    }

    /// Returns `true` if this message is addressed to `me` by someone else.
    pub fn is_for(&self, me: &str) -> bool {
        self.source != me && self.target == me
    }
}

/// A presence notification from the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub uuid: String,
}
