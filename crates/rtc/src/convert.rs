//! Mapping between wire types and their webrtc counterparts.

use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use fshare_protocol::{DescriptionKind, IceCandidate, SessionDescription};
use fshare_session::TransportError;

pub(crate) fn backend(e: webrtc::Error) -> TransportError {
    TransportError::Backend(e.to_string())
}

pub(crate) fn to_rtc_description(
    desc: &SessionDescription,
) -> Result<RTCSessionDescription, TransportError> {
    let sdp = desc.sdp.clone();
    let parsed = match desc.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(sdp),
        DescriptionKind::Answer => RTCSessionDescription::answer(sdp),
        DescriptionKind::Pranswer => RTCSessionDescription::pranswer(sdp),
        kind => {
            return Err(TransportError::InvalidDescription(format!(
                "unsupported description kind {kind:?}"
            )));
        }
    };
    parsed.map_err(|e| TransportError::InvalidDescription(e.to_string()))
}

pub(crate) fn from_rtc_description(
    desc: RTCSessionDescription,
) -> Result<SessionDescription, TransportError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => DescriptionKind::Offer,
        RTCSdpType::Answer => DescriptionKind::Answer,
        RTCSdpType::Pranswer => DescriptionKind::Pranswer,
        RTCSdpType::Rollback => DescriptionKind::Rollback,
        other => {
            return Err(TransportError::InvalidDescription(format!(
                "unexpected local description type {other:?}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

pub(crate) fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub(crate) fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn descriptions_keep_kind_and_text() {
        let desc = SessionDescription::offer(SDP);
        let rtc = to_rtc_description(&desc).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Offer);
        assert_eq!(rtc.sdp, SDP);
        assert_eq!(from_rtc_description(rtc).unwrap(), desc);

        let rtc = to_rtc_description(&SessionDescription::answer(SDP)).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Answer);
    }

    #[test]
    fn unknown_kind_is_refused() {
        let desc = SessionDescription {
            kind: DescriptionKind::Unknown,
            sdp: SDP.into(),
        };
        assert!(matches!(
            to_rtc_description(&desc),
            Err(TransportError::InvalidDescription(_))
        ));
    }

    #[test]
    fn candidates_map_field_for_field() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        let init = to_rtc_candidate(candidate.clone());
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(from_rtc_candidate(init), candidate);
    }
}
