fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use fshare_protocol::{
        ChannelMessage, ControlAction, PresenceAction, PresenceEvent, RelayFrame, SignalBody,
        SignalMessage,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Bus messages ---

    #[test]
    fn fixture_signal_offer() {
        let msg: SignalMessage = roundtrip_test("signal_offer.json");
        assert_eq!(msg.source, "alice");
        let meta = msg.metadata().expect("offer carries metadata");
        assert_eq!(meta.name, "photo.png");
        assert_eq!(meta.chunk_count, 3);
        assert_eq!(meta.total_bytes, Some(130_000));
    }

    #[test]
    fn fixture_signal_answer() {
        let msg: SignalMessage = roundtrip_test("signal_answer.json");
        assert!(msg.is_for("alice"));
        assert!(msg.metadata().is_none());
    }

    #[test]
    fn fixture_signal_candidate() {
        let msg: SignalMessage = roundtrip_test("signal_candidate.json");
        match msg.body {
            SignalBody::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("Xb4q"));
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn fixture_signal_controls() {
        let reject: SignalMessage = roundtrip_test("signal_reject.json");
        assert_eq!(
            reject.body,
            SignalBody::Control {
                action: ControlAction::Reject
            }
        );
        let cancel: SignalMessage = roundtrip_test("signal_cancel.json");
        assert_eq!(
            cancel.body,
            SignalBody::Control {
                action: ControlAction::Cancel
            }
        );
    }

    #[test]
    fn fixture_presence_join() {
        let ev: PresenceEvent = roundtrip_test("presence_join.json");
        assert_eq!(ev.action, PresenceAction::Join);
    }

    // --- Data channel messages ---

    #[test]
    fn fixture_channel_messages() {
        let data: ChannelMessage = roundtrip_test("channel_data.json");
        let packaged = fshare_transfer::package_data_message(2, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(data, ChannelMessage::from_json(&packaged).unwrap());

        let request: ChannelMessage = roundtrip_test("channel_request.json");
        let packaged = fshare_transfer::package_request_message(&[0, 1, 2]).unwrap();
        assert_eq!(request, ChannelMessage::from_json(&packaged).unwrap());

        let done: ChannelMessage = roundtrip_test("channel_done.json");
        let packaged = fshare_transfer::package_done_message().unwrap();
        assert_eq!(done, ChannelMessage::from_json(&packaged).unwrap());
    }

    #[test]
    fn fixture_legacy_request_decodes_to_request() {
        let legacy: ChannelMessage = serde_json::from_value(load_fixture("channel_request_legacy.json"))
            .expect("legacy request decodes");
        let current: ChannelMessage =
            serde_json::from_value(load_fixture("channel_request.json")).unwrap();
        assert_eq!(legacy, current);
    }

    // --- Relay frames ---

    #[test]
    fn fixture_relay_frames() {
        for name in [
            "relay_subscribe.json",
            "relay_publish.json",
            "relay_message.json",
            "relay_presence.json",
        ] {
            let frame: RelayFrame = roundtrip_test(name);
            assert_eq!(frame.channel(), fshare_protocol::constants::BUS_CHANNEL);
        }
    }

    #[test]
    fn fixture_relay_message_carries_signal() {
        let frame: RelayFrame = roundtrip_test("relay_message.json");
        let RelayFrame::Message { message, .. } = frame else {
            panic!("expected message frame");
        };
        let signal: SignalMessage = serde_json::from_value(message).unwrap();
        assert!(signal.is_for("alice"));
    }
}
