// Wire contract checks for the broadcast protocol.
//
// These assertions pin the observable contract clients depend on: frame
// size bounds, rejection behavior for malformed input, the serialized
// shape of server notices, and the keepalive timing relationship.

use palaver_common::protocol::ws::{
    parse_frame, ErrorNotice, FrameError, MAX_FRAME_BYTES, MIN_FRAME_BYTES,
};
use serde_json::Value;

const GATEWAY_CONFIG_SOURCE: &str = include_str!("../src/config.rs");

#[test]
fn contract_frame_size_bounds() {
    assert_eq!(MIN_FRAME_BYTES, 2);
    assert_eq!(MAX_FRAME_BYTES, 65_536);

    // Smallest well-formed frame is rejected only below the floor.
    assert!(matches!(parse_frame(b"1"), Err(FrameError::SizeOutOfRange(1))));

    let oversized = format!(
        r#"{{"type":"chat.message","payload":"{}"}}"#,
        "x".repeat(MAX_FRAME_BYTES)
    );
    assert!(matches!(
        parse_frame(oversized.as_bytes()),
        Err(FrameError::SizeOutOfRange(_))
    ));
}

#[test]
fn contract_valid_frame_passes_and_keeps_unknown_fields_out_of_scope() {
    let frame = parse_frame(
        br#"{"type":"chat.message","payload":{"body":"hi"},"id":"m-1","future_field":true}"#,
    )
    .expect("well-formed frame should parse");

    assert_eq!(frame.kind, "chat.message");
    assert_eq!(frame.payload["body"], "hi");
    assert_eq!(frame.id.as_deref(), Some("m-1"));
}

#[test]
fn contract_rejections_are_typed() {
    assert!(matches!(parse_frame(b"not json at all"), Err(FrameError::Malformed(_))));
    assert!(matches!(parse_frame(br#"{"payload":{}}"#), Err(FrameError::Malformed(_))));
    assert!(matches!(parse_frame(br#"{"type":"   "}"#), Err(FrameError::EmptyType)));
}

#[test]
fn contract_notice_shapes() {
    let samples = [
        (ErrorNotice::rate_limited(60), "rate_limited"),
        (ErrorNotice::invalid_format(&FrameError::EmptyType), "invalid_format"),
    ];

    for (notice, expected_code) in samples {
        let encoded = notice.encode().expect("notice should serialize");
        let value: Value = serde_json::from_str(&encoded).expect("notice should be valid JSON");

        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], expected_code);
        assert!(
            value["payload"]["message"].as_str().is_some_and(|m| !m.is_empty()),
            "`{expected_code}` notice must carry a human-readable message",
        );
    }
}

#[test]
fn contract_notices_are_themselves_valid_frames() {
    // A client that runs every inbound message through the same frame
    // parser must be able to read server notices.
    let encoded = ErrorNotice::rate_limited(60).encode().unwrap();
    let frame = parse_frame(encoded.as_bytes()).expect("notice should parse as a frame");
    assert_eq!(frame.kind, "error");
}

#[test]
fn contract_keepalive_fires_before_read_deadline() {
    let deadline = parse_default(GATEWAY_CONFIG_SOURCE, "PALAVER_GATEWAY_READ_DEADLINE_SECS");
    assert_eq!(deadline, 60);

    // The keepalive interval is derived as 9/10 of the deadline, so a
    // responsive peer always produces inbound traffic in time.
    assert!(GATEWAY_CONFIG_SOURCE.contains("deadline_ms * 9 / 10"));
}

/// Extract the `unwrap_or(...)` default that follows the last mention of
/// an env var name in the configuration source (the first mention is the
/// doc table).
fn parse_default(source: &str, var: &str) -> u64 {
    assert!(source.contains(var), "{var} not found");
    let tail = source.rsplit(var).next().unwrap();
    let start = tail.find("unwrap_or(").map(|i| i + "unwrap_or(".len()).unwrap();
    tail[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or_else(|_| panic!("{var} default is not numeric"))
}
