//! Decoder tests: incremental feeding, content-length bodies, heartbeats,
//! escape handling by protocol level, and framing errors.

use bytes::BytesMut;
use osmium_stomp::{Error, Protocol, StompCodec, StompItem};
use tokio_util::codec::Decoder;

fn decode_one(codec: &mut StompCodec, bytes: &[u8]) -> Option<StompItem> {
    let mut buf = BytesMut::from(bytes);
    codec.decode(&mut buf).unwrap()
}

// =============================================================================
// whole frames
// =============================================================================

#[test]
fn decode_simple_frame() {
    let mut codec = StompCodec::new();
    let item = decode_one(&mut codec, b"RECEIPT\nreceipt-id:msg-12345\n\n\0");
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.command, "RECEIPT");
    assert_eq!(f.get_header("receipt-id"), Some("msg-12345"));
    assert!(f.body.is_empty());
}

#[test]
fn decode_body_until_nul() {
    let mut codec = StompCodec::new();
    let item = decode_one(&mut codec, b"MESSAGE\ndestination:/q\n\nhello\0");
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.body, b"hello");
}

#[test]
fn decode_content_length_body_with_embedded_nul() {
    let mut codec = StompCodec::new();
    let item = decode_one(
        &mut codec,
        b"MESSAGE\ndestination:/q\ncontent-length:5\n\na\0b\0c\0",
    );
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.body, b"a\0b\0c");
}

#[test]
fn decode_strips_carriage_returns() {
    let mut codec = StompCodec::new();
    let item = decode_one(&mut codec, b"RECEIPT\r\nreceipt-id:r1\r\n\r\n\0");
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.command, "RECEIPT");
    assert_eq!(f.get_header("receipt-id"), Some("r1"));
}

#[test]
fn decode_heartbeat_lf() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\n\nMESSAGE\ndestination:/q\n\nx\0"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StompItem::Heartbeat));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StompItem::Heartbeat));
    match codec.decode(&mut buf).unwrap() {
        Some(StompItem::Frame(f)) => assert_eq!(f.command, "MESSAGE"),
        other => panic!("expected frame, got {:?}", other),
    }
}

// =============================================================================
// partial feeding
// =============================================================================

#[test]
fn decode_waits_for_complete_frame() {
    let mut codec = StompCodec::new();
    let whole = b"MESSAGE\ndestination:/q\ncontent-length:3\n\nabc\0";
    let mut buf = BytesMut::new();
    for (i, &b) in whole.iter().enumerate() {
        buf.extend_from_slice(&[b]);
        let decoded = codec.decode(&mut buf).unwrap();
        if i < whole.len() - 1 {
            assert!(decoded.is_none(), "premature decode at byte {}", i);
        } else {
            let StompItem::Frame(f) = decoded.unwrap() else {
                panic!("expected frame");
            };
            assert_eq!(f.body, b"abc");
        }
    }
    assert!(buf.is_empty());
}

// =============================================================================
// escape handling by protocol level
// =============================================================================

#[test]
fn decode_unescapes_on_12() {
    let mut codec = StompCodec::with_protocol(Protocol::V12);
    let item = decode_one(&mut codec, b"MESSAGE\ncustom:a\\cb\\nc\n\n\0");
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.get_header("custom"), Some("a:b\nc"));
}

#[test]
fn decode_leaves_escapes_alone_on_10() {
    let mut codec = StompCodec::new();
    let item = decode_one(&mut codec, b"MESSAGE\ncustom:a\\cb\n\n\0");
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.get_header("custom"), Some("a\\cb"));
}

#[test]
fn decode_connected_headers_stay_literal() {
    // CONNECTED headers are never unescaped, whatever the protocol.
    let mut codec = StompCodec::with_protocol(Protocol::V12);
    let item = decode_one(&mut codec, b"CONNECTED\nversion:1.2\nserver:x\\y\n\n\0");
    let StompItem::Frame(f) = item.unwrap() else {
        panic!("expected frame");
    };
    assert_eq!(f.get_header("server"), Some("x\\y"));
}

// =============================================================================
// errors
// =============================================================================

#[test]
fn decode_rejects_unknown_command() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"BOGUS\n\n\0"[..]);
    assert_eq!(codec.decode(&mut buf), Err(Error::UnknownFrame));
}

#[test]
fn decode_rejects_header_without_colon() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\nno-colon-here\n\n\0"[..]);
    assert_eq!(codec.decode(&mut buf), Err(Error::CorruptHeaders));
}

#[test]
fn decode_rejects_missing_nul_after_sized_body() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:3\n\nabcX"[..]);
    assert_eq!(codec.decode(&mut buf), Err(Error::MalformedFrame));
}

#[test]
fn decode_rejects_bad_content_length() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:many\n\n\0"[..]);
    assert_eq!(codec.decode(&mut buf), Err(Error::MalformedFrame));
}

#[test]
fn decode_rejects_bad_escape_on_12() {
    let mut codec = StompCodec::with_protocol(Protocol::V12);
    let mut buf = BytesMut::from(&b"MESSAGE\ncustom:a\\tb\n\n\0"[..]);
    assert_eq!(codec.decode(&mut buf), Err(Error::MalformedFrame));
}
