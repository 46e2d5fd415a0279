//! Seeded stress test: many random frames encoded into one byte stream,
//! fed back to the decoder in random-sized chunks.

use bytes::BytesMut;
use osmium_stomp::{Frame, Protocol, StompCodec, StompItem};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::codec::{Decoder, Encoder};

fn random_frame(rng: &mut StdRng, i: usize) -> Frame {
    let body: Vec<u8> = if rng.gen_bool(0.3) {
        // binary, NUL bytes included; protected by content-length
        (0..rng.gen_range(0..64)).map(|_| rng.gen_range(0..=255)).collect()
    } else {
        format!("message body {} with text payload", i).into_bytes()
    };

    let mut frame = Frame::new("MESSAGE")
        .header("destination", format!("/queue/stress-{}", i % 7))
        .header("subscription", format!("s{}", i % 3))
        .header("message-id", format!("m-{}", i));
    if rng.gen_bool(0.5) {
        // values exercising every escape pair
        frame = frame.header("selector", "a:b\nc\\d\re");
    }
    frame
        .header("content-type", "application/octet-stream")
        .header("content-length", body.len().to_string())
        .body(body)
}

#[test]
fn chunked_stream_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x5705);
    let mut encoder = StompCodec::with_protocol(Protocol::V12);

    let total = 200usize;
    let mut expected = Vec::with_capacity(total);
    let mut wire = BytesMut::new();
    for i in 0..total {
        let frame = random_frame(&mut rng, i);
        encoder
            .encode(StompItem::Frame(frame.clone()), &mut wire)
            .expect("encode");
        expected.push(frame);
        if rng.gen_bool(0.2) {
            // stray heartbeats between frames
            encoder.encode(StompItem::Heartbeat, &mut wire).expect("encode");
        }
    }

    let mut decoder = StompCodec::with_protocol(Protocol::V12);
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let wire = wire.freeze();
    let mut offset = 0usize;
    while offset < wire.len() {
        let chunk = rng.gen_range(1..=97).min(wire.len() - offset);
        buf.extend_from_slice(&wire[offset..offset + chunk]);
        offset += chunk;
        while let Some(item) = decoder.decode(&mut buf).expect("decode") {
            if let StompItem::Frame(f) = item {
                decoded.push(f);
            }
        }
    }

    assert_eq!(decoded.len(), expected.len());
    for (got, want) in decoded.iter().zip(expected.iter()) {
        assert_eq!(got, want);
    }
}
