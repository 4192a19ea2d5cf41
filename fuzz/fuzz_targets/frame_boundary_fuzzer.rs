//! Fuzz target for streaming frame reassembly
//!
//! Encodes a sequence of frames and heart-beats into one byte stream, then
//! feeds it to the incremental decoder in arbitrary chunks, the way a
//! long-poll or TCP transport delivers it.
//!
//! # Invariants
//!
//! - Chunk boundaries never change what is decoded
//! - An incomplete frame is reported as incomplete, never as an error
//! - Every frame is decoded exactly once, in order

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tandem_proto::{Frame, HeartBeat, Packet};

#[derive(Debug, Arbitrary)]
enum Item {
    Heartbeat,
    Send { destination: String, body: Vec<u8> },
    Message { destination: String, id: u32, body: Vec<u8> },
    Receipt { id: String },
    Connected { outgoing: u16, incoming: u16 },
    Error { message: String },
}

#[derive(Debug, Arbitrary)]
struct Input {
    items: Vec<Item>,
    chunks: Vec<u8>,
}

fn frame(item: &Item) -> Option<Frame> {
    let frame = match item {
        Item::Heartbeat => return None,
        Item::Send { destination, body } => {
            Frame::send(destination, "application/json", body.clone())
        },
        Item::Message { destination, id, body } => {
            Frame::message(destination, "sub-0", &id.to_string(), body.clone())
        },
        Item::Receipt { id } => Frame::receipt(id),
        Item::Connected { outgoing, incoming } => Frame::connected(HeartBeat {
            outgoing: u64::from(*outgoing),
            incoming: u64::from(*incoming),
        }),
        Item::Error { message } => Frame::error(message),
    };
    Some(frame)
}

fuzz_target!(|input: Input| {
    let mut stream = Vec::new();
    let mut expected = Vec::new();
    for item in input.items.iter().take(32) {
        match frame(item) {
            None => {
                stream.push(b'\n');
                expected.push(Packet::Heartbeat);
            },
            Some(frame) => {
                // A NUL inside the header block terminates it early; no real
                // sender produces one.
                if frame.headers.iter().any(|(name, value)| name.contains('\0') || value.contains('\0')) {
                    continue;
                }
                let Ok(bytes) = frame.to_bytes() else { continue };
                stream.extend_from_slice(&bytes);
                expected.push(Packet::Frame(frame));
            },
        }
    }

    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut sizes = input.chunks.iter().map(|&n| usize::from(n).max(1)).cycle();
    while offset < stream.len() {
        let step = sizes.next().unwrap_or(stream.len()).min(stream.len() - offset);
        buf.extend_from_slice(&stream[offset..offset + step]);
        offset += step;

        loop {
            match Packet::decode(&buf) {
                Ok(Some((packet, used))) => {
                    decoded.push(packet);
                    let _ = buf.split_to(used);
                },
                Ok(None) => break,
                Err(e) => panic!("valid stream failed to decode: {e}"),
            }
        }
    }

    assert!(buf.is_empty(), "{} bytes left undecoded", buf.len());
    assert_eq!(decoded, expected);
});
