//! Fuzz target for STOMP frame decoding
//!
//! Arbitrary bytes are decoded as a packet stream. Anything that decodes must
//! re-encode and decode to the same frame.
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Consumed length never exceeds the input
//! - A decoded frame survives an encode/decode round trip (modulo the
//!   `content-length` header, which the encoder always regenerates)

#![no_main]

use libfuzzer_sys::fuzz_target;
use tandem_proto::{Frame, Packet};

fuzz_target!(|data: &[u8]| {
    if let Ok(Some((packet, used))) = Packet::decode(data) {
        assert!(used <= data.len(), "consumed {used} of {} bytes", data.len());
        if let Packet::Frame(frame) = packet {
            // Headers that cannot be encoded (e.g. a raw NUL in a value) are
            // rejected on the way out, which is fine.
            if let Ok(bytes) = frame.to_bytes() {
                let again = Frame::decode(&bytes).expect("re-encoded frame decodes");
                assert_eq!(again.command, frame.command);
                assert_eq!(again.body, frame.body);
                assert_eq!(headers(&again), headers(&frame));
            }
        }
    }

    let _ = Packet::decode_all(data);
});

fn headers(frame: &Frame) -> Vec<(&str, &str)> {
    frame.headers.iter().filter(|(name, _)| *name != "content-length").collect()
}
