//! Fuzz target for inbound routing
//!
//! Arbitrary destinations and bodies are resolved against the subscription
//! table and routed, the way the connection layer does for every MESSAGE.
//!
//! # Invariants
//!
//! - NEVER panic on a malformed body
//! - Every body is either routed or counted as dropped, never both
//! - Presence updates decode from both the legacy and explicit forms
//!   consistently

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tandem_core::{InboundEvent, Router};
use tandem_proto::{Channel, Destinations, PresenceUpdate, UserId};

#[derive(Debug, Arbitrary)]
enum Delivery {
    /// Body on a channel the client subscribed to
    Subscribed { channel: u8, body: Vec<u8> },
    /// Body on an arbitrary destination
    Raw { destination: String, body: Vec<u8> },
    /// Legacy signed presence id
    Presence { id: i64 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    user: u64,
    deliveries: Vec<Delivery>,
}

fuzz_target!(|input: Input| {
    let Ok(user) = UserId::new(input.user) else { return };
    let destinations = Destinations::default();
    let mut router = Router::new();

    let mut attempts = 0u64;
    for delivery in input.deliveries.iter().take(64) {
        let (channel, body) = match delivery {
            Delivery::Subscribed { channel, body } => {
                let channel = Channel::ALL[usize::from(*channel) % Channel::ALL.len()];
                (channel, body.clone())
            },
            Delivery::Raw { destination, body } => {
                let Some(channel) = destinations.resolve(destination, user) else { continue };
                (channel, body.clone())
            },
            Delivery::Presence { id } => (Channel::Presence, id.to_string().into_bytes()),
        };

        attempts += 1;
        let event = router.route(channel, &body);

        if let (Delivery::Presence { id }, Some(InboundEvent::Presence(update))) = (delivery, &event) {
            assert_eq!(update.user_id.get(), id.unsigned_abs());
            assert_eq!(update.is_online, *id > 0);
            if let Some(signed) = update.to_signed() {
                let again = PresenceUpdate::from_body(signed.to_string().as_bytes())
                    .expect("signed presence decodes");
                assert_eq!(&again, update);
            }
        }
    }

    let dropped: u64 = Channel::ALL.iter().map(|&c| router.dropped(c)).sum();
    assert_eq!(router.routed() + dropped, attempts);
});
