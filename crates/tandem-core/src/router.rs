//! Inbound frame router.
//!
//! Decodes frames delivered on a subscribed channel into typed
//! [`InboundEvent`]s. A malformed body is logged and dropped; it never
//! propagates, so one bad frame cannot take down its subscription.

use tandem_proto::{Channel, ChatMessage, PresenceUpdate, ReadReceipt, Signal};

/// Typed inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Chat message on the per-user message queue
    Message(ChatMessage),
    /// Read receipt on the per-user receipt queue
    ReadReceipt(ReadReceipt),
    /// Presence transition on the global topic
    Presence(PresenceUpdate),
    /// Call-signaling frame on the per-user signal queue
    Signal(Signal),
}

/// Demultiplexes channel bodies into events.
///
/// Keeps per-channel drop counters for diagnostics and simulation checks.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routed: u64,
    dropped: [u64; Channel::ALL.len()],
}

impl Router {
    /// Create a router with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `body` received on `channel`.
    ///
    /// Returns `None` (after logging) if the body does not decode.
    pub fn route(&mut self, channel: Channel, body: &[u8]) -> Option<InboundEvent> {
        let decoded = match channel {
            Channel::Messages => ChatMessage::from_body(body).map(InboundEvent::Message),
            Channel::ReadReceipts => serde_json::from_slice::<ReadReceipt>(body)
                .map(InboundEvent::ReadReceipt)
                .map_err(Into::into),
            Channel::Presence => PresenceUpdate::from_body(body).map(InboundEvent::Presence),
            Channel::CallSignals => Signal::from_body(body).map(InboundEvent::Signal),
        };

        match decoded {
            Ok(event) => {
                self.routed += 1;
                Some(event)
            },
            Err(error) => {
                self.dropped[index(channel)] += 1;
                tracing::warn!(channel = channel.label(), %error, "dropping malformed frame");
                None
            },
        }
    }

    /// Events successfully decoded.
    pub fn routed(&self) -> u64 {
        self.routed
    }

    /// Bodies dropped on `channel`.
    pub fn dropped(&self, channel: Channel) -> u64 {
        self.dropped[index(channel)]
    }
}

fn index(channel: Channel) -> usize {
    match channel {
        Channel::Messages => 0,
        Channel::ReadReceipts => 1,
        Channel::Presence => 2,
        Channel::CallSignals => 3,
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::SignalKind;

    use super::*;

    #[test]
    fn routes_each_channel() {
        let mut router = Router::new();

        let msg = router
            .route(Channel::Messages, br#"{"senderId":1,"receiverId":2,"content":"hi"}"#)
            .unwrap();
        assert!(matches!(msg, InboundEvent::Message(m) if m.content == "hi"));

        let receipt =
            router.route(Channel::ReadReceipts, br#"{"receiverId":2,"senderId":1}"#).unwrap();
        assert!(matches!(receipt, InboundEvent::ReadReceipt(r) if r.receiver_id.get() == 2));

        let presence = router.route(Channel::Presence, b"-5").unwrap();
        assert!(matches!(presence, InboundEvent::Presence(p) if !p.is_online));

        let signal = router
            .route(Channel::CallSignals, br#"{"senderId":1,"receiverId":2,"type":"end-call"}"#)
            .unwrap();
        assert!(matches!(signal, InboundEvent::Signal(s) if s.kind == SignalKind::EndCall));

        assert_eq!(router.routed(), 4);
    }

    #[test]
    fn malformed_bodies_are_counted_not_propagated() {
        let mut router = Router::new();
        assert!(router.route(Channel::Messages, b"not json").is_none());
        assert!(router.route(Channel::Presence, b"0").is_none());
        assert!(router.route(Channel::CallSignals, br#"{"type":"offer"}"#).is_none());

        assert_eq!(router.dropped(Channel::Messages), 1);
        assert_eq!(router.dropped(Channel::Presence), 1);
        assert_eq!(router.dropped(Channel::CallSignals), 1);
        assert_eq!(router.dropped(Channel::ReadReceipts), 0);

        // The channel keeps working after a bad frame.
        assert!(router.route(Channel::Presence, b"5").is_some());
    }
}
