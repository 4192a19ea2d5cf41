//! JSON frame bodies.
//!
//! Everything the client publishes is an [`Outbound`]; each variant maps to
//! exactly one application destination. Inbound bodies are decoded per
//! channel by the router in `tandem-core` using the types in the submodules.
//!
//! Field names are camelCase on the wire. Connect and disconnect
//! announcements are the bare user id as text, not JSON.

pub mod chat;
pub mod presence;
pub mod signal;

use bytes::Bytes;

use crate::{
    Frame, UserId,
    destination::Destinations,
    errors::Result,
    payloads::{
        chat::{ReadReceipt, SendMessage},
        signal::Signal,
    },
};

/// Content type for JSON bodies.
pub const JSON: &str = "application/json";
/// Content type for announcement bodies.
pub const TEXT: &str = "text/plain";

/// Every body the client publishes.
///
/// # Invariants
///
/// - Destination Uniqueness: each variant targets exactly one destination
///   (enforced by match exhaustiveness in [`Outbound::destination`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Presence announcement after the handshake.
    Connect(UserId),
    /// Departure announcement before a deliberate disconnect.
    Disconnect(UserId),
    /// Chat message.
    SendMessage(SendMessage),
    /// Read receipt for a conversation.
    MarkRead(ReadReceipt),
    /// Call-signaling frame.
    Signal(Signal),
}

impl Outbound {
    /// Destination this body is published to.
    pub fn destination(&self, destinations: &Destinations) -> String {
        match self {
            Self::Connect(_) => destinations.connect(),
            Self::Disconnect(_) => destinations.disconnect(),
            Self::SendMessage(_) => destinations.send_message(),
            Self::MarkRead(_) => destinations.mark_read(),
            Self::Signal(_) => destinations.call_signal(),
        }
    }

    /// Serialized body.
    pub fn encode_body(&self) -> Result<Bytes> {
        let body = match self {
            Self::Connect(user) | Self::Disconnect(user) => user.to_string().into_bytes(),
            Self::SendMessage(msg) => serde_json::to_vec(msg)?,
            Self::MarkRead(receipt) => serde_json::to_vec(receipt)?,
            Self::Signal(signal) => serde_json::to_vec(signal)?,
        };
        Ok(Bytes::from(body))
    }

    /// Content type of [`Outbound::encode_body`].
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Connect(_) | Self::Disconnect(_) => TEXT,
            Self::SendMessage(_) | Self::MarkRead(_) | Self::Signal(_) => JSON,
        }
    }

    /// Build the `SEND` frame for this body.
    pub fn into_frame(self, destinations: &Destinations) -> Result<Frame> {
        let body = self.encode_body()?;
        Ok(Frame::send(&self.destination(destinations), self.content_type(), body))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::SendMessage(_) => "send-message",
            Self::MarkRead(_) => "mark-read",
            Self::Signal(signal) => signal.kind.as_str(),
        }
    }
}
