//! Tandem wire protocol.
//!
//! The relay speaks STOMP 1.2 over a single duplex connection. Frames are
//! text: a command line, escaped headers, a blank line, a body and a NUL
//! terminator. Bodies are JSON except for the presence topic, which carries a
//! signed user id for compatibility with existing relays.
//!
//! # Components
//!
//! - [`Frame`]: STOMP frame with encode/decode
//! - [`Headers`], [`HeartBeat`]: header block and heart-beat negotiation
//! - [`Channel`], [`Destinations`]: subscription channels and destination names
//! - [`payloads`]: typed JSON bodies ([`Outbound`] for everything the client
//!   publishes)
//! - [`UserId`], [`MessageId`]: identifier types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod destination;
pub mod errors;
pub mod frame;
pub mod header;
pub mod ids;
pub mod payloads;

pub use destination::{Channel, Destinations};
pub use errors::{ProtocolError, Result};
pub use frame::{Command, Frame, Packet};
pub use header::{HeartBeat, Headers};
pub use ids::{MessageId, UserId};
pub use payloads::{
    Outbound,
    chat::{ChatMessage, ConversationSummary, ReadReceipt, SendMessage, UserProfile},
    presence::PresenceUpdate,
    signal::{IceCandidate, SessionDescription, Signal, SignalKind},
};
