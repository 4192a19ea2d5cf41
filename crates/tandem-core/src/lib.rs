//! Tandem core state machines.
//!
//! Everything here is Sans-IO: methods take the current time as a parameter
//! and return actions for a driver to execute. Transports, media devices and
//! timers live outside this crate.
//!
//! # Components
//!
//! - [`RelayConnection`]: single connection to the relay (handshake,
//!   subscriptions, heart-beats, reconnect with backoff)
//! - [`Router`]: turns delivered frames into typed [`InboundEvent`]s
//! - [`CallEngine`]: call state machine driving a [`MediaBackend`]
//! - [`Environment`]: time and randomness abstraction

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod call;
pub mod connection;
pub mod env;
pub mod error;
pub mod router;

pub use call::{
    CallAction, CallConfig, CallDirection, CallEngine, CallEvent, CallId, CallSession, CallStatus,
    IceServer, MediaOptions,
    media::{
        LocalMedia, MediaBackend, MediaError, PeerEvent, PeerEventSink, PeerState, TrackInfo,
        TrackKind,
    },
};
pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionStatus, RelayConnection, TransportId,
};
pub use env::Environment;
pub use error::{CallError, ConnectionError, PublishError};
pub use router::{InboundEvent, Router};
