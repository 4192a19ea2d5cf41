//! Deterministic simulation harness for Tandem.
//!
//! In-memory implementations of every driver seam, so full runtimes can be
//! exercised end to end without sockets, devices or wall-clock waits.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock (tokio's paused time) and seeded randomness
//! - [`SimRelay`]: in-memory STOMP relay routing between clients, with
//!   [`SimHistory`] serving its message store
//! - [`FakeMedia`]: media backend recording every track and peer
//! - [`SimDriver`] / [`SimCluster`]: wiring runtimes onto the above
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for checks that
//! hold at any moment and [`InvariantRegistry::settled()`] once a simulation
//! has quiesced.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod fake_media;
pub mod invariants;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_relay;

pub use cluster::{SIM_RELAY_URL, SimClient, SimCluster};
pub use fake_media::{FakeMedia, FakeTrack};
pub use invariants::{
    ActiveConversationListed, ActiveConversationRead, ClientSnapshot, ConnectedPeersAgree,
    IdleCallIsClean, IdleHoldsNoMedia, Invariant, InvariantRegistry, InvariantResult,
    SystemSnapshot, ThreadMatchesActive, UniqueConversations, UniqueMessageIds, Violation,
};
pub use sim_driver::SimDriver;
pub use sim_env::{SIM_EPOCH_SECS, SimEnv};
pub use sim_relay::{SimError, SimHistory, SimRelay};
