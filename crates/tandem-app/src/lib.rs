//! Application layer for Tandem
//!
//! Pure state managers and a generic runtime, so the same orchestration code
//! runs in production and in deterministic simulation.
//!
//! # Components
//!
//! - [`ConversationStore`]: conversation list, threads, unread counts
//! - [`CallManager`]: call engine plus busy handling, ringtones, end linger
//! - [`App`]: reducer combining the connection, router and both managers
//! - [`Driver`]: trait bundle for platform-specific I/O
//! - [`Runtime`]: async event loop driving an [`App`] with a [`Driver`]
//! - [`AppHandle`]: intents in, snapshots and notifications out

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
mod app;
mod calls;
mod conversations;
mod driver;
mod event;
mod handle;
mod runtime;
mod state;

pub use action::{AppAction, Notification, Ringtone};
pub use app::{App, AppConfig, DEFAULT_TICK_INTERVAL};
pub use calls::{CallEffect, CallManager, DEFAULT_END_LINGER};
pub use conversations::{ConversationConfig, ConversationStore, StoreEffect};
pub use driver::{
    Connector, Driver, DriverParts, HistoryService, TransportHandle, WireCommand, WireEvent,
};
pub use event::{AppEvent, Intent};
pub use handle::{AppHandle, RuntimeStopped};
pub use runtime::Runtime;
pub use state::{CallView, Conversation, Delivery, Message, Snapshot};
