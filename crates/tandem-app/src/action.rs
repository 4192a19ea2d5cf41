//! Application side effects.
//!
//! [`AppAction`]s are instructions produced by the [`crate::App`] reducer for
//! the runtime to execute. [`Notification`]s are one-shot events for the
//! presentation layer; unlike snapshots they are not coalesced.

use tandem_core::{CallAction, TransportId};
use tandem_proto::{Frame, MessageId, ReadReceipt, UserId};

/// Ringtone the presentation layer should play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ringtone {
    /// Incoming call is ringing
    Incoming,
    /// Ringback while the callee's device rings
    Outgoing,
}

/// One-shot event for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Relay connection established.
    Connected {
        /// Authenticated user
        user: UserId,
    },
    /// Relay connection lost; reconnecting.
    ConnectionLost {
        /// Cause
        reason: String,
    },
    /// Reconnect attempts exhausted.
    GaveUp {
        /// Attempts made
        attempts: u32,
    },
    /// Message arrived for a conversation that is not open.
    NewMessage {
        /// Author
        from: UserId,
        /// Author display name, when known
        name: Option<String>,
        /// Start of the text
        preview: String,
    },
    /// Someone is calling.
    IncomingCall {
        /// Caller
        from: UserId,
        /// Caller display name, when known
        name: Option<String>,
    },
    /// The call ended.
    CallEnded {
        /// Remote party
        remote: UserId,
        /// Failure, if the call did not end normally
        error: Option<String>,
    },
    /// A message could not be published.
    SendFailed {
        /// Affected message
        id: MessageId,
        /// Recipient
        to: UserId,
    },
    /// Ringtone changed; `None` stops it.
    Ringtone(Option<Ringtone>),
    /// Error to surface to the user.
    Error {
        /// Description
        message: String,
    },
}

/// Actions produced by the App reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Publish a fresh snapshot.
    Render,

    /// Stop the runtime.
    Quit,

    /// Open a transport to the relay.
    OpenTransport {
        /// Id to tag the transport's events with
        transport: TransportId,
        /// Relay URL
        url: String,
        /// User the transport authenticates as
        user: UserId,
    },

    /// Write a frame to the current transport.
    SendFrame(Frame),

    /// Write a heart-beat to the current transport.
    SendHeartbeat,

    /// Close the current transport.
    CloseTransport,

    /// Execute a media backend operation.
    Media(CallAction),

    /// Fetch the conversation list.
    LoadConversations {
        /// Local user
        user: UserId,
    },

    /// Fetch a thread.
    LoadMessages {
        /// Local user
        user: UserId,
        /// The other participant
        with: UserId,
    },

    /// Mark read through the REST service (relay publish failed).
    MarkReadRemote(ReadReceipt),

    /// Resolve a contact through the user directory.
    ResolveContact {
        /// Contact id
        id: UserId,
    },

    /// Deliver a notification.
    Notify(Notification),
}
