//! Application input events.
//!
//! [`AppEvent`] is everything that drives the [`crate::App`] reducer. Events
//! come from three sources:
//! - user intents submitted through [`crate::AppHandle`]
//! - completions of I/O the runtime performed (transport, history, media)
//! - the periodic tick

use tandem_core::{CallEvent, MediaOptions, TransportId};
use tandem_proto::{ChatMessage, ConversationSummary, Frame, UserId, UserProfile};

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Authenticate the session as `user` and connect.
    Connect {
        /// Identity issued by the external auth service
        user: UserId,
    },
    /// Announce departure and disconnect without reconnecting.
    Logout,
    /// Refresh the conversation list from the history service.
    Reload,
    /// Open the thread with `with`.
    OpenConversation {
        /// The other participant
        with: UserId,
    },
    /// Close the open thread.
    CloseConversation,
    /// Send a chat message.
    SendMessage {
        /// Recipient
        to: UserId,
        /// Text
        content: String,
    },
    /// Mark the conversation with `with` as read.
    MarkRead {
        /// The other participant
        with: UserId,
    },
    /// Call `to`.
    StartCall {
        /// Callee
        to: UserId,
        /// Local media to acquire
        options: MediaOptions,
    },
    /// Accept the ringing incoming call.
    AcceptCall {
        /// Local media to acquire
        options: MediaOptions,
    },
    /// Decline the ringing incoming call.
    RejectCall,
    /// Hang up.
    EndCall,
    /// Flip the microphone.
    ToggleMute,
    /// Flip the camera.
    ToggleVideo,
    /// Share the screen.
    StartScreenShare,
    /// Back to the camera.
    StopScreenShare,
    /// Shut the runtime down.
    Quit,
}

/// Events processed by the App reducer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// User intent.
    Intent(Intent),

    /// Periodic tick driving every timer.
    Tick,

    /// A transport requested with `OpenTransport` is up.
    TransportOpened {
        /// Transport it belongs to
        transport: TransportId,
    },

    /// A transport failed to open or closed.
    TransportClosed {
        /// Transport it belongs to
        transport: TransportId,
        /// Cause, for logs
        reason: String,
    },

    /// Inbound STOMP frame.
    FrameReceived {
        /// Transport it arrived on
        transport: TransportId,
        /// Decoded frame
        frame: Frame,
    },

    /// Inbound heart-beat.
    HeartbeatReceived {
        /// Transport it arrived on
        transport: TransportId,
    },

    /// Media backend completion or peer activity.
    Media(CallEvent),

    /// Conversation list from the history service.
    ConversationsLoaded {
        /// User the list was requested for
        user: UserId,
        /// Summaries, most recent first, or the failure text
        result: Result<Vec<ConversationSummary>, String>,
    },

    /// Thread history from the history service.
    MessagesLoaded {
        /// User the thread was requested for
        user: UserId,
        /// The other participant
        with: UserId,
        /// Messages, oldest first, or the failure text
        result: Result<Vec<ChatMessage>, String>,
    },

    /// Contact resolved by the user directory.
    ContactResolved {
        /// Contact record
        profile: UserProfile,
    },
}

impl From<Intent> for AppEvent {
    fn from(intent: Intent) -> Self {
        Self::Intent(intent)
    }
}
