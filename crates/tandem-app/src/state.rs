//! Observable application state.
//!
//! These types are the view model: plain data the presentation layer renders.
//! They are produced by the managers and published as [`Snapshot`]s; nothing
//! here is mutated from outside the reducer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tandem_core::{CallDirection, CallStatus, ConnectionStatus};
use tandem_proto::{MessageId, UserId};

/// Delivery state of a message authored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Published, waiting for the relay to echo it
    Pending,
    /// Echoed with a store-assigned id
    Confirmed,
    /// Publish failed; not retried
    Failed,
}

/// A message in a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Local until the relay assigns a server id
    pub id: MessageId,
    /// The other participant
    pub conversation: UserId,
    /// Author
    pub sender: UserId,
    /// Text
    pub content: String,
    /// Store timestamp, or local wall clock for optimistic messages
    pub timestamp: DateTime<Utc>,
    /// Authored by the local user
    pub is_me: bool,
    /// Read by its recipient. Never reverts to `false`.
    pub is_read: bool,
    /// Delivery state (always `Confirmed` for remote messages)
    pub delivery: Delivery,
}

/// One entry of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// The other participant's id
    pub id: UserId,
    /// Display name, when known
    pub name: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
    /// Preview of the newest message
    pub last_message: Option<String>,
    /// Time of the newest message
    pub last_activity: Option<DateTime<Utc>>,
    /// Unread messages from the other participant
    pub unread: u32,
    /// Presence
    pub online: bool,
}

impl Conversation {
    /// Empty conversation with `id`.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            name: None,
            avatar: None,
            last_message: None,
            last_activity: None,
            unread: 0,
            online: false,
        }
    }

    /// Name to display: the contact name or the numeric id.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("user {}", self.id))
    }
}

/// Active-call view model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallView {
    /// Status (`Idle` without a call)
    pub status: CallStatus,
    /// Remote party
    pub remote: Option<UserId>,
    /// Remote display name
    pub remote_name: Option<String>,
    /// Remote avatar URL
    pub remote_avatar: Option<String>,
    /// Who placed the call
    pub direction: Option<CallDirection>,
    /// Time since the media path came up
    pub elapsed: Option<Duration>,
    /// Microphone muted
    pub muted: bool,
    /// Camera disabled
    pub video_off: bool,
    /// Display capture active
    pub screen_sharing: bool,
    /// Video requested for the call
    pub video: bool,
    /// Local stream held
    pub has_local_stream: bool,
    /// Remote stream attached
    pub has_remote_stream: bool,
    /// Remote video still flowing
    pub remote_video_active: bool,
    /// Failure that ended the call
    pub last_error: Option<String>,
}

impl Default for CallView {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            remote: None,
            remote_name: None,
            remote_avatar: None,
            direction: None,
            elapsed: None,
            muted: false,
            video_off: false,
            screen_sharing: false,
            video: false,
            has_local_stream: false,
            has_remote_stream: false,
            remote_video_active: false,
            last_error: None,
        }
    }
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Authenticated user
    pub user: Option<UserId>,
    /// Relay connection status
    pub connection: ConnectionStatus,
    /// Reconnect in progress (persistent banner)
    pub reconnecting: bool,
    /// Reconnect attempts exhausted
    pub gave_up: bool,
    /// Conversations, most recently active first
    pub conversations: Vec<Conversation>,
    /// Open conversation
    pub active: Option<UserId>,
    /// Thread of the open conversation
    pub thread: Vec<Message>,
    /// Call view model
    pub call: CallView,
    /// Transient status line
    pub status_message: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            user: None,
            connection: ConnectionStatus::Disconnected,
            reconnecting: false,
            gave_up: false,
            conversations: Vec::new(),
            active: None,
            thread: Vec::new(),
            call: CallView::default(),
            status_message: None,
        }
    }
}
