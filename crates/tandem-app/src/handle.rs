//! Client-side handle to a running [`crate::Runtime`].
//!
//! The presentation layer never touches the reducer. It submits [`Intent`]s,
//! reads [`Snapshot`]s and listens for [`Notification`]s, all through an
//! [`AppHandle`]. Handles are cheap to clone.

use tandem_core::MediaOptions;
use tandem_proto::UserId;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::{AppEvent, Intent, Notification, Snapshot, runtime::Inbox};

/// The runtime has stopped and accepts no more intents.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("runtime stopped")]
pub struct RuntimeStopped;

/// Handle for submitting intents and observing state.
#[derive(Debug, Clone)]
pub struct AppHandle {
    inbox: mpsc::UnboundedSender<Inbox>,
    snapshots: watch::Receiver<Snapshot>,
    notifications: broadcast::Sender<Notification>,
}

impl AppHandle {
    pub(crate) fn new(
        inbox: mpsc::UnboundedSender<Inbox>,
        snapshots: watch::Receiver<Snapshot>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self { inbox, snapshots, notifications }
    }

    /// Submit an intent.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeStopped`] once the runtime has exited.
    pub fn submit(&self, intent: Intent) -> Result<(), RuntimeStopped> {
        self.inbox.send(Inbox::Event(AppEvent::Intent(intent))).map_err(|_| RuntimeStopped)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Subscribe to notifications published from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Wait until a snapshot satisfies `predicate` and return it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeStopped`] if the runtime exits first.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, RuntimeStopped> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots.wait_for(predicate).await.map_err(|_| RuntimeStopped)?;
        Ok(snapshot.clone())
    }

    /// Connect as `user`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeStopped`] once the runtime has exited.
    pub fn connect(&self, user: UserId) -> Result<(), RuntimeStopped> {
        self.submit(Intent::Connect { user })
    }

    /// Log out.
    pub fn logout(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::Logout)
    }

    /// Reload the conversation list.
    pub fn reload(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::Reload)
    }

    /// Open the thread with `with`.
    pub fn open_conversation(&self, with: UserId) -> Result<(), RuntimeStopped> {
        self.submit(Intent::OpenConversation { with })
    }

    /// Close the open thread.
    pub fn close_conversation(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::CloseConversation)
    }

    /// Send `content` to `to`.
    pub fn send_message(&self, to: UserId, content: impl Into<String>) -> Result<(), RuntimeStopped> {
        self.submit(Intent::SendMessage { to, content: content.into() })
    }

    /// Mark the conversation with `with` as read.
    pub fn mark_read(&self, with: UserId) -> Result<(), RuntimeStopped> {
        self.submit(Intent::MarkRead { with })
    }

    /// Call `to`.
    pub fn start_call(&self, to: UserId, options: MediaOptions) -> Result<(), RuntimeStopped> {
        self.submit(Intent::StartCall { to, options })
    }

    /// Accept the ringing call.
    pub fn accept_call(&self, options: MediaOptions) -> Result<(), RuntimeStopped> {
        self.submit(Intent::AcceptCall { options })
    }

    /// Decline the ringing call.
    pub fn reject_call(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::RejectCall)
    }

    /// Hang up.
    pub fn end_call(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::EndCall)
    }

    /// Flip the microphone.
    pub fn toggle_mute(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::ToggleMute)
    }

    /// Flip the camera.
    pub fn toggle_video(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::ToggleVideo)
    }

    /// Share the screen.
    pub fn start_screen_share(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::StartScreenShare)
    }

    /// Back to the camera.
    pub fn stop_screen_share(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::StopScreenShare)
    }

    /// Stop the runtime.
    pub fn quit(&self) -> Result<(), RuntimeStopped> {
        self.submit(Intent::Quit)
    }
}
