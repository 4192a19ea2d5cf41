//! Media backend abstraction.
//!
//! The call engine never touches devices or peer connections. It emits
//! [`CallAction`](super::CallAction)s; the runtime executes them against a
//! [`MediaBackend`] and feeds completions back as
//! [`CallEvent`](super::CallEvent)s. Every operation is keyed by [`CallId`] so
//! the backend can keep resources from overlapping calls apart.
//!
//! Asynchronous peer activity (trickled candidates, connection state changes,
//! remote tracks) is pushed through the [`PeerEventSink`] handed to
//! [`MediaBackend::open_peer`].

use std::{future::Future, sync::Arc};

use tandem_proto::{IceCandidate, SessionDescription};
use thiserror::Error;

use super::{CallId, IceServer, MediaOptions};

/// Kind of a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
    /// Display capture
    Screen,
}

/// A local track obtained for a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackInfo {
    /// Backend-unique track id, never reused
    pub id: u64,
    /// Track kind
    pub kind: TrackKind,
}

/// Local media acquired for a call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalMedia {
    /// Tracks in the local stream
    pub tracks: Vec<TrackInfo>,
}

impl LocalMedia {
    /// Whether the stream carries a camera track.
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

/// Peer connection state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Negotiating connectivity
    Connecting,
    /// Media path established
    Connected,
    /// Connectivity lost
    Disconnected,
    /// Negotiation or connectivity failed
    Failed,
    /// Closed locally or remotely
    Closed,
}

impl PeerState {
    /// States that end the call.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Asynchronous event from an open peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Locally gathered candidate to trickle to the remote party
    LocalCandidate(IceCandidate),
    /// Connection state change
    State(PeerState),
    /// First remote track arrived
    RemoteStream,
}

/// Callback receiving peer events, tagged with the call they belong to.
pub type PeerEventSink = Arc<dyn Fn(CallId, PeerEvent) + Send + Sync>;

/// Media backend failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Device missing or permission denied
    #[error("media device unavailable: {0}")]
    Device(String),
    /// No peer connection for the call
    #[error("no peer connection for {0}")]
    NoPeer(CallId),
    /// SDP or ICE negotiation failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// Devices and peer connections.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `release_media(call)` stops every track obtained for `call`, including
///   tracks whose acquisition completes after the release
/// - track ids are never reused
/// - `close_peer` and `release_media` are idempotent
pub trait MediaBackend: Clone + Send + Sync + 'static {
    /// Acquire local media per `options`.
    fn acquire(
        &self,
        call: CallId,
        options: MediaOptions,
    ) -> impl Future<Output = Result<LocalMedia, MediaError>> + Send;

    /// Create the peer connection for `call` with the local tracks attached.
    fn open_peer(
        &self,
        call: CallId,
        ice_servers: Vec<IceServer>,
        sink: PeerEventSink,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Create an offer and install it as the local description.
    fn create_offer(
        &self,
        call: CallId,
    ) -> impl Future<Output = Result<SessionDescription, MediaError>> + Send;

    /// Install `offer` as the remote description and create an answer.
    fn create_answer(
        &self,
        call: CallId,
        offer: SessionDescription,
    ) -> impl Future<Output = Result<SessionDescription, MediaError>> + Send;

    /// Install the remote answer.
    fn set_remote_answer(
        &self,
        call: CallId,
        answer: SessionDescription,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Apply a remote ICE candidate.
    fn add_remote_candidate(
        &self,
        call: CallId,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Enable or disable local tracks of `kind`.
    fn set_track_enabled(
        &self,
        call: CallId,
        kind: TrackKind,
        enabled: bool,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Replace the outgoing video with display capture.
    fn start_screen_share(&self, call: CallId) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Restore the camera as outgoing video.
    fn stop_screen_share(&self, call: CallId) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Whether remote video bytes are still arriving.
    fn probe_remote_video(&self, call: CallId) -> impl Future<Output = Result<bool, MediaError>> + Send;

    /// Close the peer connection for `call`.
    fn close_peer(&self, call: CallId) -> impl Future<Output = ()> + Send;

    /// Stop every local track obtained for `call`.
    fn release_media(&self, call: CallId) -> impl Future<Output = ()> + Send;
}
