//! Call signaling engine.
//!
//! Single-instance state machine negotiating one peer-to-peer call over the
//! relay's signal channel. Pure: intents, inbound signals and backend
//! completions go in, [`CallAction`]s come out.
//!
//! # State Machine
//!
//! ```text
//! outgoing: Idle ──start──> Connecting ──offer published──> Ringing ──answer──> Connected
//! incoming: Idle ──offer──> Ringing ──accept──> Connecting ──peer connected──> Connected
//! any active state ──end/reject/remote end/failure/ring timeout/relay lost──> Ended
//! Ended ──reset──> Idle
//! ```
//!
//! Every backend action carries the session's [`CallId`]. Completions for a
//! call that is no longer current are stale: the engine answers them with
//! release actions so late resources never leak.

pub mod media;

use std::{fmt, ops::Sub, time::Duration};

use tandem_proto::{IceCandidate, SessionDescription, Signal, SignalKind, UserId};

use self::media::{LocalMedia, MediaError, PeerEvent, PeerState, TrackKind};
use crate::error::CallError;

/// Ringing window before an unanswered call ends.
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(45);

/// Interval between remote-video liveness probes.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Remote candidates held while the peer connection does not exist yet.
pub const DEFAULT_CANDIDATE_BUFFER: usize = 64;

/// Identifies one call attempt. Monotonic per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// No call
    Idle,
    /// Acquiring media and negotiating
    Connecting,
    /// Offer delivered, waiting for the callee (or the local user) to answer
    Ringing,
    /// Media path up
    Connected,
    /// Call over, waiting for reset
    Ended,
}

impl CallStatus {
    /// Whether a call occupies the engine.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Ringing | Self::Connected)
    }
}

/// Who placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallDirection {
    /// Remote party called us
    Incoming,
    /// We called the remote party
    Outgoing,
}

/// Local media requested for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaOptions {
    /// Capture microphone
    pub audio: bool,
    /// Capture camera
    pub video: bool,
}

impl MediaOptions {
    /// Audio only.
    pub const AUDIO: Self = Self { audio: true, video: false };
    /// Audio and camera.
    pub const VIDEO: Self = Self { audio: true, video: true };
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self::AUDIO
    }
}

/// STUN/TURN server handed to new peer connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    pub username: Option<String>,
    /// TURN credential
    pub credential: Option<String>,
}

impl IceServer {
    /// Credential-less STUN server.
    pub fn stun(url: &str) -> Self {
        Self { urls: vec![url.to_string()], username: None, credential: None }
    }
}

/// Call engine configuration.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Fixed ICE server list for every peer connection
    pub ice_servers: Vec<IceServer>,
    /// Ringing window
    pub ring_timeout: Duration,
    /// Remote-video probe interval
    pub liveness_interval: Duration,
    /// Early-candidate buffer bound
    pub candidate_buffer: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
            ring_timeout: DEFAULT_RING_TIMEOUT,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            candidate_buffer: DEFAULT_CANDIDATE_BUFFER,
        }
    }
}

/// Backend completion fed back into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// `AcquireMedia` succeeded
    MediaAcquired {
        /// Call the media was acquired for
        call: CallId,
        /// Acquired tracks
        media: LocalMedia,
    },
    /// `OpenPeer` succeeded
    PeerOpened {
        /// Call the peer belongs to
        call: CallId,
    },
    /// `CreateOffer` succeeded
    OfferCreated {
        /// Call the offer belongs to
        call: CallId,
        /// Local description
        sdp: SessionDescription,
    },
    /// `CreateAnswer` succeeded
    AnswerCreated {
        /// Call the answer belongs to
        call: CallId,
        /// Local description
        sdp: SessionDescription,
    },
    /// Asynchronous peer activity
    Peer {
        /// Call the peer belongs to
        call: CallId,
        /// What happened
        event: PeerEvent,
    },
    /// `ProbeRemoteVideo` result
    ProbeResult {
        /// Probed call
        call: CallId,
        /// Whether remote video is flowing
        active: bool,
    },
    /// A backend operation failed
    Failed {
        /// Call the operation belonged to
        call: CallId,
        /// Failure
        error: MediaError,
    },
}

impl CallEvent {
    /// Call this completion belongs to.
    pub fn call(&self) -> CallId {
        match self {
            Self::MediaAcquired { call, .. }
            | Self::PeerOpened { call }
            | Self::OfferCreated { call, .. }
            | Self::AnswerCreated { call, .. }
            | Self::Peer { call, .. }
            | Self::ProbeResult { call, .. }
            | Self::Failed { call, .. } => *call,
        }
    }
}

/// Actions returned by the call engine.
///
/// Backend actions for one call MUST be executed in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    /// Acquire local media
    AcquireMedia {
        /// Owning call
        call: CallId,
        /// Requested devices
        options: MediaOptions,
    },
    /// Create the peer connection
    OpenPeer {
        /// Owning call
        call: CallId,
        /// ICE servers to seed it with
        ice_servers: Vec<IceServer>,
    },
    /// Create and install a local offer
    CreateOffer {
        /// Owning call
        call: CallId,
    },
    /// Install the remote offer and create an answer
    CreateAnswer {
        /// Owning call
        call: CallId,
        /// Remote offer
        offer: SessionDescription,
    },
    /// Install the remote answer
    SetRemoteAnswer {
        /// Owning call
        call: CallId,
        /// Remote answer
        answer: SessionDescription,
    },
    /// Apply a remote candidate
    AddRemoteCandidate {
        /// Owning call
        call: CallId,
        /// Candidate
        candidate: IceCandidate,
    },
    /// Enable or disable local tracks
    SetTrackEnabled {
        /// Owning call
        call: CallId,
        /// Track kind
        kind: TrackKind,
        /// New state
        enabled: bool,
    },
    /// Switch outgoing video to display capture
    StartScreenShare {
        /// Owning call
        call: CallId,
    },
    /// Switch outgoing video back to the camera
    StopScreenShare {
        /// Owning call
        call: CallId,
    },
    /// Check remote video liveness
    ProbeRemoteVideo {
        /// Owning call
        call: CallId,
    },
    /// Close the peer connection
    ClosePeer {
        /// Owning call
        call: CallId,
    },
    /// Stop every local track of the call
    ReleaseMedia {
        /// Owning call
        call: CallId,
    },
    /// Publish a signal to the remote party
    Signal(Signal),
    /// The call failed; surface to the user
    Failed {
        /// Failed call
        call: CallId,
        /// Cause
        error: CallError,
    },
}

/// The single call session.
#[derive(Debug, Clone)]
pub struct CallSession<I> {
    id: CallId,
    remote: UserId,
    remote_name: Option<String>,
    remote_avatar: Option<String>,
    direction: CallDirection,
    status: CallStatus,
    options: MediaOptions,
    local_media: Option<LocalMedia>,
    remote_stream: bool,
    muted: bool,
    video_off: bool,
    screen_sharing: bool,
    remote_video_active: bool,
    connected_at: Option<I>,
    last_error: Option<CallError>,
    ringing_since: Option<I>,
    last_probe: Option<I>,
    pending_offer: Option<SessionDescription>,
    peer_open: bool,
    candidates: Vec<IceCandidate>,
}

impl<I: Copy> CallSession<I> {
    fn new(id: CallId, remote: UserId, direction: CallDirection, status: CallStatus) -> Self {
        Self {
            id,
            remote,
            remote_name: None,
            remote_avatar: None,
            direction,
            status,
            options: MediaOptions::default(),
            local_media: None,
            remote_stream: false,
            muted: false,
            video_off: false,
            screen_sharing: false,
            remote_video_active: false,
            connected_at: None,
            last_error: None,
            ringing_since: None,
            last_probe: None,
            pending_offer: None,
            peer_open: false,
            candidates: Vec::new(),
        }
    }

    /// Call id.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Remote party.
    pub fn remote(&self) -> UserId {
        self.remote
    }

    /// Remote display name, when known.
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Remote avatar URL, when known.
    pub fn remote_avatar(&self) -> Option<&str> {
        self.remote_avatar.as_deref()
    }

    /// Direction.
    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Status.
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Requested media.
    pub fn options(&self) -> MediaOptions {
        self.options
    }

    /// Local stream, while held.
    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    /// Whether a remote stream is attached.
    pub fn has_remote_stream(&self) -> bool {
        self.remote_stream
    }

    /// Microphone muted.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Camera disabled.
    pub fn is_video_off(&self) -> bool {
        self.video_off
    }

    /// Display capture active.
    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    /// Latest liveness probe result.
    pub fn remote_video_active(&self) -> bool {
        self.remote_video_active
    }

    /// When the media path came up.
    pub fn connected_at(&self) -> Option<I> {
        self.connected_at
    }

    /// Failure that ended the call, if any.
    pub fn last_error(&self) -> Option<&CallError> {
        self.last_error.as_ref()
    }

    /// Remote candidates waiting for the peer connection.
    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }
}

/// Call signaling engine.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct CallEngine<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    me: Option<UserId>,
    config: CallConfig,
    next_id: u64,
    session: Option<CallSession<I>>,
}

impl<I> CallEngine<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an idle engine.
    pub fn new(config: CallConfig) -> Self {
        Self { me: None, config, next_id: 1, session: None }
    }

    /// Set the local identity used as signal sender.
    pub fn set_local_user(&mut self, user: Option<UserId>) {
        self.me = user;
    }

    /// Local identity.
    pub fn local_user(&self) -> Option<UserId> {
        self.me
    }

    /// Current status (`Idle` without a session).
    pub fn status(&self) -> CallStatus {
        self.session.as_ref().map_or(CallStatus::Idle, |s| s.status)
    }

    /// Whether a call occupies the engine.
    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// The session, while one exists.
    pub fn session(&self) -> Option<&CallSession<I>> {
        self.session.as_ref()
    }

    /// Attach display details for the remote party.
    pub fn set_remote_profile(&mut self, name: Option<String>, avatar: Option<String>) {
        if let Some(session) = &mut self.session {
            session.remote_name = name;
            session.remote_avatar = avatar;
        }
    }

    /// Place a call to `remote`.
    ///
    /// # Errors
    ///
    /// - `CallError::Busy` if a call is active
    /// - `CallError::InvalidState` without a local identity or when calling
    ///   ourselves
    pub fn start_call(
        &mut self,
        remote: UserId,
        options: MediaOptions,
        _now: I,
    ) -> Result<Vec<CallAction>, CallError> {
        if self.is_active() {
            return Err(CallError::Busy);
        }
        if self.me.is_none() || self.me == Some(remote) {
            return Err(CallError::InvalidState { status: self.status(), operation: "start_call" });
        }

        let id = self.allocate_id();
        let mut session =
            CallSession::new(id, remote, CallDirection::Outgoing, CallStatus::Connecting);
        session.options = options;
        self.session = Some(session);
        tracing::debug!(call = %id, %remote, ?options, "starting call");

        Ok(vec![CallAction::AcquireMedia { call: id, options }])
    }

    /// Accept the ringing incoming call.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` without a call
    /// - `CallError::InvalidState` unless an incoming call is ringing
    pub fn accept_call(
        &mut self,
        options: MediaOptions,
        _now: I,
    ) -> Result<Vec<CallAction>, CallError> {
        let session = self.session.as_mut().ok_or(CallError::NoSession)?;
        if session.direction != CallDirection::Incoming || session.status != CallStatus::Ringing {
            return Err(CallError::InvalidState { status: session.status, operation: "accept_call" });
        }

        session.status = CallStatus::Connecting;
        session.ringing_since = None;
        session.options = options;
        tracing::debug!(call = %session.id, ?options, "accepting call");

        Ok(vec![CallAction::AcquireMedia { call: session.id, options }])
    }

    /// Hang up (or reject) the active call.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless a call is active
    pub fn end_call(&mut self, _now: I) -> Result<Vec<CallAction>, CallError> {
        if !self.is_active() {
            return Err(CallError::NoSession);
        }
        Ok(self.finish(true, None))
    }

    /// Return to `Idle` once the call has ended. Returns whether it did.
    pub fn reset(&mut self) -> bool {
        if self.status() == CallStatus::Ended {
            self.session = None;
            true
        } else {
            false
        }
    }

    /// Flip the microphone.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless an active call holds local media
    pub fn toggle_mute(&mut self) -> Result<Vec<CallAction>, CallError> {
        let session = self.media_session()?;
        session.muted = !session.muted;
        Ok(vec![CallAction::SetTrackEnabled {
            call: session.id,
            kind: TrackKind::Audio,
            enabled: !session.muted,
        }])
    }

    /// Flip the camera.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless an active call holds local media
    pub fn toggle_video(&mut self) -> Result<Vec<CallAction>, CallError> {
        let session = self.media_session()?;
        session.video_off = !session.video_off;
        Ok(vec![CallAction::SetTrackEnabled {
            call: session.id,
            kind: TrackKind::Video,
            enabled: !session.video_off,
        }])
    }

    /// Share the screen instead of the camera.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless an active call holds local media
    pub fn start_screen_share(&mut self) -> Result<Vec<CallAction>, CallError> {
        let session = self.media_session()?;
        if session.screen_sharing {
            return Ok(vec![]);
        }
        session.screen_sharing = true;
        Ok(vec![CallAction::StartScreenShare { call: session.id }])
    }

    /// Return to the camera.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless an active call holds local media
    pub fn stop_screen_share(&mut self) -> Result<Vec<CallAction>, CallError> {
        let session = self.media_session()?;
        if !session.screen_sharing {
            return Ok(vec![]);
        }
        session.screen_sharing = false;
        Ok(vec![CallAction::StopScreenShare { call: session.id }])
    }

    /// Process an inbound signal.
    ///
    /// Signals that do not fit the current session (wrong sender, wrong
    /// state, duplicate) are ignored with a debug log.
    pub fn handle_signal(&mut self, signal: Signal, now: I) -> Vec<CallAction> {
        if Some(signal.receiver_id) != self.me {
            tracing::debug!(receiver = %signal.receiver_id, "ignoring signal for another user");
            return vec![];
        }

        match signal.kind {
            SignalKind::Offer => self.on_offer(signal, now),
            SignalKind::Answer => self.on_answer(signal, now),
            SignalKind::Candidate => self.on_remote_candidate(signal),
            SignalKind::EndCall => {
                if self.is_current_remote(signal.sender_id) {
                    tracing::debug!(from = %signal.sender_id, "remote ended call");
                    self.finish(false, None)
                } else {
                    tracing::debug!(from = %signal.sender_id, "ignoring end-call");
                    vec![]
                }
            },
        }
    }

    /// Process a backend completion.
    pub fn handle_event(&mut self, event: CallEvent, now: I) -> Vec<CallAction> {
        let call = event.call();
        let current = self.session.as_ref().filter(|s| s.id == call && s.status.is_active());
        if current.is_none() {
            return Self::release_stale(event);
        }

        match event {
            CallEvent::MediaAcquired { media, .. } => self.on_media(media),
            CallEvent::PeerOpened { .. } => self.on_peer_opened(),
            CallEvent::OfferCreated { sdp, .. } => self.on_local_description(sdp, now, true),
            CallEvent::AnswerCreated { sdp, .. } => self.on_local_description(sdp, now, false),
            CallEvent::Peer { event: PeerEvent::LocalCandidate(candidate), .. } => {
                match (self.me, self.session.as_ref()) {
                    (Some(me), Some(s)) => {
                        vec![CallAction::Signal(Signal::candidate(me, s.remote, candidate))]
                    },
                    _ => vec![],
                }
            },
            CallEvent::Peer { event: PeerEvent::State(state), .. } => self.on_peer_state(state, now),
            CallEvent::Peer { event: PeerEvent::RemoteStream, .. } => {
                if let Some(s) = &mut self.session {
                    s.remote_stream = true;
                    s.remote_video_active = true;
                }
                vec![]
            },
            CallEvent::ProbeResult { active, .. } => {
                if let Some(s) = &mut self.session {
                    s.remote_video_active = active;
                }
                vec![]
            },
            CallEvent::Failed { error, .. } => {
                tracing::warn!(%call, %error, "call failed");
                self.finish(self.remote_knows(), Some(CallError::Media(error.to_string())))
            },
        }
    }

    /// The relay connection was lost. Ends any active call without a signal.
    pub fn relay_lost(&mut self) -> Vec<CallAction> {
        if !self.is_active() {
            return vec![];
        }
        tracing::debug!("relay lost during call");
        self.finish(false, None)
    }

    /// Process timers: ring timeout and liveness probes.
    pub fn tick(&mut self, now: I) -> Vec<CallAction> {
        let Some(session) = &mut self.session else {
            return vec![];
        };

        match session.status {
            CallStatus::Ringing => {
                let expired = session
                    .ringing_since
                    .is_some_and(|since| now - since >= self.config.ring_timeout);
                if !expired {
                    return vec![];
                }
                let outgoing = session.direction == CallDirection::Outgoing;
                tracing::debug!(call = %session.id, outgoing, "ring timeout");
                self.finish(outgoing, None)
            },
            CallStatus::Connected => {
                if !(session.options.video && session.remote_stream) {
                    return vec![];
                }
                let due = session
                    .last_probe
                    .is_none_or(|last| now - last >= self.config.liveness_interval);
                if !due {
                    return vec![];
                }
                session.last_probe = Some(now);
                vec![CallAction::ProbeRemoteVideo { call: session.id }]
            },
            CallStatus::Idle | CallStatus::Connecting | CallStatus::Ended => vec![],
        }
    }

    fn allocate_id(&mut self) -> CallId {
        let id = CallId(self.next_id);
        self.next_id += 1;
        id
    }

    fn media_session(&mut self) -> Result<&mut CallSession<I>, CallError> {
        self.session
            .as_mut()
            .filter(|s| s.status.is_active() && s.local_media.is_some())
            .ok_or(CallError::NoSession)
    }

    fn is_current_remote(&self, sender: UserId) -> bool {
        self.session.as_ref().is_some_and(|s| s.remote == sender && s.status.is_active())
    }

    /// Whether the remote party knows about the call.
    fn remote_knows(&self) -> bool {
        self.session.as_ref().is_some_and(|s| match s.direction {
            CallDirection::Incoming => true,
            CallDirection::Outgoing => s.status != CallStatus::Connecting,
        })
    }

    fn on_offer(&mut self, signal: Signal, now: I) -> Vec<CallAction> {
        if self.is_active() {
            tracing::debug!(from = %signal.sender_id, "ignoring offer while busy");
            return vec![];
        }
        let Some(sdp) = signal.sdp else {
            return vec![];
        };

        let id = self.allocate_id();
        let mut session =
            CallSession::new(id, signal.sender_id, CallDirection::Incoming, CallStatus::Ringing);
        session.pending_offer = Some(sdp);
        session.ringing_since = Some(now);
        self.session = Some(session);
        tracing::debug!(call = %id, from = %signal.sender_id, "incoming call");
        vec![]
    }

    fn on_answer(&mut self, signal: Signal, now: I) -> Vec<CallAction> {
        let Some(session) = self.session.as_mut().filter(|s| {
            s.remote == signal.sender_id
                && s.direction == CallDirection::Outgoing
                && s.status == CallStatus::Ringing
        }) else {
            tracing::debug!(from = %signal.sender_id, "ignoring answer without pending offer");
            return vec![];
        };
        let Some(answer) = signal.sdp else {
            return vec![];
        };

        session.status = CallStatus::Connected;
        session.ringing_since = None;
        session.connected_at = Some(now);
        session.last_probe = Some(now);

        let call = session.id;
        let mut actions = vec![CallAction::SetRemoteAnswer { call, answer }];
        actions.extend(
            session
                .candidates
                .drain(..)
                .map(|candidate| CallAction::AddRemoteCandidate { call, candidate }),
        );
        actions
    }

    fn on_remote_candidate(&mut self, signal: Signal) -> Vec<CallAction> {
        let cap = self.config.candidate_buffer;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.remote == signal.sender_id && s.status.is_active())
        else {
            tracing::debug!(from = %signal.sender_id, "ignoring candidate without session");
            return vec![];
        };
        let Some(candidate) = signal.candidate else {
            return vec![];
        };

        if session.peer_open {
            return vec![CallAction::AddRemoteCandidate { call: session.id, candidate }];
        }
        if session.candidates.len() < cap {
            session.candidates.push(candidate);
        } else {
            tracing::debug!(call = %session.id, "candidate buffer full, dropping");
        }
        vec![]
    }

    fn on_media(&mut self, media: LocalMedia) -> Vec<CallAction> {
        let ice_servers = self.config.ice_servers.clone();
        let Some(session) = &mut self.session else {
            return vec![];
        };
        if session.status != CallStatus::Connecting {
            return vec![];
        }
        session.video_off = session.options.video && !media.has_video();
        session.local_media = Some(media);
        vec![CallAction::OpenPeer { call: session.id, ice_servers }]
    }

    fn on_peer_opened(&mut self) -> Vec<CallAction> {
        let Some(session) = &mut self.session else {
            return vec![];
        };
        session.peer_open = true;
        let call = session.id;

        match session.direction {
            CallDirection::Outgoing => vec![CallAction::CreateOffer { call }],
            CallDirection::Incoming => {
                let Some(offer) = session.pending_offer.take() else {
                    return self.finish(true, Some(CallError::InvalidState {
                        status: CallStatus::Connecting,
                        operation: "answer without offer",
                    }));
                };
                let mut actions = vec![CallAction::CreateAnswer { call, offer }];
                actions.extend(
                    session
                        .candidates
                        .drain(..)
                        .map(|candidate| CallAction::AddRemoteCandidate { call, candidate }),
                );
                actions
            },
        }
    }

    fn on_local_description(
        &mut self,
        sdp: SessionDescription,
        now: I,
        is_offer: bool,
    ) -> Vec<CallAction> {
        let Some(me) = self.me else {
            return vec![];
        };
        let Some(session) = &mut self.session else {
            return vec![];
        };

        match (is_offer, session.direction) {
            (true, CallDirection::Outgoing) => {
                // The offer is on its way to the callee.
                session.status = CallStatus::Ringing;
                session.ringing_since = Some(now);
                vec![CallAction::Signal(Signal::offer(me, session.remote, sdp))]
            },
            (false, CallDirection::Incoming) => {
                vec![CallAction::Signal(Signal::answer(me, session.remote, sdp))]
            },
            _ => vec![],
        }
    }

    fn on_peer_state(&mut self, state: PeerState, now: I) -> Vec<CallAction> {
        let Some(session) = &mut self.session else {
            return vec![];
        };

        if state == PeerState::Connected {
            if session.status != CallStatus::Connected {
                session.status = CallStatus::Connected;
                session.ringing_since = None;
                session.connected_at = Some(now);
                session.last_probe = Some(now);
                tracing::debug!(call = %session.id, "call connected");
            }
            return vec![];
        }

        if state.is_terminal() {
            let error = (state == PeerState::Failed)
                .then(|| CallError::Media("peer connection failed".to_string()));
            tracing::debug!(call = %session.id, ?state, "peer connection ended");
            return self.finish(false, error);
        }
        vec![]
    }

    /// Tear the session down into `Ended`.
    ///
    /// Closes the peer, releases local media, clears the remote stream and
    /// optionally tells the remote party.
    fn finish(&mut self, notify_remote: bool, error: Option<CallError>) -> Vec<CallAction> {
        let me = self.me;
        let Some(session) = &mut self.session else {
            return vec![];
        };
        let call = session.id;

        let mut actions = vec![CallAction::ClosePeer { call }, CallAction::ReleaseMedia { call }];
        if let Some(me) = me.filter(|_| notify_remote) {
            actions.push(CallAction::Signal(Signal::end_call(me, session.remote)));
        }
        if let Some(error) = &error {
            actions.push(CallAction::Failed { call, error: error.clone() });
        }

        session.status = CallStatus::Ended;
        session.local_media = None;
        session.remote_stream = false;
        session.remote_video_active = false;
        session.screen_sharing = false;
        session.peer_open = false;
        session.pending_offer = None;
        session.ringing_since = None;
        session.last_probe = None;
        session.candidates.clear();
        session.last_error = error;
        actions
    }

    fn release_stale(event: CallEvent) -> Vec<CallAction> {
        let call = event.call();
        match event {
            CallEvent::MediaAcquired { .. } => {
                tracing::debug!(%call, "releasing media acquired for stale call");
                vec![CallAction::ReleaseMedia { call }]
            },
            CallEvent::PeerOpened { .. }
            | CallEvent::OfferCreated { .. }
            | CallEvent::AnswerCreated { .. } => {
                tracing::debug!(%call, "closing peer of stale call");
                vec![CallAction::ClosePeer { call }]
            },
            CallEvent::Peer { .. } | CallEvent::ProbeResult { .. } | CallEvent::Failed { .. } => {
                vec![]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::call::media::TrackInfo;

    fn uid(n: u64) -> UserId {
        UserId::new(n).unwrap()
    }

    fn engine(me: u64) -> CallEngine<Instant> {
        let mut engine = CallEngine::new(CallConfig::default());
        engine.set_local_user(Some(uid(me)));
        engine
    }

    fn media(video: bool) -> LocalMedia {
        let mut tracks = vec![TrackInfo { id: 1, kind: TrackKind::Audio }];
        if video {
            tracks.push(TrackInfo { id: 2, kind: TrackKind::Video });
        }
        LocalMedia { tracks }
    }

    fn sdp(text: &str) -> SessionDescription {
        SessionDescription(text.to_string())
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.1 5000{n} typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    fn signals(actions: &[CallAction]) -> Vec<&Signal> {
        actions
            .iter()
            .filter_map(|a| match a {
                CallAction::Signal(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Drive an outgoing call from user 1 to user 2 up to `Ringing`.
    fn ringing_outgoing(t0: Instant, options: MediaOptions) -> (CallEngine<Instant>, CallId) {
        let mut engine = engine(1);
        let actions = engine.start_call(uid(2), options, t0).unwrap();
        let call = engine.session().unwrap().id();
        assert_eq!(actions, vec![CallAction::AcquireMedia { call, options }]);

        let actions =
            engine.handle_event(CallEvent::MediaAcquired { call, media: media(options.video) }, t0);
        assert!(matches!(actions[..], [CallAction::OpenPeer { .. }]));

        let actions = engine.handle_event(CallEvent::PeerOpened { call }, t0);
        assert_eq!(actions, vec![CallAction::CreateOffer { call }]);
        assert_eq!(engine.status(), CallStatus::Connecting);

        let actions = engine.handle_event(CallEvent::OfferCreated { call, sdp: sdp("v=0 offer") }, t0);
        assert_eq!(actions, vec![CallAction::Signal(Signal::offer(uid(1), uid(2), sdp("v=0 offer")))]);
        assert_eq!(engine.status(), CallStatus::Ringing);
        (engine, call)
    }

    #[test]
    fn outgoing_call_connects_on_answer() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);

        let t1 = t0 + Duration::from_secs(3);
        let actions = engine.handle_signal(Signal::answer(uid(2), uid(1), sdp("v=0 answer")), t1);
        assert_eq!(actions, vec![CallAction::SetRemoteAnswer { call, answer: sdp("v=0 answer") }]);
        assert_eq!(engine.status(), CallStatus::Connected);
        assert_eq!(engine.session().unwrap().connected_at(), Some(t1));
    }

    #[test]
    fn start_call_while_active_is_busy() {
        let t0 = Instant::now();
        let (mut engine, _) = ringing_outgoing(t0, MediaOptions::AUDIO);
        assert_eq!(engine.start_call(uid(3), MediaOptions::AUDIO, t0), Err(CallError::Busy));
    }

    #[test]
    fn start_call_requires_identity() {
        let mut anonymous = CallEngine::<Instant>::new(CallConfig::default());
        let result = anonymous.start_call(uid(2), MediaOptions::AUDIO, Instant::now());
        assert!(matches!(result, Err(CallError::InvalidState { .. })));

        let mut signed_in = engine(1);
        let result = signed_in.start_call(uid(1), MediaOptions::AUDIO, Instant::now());
        assert!(matches!(result, Err(CallError::InvalidState { .. })));
    }

    #[test]
    fn incoming_call_buffers_candidates_until_peer_opens() {
        let t0 = Instant::now();
        let mut engine = engine(2);

        assert!(engine.handle_signal(Signal::offer(uid(1), uid(2), sdp("v=0 offer")), t0).is_empty());
        assert_eq!(engine.status(), CallStatus::Ringing);
        assert_eq!(engine.session().unwrap().direction(), CallDirection::Incoming);

        for n in 0..3 {
            assert!(engine.handle_signal(Signal::candidate(uid(1), uid(2), candidate(n)), t0).is_empty());
        }
        assert_eq!(engine.session().unwrap().buffered_candidates(), 3);

        let actions = engine.accept_call(MediaOptions::AUDIO, t0).unwrap();
        let call = engine.session().unwrap().id();
        assert_eq!(actions, vec![CallAction::AcquireMedia { call, options: MediaOptions::AUDIO }]);

        engine.handle_event(CallEvent::MediaAcquired { call, media: media(false) }, t0);
        let actions = engine.handle_event(CallEvent::PeerOpened { call }, t0);
        assert_eq!(actions[0], CallAction::CreateAnswer { call, offer: sdp("v=0 offer") });
        let applied: Vec<_> = actions[1..]
            .iter()
            .map(|a| match a {
                CallAction::AddRemoteCandidate { candidate, .. } => candidate.clone(),
                other => panic!("unexpected action {other:?}"),
            })
            .collect();
        assert_eq!(applied, vec![candidate(0), candidate(1), candidate(2)]);
        assert_eq!(engine.session().unwrap().buffered_candidates(), 0);

        let actions =
            engine.handle_event(CallEvent::AnswerCreated { call, sdp: sdp("v=0 answer") }, t0);
        assert_eq!(signals(&actions), vec![&Signal::answer(uid(2), uid(1), sdp("v=0 answer"))]);
        assert_eq!(engine.status(), CallStatus::Connecting);

        // Late candidates go straight to the peer.
        let actions = engine.handle_signal(Signal::candidate(uid(1), uid(2), candidate(9)), t0);
        assert_eq!(actions, vec![CallAction::AddRemoteCandidate { call, candidate: candidate(9) }]);

        engine.handle_event(CallEvent::Peer { call, event: PeerEvent::State(PeerState::Connected) }, t0);
        assert_eq!(engine.status(), CallStatus::Connected);
    }

    #[test]
    fn candidate_buffer_is_bounded() {
        let t0 = Instant::now();
        let mut engine = engine(2);
        engine.handle_signal(Signal::offer(uid(1), uid(2), sdp("v=0")), t0);

        for n in 0..(DEFAULT_CANDIDATE_BUFFER as u32 + 10) {
            engine.handle_signal(Signal::candidate(uid(1), uid(2), candidate(n)), t0);
        }
        assert_eq!(engine.session().unwrap().buffered_candidates(), DEFAULT_CANDIDATE_BUFFER);
    }

    #[test]
    fn signals_from_strangers_are_ignored() {
        let t0 = Instant::now();
        let (mut engine, _) = ringing_outgoing(t0, MediaOptions::AUDIO);

        assert!(engine.handle_signal(Signal::answer(uid(3), uid(1), sdp("x")), t0).is_empty());
        assert!(engine.handle_signal(Signal::end_call(uid(3), uid(1)), t0).is_empty());
        assert!(engine.handle_signal(Signal::end_call(uid(2), uid(7)), t0).is_empty());
        assert_eq!(engine.status(), CallStatus::Ringing);
    }

    #[test]
    fn offer_while_busy_is_ignored() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);
        assert!(engine.handle_signal(Signal::offer(uid(3), uid(1), sdp("v=0")), t0).is_empty());
        assert_eq!(engine.session().unwrap().id(), call);
        assert_eq!(engine.session().unwrap().remote(), uid(2));
    }

    #[test]
    fn hangup_releases_everything_and_notifies_remote() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::VIDEO);
        engine.handle_signal(Signal::answer(uid(2), uid(1), sdp("a")), t0);
        engine.handle_event(CallEvent::Peer { call, event: PeerEvent::RemoteStream }, t0);

        let actions = engine.end_call(t0).unwrap();
        assert_eq!(actions, vec![
            CallAction::ClosePeer { call },
            CallAction::ReleaseMedia { call },
            CallAction::Signal(Signal::end_call(uid(1), uid(2))),
        ]);

        let session = engine.session().unwrap();
        assert_eq!(session.status(), CallStatus::Ended);
        assert!(session.local_media().is_none());
        assert!(!session.has_remote_stream());
        assert_eq!(engine.end_call(t0), Err(CallError::NoSession));

        assert!(engine.reset());
        assert_eq!(engine.status(), CallStatus::Idle);
    }

    #[test]
    fn remote_end_call_tears_down_without_echo() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);
        let actions = engine.handle_signal(Signal::end_call(uid(2), uid(1)), t0);
        assert_eq!(actions, vec![CallAction::ClosePeer { call }, CallAction::ReleaseMedia { call }]);
        assert_eq!(engine.status(), CallStatus::Ended);
    }

    #[test]
    fn unanswered_outgoing_call_times_out() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::VIDEO);

        assert!(engine.tick(t0 + Duration::from_secs(44)).is_empty());
        let actions = engine.tick(t0 + DEFAULT_RING_TIMEOUT);
        assert_eq!(actions, vec![
            CallAction::ClosePeer { call },
            CallAction::ReleaseMedia { call },
            CallAction::Signal(Signal::end_call(uid(1), uid(2))),
        ]);
        assert_eq!(engine.status(), CallStatus::Ended);
        assert!(engine.session().unwrap().last_error().is_none());
    }

    #[test]
    fn unanswered_incoming_call_times_out_silently() {
        let t0 = Instant::now();
        let mut engine = engine(2);
        engine.handle_signal(Signal::offer(uid(1), uid(2), sdp("v=0")), t0);

        let actions = engine.tick(t0 + DEFAULT_RING_TIMEOUT);
        assert!(signals(&actions).is_empty());
        assert_eq!(engine.status(), CallStatus::Ended);
    }

    #[test]
    fn reject_notifies_caller() {
        let t0 = Instant::now();
        let mut engine = engine(2);
        engine.handle_signal(Signal::offer(uid(1), uid(2), sdp("v=0")), t0);

        let actions = engine.end_call(t0).unwrap();
        assert_eq!(signals(&actions), vec![&Signal::end_call(uid(2), uid(1))]);
    }

    #[test]
    fn relay_loss_ends_call_without_signal() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);
        engine.handle_signal(Signal::answer(uid(2), uid(1), sdp("a")), t0);

        let actions = engine.relay_lost();
        assert_eq!(actions, vec![CallAction::ClosePeer { call }, CallAction::ReleaseMedia { call }]);
        assert_eq!(engine.status(), CallStatus::Ended);
        assert!(engine.relay_lost().is_empty());
    }

    #[test]
    fn stale_completions_release_their_resources() {
        let t0 = Instant::now();
        let mut engine = engine(1);
        engine.start_call(uid(2), MediaOptions::VIDEO, t0).unwrap();
        let first = engine.session().unwrap().id();
        engine.end_call(t0).unwrap();
        engine.reset();

        engine.start_call(uid(3), MediaOptions::AUDIO, t0).unwrap();
        let second = engine.session().unwrap().id();
        assert_ne!(first, second);

        let actions = engine.handle_event(CallEvent::MediaAcquired { call: first, media: media(true) }, t0);
        assert_eq!(actions, vec![CallAction::ReleaseMedia { call: first }]);
        let actions = engine.handle_event(CallEvent::PeerOpened { call: first }, t0);
        assert_eq!(actions, vec![CallAction::ClosePeer { call: first }]);

        // The current call is untouched.
        assert_eq!(engine.status(), CallStatus::Connecting);
        assert!(engine.session().unwrap().local_media().is_none());
    }

    #[test]
    fn media_failure_before_offer_stays_local() {
        let t0 = Instant::now();
        let mut engine = engine(1);
        engine.start_call(uid(2), MediaOptions::VIDEO, t0).unwrap();
        let call = engine.session().unwrap().id();

        let error = MediaError::Device("camera denied".to_string());
        let actions = engine.handle_event(CallEvent::Failed { call, error }, t0);
        assert!(signals(&actions).is_empty());
        assert!(actions.iter().any(|a| matches!(a, CallAction::Failed { .. })));
        assert!(matches!(engine.session().unwrap().last_error(), Some(CallError::Media(_))));
        assert_eq!(engine.status(), CallStatus::Ended);
    }

    #[test]
    fn peer_failure_forces_ended() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);
        engine.handle_signal(Signal::answer(uid(2), uid(1), sdp("a")), t0);

        let actions =
            engine.handle_event(CallEvent::Peer { call, event: PeerEvent::State(PeerState::Failed) }, t0);
        assert!(actions.contains(&CallAction::ReleaseMedia { call }));
        assert_eq!(engine.status(), CallStatus::Ended);
    }

    #[test]
    fn local_candidates_are_trickled() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);
        let actions = engine.handle_event(
            CallEvent::Peer { call, event: PeerEvent::LocalCandidate(candidate(1)) },
            t0,
        );
        assert_eq!(signals(&actions), vec![&Signal::candidate(uid(1), uid(2), candidate(1))]);
    }

    #[test]
    fn liveness_probe_runs_while_connected_with_video() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::VIDEO);
        engine.handle_signal(Signal::answer(uid(2), uid(1), sdp("a")), t0);
        engine.handle_event(CallEvent::Peer { call, event: PeerEvent::RemoteStream }, t0);

        assert!(engine.tick(t0 + Duration::from_secs(4)).is_empty());
        let t5 = t0 + DEFAULT_LIVENESS_INTERVAL;
        assert_eq!(engine.tick(t5), vec![CallAction::ProbeRemoteVideo { call }]);
        assert!(engine.tick(t5 + Duration::from_secs(1)).is_empty());

        engine.handle_event(CallEvent::ProbeResult { call, active: false }, t5);
        assert!(!engine.session().unwrap().remote_video_active());
    }

    #[test]
    fn audio_calls_are_not_probed() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::AUDIO);
        engine.handle_signal(Signal::answer(uid(2), uid(1), sdp("a")), t0);
        engine.handle_event(CallEvent::Peer { call, event: PeerEvent::RemoteStream }, t0);
        assert!(engine.tick(t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn toggles_flip_tracks() {
        let t0 = Instant::now();
        let (mut engine, call) = ringing_outgoing(t0, MediaOptions::VIDEO);

        assert_eq!(engine.toggle_mute().unwrap(), vec![CallAction::SetTrackEnabled {
            call,
            kind: TrackKind::Audio,
            enabled: false,
        }]);
        assert!(engine.session().unwrap().is_muted());
        assert_eq!(engine.toggle_mute().unwrap(), vec![CallAction::SetTrackEnabled {
            call,
            kind: TrackKind::Audio,
            enabled: true,
        }]);

        assert_eq!(engine.toggle_video().unwrap(), vec![CallAction::SetTrackEnabled {
            call,
            kind: TrackKind::Video,
            enabled: false,
        }]);

        assert_eq!(engine.start_screen_share().unwrap(), vec![CallAction::StartScreenShare { call }]);
        assert!(engine.start_screen_share().unwrap().is_empty());
        assert_eq!(engine.stop_screen_share().unwrap(), vec![CallAction::StopScreenShare { call }]);
    }

    #[test]
    fn toggles_without_media_fail() {
        let mut engine = engine(1);
        assert_eq!(engine.toggle_mute(), Err(CallError::NoSession));
        engine.start_call(uid(2), MediaOptions::AUDIO, Instant::now()).unwrap();
        assert_eq!(engine.toggle_video(), Err(CallError::NoSession));
    }

    #[test]
    fn accept_requires_ringing_incoming() {
        let t0 = Instant::now();
        let (mut caller, _) = ringing_outgoing(t0, MediaOptions::AUDIO);
        assert!(matches!(
            caller.accept_call(MediaOptions::AUDIO, t0),
            Err(CallError::InvalidState { .. })
        ));
        assert_eq!(engine(5).accept_call(MediaOptions::AUDIO, t0), Err(CallError::NoSession));
    }
}
