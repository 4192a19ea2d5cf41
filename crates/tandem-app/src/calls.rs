//! Call-state manager.
//!
//! Wraps the [`CallEngine`] with the policies that sit above signaling:
//! answering a second caller with "busy", the ringtone side effect, the
//! delayed return to idle after a call ends, and the [`CallView`] model.

use std::{ops::Sub, time::Duration};

use tandem_core::{
    CallAction, CallConfig, CallDirection, CallEngine, CallError, CallEvent, CallStatus,
    MediaOptions,
};
use tandem_proto::{Signal, SignalKind, UserId};

use crate::{Notification, Ringtone, state::CallView};

/// How long an ended call stays visible before the view returns to idle.
pub const DEFAULT_END_LINGER: Duration = Duration::from_secs(3);

/// Side effect requested by the call manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEffect {
    /// Engine action: a signal to publish or a backend operation.
    Engine(CallAction),
    /// Ringtone change.
    Ringtone(Option<Ringtone>),
    /// Notify the presentation layer.
    Notify(Notification),
}

/// Call-state manager.
#[derive(Debug, Clone)]
pub struct CallManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    engine: CallEngine<I>,
    end_linger: Duration,
    ended_at: Option<I>,
    ringtone: Option<Ringtone>,
    last_status: CallStatus,
}

impl<I> CallManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Idle manager.
    pub fn new(config: CallConfig, end_linger: Duration) -> Self {
        Self {
            engine: CallEngine::new(config),
            end_linger,
            ended_at: None,
            ringtone: None,
            last_status: CallStatus::Idle,
        }
    }

    /// Underlying engine.
    pub fn engine(&self) -> &CallEngine<I> {
        &self.engine
    }

    /// Current status.
    pub fn status(&self) -> CallStatus {
        self.engine.status()
    }

    /// Ringtone currently requested.
    pub fn ringtone(&self) -> Option<Ringtone> {
        self.ringtone
    }

    /// When the lingering ended call was armed for reset.
    pub fn ended_at(&self) -> Option<I> {
        self.ended_at
    }

    /// Set the local identity.
    pub fn set_local_user(&mut self, user: Option<UserId>) {
        self.engine.set_local_user(user);
    }

    /// Attach display details for the remote party.
    pub fn set_remote_profile(&mut self, name: Option<String>, avatar: Option<String>) {
        self.engine.set_remote_profile(name, avatar);
    }

    /// Place a call.
    ///
    /// # Errors
    ///
    /// - `CallError::Busy` if a call is active
    /// - `CallError::InvalidState` without identity or when calling ourselves
    pub fn start_call(
        &mut self,
        to: UserId,
        options: MediaOptions,
        now: I,
    ) -> Result<Vec<CallEffect>, CallError> {
        self.clear_ended();
        let actions = self.engine.start_call(to, options, now)?;
        Ok(self.wrap(actions, now))
    }

    /// Accept the ringing incoming call.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` or `CallError::InvalidState` unless an
    ///   incoming call is ringing
    pub fn accept_call(
        &mut self,
        options: MediaOptions,
        now: I,
    ) -> Result<Vec<CallEffect>, CallError> {
        let actions = self.engine.accept_call(options, now)?;
        Ok(self.wrap(actions, now))
    }

    /// Reject the ringing incoming call.
    ///
    /// # Errors
    ///
    /// - `CallError::InvalidState` unless an incoming call is ringing
    pub fn reject_call(&mut self, now: I) -> Result<Vec<CallEffect>, CallError> {
        let ringing_incoming = self.engine.session().is_some_and(|s| {
            s.direction() == CallDirection::Incoming && s.status() == CallStatus::Ringing
        });
        if !ringing_incoming {
            return Err(CallError::InvalidState { status: self.status(), operation: "reject_call" });
        }
        self.end_call(now)
    }

    /// Hang up.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless a call is active
    pub fn end_call(&mut self, now: I) -> Result<Vec<CallEffect>, CallError> {
        let actions = self.engine.end_call(now)?;
        Ok(self.wrap(actions, now))
    }

    /// Flip the microphone.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless the call holds local media
    pub fn toggle_mute(&mut self, now: I) -> Result<Vec<CallEffect>, CallError> {
        let actions = self.engine.toggle_mute()?;
        Ok(self.wrap(actions, now))
    }

    /// Flip the camera.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless the call holds local media
    pub fn toggle_video(&mut self, now: I) -> Result<Vec<CallEffect>, CallError> {
        let actions = self.engine.toggle_video()?;
        Ok(self.wrap(actions, now))
    }

    /// Share the screen.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless the call holds local media
    pub fn start_screen_share(&mut self, now: I) -> Result<Vec<CallEffect>, CallError> {
        let actions = self.engine.start_screen_share()?;
        Ok(self.wrap(actions, now))
    }

    /// Back to the camera.
    ///
    /// # Errors
    ///
    /// - `CallError::NoSession` unless the call holds local media
    pub fn stop_screen_share(&mut self, now: I) -> Result<Vec<CallEffect>, CallError> {
        let actions = self.engine.stop_screen_share()?;
        Ok(self.wrap(actions, now))
    }

    /// Process an inbound signal.
    ///
    /// An offer from a second caller while a call is active is answered with
    /// `end-call` and never reaches the engine.
    pub fn handle_signal(&mut self, signal: Signal, now: I) -> Vec<CallEffect> {
        if signal.kind == SignalKind::Offer {
            if let Some(session) = self.engine.session().filter(|s| s.status().is_active()) {
                if session.remote() == signal.sender_id {
                    tracing::debug!(from = %signal.sender_id, "ignoring duplicate offer");
                    return vec![];
                }
                let Some(me) = self.engine.local_user() else {
                    return vec![];
                };
                tracing::debug!(from = %signal.sender_id, "busy, declining offer");
                return vec![CallEffect::Engine(CallAction::Signal(Signal::end_call(
                    me,
                    signal.sender_id,
                )))];
            }
            self.clear_ended();
        }

        let actions = self.engine.handle_signal(signal, now);
        self.wrap(actions, now)
    }

    /// Process a backend completion.
    pub fn handle_event(&mut self, event: CallEvent, now: I) -> Vec<CallEffect> {
        let actions = self.engine.handle_event(event, now);
        self.wrap(actions, now)
    }

    /// The relay connection dropped.
    pub fn relay_lost(&mut self, now: I) -> Vec<CallEffect> {
        let actions = self.engine.relay_lost();
        self.wrap(actions, now)
    }

    /// Process timers: engine timeouts and the delayed reset.
    pub fn tick(&mut self, now: I) -> Vec<CallEffect> {
        let actions = self.engine.tick(now);
        let mut effects = self.wrap(actions, now);

        if self.ended_at.is_some_and(|at| now - at >= self.end_linger) {
            self.ended_at = None;
            if self.engine.reset() {
                tracing::debug!("call reset to idle");
                self.last_status = CallStatus::Idle;
                effects.extend(self.sync_ringtone());
            }
        }
        effects
    }

    /// View model at `now`.
    pub fn view(&self, now: I) -> CallView {
        let Some(session) = self.engine.session() else {
            return CallView::default();
        };
        CallView {
            status: session.status(),
            remote: Some(session.remote()),
            remote_name: session.remote_name().map(str::to_string),
            remote_avatar: session.remote_avatar().map(str::to_string),
            direction: Some(session.direction()),
            elapsed: session
                .connected_at()
                .filter(|_| session.status() == CallStatus::Connected)
                .map(|at| now - at),
            muted: session.is_muted(),
            video_off: session.is_video_off(),
            screen_sharing: session.is_screen_sharing(),
            video: session.options().video,
            has_local_stream: session.local_media().is_some(),
            has_remote_stream: session.has_remote_stream(),
            remote_video_active: session.remote_video_active(),
            last_error: session.last_error().map(ToString::to_string),
        }
    }

    /// Drop a lingering ended call before a new one starts.
    fn clear_ended(&mut self) {
        if self.engine.reset() {
            self.ended_at = None;
            self.last_status = CallStatus::Idle;
        }
    }

    /// Wrap engine actions and derive status-driven effects.
    fn wrap(&mut self, actions: Vec<CallAction>, now: I) -> Vec<CallEffect> {
        let mut effects: Vec<CallEffect> = actions.into_iter().map(CallEffect::Engine).collect();

        let status = self.engine.status();
        if status != self.last_status {
            tracing::debug!(from = ?self.last_status, to = ?status, "call status changed");
            effects.extend(self.on_transition(status, now));
            self.last_status = status;
        }
        effects.extend(self.sync_ringtone());
        effects
    }

    fn on_transition(&mut self, status: CallStatus, now: I) -> Vec<CallEffect> {
        let Some(session) = self.engine.session() else {
            return vec![];
        };
        match status {
            CallStatus::Ringing if session.direction() == CallDirection::Incoming => {
                vec![CallEffect::Notify(Notification::IncomingCall {
                    from: session.remote(),
                    name: session.remote_name().map(str::to_string),
                })]
            },
            CallStatus::Ended => {
                // Only one reset is ever pending.
                self.ended_at = Some(now);
                vec![CallEffect::Notify(Notification::CallEnded {
                    remote: session.remote(),
                    error: session.last_error().map(ToString::to_string),
                })]
            },
            CallStatus::Idle
            | CallStatus::Connecting
            | CallStatus::Ringing
            | CallStatus::Connected => vec![],
        }
    }

    fn sync_ringtone(&mut self) -> Option<CallEffect> {
        let wanted = self.engine.session().and_then(|s| match (s.status(), s.direction()) {
            (CallStatus::Ringing, CallDirection::Incoming) => Some(Ringtone::Incoming),
            (CallStatus::Ringing, CallDirection::Outgoing) => Some(Ringtone::Outgoing),
            _ => None,
        });
        if wanted == self.ringtone {
            return None;
        }
        self.ringtone = wanted;
        Some(CallEffect::Ringtone(wanted))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tandem_core::{CallId, LocalMedia};
    use tandem_proto::SessionDescription;

    use super::*;

    fn uid(n: u64) -> UserId {
        UserId::new(n).unwrap()
    }

    fn manager(me: u64) -> CallManager<Instant> {
        let mut manager = CallManager::new(CallConfig::default(), DEFAULT_END_LINGER);
        manager.set_local_user(Some(uid(me)));
        manager
    }

    fn offer(from: u64, to: u64) -> Signal {
        Signal::offer(uid(from), uid(to), SessionDescription("v=0".to_string()))
    }

    fn current_call(manager: &CallManager<Instant>) -> CallId {
        manager.engine().session().unwrap().id()
    }

    #[test]
    fn incoming_call_rings_and_notifies() {
        let t0 = Instant::now();
        let mut manager = manager(2);
        let effects = manager.handle_signal(offer(1, 2), t0);
        assert_eq!(effects, vec![
            CallEffect::Notify(Notification::IncomingCall { from: uid(1), name: None }),
            CallEffect::Ringtone(Some(Ringtone::Incoming)),
        ]);

        let effects = manager.accept_call(MediaOptions::AUDIO, t0).unwrap();
        assert!(effects.contains(&CallEffect::Ringtone(None)));
        assert_eq!(manager.ringtone(), None);
    }

    #[test]
    fn second_caller_gets_busy() {
        let t0 = Instant::now();
        let mut manager = manager(2);
        manager.handle_signal(offer(1, 2), t0);

        let effects = manager.handle_signal(offer(3, 2), t0);
        assert_eq!(effects, vec![CallEffect::Engine(CallAction::Signal(Signal::end_call(
            uid(2),
            uid(3)
        )))]);
        assert_eq!(manager.engine().session().unwrap().remote(), uid(1));

        // The first caller re-sending its offer is not busy.
        assert!(manager.handle_signal(offer(1, 2), t0).is_empty());
    }

    #[test]
    fn outgoing_ringback_follows_status() {
        let t0 = Instant::now();
        let mut manager = manager(1);
        manager.start_call(uid(2), MediaOptions::AUDIO, t0).unwrap();
        let call = current_call(&manager);
        manager.handle_event(CallEvent::MediaAcquired { call, media: LocalMedia::default() }, t0);
        manager.handle_event(CallEvent::PeerOpened { call }, t0);
        let effects = manager.handle_event(
            CallEvent::OfferCreated { call, sdp: SessionDescription("v=0".into()) },
            t0,
        );
        assert!(effects.contains(&CallEffect::Ringtone(Some(Ringtone::Outgoing))));
        assert_eq!(manager.status(), CallStatus::Ringing);
    }

    #[test]
    fn ended_call_resets_after_linger() {
        let t0 = Instant::now();
        let mut manager = manager(1);
        manager.start_call(uid(2), MediaOptions::VIDEO, t0).unwrap();

        let effects = manager.end_call(t0).unwrap();
        assert!(effects.contains(&CallEffect::Notify(Notification::CallEnded {
            remote: uid(2),
            error: None,
        })));
        assert_eq!(manager.status(), CallStatus::Ended);
        assert_eq!(manager.view(t0).status, CallStatus::Ended);

        manager.tick(t0 + Duration::from_secs(2));
        assert_eq!(manager.status(), CallStatus::Ended);

        manager.tick(t0 + DEFAULT_END_LINGER);
        assert_eq!(manager.status(), CallStatus::Idle);
        assert_eq!(manager.view(t0).status, CallStatus::Idle);
        assert!(manager.ended_at().is_none());
    }

    #[test]
    fn new_call_clears_pending_reset() {
        let t0 = Instant::now();
        let mut manager = manager(1);
        manager.start_call(uid(2), MediaOptions::AUDIO, t0).unwrap();
        manager.end_call(t0).unwrap();

        manager.start_call(uid(3), MediaOptions::AUDIO, t0 + Duration::from_secs(1)).unwrap();
        assert!(manager.ended_at().is_none());

        // The old deadline passing does not reset the new call.
        manager.tick(t0 + Duration::from_secs(10));
        assert_eq!(manager.status(), CallStatus::Connecting);
        assert_eq!(manager.engine().session().unwrap().remote(), uid(3));
    }

    #[test]
    fn reject_requires_ringing_incoming() {
        let t0 = Instant::now();
        let mut manager = manager(1);
        manager.start_call(uid(2), MediaOptions::AUDIO, t0).unwrap();
        assert!(matches!(manager.reject_call(t0), Err(CallError::InvalidState { .. })));

        let mut callee = self::manager(2);
        callee.handle_signal(offer(1, 2), t0);
        let effects = callee.reject_call(t0).unwrap();
        assert!(effects.contains(&CallEffect::Engine(CallAction::Signal(Signal::end_call(
            uid(2),
            uid(1)
        )))));
    }

    #[test]
    fn relay_loss_ends_call() {
        let t0 = Instant::now();
        let mut manager = manager(2);
        manager.handle_signal(offer(1, 2), t0);
        manager.relay_lost(t0);
        assert_eq!(manager.status(), CallStatus::Ended);
        assert_eq!(manager.ringtone(), None);
    }

    #[test]
    fn view_reports_elapsed_while_connected() {
        let t0 = Instant::now();
        let mut manager = manager(2);
        manager.handle_signal(offer(1, 2), t0);
        manager.set_remote_profile(Some("Ada".into()), None);
        manager.accept_call(MediaOptions::AUDIO, t0).unwrap();
        let call = current_call(&manager);
        manager.handle_event(
            CallEvent::Peer {
                call,
                event: tandem_core::PeerEvent::State(tandem_core::PeerState::Connected),
            },
            t0,
        );

        let view = manager.view(t0 + Duration::from_secs(30));
        assert_eq!(view.status, CallStatus::Connected);
        assert_eq!(view.elapsed, Some(Duration::from_secs(30)));
        assert_eq!(view.remote_name.as_deref(), Some("Ada"));
        assert_eq!(view.direction, Some(CallDirection::Incoming));
    }
}
