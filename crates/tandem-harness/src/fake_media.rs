//! Recording media backend.
//!
//! `FakeMedia` never touches devices. It records every track it hands out
//! and whether that track was stopped, counts peer connections, and reports
//! a peer connected once both descriptions are in place, so call lifecycles
//! can be asserted end to end. Failures and delays are injectable.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tandem_core::{
    CallId, IceServer, LocalMedia, MediaBackend, MediaError, MediaOptions, PeerEvent,
    PeerEventSink, PeerState, TrackInfo, TrackKind,
};
use tandem_proto::{IceCandidate, SessionDescription};

/// A track handed out by [`FakeMedia`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTrack {
    /// Call the track was acquired for
    pub call: CallId,
    /// Track id and kind
    pub info: TrackInfo,
    /// Whether the track has been stopped
    pub stopped: bool,
}

#[derive(Default)]
struct Inner {
    next_track: u64,
    tracks: Vec<FakeTrack>,
    released: HashSet<CallId>,
    peers: HashMap<CallId, PeerEventSink>,
    peers_opened: usize,
    connected: HashSet<CallId>,
    remote_candidates: Vec<(CallId, IceCandidate)>,
    enabled: Vec<(CallId, TrackKind, bool)>,
    acquire_delay: Duration,
    acquire_failure: Option<MediaError>,
    remote_video: bool,
}

/// Media backend that records instead of capturing.
#[derive(Clone, Default)]
pub struct FakeMedia {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for FakeMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("FakeMedia")
            .field("tracks", &inner.tracks.len())
            .field("peers", &inner.peers.len())
            .finish_non_exhaustive()
    }
}

impl FakeMedia {
    /// Create a backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every acquisition take `delay` of (virtual) time.
    pub fn set_acquire_delay(&self, delay: Duration) {
        self.lock().acquire_delay = delay;
    }

    /// Fail the next acquisition with `error`.
    pub fn fail_next_acquire(&self, error: MediaError) {
        self.lock().acquire_failure = Some(error);
    }

    /// Whether liveness probes see remote video.
    pub fn set_remote_video(&self, flowing: bool) {
        self.lock().remote_video = flowing;
    }

    /// Push a peer event for `call` as the backend would.
    ///
    /// Returns `false` if `call` has no open peer.
    pub fn emit(&self, call: CallId, event: PeerEvent) -> bool {
        let sink = self.lock().peers.get(&call).cloned();
        match sink {
            Some(sink) => {
                sink(call, event);
                true
            },
            None => false,
        }
    }

    /// Every track ever handed out.
    pub fn tracks(&self) -> Vec<FakeTrack> {
        self.lock().tracks.clone()
    }

    /// Tracks not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.lock().tracks.iter().filter(|t| !t.stopped).count()
    }

    /// Peer connections created so far.
    pub fn peers_opened(&self) -> usize {
        self.lock().peers_opened
    }

    /// Peer connections currently open.
    pub fn open_peers(&self) -> usize {
        self.lock().peers.len()
    }

    /// Calls whose peer reached `Connected`.
    pub fn connected_calls(&self) -> Vec<CallId> {
        let mut calls: Vec<_> = self.lock().connected.iter().copied().collect();
        calls.sort_by_key(|c| c.0);
        calls
    }

    /// Remote candidates applied, in order.
    pub fn remote_candidates(&self) -> Vec<(CallId, IceCandidate)> {
        self.lock().remote_candidates.clone()
    }

    /// Track enable/disable requests, in order.
    pub fn toggles(&self) -> Vec<(CallId, TrackKind, bool)> {
        self.lock().enabled.clone()
    }

    fn sink(&self, call: CallId) -> Result<PeerEventSink, MediaError> {
        self.lock().peers.get(&call).cloned().ok_or(MediaError::NoPeer(call))
    }

    fn connect(&self, call: CallId) -> Result<(), MediaError> {
        let sink = self.sink(call)?;
        self.lock().connected.insert(call);
        sink(call, PeerEvent::State(PeerState::Connected));
        Ok(())
    }

    fn stop(inner: &mut Inner, call: CallId, kind: Option<TrackKind>) {
        for track in &mut inner.tracks {
            if track.call == call && kind.is_none_or(|k| k == track.info.kind) {
                track.stopped = true;
            }
        }
    }
}

impl MediaBackend for FakeMedia {
    async fn acquire(&self, call: CallId, options: MediaOptions) -> Result<LocalMedia, MediaError> {
        let delay = self.lock().acquire_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if let Some(error) = inner.acquire_failure.take() {
            return Err(error);
        }
        let stopped = inner.released.contains(&call);
        let mut media = LocalMedia::default();
        let kinds = [(options.audio, TrackKind::Audio), (options.video, TrackKind::Video)];
        for (_, kind) in kinds.into_iter().filter(|(wanted, _)| *wanted) {
            inner.next_track += 1;
            let info = TrackInfo { id: inner.next_track, kind };
            inner.tracks.push(FakeTrack { call, info: info.clone(), stopped });
            media.tracks.push(info);
        }
        Ok(media)
    }

    async fn open_peer(
        &self,
        call: CallId,
        _ice_servers: Vec<IceServer>,
        sink: PeerEventSink,
    ) -> Result<(), MediaError> {
        let mut inner = self.lock();
        inner.peers_opened += 1;
        inner.peers.insert(call, sink);
        Ok(())
    }

    async fn create_offer(&self, call: CallId) -> Result<SessionDescription, MediaError> {
        self.sink(call)?;
        Ok(SessionDescription(format!("v=0 offer {}", call.0)))
    }

    async fn create_answer(
        &self,
        call: CallId,
        _offer: SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        self.connect(call)?;
        Ok(SessionDescription(format!("v=0 answer {}", call.0)))
    }

    async fn set_remote_answer(
        &self,
        call: CallId,
        _answer: SessionDescription,
    ) -> Result<(), MediaError> {
        self.connect(call)
    }

    async fn add_remote_candidate(
        &self,
        call: CallId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        self.sink(call)?;
        self.lock().remote_candidates.push((call, candidate));
        Ok(())
    }

    async fn set_track_enabled(
        &self,
        call: CallId,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError> {
        self.lock().enabled.push((call, kind, enabled));
        Ok(())
    }

    async fn start_screen_share(&self, call: CallId) -> Result<(), MediaError> {
        self.sink(call)?;
        let mut inner = self.lock();
        inner.next_track += 1;
        let info = TrackInfo { id: inner.next_track, kind: TrackKind::Screen };
        let stopped = inner.released.contains(&call);
        inner.tracks.push(FakeTrack { call, info, stopped });
        Ok(())
    }

    async fn stop_screen_share(&self, call: CallId) -> Result<(), MediaError> {
        Self::stop(&mut self.lock(), call, Some(TrackKind::Screen));
        Ok(())
    }

    async fn probe_remote_video(&self, call: CallId) -> Result<bool, MediaError> {
        self.sink(call)?;
        Ok(self.lock().remote_video)
    }

    async fn close_peer(&self, call: CallId) {
        self.lock().peers.remove(&call);
    }

    async fn release_media(&self, call: CallId) {
        let mut inner = self.lock();
        inner.released.insert(call);
        Self::stop(&mut inner, call, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_stops_every_track_of_the_call() {
        let media = FakeMedia::new();
        media.acquire(CallId(1), MediaOptions::VIDEO).await.unwrap();
        media.acquire(CallId(2), MediaOptions::AUDIO).await.unwrap();

        media.release_media(CallId(1)).await;

        assert_eq!(media.live_tracks(), 1);
        assert!(media.tracks().iter().filter(|t| t.call == CallId(1)).all(|t| t.stopped));
    }

    #[tokio::test]
    async fn late_acquire_is_born_stopped() {
        let media = FakeMedia::new();
        media.release_media(CallId(4)).await;
        media.acquire(CallId(4), MediaOptions::AUDIO).await.unwrap();
        assert_eq!(media.live_tracks(), 0);
    }

    #[tokio::test]
    async fn injected_failure_is_used_once() {
        let media = FakeMedia::new();
        media.fail_next_acquire(MediaError::Device("camera busy".into()));

        assert!(media.acquire(CallId(1), MediaOptions::VIDEO).await.is_err());
        assert!(media.acquire(CallId(1), MediaOptions::VIDEO).await.is_ok());
    }

    #[tokio::test]
    async fn answering_connects_the_peer() {
        let media = FakeMedia::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sink: PeerEventSink = Arc::new(move |_, event| log.lock().unwrap().push(event));
        media.open_peer(CallId(3), vec![], sink).await.unwrap();

        media.create_answer(CallId(3), SessionDescription("v=0".into())).await.unwrap();

        assert_eq!(media.connected_calls(), vec![CallId(3)]);
        assert_eq!(seen.lock().unwrap().as_slice(), &[PeerEvent::State(PeerState::Connected)]);
    }
}
