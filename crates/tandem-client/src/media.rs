//! Headless media backend.
//!
//! Signaling-only backend for terminals and servers without capture devices.
//! It hands out track handles without opening hardware, produces minimal SDP
//! and reports the peer connected as soon as negotiation completes, so the
//! full call flow can run end to end. No media flows.

use std::{
    collections::{HashMap, HashSet},
    fmt::Write as _,
    sync::{Arc, Mutex, PoisonError},
};

use tandem_core::{
    CallId, IceServer, LocalMedia, MediaBackend, MediaError, MediaOptions, PeerEvent,
    PeerEventSink, PeerState, TrackInfo, TrackKind,
};
use tandem_proto::{IceCandidate, SessionDescription};

#[derive(Default)]
struct Inner {
    next_track: u64,
    tracks: HashMap<CallId, Vec<TrackInfo>>,
    peers: HashMap<CallId, PeerEventSink>,
    released: HashSet<CallId>,
}

/// Media backend without devices.
#[derive(Clone, Default)]
pub struct HeadlessMedia {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for HeadlessMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("HeadlessMedia")
            .field("calls", &inner.tracks.len())
            .field("peers", &inner.peers.len())
            .finish()
    }
}

impl HeadlessMedia {
    /// Create a backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks currently held for `call`.
    pub fn tracks(&self, call: CallId) -> Vec<TrackInfo> {
        self.lock().tracks.get(&call).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self, call: CallId) -> Result<PeerEventSink, MediaError> {
        self.lock().peers.get(&call).cloned().ok_or(MediaError::NoPeer(call))
    }

    fn describe(&self, call: CallId, role: &str) -> SessionDescription {
        let mut sdp = format!("v=0\r\no=tandem {} 0 IN IP4 0.0.0.0\r\ns={role}\r\nt=0 0\r\n", call.0);
        for track in self.tracks(call) {
            let media = match track.kind {
                TrackKind::Audio => "audio",
                TrackKind::Video | TrackKind::Screen => "video",
            };
            let _ = write!(sdp, "m={media} 9 UDP/TLS/RTP/SAVPF 0\r\na=inactive\r\n");
        }
        SessionDescription(sdp)
    }
}

impl MediaBackend for HeadlessMedia {
    async fn acquire(&self, call: CallId, options: MediaOptions) -> Result<LocalMedia, MediaError> {
        let mut inner = self.lock();
        let mut tracks = Vec::new();
        let kinds = [(options.audio, TrackKind::Audio), (options.video, TrackKind::Video)];
        for (_, kind) in kinds.into_iter().filter(|(wanted, _)| *wanted) {
            inner.next_track += 1;
            tracks.push(TrackInfo { id: inner.next_track, kind });
        }
        if inner.released.contains(&call) {
            tracing::debug!(%call, "acquired after release; dropping tracks");
        } else {
            inner.tracks.insert(call, tracks.clone());
        }
        Ok(LocalMedia { tracks })
    }

    async fn open_peer(
        &self,
        call: CallId,
        ice_servers: Vec<IceServer>,
        sink: PeerEventSink,
    ) -> Result<(), MediaError> {
        tracing::debug!(%call, servers = ice_servers.len(), "headless peer");
        self.lock().peers.insert(call, sink);
        Ok(())
    }

    async fn create_offer(&self, call: CallId) -> Result<SessionDescription, MediaError> {
        self.sink(call)?;
        Ok(self.describe(call, "offer"))
    }

    async fn create_answer(
        &self,
        call: CallId,
        _offer: SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        let sink = self.sink(call)?;
        let answer = self.describe(call, "answer");
        sink(call, PeerEvent::State(PeerState::Connected));
        Ok(answer)
    }

    async fn set_remote_answer(
        &self,
        call: CallId,
        _answer: SessionDescription,
    ) -> Result<(), MediaError> {
        let sink = self.sink(call)?;
        sink(call, PeerEvent::State(PeerState::Connected));
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        call: CallId,
        _candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        self.sink(call).map(|_| ())
    }

    async fn set_track_enabled(
        &self,
        call: CallId,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError> {
        tracing::debug!(%call, ?kind, enabled, "track toggled");
        Ok(())
    }

    async fn start_screen_share(&self, call: CallId) -> Result<(), MediaError> {
        Err(MediaError::Device(format!("no display capture for {call}")))
    }

    async fn stop_screen_share(&self, _call: CallId) -> Result<(), MediaError> {
        Ok(())
    }

    async fn probe_remote_video(&self, call: CallId) -> Result<bool, MediaError> {
        self.sink(call).map(|_| false)
    }

    async fn close_peer(&self, call: CallId) {
        self.lock().peers.remove(&call);
    }

    async fn release_media(&self, call: CallId) {
        let mut inner = self.lock();
        inner.tracks.remove(&call);
        inner.released.insert(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (PeerEventSink, Arc<Mutex<Vec<PeerEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&events);
        let sink: PeerEventSink = Arc::new(move |_, event| log.lock().unwrap().push(event));
        (sink, events)
    }

    #[tokio::test]
    async fn track_ids_are_never_reused() {
        let media = HeadlessMedia::new();
        let first = media.acquire(CallId(1), MediaOptions::VIDEO).await.unwrap();
        media.release_media(CallId(1)).await;
        let second = media.acquire(CallId(2), MediaOptions::VIDEO).await.unwrap();

        let ids: HashSet<u64> = first.tracks.iter().chain(&second.tracks).map(|t| t.id).collect();
        assert_eq!(ids.len(), 4);
        assert!(media.tracks(CallId(1)).is_empty());
    }

    #[tokio::test]
    async fn late_acquire_after_release_holds_nothing() {
        let media = HeadlessMedia::new();
        media.release_media(CallId(3)).await;
        media.acquire(CallId(3), MediaOptions::AUDIO).await.unwrap();
        assert!(media.tracks(CallId(3)).is_empty());
    }

    #[tokio::test]
    async fn answer_reports_connected() {
        let media = HeadlessMedia::new();
        let (sink, events) = recording();
        media.acquire(CallId(1), MediaOptions::AUDIO).await.unwrap();
        media.open_peer(CallId(1), vec![], sink).await.unwrap();

        let answer = media.create_answer(CallId(1), SessionDescription("v=0".into())).await.unwrap();

        assert!(answer.0.contains("m=audio"));
        assert_eq!(events.lock().unwrap().as_slice(), &[PeerEvent::State(PeerState::Connected)]);
    }

    #[tokio::test]
    async fn offer_requires_peer() {
        let media = HeadlessMedia::new();
        assert_eq!(media.create_offer(CallId(9)).await, Err(MediaError::NoPeer(CallId(9))));
    }
}
