//! WebRTC media backend.
//!
//! Peer connections come from the `webrtc` crate. Local tracks are
//! sample-fed: capture is owned by the embedding application, which writes
//! encoded frames into the track returned by [`WebRtcMedia::local_track`].
//! Muting swaps the sender's track out rather than stopping capture.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tandem_core::{
    CallId, IceServer, LocalMedia, MediaBackend, MediaError, MediaOptions, PeerEvent,
    PeerEventSink, PeerState, TrackInfo, TrackKind,
};
use tandem_proto::{IceCandidate, SessionDescription};
use webrtc::{
    api::{
        API, APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine},
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::{rtp_codec::RTCRtpCodecCapability, rtp_sender::RTCRtpSender},
    stats::StatsReportType,
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

struct LocalTrack {
    info: TrackInfo,
    track: Arc<TrackLocalStaticSample>,
}

struct Peer {
    connection: Arc<RTCPeerConnection>,
    senders: HashMap<TrackKind, Arc<RTCRtpSender>>,
    video_bytes: u64,
}

#[derive(Default)]
struct Inner {
    next_track: u64,
    tracks: HashMap<CallId, Vec<LocalTrack>>,
    peers: HashMap<CallId, Peer>,
    released: HashSet<CallId>,
}

/// Media backend on WebRTC peer connections.
#[derive(Clone)]
pub struct WebRtcMedia {
    api: Arc<API>,
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for WebRtcMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("WebRtcMedia")
            .field("calls", &inner.tracks.len())
            .field("peers", &inner.peers.len())
            .finish_non_exhaustive()
    }
}

fn negotiation(err: webrtc::Error) -> MediaError {
    MediaError::Negotiation(err.to_string())
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => None,
    }
}

fn ice_server(server: IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls,
        username: server.username.unwrap_or_default(),
        credential: server.credential.unwrap_or_default(),
        ..Default::default()
    }
}

fn sample_track(kind: TrackKind, id: u64) -> Arc<TrackLocalStaticSample> {
    let (mime, label) = match kind {
        TrackKind::Audio => (MIME_TYPE_OPUS, "audio"),
        TrackKind::Video => (MIME_TYPE_VP8, "video"),
        TrackKind::Screen => (MIME_TYPE_VP8, "screen"),
    };
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability { mime_type: mime.to_owned(), ..Default::default() },
        format!("{label}-{id}"),
        "tandem".to_owned(),
    ))
}

impl WebRtcMedia {
    /// Backend with the default codecs and interceptors registered.
    pub fn new() -> Result<Self, MediaError> {
        let mut engine = MediaEngine::default();
        engine.register_default_codecs().map_err(negotiation)?;
        let registry = register_default_interceptors(Registry::new(), &mut engine).map_err(negotiation)?;
        let api = APIBuilder::new().with_media_engine(engine).with_interceptor_registry(registry).build();
        Ok(Self { api: Arc::new(api), inner: Arc::default() })
    }

    /// Track the application feeds captured samples into.
    pub fn local_track(&self, call: CallId, kind: TrackKind) -> Option<Arc<TrackLocalStaticSample>> {
        self.lock()
            .tracks
            .get(&call)?
            .iter()
            .rev()
            .find(|t| t.info.kind == kind)
            .map(|t| Arc::clone(&t.track))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self, call: CallId) -> Result<Arc<RTCPeerConnection>, MediaError> {
        self.lock().peers.get(&call).map(|p| Arc::clone(&p.connection)).ok_or(MediaError::NoPeer(call))
    }

    fn sender(&self, call: CallId, kind: TrackKind) -> Result<Option<Arc<RTCRtpSender>>, MediaError> {
        let inner = self.lock();
        let peer = inner.peers.get(&call).ok_or(MediaError::NoPeer(call))?;
        Ok(peer.senders.get(&kind).cloned())
    }

    fn hook(connection: &RTCPeerConnection, call: CallId, sink: &PeerEventSink) {
        let candidates = Arc::clone(sink);
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = Arc::clone(&candidates);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink(
                        call,
                        PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                        }),
                    ),
                    Err(e) => tracing::warn!(%call, error = %e, "unserializable local candidate"),
                }
            })
        }));

        let states = Arc::clone(sink);
        connection.on_peer_connection_state_change(Box::new(move |state| {
            if let Some(state) = peer_state(state) {
                states(call, PeerEvent::State(state));
            }
            Box::pin(async {})
        }));

        let remote = Arc::clone(sink);
        let seen = Arc::new(AtomicBool::new(false));
        connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::debug!(%call, kind = %track.kind(), "remote track");
            if !seen.swap(true, Ordering::SeqCst) {
                remote(call, PeerEvent::RemoteStream);
            }
            Box::pin(async {})
        }));
    }
}

impl MediaBackend for WebRtcMedia {
    async fn acquire(&self, call: CallId, options: MediaOptions) -> Result<LocalMedia, MediaError> {
        let mut inner = self.lock();
        let mut created = Vec::new();
        let kinds = [(options.audio, TrackKind::Audio), (options.video, TrackKind::Video)];
        for (_, kind) in kinds.into_iter().filter(|(wanted, _)| *wanted) {
            inner.next_track += 1;
            let id = inner.next_track;
            created.push(LocalTrack { info: TrackInfo { id, kind }, track: sample_track(kind, id) });
        }
        let tracks = created.iter().map(|t| t.info.clone()).collect();
        if inner.released.contains(&call) {
            tracing::debug!(%call, "acquired after release; dropping tracks");
        } else {
            inner.tracks.insert(call, created);
        }
        Ok(LocalMedia { tracks })
    }

    async fn open_peer(
        &self,
        call: CallId,
        ice_servers: Vec<IceServer>,
        sink: PeerEventSink,
    ) -> Result<(), MediaError> {
        let config = RTCConfiguration {
            ice_servers: ice_servers.into_iter().map(ice_server).collect(),
            ..Default::default()
        };
        let connection = Arc::new(self.api.new_peer_connection(config).await.map_err(negotiation)?);
        Self::hook(&connection, call, &sink);

        let local: Vec<(TrackKind, Arc<TrackLocalStaticSample>)> = self
            .lock()
            .tracks
            .get(&call)
            .map(|tracks| tracks.iter().map(|t| (t.info.kind, Arc::clone(&t.track))).collect())
            .unwrap_or_default();

        let mut senders = HashMap::new();
        for (kind, track) in local {
            let track: Arc<dyn TrackLocal + Send + Sync> = track;
            let sender = connection.add_track(track).await.map_err(negotiation)?;
            senders.insert(kind, sender);
        }

        self.lock().peers.insert(call, Peer { connection, senders, video_bytes: 0 });
        Ok(())
    }

    async fn create_offer(&self, call: CallId) -> Result<SessionDescription, MediaError> {
        let connection = self.connection(call)?;
        let offer = connection.create_offer(None).await.map_err(negotiation)?;
        connection.set_local_description(offer.clone()).await.map_err(negotiation)?;
        Ok(SessionDescription(offer.sdp))
    }

    async fn create_answer(
        &self,
        call: CallId,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        let connection = self.connection(call)?;
        let remote = RTCSessionDescription::offer(offer.0).map_err(negotiation)?;
        connection.set_remote_description(remote).await.map_err(negotiation)?;
        let answer = connection.create_answer(None).await.map_err(negotiation)?;
        connection.set_local_description(answer.clone()).await.map_err(negotiation)?;
        Ok(SessionDescription(answer.sdp))
    }

    async fn set_remote_answer(
        &self,
        call: CallId,
        answer: SessionDescription,
    ) -> Result<(), MediaError> {
        let connection = self.connection(call)?;
        let remote = RTCSessionDescription::answer(answer.0).map_err(negotiation)?;
        connection.set_remote_description(remote).await.map_err(negotiation)
    }

    async fn add_remote_candidate(
        &self,
        call: CallId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        let connection = self.connection(call)?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };
        connection.add_ice_candidate(init).await.map_err(negotiation)
    }

    async fn set_track_enabled(
        &self,
        call: CallId,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError> {
        let Some(sender) = self.sender(call, kind)? else {
            return Ok(());
        };
        let track = if enabled {
            self.local_track(call, kind).map(|t| t as Arc<dyn TrackLocal + Send + Sync>)
        } else {
            None
        };
        sender.replace_track(track).await.map_err(negotiation)
    }

    async fn start_screen_share(&self, call: CallId) -> Result<(), MediaError> {
        let Some(sender) = self.sender(call, TrackKind::Video)? else {
            return Err(MediaError::Device(format!("{call} has no video sender to share on")));
        };
        let screen = {
            let mut inner = self.lock();
            inner.next_track += 1;
            let id = inner.next_track;
            let track = sample_track(TrackKind::Screen, id);
            inner
                .tracks
                .entry(call)
                .or_default()
                .push(LocalTrack { info: TrackInfo { id, kind: TrackKind::Screen }, track: Arc::clone(&track) });
            track
        };
        sender.replace_track(Some(screen)).await.map_err(negotiation)
    }

    async fn stop_screen_share(&self, call: CallId) -> Result<(), MediaError> {
        if let Some(tracks) = self.lock().tracks.get_mut(&call) {
            tracks.retain(|t| t.info.kind != TrackKind::Screen);
        }
        let Some(sender) = self.sender(call, TrackKind::Video)? else {
            return Ok(());
        };
        let camera = self.local_track(call, TrackKind::Video).map(|t| t as Arc<dyn TrackLocal + Send + Sync>);
        sender.replace_track(camera).await.map_err(negotiation)
    }

    async fn probe_remote_video(&self, call: CallId) -> Result<bool, MediaError> {
        let connection = self.connection(call)?;
        let received: u64 = connection
            .get_stats()
            .await
            .reports
            .values()
            .filter_map(|report| match report {
                StatsReportType::InboundRTP(stats) if stats.kind == "video" => Some(stats.bytes_received),
                _ => None,
            })
            .sum();

        let mut inner = self.lock();
        let peer = inner.peers.get_mut(&call).ok_or(MediaError::NoPeer(call))?;
        let flowing = received > peer.video_bytes;
        peer.video_bytes = received;
        Ok(flowing)
    }

    async fn close_peer(&self, call: CallId) {
        let peer = self.lock().peers.remove(&call);
        if let Some(peer) = peer {
            if let Err(e) = peer.connection.close().await {
                tracing::debug!(%call, error = %e, "peer close failed");
            }
        }
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

    fn ignore() -> PeerEventSink {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn offer_carries_local_tracks() {
        let media = WebRtcMedia::new().unwrap();
        media.acquire(CallId(1), MediaOptions::VIDEO).await.unwrap();
        media.open_peer(CallId(1), vec![], ignore()).await.unwrap();

        let offer = media.create_offer(CallId(1)).await.unwrap();

        assert!(offer.0.contains("m=audio"));
        assert!(offer.0.contains("m=video"));
        media.close_peer(CallId(1)).await;
    }

    #[tokio::test]
    async fn release_drops_tracks_and_late_acquire() {
        let media = WebRtcMedia::new().unwrap();
        media.acquire(CallId(2), MediaOptions::AUDIO).await.unwrap();
        media.release_media(CallId(2)).await;
        media.acquire(CallId(2), MediaOptions::AUDIO).await.unwrap();

        assert!(media.local_track(CallId(2), TrackKind::Audio).is_none());
    }

    #[test]
    fn maps_connection_states() {
        assert_eq!(peer_state(RTCPeerConnectionState::Connected), Some(PeerState::Connected));
        assert_eq!(peer_state(RTCPeerConnectionState::Failed), Some(PeerState::Failed));
        assert_eq!(peer_state(RTCPeerConnectionState::New), None);
    }
}
