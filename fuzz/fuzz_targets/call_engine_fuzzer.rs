//! Fuzz target for the call state machine
//!
//! Drives a `CallEngine` with random local intents, inbound signals (decoded
//! from arbitrary bodies and well-formed ones), backend completions for the
//! current or a stale call, relay loss and time.
//!
//! # Invariants
//!
//! - NEVER panic
//! - Once no call is active, every call that acquired media has released it
//! - Outbound signals are always authored by the local user
//! - The early-candidate buffer never exceeds its bound

#![no_main]

use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tandem_core::{
    CallAction, CallConfig, CallEngine, CallEvent, CallId, LocalMedia, MediaError, MediaOptions,
    PeerEvent, PeerState, TrackInfo, TrackKind,
};
use tandem_proto::{IceCandidate, SessionDescription, Signal, UserId};

#[derive(Debug, Arbitrary)]
enum Op {
    Start { remote: u8, video: bool },
    Accept { video: bool },
    End,
    Mute,
    Camera,
    Share,
    Unshare,
    Reset,
    RelayLost,
    Wait { secs: u8 },
    RawSignal { body: Vec<u8> },
    Offer { from: u8 },
    Answer { from: u8 },
    Candidate { from: u8 },
    EndSignal { from: u8 },
    Completion { stale: bool, kind: Completion },
}

#[derive(Debug, Arbitrary)]
enum Completion {
    MediaAcquired { video: bool },
    PeerOpened,
    OfferCreated,
    AnswerCreated,
    LocalCandidate,
    State(u8),
    RemoteStream,
    Probe(bool),
    Failed,
}

const ME: u64 = 1;

fn user(raw: u8) -> UserId {
    // Never zero; `1` is the local user, which exercises self-addressed input
    UserId::new(u64::from(raw % 4) + 1).expect("nonzero id")
}

fn candidate() -> IceCandidate {
    IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host".into(),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
    }
}

fn completion(call: CallId, kind: &Completion, next_track: &mut u64) -> CallEvent {
    match kind {
        Completion::MediaAcquired { video } => {
            let mut tracks = vec![TrackInfo { id: *next_track, kind: TrackKind::Audio }];
            if *video {
                tracks.push(TrackInfo { id: *next_track + 1, kind: TrackKind::Video });
            }
            *next_track += 2;
            CallEvent::MediaAcquired { call, media: LocalMedia { tracks } }
        },
        Completion::PeerOpened => CallEvent::PeerOpened { call },
        Completion::OfferCreated => {
            CallEvent::OfferCreated { call, sdp: SessionDescription("v=0 local".into()) }
        },
        Completion::AnswerCreated => {
            CallEvent::AnswerCreated { call, sdp: SessionDescription("v=0 local".into()) }
        },
        Completion::LocalCandidate => {
            CallEvent::Peer { call, event: PeerEvent::LocalCandidate(candidate()) }
        },
        Completion::State(state) => {
            let state = match state % 5 {
                0 => PeerState::Connecting,
                1 => PeerState::Connected,
                2 => PeerState::Disconnected,
                3 => PeerState::Failed,
                _ => PeerState::Closed,
            };
            CallEvent::Peer { call, event: PeerEvent::State(state) }
        },
        Completion::RemoteStream => CallEvent::Peer { call, event: PeerEvent::RemoteStream },
        Completion::Probe(active) => CallEvent::ProbeResult { call, active: *active },
        Completion::Failed => {
            CallEvent::Failed { call, error: MediaError::Device("unplugged".into()) }
        },
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let me = UserId::new(ME).expect("nonzero id");
    let config = CallConfig::default();
    let bound = config.candidate_buffer;
    let mut engine = CallEngine::new(config);
    engine.set_local_user(Some(me));

    let start = Instant::now();
    let mut elapsed = Duration::ZERO;
    let mut next_track = 1;
    let mut acquired = BTreeSet::new();
    let mut released = BTreeSet::new();

    for op in ops.into_iter().take(128) {
        let now = start + elapsed;
        let options = |video: bool| if video { MediaOptions::VIDEO } else { MediaOptions::AUDIO };
        let current = engine.session().map(|s| s.id());
        let remote = engine.session().map_or(user(2), |s| s.remote());

        let actions = match op {
            Op::Start { remote, video } => engine.start_call(user(remote), options(video), now).unwrap_or_default(),
            Op::Accept { video } => engine.accept_call(options(video), now).unwrap_or_default(),
            Op::End => engine.end_call(now).unwrap_or_default(),
            Op::Mute => engine.toggle_mute().unwrap_or_default(),
            Op::Camera => engine.toggle_video().unwrap_or_default(),
            Op::Share => engine.start_screen_share().unwrap_or_default(),
            Op::Unshare => engine.stop_screen_share().unwrap_or_default(),
            Op::Reset => {
                engine.reset();
                vec![]
            },
            Op::RelayLost => engine.relay_lost(),
            Op::Wait { secs } => {
                elapsed += Duration::from_secs(u64::from(secs));
                engine.tick(start + elapsed)
            },
            Op::RawSignal { body } => match Signal::from_body(&body) {
                Ok(signal) => engine.handle_signal(signal, now),
                Err(_) => vec![],
            },
            Op::Offer { from } => {
                engine.handle_signal(Signal::offer(user(from), me, SessionDescription("v=0 remote".into())), now)
            },
            Op::Answer { from } => {
                let from = if from % 2 == 0 { remote } else { user(from) };
                engine.handle_signal(Signal::answer(from, me, SessionDescription("v=0 remote".into())), now)
            },
            Op::Candidate { from } => {
                let from = if from % 2 == 0 { remote } else { user(from) };
                engine.handle_signal(Signal::candidate(from, me, candidate()), now)
            },
            Op::EndSignal { from } => {
                let from = if from % 2 == 0 { remote } else { user(from) };
                engine.handle_signal(Signal::end_call(from, me), now)
            },
            Op::Completion { stale, kind } => {
                let call = match (current, stale) {
                    (Some(id), false) => id,
                    (Some(id), true) => CallId(id.0.wrapping_add(1)),
                    (None, _) => CallId(0),
                };
                let event = completion(call, &kind, &mut next_track);
                if matches!(event, CallEvent::MediaAcquired { .. }) {
                    acquired.insert(call);
                }
                engine.handle_event(event, now)
            },
        };

        for action in &actions {
            match action {
                CallAction::AcquireMedia { call, .. } => {
                    acquired.insert(*call);
                },
                CallAction::ReleaseMedia { call } => {
                    released.insert(*call);
                },
                CallAction::Signal(signal) => assert_eq!(signal.sender_id, me),
                _ => {},
            }
        }

        assert_eq!(engine.is_active(), engine.status().is_active());
        assert!(engine.session().is_none_or(|s| s.buffered_candidates() <= bound));
        if !engine.is_active() {
            let leaked: Vec<_> = acquired.difference(&released).collect();
            assert!(leaked.is_empty(), "media never released for {leaked:?}");
        }
    }
});
