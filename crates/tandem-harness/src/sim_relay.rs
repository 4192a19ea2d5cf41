//! In-memory STOMP relay.
//!
//! `SimRelay` plays the broker and the message store at once. Every
//! [`Connector::open`] attaches a session whose frames are handled
//! synchronously under one lock, so delivery order is the order in which
//! sessions published:
//!
//! - `CONNECT` is answered with `CONNECTED` (heart-beats disabled)
//! - any frame carrying a `receipt` header is acknowledged with `RECEIPT`
//! - chat messages are stored with a fresh id and delivered to the receiver's
//!   and the sender's message queues
//! - read receipts mark stored messages read and notify the original sender
//! - call signals are forwarded verbatim to the receiver's signal queue
//! - connect/disconnect announcements and dropped sessions drive presence
//!
//! Messages to users without a session are only stored; [`SimHistory`] serves
//! them on the next reload.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tandem_app::{Connector, HistoryService, TransportHandle, WireCommand, WireEvent};
use tandem_core::Environment;
use tandem_proto::{
    Channel, ChatMessage, Command, ConversationSummary, Destinations, Frame, HeartBeat,
    PresenceUpdate, ReadReceipt, SendMessage, Signal, UserId, UserProfile,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::SimEnv;

/// Simulated relay and history failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SimError {
    /// The relay is refusing new sessions.
    #[error("relay refused the connection")]
    Refused,

    /// Directory lookup for an unregistered user.
    #[error("unknown user {0}")]
    UnknownUser(UserId),
}

struct Session {
    user: UserId,
    events: mpsc::UnboundedSender<WireEvent>,
    /// destination -> subscription id
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct RelayState {
    sessions: BTreeMap<u64, Session>,
    next_session: u64,
    next_message: u64,
    next_delivery: u64,
    messages: Vec<ChatMessage>,
    users: HashMap<UserId, UserProfile>,
    online: BTreeSet<UserId>,
    received: Vec<(UserId, Frame)>,
    refusing: bool,
}

impl RelayState {
    fn send(&self, session: u64, frame: Frame) {
        if let Some(s) = self.sessions.get(&session) {
            let _ = s.events.send(WireEvent::Frame(frame));
        }
    }

    fn deliver(&mut self, destination: &str, target: Option<UserId>, body: &[u8]) {
        for s in self.sessions.values() {
            if target.is_some_and(|user| user != s.user) {
                continue;
            }
            let Some(subscription) = s.subscriptions.get(destination) else {
                continue;
            };
            self.next_delivery += 1;
            let id = format!("sim-{}", self.next_delivery);
            let frame = Frame::message(destination, subscription, &id, body.to_vec());
            let _ = s.events.send(WireEvent::Frame(frame));
        }
    }

    fn has_session(&self, user: UserId) -> bool {
        self.sessions.values().any(|s| s.user == user)
    }
}

/// In-memory relay shared by every simulated client.
#[derive(Clone)]
pub struct SimRelay {
    env: SimEnv,
    destinations: Destinations,
    state: Arc<Mutex<RelayState>>,
}

impl std::fmt::Debug for SimRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimRelay")
            .field("sessions", &state.sessions.len())
            .field("messages", &state.messages.len())
            .finish_non_exhaustive()
    }
}

impl SimRelay {
    /// Relay using the default destinations.
    pub fn new(env: SimEnv) -> Self {
        Self::with_destinations(env, Destinations::default())
    }

    /// Relay mounted under custom destination prefixes.
    pub fn with_destinations(env: SimEnv, destinations: Destinations) -> Self {
        Self { env, destinations, state: Arc::default() }
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a user to the directory.
    pub fn register_user(&self, id: UserId, name: &str) {
        let profile = UserProfile { id, name: name.to_string(), avatar: None };
        self.lock().users.insert(id, profile);
    }

    /// History service backed by this relay's store.
    pub fn history(&self) -> SimHistory {
        SimHistory { relay: self.clone() }
    }

    /// Refuse (or accept again) new sessions.
    pub fn set_refusing(&self, refusing: bool) {
        self.lock().refusing = refusing;
    }

    /// Cut every session of `user` as if the network failed.
    ///
    /// Returns the number of sessions dropped.
    pub fn drop_user(&self, user: UserId) -> usize {
        let mut state = self.lock();
        let ids: Vec<u64> =
            state.sessions.iter().filter(|(_, s)| s.user == user).map(|(id, _)| *id).collect();
        for id in &ids {
            if let Some(session) = state.sessions.remove(id) {
                let _ = session.events.send(WireEvent::Closed("connection reset".to_string()));
            }
        }
        if !ids.is_empty() {
            tracing::debug!(%user, sessions = ids.len(), "sim relay dropped user");
            self.set_presence(&mut state, user, false);
        }
        ids.len()
    }

    /// Frames received from `user`, in arrival order.
    pub fn frames_from(&self, user: UserId) -> Vec<Frame> {
        self.lock().received.iter().filter(|(u, _)| *u == user).map(|(_, f)| f.clone()).collect()
    }

    /// Live sessions of `user`.
    pub fn session_count(&self, user: UserId) -> usize {
        self.lock().sessions.values().filter(|s| s.user == user).count()
    }

    /// Whether `user` is announced online.
    pub fn is_online(&self, user: UserId) -> bool {
        self.lock().online.contains(&user)
    }

    /// Every stored message, oldest first.
    pub fn stored_messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    fn attach(&self, url: &str, user: UserId) -> Result<TransportHandle, SimError> {
        let (handle, mut commands, events) = TransportHandle::pair();
        let session = {
            let mut state = self.lock();
            if state.refusing {
                return Err(SimError::Refused);
            }
            state.next_session += 1;
            let id = state.next_session;
            state.sessions.insert(id, Session { user, events, subscriptions: HashMap::new() });
            id
        };
        tracing::debug!(session, %user, url, "sim session opened");

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    WireCommand::Frame(frame) => relay.handle_frame(session, frame),
                    WireCommand::Heartbeat => {},
                    WireCommand::Close => break,
                }
            }
            relay.close_session(session);
        });
        Ok(handle)
    }

    fn close_session(&self, session: u64) {
        let mut state = self.lock();
        let Some(closed) = state.sessions.remove(&session) else {
            return;
        };
        tracing::debug!(session, user = %closed.user, "sim session closed");
        if !state.has_session(closed.user) {
            self.set_presence(&mut state, closed.user, false);
        }
    }

    fn handle_frame(&self, session: u64, frame: Frame) {
        let mut state = self.lock();
        let Some(user) = state.sessions.get(&session).map(|s| s.user) else {
            return;
        };
        state.received.push((user, frame.clone()));

        match frame.command {
            Command::Connect | Command::Stomp => {
                state.send(session, Frame::connected(HeartBeat::DISABLED));
            },
            Command::Subscribe => {
                let (Some(id), Some(destination)) = (frame.headers.get("id"), frame.destination())
                else {
                    state.send(session, Frame::error("SUBSCRIBE needs id and destination"));
                    return;
                };
                let (id, destination) = (id.to_string(), destination.to_string());
                if let Some(s) = state.sessions.get_mut(&session) {
                    s.subscriptions.insert(destination, id);
                }
            },
            Command::Unsubscribe => {
                let id = frame.headers.get("id").map(str::to_string);
                if let Some(s) = state.sessions.get_mut(&session) {
                    s.subscriptions.retain(|_, sub| Some(sub.as_str()) != id.as_deref());
                }
            },
            Command::Send => self.route(&mut state, user, &frame),
            Command::Disconnect => {},
            other => {
                tracing::warn!(session, command = other.as_str(), "unexpected frame at relay");
                return;
            },
        }

        if let Some(receipt) = frame.headers.get("receipt") {
            state.send(session, Frame::receipt(receipt));
        }
    }

    fn route(&self, state: &mut RelayState, user: UserId, frame: &Frame) {
        let destination = frame.destination().unwrap_or_default();
        let d = &self.destinations;

        if destination == d.connect() {
            self.set_presence(state, user, true);
        } else if destination == d.disconnect() {
            self.set_presence(state, user, false);
        } else if destination == d.send_message() {
            match serde_json::from_slice::<SendMessage>(&frame.body) {
                Ok(send) if send.sender_id == user => self.store_and_deliver(state, send),
                Ok(send) => tracing::warn!(%user, claimed = %send.sender_id, "spoofed sender"),
                Err(e) => tracing::warn!(%user, error = %e, "bad chat body"),
            }
        } else if destination == d.mark_read() {
            match serde_json::from_slice::<ReadReceipt>(&frame.body) {
                Ok(receipt) => {
                    mark_read(state, receipt);
                    let queue = d.channel(Channel::ReadReceipts, receipt.sender_id);
                    state.deliver(&queue, Some(receipt.sender_id), &frame.body);
                },
                Err(e) => tracing::warn!(%user, error = %e, "bad receipt body"),
            }
        } else if destination == d.call_signal() {
            match Signal::from_body(&frame.body) {
                Ok(signal) => {
                    let queue = d.channel(Channel::CallSignals, signal.receiver_id);
                    state.deliver(&queue, Some(signal.receiver_id), &frame.body);
                },
                Err(e) => tracing::warn!(%user, error = %e, "bad signal body"),
            }
        } else {
            tracing::warn!(%user, destination, "publish to unknown destination");
        }
    }

    fn store_and_deliver(&self, state: &mut RelayState, send: SendMessage) {
        state.next_message += 1;
        let sender = state.users.get(&send.sender_id);
        let message = ChatMessage {
            id: Some(state.next_message),
            sender_id: send.sender_id,
            sender_name: sender.map(|p| p.name.clone()),
            sender_avatar: sender.and_then(|p| p.avatar.clone()),
            receiver_id: send.receiver_id,
            content: send.content,
            timestamp: Some(self.env.wall_clock()),
            is_read: false,
        };
        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "cannot encode stored message");
                return;
            },
        };
        state.messages.push(message);

        for user in [send.receiver_id, send.sender_id] {
            let queue = self.destinations.channel(Channel::Messages, user);
            state.deliver(&queue, Some(user), &body);
        }
    }

    fn set_presence(&self, state: &mut RelayState, user: UserId, online: bool) {
        let changed = if online { state.online.insert(user) } else { state.online.remove(&user) };
        if !changed {
            return;
        }
        let update = PresenceUpdate { user_id: user, is_online: online };
        let Some(signed) = update.to_signed() else {
            return;
        };
        let topic = self.destinations.channel(Channel::Presence, user);
        state.deliver(&topic, None, signed.to_string().as_bytes());
    }
}

fn mark_read(state: &mut RelayState, receipt: ReadReceipt) {
    for message in &mut state.messages {
        if message.receiver_id == receipt.receiver_id && message.sender_id == receipt.sender_id {
            message.is_read = true;
        }
    }
}

impl Connector for SimRelay {
    type Error = SimError;

    fn open(
        &self,
        url: &str,
        user: UserId,
    ) -> impl Future<Output = Result<TransportHandle, SimError>> + Send {
        let result = self.attach(url, user);
        async move { result }
    }
}

/// History service reading the relay's message store.
#[derive(Debug, Clone)]
pub struct SimHistory {
    relay: SimRelay,
}

impl SimHistory {
    fn summaries(&self, user: UserId) -> Vec<ConversationSummary> {
        let state = self.relay.lock();
        let mut by_peer: BTreeMap<UserId, ConversationSummary> = BTreeMap::new();

        for message in &state.messages {
            let other = if message.sender_id == user {
                message.receiver_id
            } else if message.receiver_id == user {
                message.sender_id
            } else {
                continue;
            };
            let profile = state.users.get(&other);
            let summary = by_peer.entry(other).or_insert_with(|| ConversationSummary {
                user_id: other,
                name: profile.map(|p| p.name.clone()).unwrap_or_default(),
                avatar: profile.and_then(|p| p.avatar.clone()),
                last_message: None,
                last_message_time: None,
                unread_count: 0,
                is_online: state.online.contains(&other),
            });
            summary.last_message = Some(message.content.clone());
            summary.last_message_time = message.timestamp;
            if message.receiver_id == user && !message.is_read {
                summary.unread_count += 1;
            }
        }

        let mut summaries: Vec<_> = by_peer.into_values().collect();
        summaries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        summaries
    }
}

impl HistoryService for SimHistory {
    type Error = SimError;

    fn conversations(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, SimError>> + Send {
        let summaries = self.summaries(user);
        async move { Ok(summaries) }
    }

    fn messages(
        &self,
        user: UserId,
        other: UserId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, SimError>> + Send {
        let thread: Vec<ChatMessage> = self
            .relay
            .lock()
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == user && m.receiver_id == other)
                    || (m.sender_id == other && m.receiver_id == user)
            })
            .cloned()
            .collect();
        async move { Ok(thread) }
    }

    fn mark_read(&self, receipt: ReadReceipt) -> impl Future<Output = Result<(), SimError>> + Send {
        mark_read(&mut self.relay.lock(), receipt);
        async { Ok(()) }
    }

    fn user(&self, id: UserId) -> impl Future<Output = Result<UserProfile, SimError>> + Send {
        let profile = self.relay.lock().users.get(&id).cloned().ok_or(SimError::UnknownUser(id));
        async move { profile }
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::Outbound;

    use super::*;

    fn uid(n: u64) -> UserId {
        UserId::new(n).unwrap()
    }

    fn publish(handle: &TransportHandle, outbound: Outbound) {
        let frame = outbound.into_frame(&Destinations::default()).unwrap();
        handle.commands.send(WireCommand::Frame(frame)).unwrap();
    }

    async fn session(relay: &SimRelay, user: UserId) -> TransportHandle {
        let mut handle = relay.open("sim://relay", user).await.unwrap();
        let connect = Frame::connect("relay", &user.to_string(), HeartBeat::DISABLED);
        handle.commands.send(WireCommand::Frame(connect)).unwrap();
        let Some(WireEvent::Frame(reply)) = handle.events.recv().await else {
            panic!("no CONNECTED");
        };
        assert_eq!(reply.command, Command::Connected);

        let d = Destinations::default();
        for channel in Channel::ALL {
            let subscribe = Frame::subscribe(channel.label(), &d.channel(channel, user))
                .header("receipt", channel.label());
            handle.commands.send(WireCommand::Frame(subscribe)).unwrap();
        }
        for _ in Channel::ALL {
            assert_eq!(next_frame(&mut handle).await.command, Command::Receipt);
        }
        handle
    }

    async fn next_frame(handle: &mut TransportHandle) -> Frame {
        match handle.events.recv().await {
            Some(WireEvent::Frame(frame)) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn message_reaches_receiver_and_echoes_to_sender() {
        let relay = SimRelay::new(SimEnv::new());
        relay.register_user(uid(1), "Ana");
        let mut a = session(&relay, uid(1)).await;
        let mut b = session(&relay, uid(2)).await;

        let send = SendMessage { sender_id: uid(1), receiver_id: uid(2), content: "hi".into() };
        publish(&a, Outbound::SendMessage(send));

        let delivered = ChatMessage::from_body(&next_frame(&mut b).await.body).unwrap();
        let echoed = ChatMessage::from_body(&next_frame(&mut a).await.body).unwrap();
        assert_eq!(delivered, echoed);
        assert_eq!(delivered.id, Some(1));
        assert_eq!(delivered.sender_name.as_deref(), Some("Ana"));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_messages_surface_in_history() {
        let relay = SimRelay::new(SimEnv::new());
        relay.register_user(uid(1), "Ana");
        let a = session(&relay, uid(1)).await;
        publish(&a, Outbound::SendMessage(SendMessage {
            sender_id: uid(1),
            receiver_id: uid(2),
            content: "hello".into(),
        }));
        tokio::task::yield_now().await;

        let summaries = relay.history().conversations(uid(2)).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "Ana");
        assert_eq!(summaries[0].unread_count, 1);
        assert_eq!(summaries[0].last_message.as_deref(), Some("hello"));

        relay.history().mark_read(ReadReceipt { receiver_id: uid(2), sender_id: uid(1) }).await.unwrap();
        assert_eq!(relay.history().conversations(uid(2)).await.unwrap()[0].unread_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_user_closes_and_announces_offline() {
        let relay = SimRelay::new(SimEnv::new());
        let mut a = session(&relay, uid(1)).await;
        let mut b = session(&relay, uid(2)).await;
        publish(&a, Outbound::Connect(uid(1)));
        let online = next_frame(&mut b).await;
        assert_eq!(&online.body[..], b"1");

        assert_eq!(&next_frame(&mut a).await.body[..], b"1");
        assert_eq!(relay.drop_user(uid(1)), 1);

        assert_eq!(a.events.recv().await, Some(WireEvent::Closed("connection reset".into())));
        let offline = next_frame(&mut b).await;
        assert_eq!(&offline.body[..], b"-1");
        assert!(!relay.is_online(uid(1)));
    }

    #[tokio::test]
    async fn refusing_relay_rejects_sessions() {
        let relay = SimRelay::new(SimEnv::new());
        relay.set_refusing(true);
        assert_eq!(relay.open("sim://relay", uid(1)).await.unwrap_err(), SimError::Refused);
    }
}
