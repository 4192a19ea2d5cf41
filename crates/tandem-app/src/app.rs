//! Application reducer.
//!
//! [`App`] is the single writer of client state. It combines the relay
//! connection, the inbound router, the conversation store and the call
//! manager, consumes [`AppEvent`]s and produces [`AppAction`]s for the runtime
//! to execute.
//!
//! This is a pure state machine: time, randomness and the wall clock come from
//! the injected [`Environment`], and every side effect is an action.
//!
//! # Responsibilities
//!
//! - Subscribes every channel before connecting so handlers survive reconnects
//! - Routes delivered frames to the store or the call manager
//! - Publishes store and call output through the connection, falling back to
//!   REST for read receipts and flagging messages that could not be sent
//! - Reloads conversations on every established connection
//! - Forces the call to end when the relay connection drops

use std::time::Duration;

use tandem_core::{
    CallAction, CallConfig, CallError, ConnectionAction, ConnectionConfig, ConnectionError,
    Environment, InboundEvent, PublishError, RelayConnection, Router,
};
use tandem_proto::{Channel, Outbound, UserId};
use uuid::Uuid;

use crate::{
    AppAction, AppEvent, Intent, Notification,
    calls::{CallEffect, CallManager, DEFAULT_END_LINGER},
    conversations::{ConversationConfig, ConversationStore, StoreEffect},
    state::Snapshot,
};

/// Default period of the runtime's tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Relay connection
    pub connection: ConnectionConfig,
    /// Call engine
    pub call: CallConfig,
    /// Conversation store
    pub conversation: ConversationConfig,
    /// How long an ended call stays visible
    pub end_linger: Duration,
    /// Period of the runtime's tick
    pub tick_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            call: CallConfig::default(),
            conversation: ConversationConfig::default(),
            end_linger: DEFAULT_END_LINGER,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Application state machine.
///
/// Pure state machine that processes events and produces actions.
/// No I/O dependencies, fully testable in simulation.
#[derive(Debug, Clone)]
pub struct App<E: Environment> {
    env: E,
    me: Option<UserId>,
    connection: RelayConnection<E::Instant>,
    router: Router,
    conversations: ConversationStore,
    calls: CallManager<E::Instant>,
    status_message: Option<String>,
}

impl<E: Environment> App<E> {
    /// Create a signed-out App.
    pub fn new(env: E, config: AppConfig) -> Self {
        Self {
            env,
            me: None,
            connection: RelayConnection::new(config.connection),
            router: Router::new(),
            conversations: ConversationStore::new(config.conversation),
            calls: CallManager::new(config.call, config.end_linger),
            status_message: None,
        }
    }

    /// Process an event and return actions.
    pub fn handle(&mut self, event: AppEvent) -> Vec<AppAction> {
        let now = self.env.now();
        let mut actions = match event {
            AppEvent::Intent(intent) => self.handle_intent(intent, now),
            AppEvent::Tick => {
                let connection = self.connection.tick(now);
                let mut actions = self.apply_connection(connection, now);
                let calls = self.calls.tick(now);
                actions.extend(self.apply_call(calls, now));
                actions
            },
            AppEvent::TransportOpened { transport } => {
                match self.connection.transport_opened(transport, now) {
                    Ok(actions) => self.apply_connection(actions, now),
                    Err(error) => {
                        tracing::warn!(%transport, %error, "unexpected transport open");
                        vec![AppAction::CloseTransport]
                    },
                }
            },
            AppEvent::TransportClosed { transport, reason } => {
                tracing::debug!(%transport, %reason, "transport closed");
                let error = ConnectionError::Transport(reason);
                let actions = self.connection.transport_failed(transport, &error, now);
                self.apply_connection(actions, now)
            },
            AppEvent::FrameReceived { transport, frame } => {
                match self.connection.handle_frame(transport, frame, now) {
                    Ok(actions) => self.apply_connection(actions, now),
                    Err(error) => {
                        tracing::warn!(%transport, %error, "dropping frame");
                        vec![]
                    },
                }
            },
            AppEvent::HeartbeatReceived { transport } => {
                self.connection.handle_heartbeat(transport, now);
                return vec![];
            },
            AppEvent::Media(event) => {
                let effects = self.calls.handle_event(event, now);
                self.apply_call(effects, now)
            },
            AppEvent::ConversationsLoaded { user, result } => {
                if self.me != Some(user) {
                    return vec![];
                }
                match result {
                    Ok(summaries) => {
                        let effects = self.conversations.load_conversations(summaries);
                        self.apply_store(effects, now)
                    },
                    Err(error) => {
                        tracing::warn!(%error, "conversation reload failed");
                        self.status_message = Some(format!("Could not load conversations: {error}"));
                        vec![]
                    },
                }
            },
            AppEvent::MessagesLoaded { user, with, result } => {
                if self.me != Some(user) {
                    return vec![];
                }
                match result {
                    Ok(history) => {
                        let env = &self.env;
                        let effects = self
                            .conversations
                            .load_messages(with, history, || Uuid::from_u128(env.random_u128()));
                        self.apply_store(effects, now)
                    },
                    Err(error) => {
                        tracing::warn!(%with, %error, "history load failed");
                        vec![]
                    },
                }
            },
            AppEvent::ContactResolved { profile } => {
                let is_call_remote =
                    self.calls.engine().session().is_some_and(|s| s.remote() == profile.id);
                if is_call_remote {
                    self.calls.set_remote_profile(Some(profile.name.clone()), profile.avatar.clone());
                }
                self.conversations.apply_profile(profile);
                vec![]
            },
        };

        if !actions.contains(&AppAction::Quit) {
            actions.push(AppAction::Render);
        }
        actions
    }

    /// Current snapshot for the presentation layer.
    pub fn snapshot(&self) -> Snapshot {
        let active = self.conversations.active();
        Snapshot {
            user: self.me,
            connection: self.connection.status(),
            reconnecting: self.connection.is_reconnecting(),
            gave_up: self.connection.gave_up(),
            conversations: self.conversations.conversations().to_vec(),
            active,
            thread: active.map(|a| self.conversations.thread(a).to_vec()).unwrap_or_default(),
            call: self.calls.view(self.env.now()),
            status_message: self.status_message.clone(),
        }
    }

    /// Signed-in user.
    pub fn user(&self) -> Option<UserId> {
        self.me
    }

    /// Relay connection.
    pub fn connection(&self) -> &RelayConnection<E::Instant> {
        &self.connection
    }

    /// Inbound router and its counters.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Conversation store.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Call manager.
    pub fn calls(&self) -> &CallManager<E::Instant> {
        &self.calls
    }

    /// Transient status line.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    fn handle_intent(&mut self, intent: Intent, now: E::Instant) -> Vec<AppAction> {
        match intent {
            Intent::Connect { user } => self.connect(user, now),
            Intent::Logout => self.logout(now),
            Intent::Reload => match self.me {
                Some(user) => vec![AppAction::LoadConversations { user }],
                None => vec![],
            },
            Intent::OpenConversation { with } => {
                let effects = self.conversations.open(with);
                self.apply_store(effects, now)
            },
            Intent::CloseConversation => {
                self.conversations.close();
                vec![]
            },
            Intent::SendMessage { to, content } => {
                let content = content.trim();
                if content.is_empty() {
                    return vec![];
                }
                if self.me.is_none() {
                    return self.error("Sign in to send messages");
                }
                let local = Uuid::from_u128(self.env.random_u128());
                let wall = self.env.wall_clock();
                let effects = self.conversations.send_message(to, content.to_string(), local, wall);
                self.apply_store(effects, now)
            },
            Intent::MarkRead { with } => {
                let effects = self.conversations.mark_read(with);
                self.apply_store(effects, now)
            },
            Intent::StartCall { to, options } => {
                if !self.connection.is_connected() {
                    return self.error("Cannot call while disconnected");
                }
                let result = self.calls.start_call(to, options, now);
                let mut actions = self.attach_call_profile();
                actions.extend(self.call_result(result, now));
                actions
            },
            Intent::AcceptCall { options } => {
                let result = self.calls.accept_call(options, now);
                self.call_result(result, now)
            },
            Intent::RejectCall => {
                let result = self.calls.reject_call(now);
                self.call_result(result, now)
            },
            Intent::EndCall => {
                let result = self.calls.end_call(now);
                self.call_result(result, now)
            },
            Intent::ToggleMute => {
                let result = self.calls.toggle_mute(now);
                self.call_result(result, now)
            },
            Intent::ToggleVideo => {
                let result = self.calls.toggle_video(now);
                self.call_result(result, now)
            },
            Intent::StartScreenShare => {
                let result = self.calls.start_screen_share(now);
                self.call_result(result, now)
            },
            Intent::StopScreenShare => {
                let result = self.calls.stop_screen_share(now);
                self.call_result(result, now)
            },
            Intent::Quit => {
                let mut actions = self.logout(now);
                actions.push(AppAction::Quit);
                actions
            },
        }
    }

    fn connect(&mut self, user: UserId, now: E::Instant) -> Vec<AppAction> {
        let mut actions = Vec::new();
        if self.me != Some(user) {
            if self.me.is_some() {
                actions.extend(self.hang_up(now));
            }
            tracing::info!(%user, "signing in");
            self.me = Some(user);
            self.conversations.set_user(Some(user));
            self.calls.set_local_user(Some(user));
        }

        let mut connection = Vec::new();
        for channel in Channel::ALL {
            connection.extend(self.connection.subscribe(channel, now));
        }
        connection.extend(self.connection.connect(user, now));
        actions.extend(self.apply_connection(connection, now));
        actions
    }

    fn logout(&mut self, now: E::Instant) -> Vec<AppAction> {
        let mut actions = self.hang_up(now);
        let connection = self.connection.disconnect();
        actions.extend(self.apply_connection(connection, now));

        if let Some(user) = self.me.take() {
            tracing::info!(%user, "signed out");
        }
        self.conversations.set_user(None);
        self.calls.set_local_user(None);
        self.status_message = None;
        actions
    }

    /// End an active call while the connection can still carry `end-call`.
    fn hang_up(&mut self, now: E::Instant) -> Vec<AppAction> {
        if !self.calls.status().is_active() {
            return vec![];
        }
        match self.calls.end_call(now) {
            Ok(effects) => self.apply_call(effects, now),
            Err(_) => vec![],
        }
    }

    fn apply_connection(
        &mut self,
        actions: Vec<ConnectionAction>,
        now: E::Instant,
    ) -> Vec<AppAction> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ConnectionAction::OpenTransport { transport, user } => {
                    tracing::debug!(%transport, %user, "opening transport");
                    out.push(AppAction::OpenTransport {
                        transport,
                        url: self.connection.config().relay_url.clone(),
                        user,
                    });
                },
                ConnectionAction::SendFrame(frame) => out.push(AppAction::SendFrame(frame)),
                ConnectionAction::SendHeartbeat => out.push(AppAction::SendHeartbeat),
                ConnectionAction::CloseTransport => out.push(AppAction::CloseTransport),
                ConnectionAction::Deliver { channel, frame } => {
                    if let Some(event) = self.router.route(channel, &frame.body) {
                        out.extend(self.handle_inbound(event, now));
                    }
                },
                ConnectionAction::Established { user } => {
                    tracing::info!(%user, "connected to relay");
                    self.status_message = None;
                    out.push(AppAction::Notify(Notification::Connected { user }));
                    out.push(AppAction::LoadConversations { user });
                    if let Some(with) = self.conversations.active() {
                        out.push(AppAction::LoadMessages { user, with });
                    }
                },
                ConnectionAction::Lost { reason } => {
                    tracing::info!(%reason, "relay connection lost");
                    let effects = self.calls.relay_lost(now);
                    out.extend(self.apply_call(effects, now));
                    self.status_message = Some("Reconnecting...".to_string());
                    out.push(AppAction::Notify(Notification::ConnectionLost { reason }));
                },
                ConnectionAction::ReconnectScheduled { attempt, delay } => {
                    tracing::debug!(attempt, ?delay, "reconnect scheduled");
                    self.status_message = Some(format!("Reconnecting (attempt {attempt})..."));
                },
                ConnectionAction::GaveUp { attempts } => {
                    tracing::warn!(attempts, "giving up on relay connection");
                    self.status_message = Some("Offline: could not reach the relay".to_string());
                    out.push(AppAction::Notify(Notification::GaveUp { attempts }));
                },
            }
        }
        out
    }

    fn handle_inbound(&mut self, event: InboundEvent, now: E::Instant) -> Vec<AppAction> {
        match event {
            InboundEvent::Message(message) => {
                let local = Uuid::from_u128(self.env.random_u128());
                let effects = self.conversations.receive(message, self.env.wall_clock(), local);
                self.apply_store(effects, now)
            },
            InboundEvent::ReadReceipt(receipt) => {
                self.conversations.apply_receipt(receipt);
                vec![]
            },
            InboundEvent::Presence(update) => {
                self.conversations.apply_presence(update);
                vec![]
            },
            InboundEvent::Signal(signal) => {
                let effects = self.calls.handle_signal(signal, now);
                let mut actions = self.attach_call_profile();
                actions.extend(self.apply_call(effects, now));
                actions
            },
        }
    }

    fn publish(
        &mut self,
        outbound: Outbound,
        now: E::Instant,
    ) -> Result<Vec<AppAction>, PublishError> {
        let kind = outbound.kind();
        let actions = self.connection.publish(outbound, now).inspect_err(|error| {
            tracing::debug!(kind, %error, "publish failed");
        })?;
        Ok(self.apply_connection(actions, now))
    }

    fn apply_store(&mut self, effects: Vec<StoreEffect>, now: E::Instant) -> Vec<AppAction> {
        let mut out = Vec::new();
        for effect in effects {
            match effect {
                StoreEffect::Send { id, message } => {
                    let to = message.receiver_id;
                    match self.publish(Outbound::SendMessage(message), now) {
                        Ok(actions) => out.extend(actions),
                        Err(error) => {
                            tracing::warn!(%id, %to, %error, "message not sent");
                            self.conversations.mark_failed(to, id);
                            out.push(AppAction::Notify(Notification::SendFailed { id, to }));
                        },
                    }
                },
                StoreEffect::Receipt(receipt) => {
                    match self.publish(Outbound::MarkRead(receipt), now) {
                        Ok(actions) => out.extend(actions),
                        Err(_) => out.push(AppAction::MarkReadRemote(receipt)),
                    }
                },
                StoreEffect::Notify(notification) => out.push(AppAction::Notify(notification)),
                StoreEffect::ResolveContact(id) => out.push(AppAction::ResolveContact { id }),
                StoreEffect::LoadHistory(with) => {
                    if let Some(user) = self.me {
                        out.push(AppAction::LoadMessages { user, with });
                    }
                },
            }
        }
        out
    }

    fn apply_call(&mut self, effects: Vec<CallEffect>, now: E::Instant) -> Vec<AppAction> {
        let mut out = Vec::new();
        for effect in effects {
            match effect {
                CallEffect::Engine(CallAction::Signal(signal)) => {
                    let kind = signal.kind;
                    match self.publish(Outbound::Signal(signal), now) {
                        Ok(actions) => out.extend(actions),
                        Err(error) => tracing::warn!(?kind, %error, "dropping call signal"),
                    }
                },
                CallEffect::Engine(CallAction::Failed { call, error }) => {
                    tracing::warn!(%call, %error, "call failed");
                    self.status_message = Some(format!("Call failed: {error}"));
                    out.push(AppAction::Notify(Notification::Error {
                        message: format!("Call failed: {error}"),
                    }));
                },
                CallEffect::Engine(action) => out.push(AppAction::Media(action)),
                CallEffect::Ringtone(ringtone) => {
                    out.push(AppAction::Notify(Notification::Ringtone(ringtone)));
                },
                CallEffect::Notify(Notification::IncomingCall { from, name: None }) => {
                    let name = self.conversations.conversation(from).and_then(|c| c.name.clone());
                    out.push(AppAction::Notify(Notification::IncomingCall { from, name }));
                },
                CallEffect::Notify(notification) => out.push(AppAction::Notify(notification)),
            }
        }
        out
    }

    /// Copy the remote party's name and avatar onto a fresh call session.
    fn attach_call_profile(&mut self) -> Vec<AppAction> {
        let Some(session) = self.calls.engine().session() else {
            return vec![];
        };
        if session.remote_name().is_some() || !session.status().is_active() {
            return vec![];
        }
        let remote = session.remote();
        match self.conversations.conversation(remote) {
            Some(conversation) if conversation.name.is_some() => {
                let (name, avatar) = (conversation.name.clone(), conversation.avatar.clone());
                self.calls.set_remote_profile(name, avatar);
                vec![]
            },
            _ => vec![AppAction::ResolveContact { id: remote }],
        }
    }

    fn call_result(
        &mut self,
        result: Result<Vec<CallEffect>, CallError>,
        now: E::Instant,
    ) -> Vec<AppAction> {
        match result {
            Ok(effects) => self.apply_call(effects, now),
            Err(error) => {
                tracing::debug!(%error, "call intent rejected");
                self.error(&error.to_string())
            },
        }
    }

    fn error(&mut self, message: &str) -> Vec<AppAction> {
        self.status_message = Some(message.to_string());
        vec![AppAction::Notify(Notification::Error { message: message.to_string() })]
    }
}
