//! Relay connection state machine.
//!
//! Owns the single connection to the relay: transport lifecycle, STOMP
//! handshake, subscriptions, heart-beats and reconnect with linear backoff.
//! Uses the action pattern: methods take time as input and return actions for
//! the driver to execute.
//!
//! # State Machine
//!
//! ```text
//!            connect                 opened               CONNECTED
//! ┌──────┐ ─────────> ┌─────────┐ ─────────> ┌─────────────┐ ───────> ┌───────────┐
//! │ Idle │            │ Opening │            │ Handshaking │          │ Connected │
//! └──────┘ <───┐      └─────────┘            └─────────────┘          └───────────┘
//!     ^        │ gave up   ^  │ fail/timeout          │ fail/timeout       │ fail/idle/ERROR
//!     │        │           │  v                       v                    v
//!     │        │   delay   ┌─────────┐ <───────────────────────────────────┘
//!     │        └────────── │ Backoff │
//!     │                    └─────────┘
//!     └──────── disconnect (from any state, no reconnect)
//! ```
//!
//! Transport-level events carry the [`TransportId`] issued with
//! [`ConnectionAction::OpenTransport`]; events from a superseded transport are
//! ignored.

use std::{fmt, ops::Sub, time::Duration};

use tandem_proto::{Channel, Command, Destinations, Frame, HeartBeat, Outbound, UserId};

use crate::error::{ConnectionError, PublishError};

/// Delay unit for reconnect backoff (`attempt × base`).
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Time allowed for transport open plus STOMP handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heart-beat interval offered in both directions.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Missed heart-beat intervals tolerated before the link is declared dead.
pub const DEFAULT_IDLE_TOLERANCE: u32 = 3;

/// Identifies one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new transport and report back with this id
    OpenTransport {
        /// Id to tag every event from the new transport with
        transport: TransportId,
        /// Identity the transport authenticates as
        user: UserId,
    },
    /// Encode and send this frame
    SendFrame(Frame),
    /// Send a bare EOL heart-beat
    SendHeartbeat,
    /// Tear down the current transport
    CloseTransport,
    /// Inbound frame on a subscribed channel
    Deliver {
        /// Channel the frame arrived on
        channel: Channel,
        /// The `MESSAGE` frame
        frame: Frame,
    },
    /// Handshake completed and subscriptions are re-established
    Established {
        /// Authenticated identity
        user: UserId,
    },
    /// An established connection failed
    Lost {
        /// Human-readable cause
        reason: String,
    },
    /// A reconnect attempt will start after `delay`
    ReconnectScheduled {
        /// 1-based attempt number
        attempt: u32,
        /// Wait before the attempt
        delay: Duration,
    },
    /// Reconnect attempts exhausted; a user-initiated connect is required
    GaveUp {
        /// Attempts made
        attempts: u32,
    },
}

/// Coarse connection status exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// No transport and none being opened
    Disconnected,
    /// Transport opening or handshake in flight
    Connecting,
    /// Handshake complete
    Connected,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Relay endpoint (`ws://`, `wss://`, `http://` or `https://`)
    pub relay_url: String,
    /// Destination naming scheme
    pub destinations: Destinations,
    /// Backoff unit
    pub reconnect_base_delay: Duration,
    /// Attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Limit for transport open plus handshake
    pub handshake_timeout: Duration,
    /// Heart-beat interval offered to the relay
    pub heartbeat_interval: Duration,
    /// Missed inbound intervals tolerated
    pub idle_tolerance: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/ws".to_string(),
            destinations: Destinations::default(),
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_tolerance: DEFAULT_IDLE_TOLERANCE,
        }
    }
}

impl ConnectionConfig {
    /// Host part of the relay URL, sent in the `CONNECT` frame.
    pub fn host(&self) -> &str {
        let rest = self.relay_url.split_once("://").map_or(self.relay_url.as_str(), |(_, r)| r);
        rest.split('/').next().unwrap_or(rest)
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase<I> {
    Idle,
    Backoff { attempt: u32, since: I, delay: Duration },
    Opening { attempt: u32, since: I },
    Handshaking { attempt: u32, since: I },
    Connected { send_every: Duration, expect_every: Duration, last_inbound: I, last_outbound: I },
}

/// Relay connection state machine.
///
/// Subscriptions are retained independently of the transport: channels
/// registered while disconnected are subscribed on the next handshake, and
/// every reconnect replays them in registration order.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct RelayConnection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    config: ConnectionConfig,
    user: Option<UserId>,
    phase: Phase<I>,
    transport: TransportId,
    subscriptions: Vec<Channel>,
    gave_up: bool,
}

impl<I> RelayConnection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a disconnected connection with no subscriptions.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            user: None,
            phase: Phase::Idle,
            transport: TransportId(0),
            subscriptions: Vec::new(),
            gave_up: false,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Coarse status.
    pub fn status(&self) -> ConnectionStatus {
        match self.phase {
            Phase::Idle | Phase::Backoff { .. } => ConnectionStatus::Disconnected,
            Phase::Opening { .. } | Phase::Handshaking { .. } => ConnectionStatus::Connecting,
            Phase::Connected { .. } => ConnectionStatus::Connected,
        }
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Connected { .. })
    }

    /// Whether an automatic reconnect is pending or in flight.
    pub fn is_reconnecting(&self) -> bool {
        self.attempt() > 0
    }

    /// Reconnect attempts exhausted since the last user-initiated connect.
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// Current reconnect attempt (zero while healthy).
    pub fn attempt(&self) -> u32 {
        match self.phase {
            Phase::Backoff { attempt, .. }
            | Phase::Opening { attempt, .. }
            | Phase::Handshaking { attempt, .. } => attempt,
            Phase::Idle | Phase::Connected { .. } => 0,
        }
    }

    /// Identity of the session. `None` before connect and after disconnect.
    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    /// Id of the current transport.
    pub fn transport(&self) -> TransportId {
        self.transport
    }

    /// Registered channels in registration order.
    pub fn subscriptions(&self) -> &[Channel] {
        &self.subscriptions
    }

    /// Connect as `user`.
    ///
    /// Idempotent while connected as the same user: no actions, the transport
    /// and subscriptions stay as they are. Connecting as a different user
    /// tears down the current transport first. A pending backoff is cut short.
    pub fn connect(&mut self, user: UserId, now: I) -> Vec<ConnectionAction> {
        let same_user = self.user == Some(user);
        match self.phase {
            Phase::Connected { .. } | Phase::Opening { .. } | Phase::Handshaking { .. }
                if same_user =>
            {
                return vec![];
            },
            _ => {},
        }

        let mut actions = Vec::new();
        if self.has_transport() {
            actions.push(ConnectionAction::CloseTransport);
        }
        let attempt = match self.phase {
            Phase::Backoff { attempt, .. } if same_user => attempt,
            _ => 0,
        };

        self.user = Some(user);
        self.gave_up = false;
        actions.push(self.open(user, attempt, now));
        actions
    }

    /// Register a channel. Duplicates are ignored.
    pub fn subscribe(&mut self, channel: Channel, now: I) -> Vec<ConnectionAction> {
        if self.subscriptions.contains(&channel) {
            return vec![];
        }
        self.subscriptions.push(channel);

        match (self.phase, self.user) {
            (Phase::Connected { .. }, Some(user)) => {
                let frame = self.subscribe_frame(channel, user);
                self.touch_outbound(now);
                vec![ConnectionAction::SendFrame(frame)]
            },
            _ => vec![],
        }
    }

    /// Drop a channel registration.
    pub fn unsubscribe(&mut self, channel: Channel, now: I) -> Vec<ConnectionAction> {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|c| *c != channel);
        if self.subscriptions.len() == before || !self.is_connected() {
            return vec![];
        }
        self.touch_outbound(now);
        vec![ConnectionAction::SendFrame(Frame::unsubscribe(&subscription_id(channel)))]
    }

    /// Publish a body.
    ///
    /// Never waits: the frame is handed to the open transport or the call
    /// fails immediately.
    ///
    /// # Errors
    ///
    /// - `PublishError::NotConnected` unless connected
    /// - `PublishError::Encode` if the body cannot be serialized
    pub fn publish(
        &mut self,
        outbound: Outbound,
        now: I,
    ) -> Result<Vec<ConnectionAction>, PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        let frame = outbound.into_frame(&self.config.destinations)?;
        self.touch_outbound(now);
        Ok(vec![ConnectionAction::SendFrame(frame)])
    }

    /// Deliberate disconnect (logout).
    ///
    /// Announces departure when connected, closes the transport and cancels
    /// any pending reconnect. The only transition that never reconnects.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if let (Phase::Connected { .. }, Some(user)) = (self.phase, self.user) {
            if let Ok(frame) = Outbound::Disconnect(user).into_frame(&self.config.destinations) {
                actions.push(ConnectionAction::SendFrame(frame));
            }
            actions.push(ConnectionAction::SendFrame(Frame::disconnect(&format!(
                "disconnect-{}",
                self.transport.0
            ))));
        }
        if self.has_transport() {
            actions.push(ConnectionAction::CloseTransport);
        }
        self.phase = Phase::Idle;
        self.user = None;
        self.gave_up = false;
        actions
    }

    /// The transport opened; start the handshake.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless a transport is being opened
    pub fn transport_opened(
        &mut self,
        transport: TransportId,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if transport != self.transport {
            return Ok(vec![]);
        }
        let (Phase::Opening { attempt, .. }, Some(user)) = (self.phase, self.user) else {
            return Err(ConnectionError::InvalidState {
                state: self.status(),
                operation: "transport_opened",
            });
        };

        self.phase = Phase::Handshaking { attempt, since: now };
        let connect = Frame::connect(
            self.config.host(),
            &user.to_string(),
            HeartBeat::symmetric(self.config.heartbeat_interval),
        );
        Ok(vec![ConnectionAction::SendFrame(connect)])
    }

    /// The transport failed or closed underneath us.
    pub fn transport_failed(
        &mut self,
        transport: TransportId,
        error: &ConnectionError,
        now: I,
    ) -> Vec<ConnectionAction> {
        if transport != self.transport || !self.has_transport() {
            return vec![];
        }
        self.fail(error.to_string(), now)
    }

    /// Inbound heart-beat.
    pub fn handle_heartbeat(&mut self, transport: TransportId, now: I) {
        if transport != self.transport {
            return;
        }
        if let Phase::Connected { last_inbound, .. } = &mut self.phase {
            *last_inbound = now;
        }
    }

    /// Process an inbound frame.
    ///
    /// An `ERROR` frame from the relay is not returned as an error: it runs
    /// the failure path (and therefore the reconnect schedule).
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if the command is invalid for the
    ///   current state
    /// - `ConnectionError::Protocol` if the `CONNECTED` heart-beat header is
    ///   malformed
    pub fn handle_frame(
        &mut self,
        transport: TransportId,
        frame: Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if transport != self.transport {
            return Ok(vec![]);
        }

        if let Phase::Connected { last_inbound, .. } = &mut self.phase {
            *last_inbound = now;
        }

        match (self.phase, frame.command) {
            (Phase::Handshaking { .. }, Command::Connected) => self.established(&frame, now),

            (Phase::Connected { .. }, Command::Message) => Ok(self.deliver(frame)),

            (Phase::Connected { .. }, Command::Receipt) => Ok(vec![]),

            (Phase::Handshaking { .. } | Phase::Connected { .. }, Command::Error) => {
                let message = frame.headers.get("message").unwrap_or("unspecified").to_string();
                tracing::warn!(%message, "relay sent ERROR frame");
                Ok(self.fail(ConnectionError::Relay(message).to_string(), now))
            },

            (_, command) => Err(ConnectionError::UnexpectedFrame {
                state: self.status(),
                command: command.as_str(),
            }),
        }
    }

    /// Process periodic maintenance: timeouts, heart-beats, backoff expiry.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            Phase::Idle => vec![],

            Phase::Backoff { attempt, since, delay } => {
                if now - since < delay {
                    return vec![];
                }
                match self.user {
                    Some(user) => vec![self.open(user, attempt, now)],
                    None => {
                        self.phase = Phase::Idle;
                        vec![]
                    },
                }
            },

            Phase::Opening { since, .. } | Phase::Handshaking { since, .. } => {
                let elapsed = now - since;
                if elapsed > self.config.handshake_timeout {
                    self.fail(ConnectionError::HandshakeTimeout { elapsed }.to_string(), now)
                } else {
                    vec![]
                }
            },

            Phase::Connected { send_every, expect_every, last_inbound, last_outbound } => {
                let silent = now - last_inbound;
                let limit = expect_every * self.config.idle_tolerance;
                if !expect_every.is_zero() && silent > limit {
                    return self.fail(ConnectionError::IdleTimeout { elapsed: silent }.to_string(), now);
                }

                if !send_every.is_zero() && now - last_outbound >= send_every {
                    self.touch_outbound(now);
                    return vec![ConnectionAction::SendHeartbeat];
                }
                vec![]
            },
        }
    }

    fn has_transport(&self) -> bool {
        matches!(
            self.phase,
            Phase::Opening { .. } | Phase::Handshaking { .. } | Phase::Connected { .. }
        )
    }

    fn open(&mut self, user: UserId, attempt: u32, now: I) -> ConnectionAction {
        self.transport = TransportId(self.transport.0 + 1);
        self.phase = Phase::Opening { attempt, since: now };
        tracing::debug!(transport = %self.transport, attempt, "opening transport");
        ConnectionAction::OpenTransport { transport: self.transport, user }
    }

    fn established(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Some(user) = self.user else {
            return Err(ConnectionError::InvalidState {
                state: self.status(),
                operation: "handshake",
            });
        };

        let server = match frame.headers.get("heart-beat") {
            Some(raw) => HeartBeat::parse(raw)?,
            None => HeartBeat::DISABLED,
        };
        let (send_every, expect_every) =
            HeartBeat::symmetric(self.config.heartbeat_interval).negotiate(&server);

        self.phase =
            Phase::Connected { send_every, expect_every, last_inbound: now, last_outbound: now };
        tracing::info!(%user, ?send_every, ?expect_every, "relay connection established");

        let mut actions = Vec::with_capacity(self.subscriptions.len() + 2);
        let announce = Outbound::Connect(user).into_frame(&self.config.destinations)?;
        actions.push(ConnectionAction::SendFrame(announce));
        for &channel in &self.subscriptions {
            actions.push(ConnectionAction::SendFrame(self.subscribe_frame(channel, user)));
        }
        actions.push(ConnectionAction::Established { user });
        Ok(actions)
    }

    fn deliver(&self, frame: Frame) -> Vec<ConnectionAction> {
        let by_subscription = frame.headers.get("subscription").and_then(|id| {
            self.subscriptions.iter().copied().find(|&c| subscription_id(c) == id)
        });
        let by_destination = || {
            let user = self.user?;
            let channel = self.config.destinations.resolve(frame.destination()?, user)?;
            self.subscriptions.contains(&channel).then_some(channel)
        };

        match by_subscription.or_else(by_destination) {
            Some(channel) => vec![ConnectionAction::Deliver { channel, frame }],
            None => {
                tracing::warn!(
                    destination = frame.destination().unwrap_or("<none>"),
                    "dropping frame for unknown subscription"
                );
                vec![]
            },
        }
    }

    fn fail(&mut self, reason: String, now: I) -> Vec<ConnectionAction> {
        let was_connected = self.is_connected();
        let attempt = self.attempt() + 1;

        let mut actions = vec![ConnectionAction::CloseTransport];
        if was_connected {
            tracing::warn!(%reason, "relay connection lost");
            actions.push(ConnectionAction::Lost { reason });
        } else {
            tracing::debug!(%reason, attempt, "connection attempt failed");
        }

        if attempt > self.config.max_reconnect_attempts {
            tracing::warn!(attempts = attempt - 1, "giving up on relay connection");
            self.phase = Phase::Idle;
            self.gave_up = true;
            actions.push(ConnectionAction::GaveUp { attempts: attempt - 1 });
            return actions;
        }

        let delay = self.config.reconnect_base_delay * attempt;
        self.phase = Phase::Backoff { attempt, since: now, delay };
        actions.push(ConnectionAction::ReconnectScheduled { attempt, delay });
        actions
    }

    fn subscribe_frame(&self, channel: Channel, user: UserId) -> Frame {
        Frame::subscribe(
            &subscription_id(channel),
            &self.config.destinations.channel(channel, user),
        )
    }

    fn touch_outbound(&mut self, now: I) {
        if let Phase::Connected { last_outbound, .. } = &mut self.phase {
            *last_outbound = now;
        }
    }
}

/// Stable subscription id for a channel.
pub fn subscription_id(channel: Channel) -> String {
    format!("sub-{}", channel.label())
}
