//! Driver traits for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the [`crate::Runtime`] from concrete I/O.
//! Production wires WebSocket/long-poll transports, the REST history client
//! and a WebRTC media backend; simulation wires an in-memory relay and fake
//! media. The orchestration code is the same in both.
//!
//! # Seams
//!
//! - [`Connector`]: opens a transport to the relay
//! - [`HistoryService`]: conversation history and user directory
//! - [`MediaBackend`]: devices and peer connections
//! - [`Environment`]: time and randomness

use std::future::Future;

use tandem_core::{Environment, MediaBackend};
use tandem_proto::{ChatMessage, ConversationSummary, Frame, ReadReceipt, UserId, UserProfile};
use tokio::sync::mpsc;

/// Something a transport received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A decoded frame
    Frame(Frame),
    /// A heart-beat
    Heartbeat,
    /// The transport closed; no further events follow
    Closed(String),
}

/// Something to write to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    /// Encode and send a frame
    Frame(Frame),
    /// Send a heart-beat
    Heartbeat,
    /// Close the transport
    Close,
}

/// Channel pair of an open transport.
///
/// Transport-agnostic: WebSocket, long-polling and the simulated relay all
/// produce the same handle.
#[derive(Debug)]
pub struct TransportHandle {
    /// Commands to the transport task
    pub commands: mpsc::UnboundedSender<WireCommand>,
    /// Events from the transport task
    pub events: mpsc::UnboundedReceiver<WireEvent>,
}

impl TransportHandle {
    /// Create a handle and the opposite ends for the transport task.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<WireCommand>, mpsc::UnboundedSender<WireEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        (Self { commands, events }, command_rx, event_tx)
    }
}

/// Opens transports to the relay.
pub trait Connector: Clone + Send + Sync + 'static {
    /// Connector-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Open a transport to `url` for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport could be established.
    fn open(
        &self,
        url: &str,
        user: UserId,
    ) -> impl Future<Output = Result<TransportHandle, Self::Error>> + Send;
}

/// Remote history and user directory.
pub trait HistoryService: Clone + Send + Sync + 'static {
    /// Service-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Conversation summaries for `user`, most recent first.
    fn conversations(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, Self::Error>> + Send;

    /// Thread between `user` and `other`, oldest first.
    fn messages(
        &self,
        user: UserId,
        other: UserId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, Self::Error>> + Send;

    /// Mark the messages covered by `receipt` as read.
    fn mark_read(&self, receipt: ReadReceipt) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Resolve a contact.
    fn user(&self, id: UserId) -> impl Future<Output = Result<UserProfile, Self::Error>> + Send;
}

/// Bundles the I/O seams the runtime needs.
///
/// # Implementations
///
/// - **Production**: system clock, WebSocket with long-poll fallback, REST
///   history, WebRTC or a headless media backend
/// - **Simulation**: virtual clock, in-memory relay, fake media
pub trait Driver: Send + 'static {
    /// Time and randomness.
    type Env: Environment;
    /// Relay transports.
    type Connector: Connector;
    /// History and directory.
    type History: HistoryService;
    /// Devices and peer connections.
    type Media: MediaBackend;

    /// Environment.
    fn env(&self) -> &Self::Env;

    /// Transport connector.
    fn connector(&self) -> &Self::Connector;

    /// History service.
    fn history(&self) -> &Self::History;

    /// Media backend.
    fn media(&self) -> &Self::Media;
}

/// A [`Driver`] assembled from its parts.
#[derive(Debug, Clone)]
pub struct DriverParts<E, C, H, M> {
    /// Environment
    pub env: E,
    /// Transport connector
    pub connector: C,
    /// History service
    pub history: H,
    /// Media backend
    pub media: M,
}

impl<E, C, H, M> Driver for DriverParts<E, C, H, M>
where
    E: Environment,
    C: Connector,
    H: HistoryService,
    M: MediaBackend,
{
    type Env = E;
    type Connector = C;
    type History = H;
    type Media = M;

    fn env(&self) -> &E {
        &self.env
    }

    fn connector(&self) -> &C {
        &self.connector
    }

    fn history(&self) -> &H {
        &self.history
    }

    fn media(&self) -> &M {
        &self.media
    }
}
