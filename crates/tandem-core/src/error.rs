//! Error types for the Tandem core.
//!
//! Strongly-typed errors per component: connection errors (handshake,
//! timeouts, relay failures), publish errors (fail-fast when offline) and call
//! errors (state machine violations, media failures).

use std::{io, time::Duration};

use thiserror::Error;

use crate::{call::CallStatus, connection::ConnectionStatus};

/// Errors raised by the relay connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} while {state:?}")]
    InvalidState {
        /// Status when the error occurred
        state: ConnectionStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Received a frame the current state does not accept
    #[error("unexpected {command} frame while {state:?}")]
    UnexpectedFrame {
        /// Status when the frame arrived
        state: ConnectionStatus,
        /// STOMP command of the frame
        command: &'static str,
    },

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// No inbound traffic within the negotiated window
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// How long the connection was silent
        elapsed: Duration,
    },

    /// Relay sent an `ERROR` frame
    #[error("relay error: {0}")]
    Relay(String),

    /// Protocol error from frame parsing/validation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Timeouts, relay errors and transport failures trigger the reconnect
    /// path. State violations and malformed frames are local bugs or a broken
    /// peer; retrying does not help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::IdleTimeout { .. }
                | Self::Relay(_)
                | Self::Transport(_)
        )
    }
}

impl From<tandem_proto::ProtocolError> for ConnectionError {
    fn from(err: tandem_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Publishing failed. Never retried by the connection itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// No established relay connection
    #[error("not connected")]
    NotConnected,

    /// Body could not be encoded
    #[error("encode failed: {0}")]
    Encode(#[from] tandem_proto::ProtocolError),
}

/// Errors raised by the call engine and call manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Operation not valid in the current call status
    #[error("cannot {operation} while {status:?}")]
    InvalidState {
        /// Status when the operation was attempted
        status: CallStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Another call is already active
    #[error("another call is active")]
    Busy,

    /// No call session exists
    #[error("no active call")]
    NoSession,

    /// Media device or peer connection failure
    #[error("media error: {0}")]
    Media(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_transport_are_transient() {
        assert!(
            ConnectionError::HandshakeTimeout { elapsed: Duration::from_secs(11) }.is_transient()
        );
        assert!(ConnectionError::IdleTimeout { elapsed: Duration::from_secs(31) }.is_transient());
        assert!(ConnectionError::Relay("overloaded".to_string()).is_transient());
        assert!(ConnectionError::Transport("reset".to_string()).is_transient());
    }

    #[test]
    fn local_violations_are_fatal() {
        assert!(
            !ConnectionError::InvalidState {
                state: ConnectionStatus::Disconnected,
                operation: "transport_opened",
            }
            .is_transient()
        );
        assert!(
            !ConnectionError::UnexpectedFrame {
                state: ConnectionStatus::Connected,
                command: "CONNECTED",
            }
            .is_transient()
        );
        assert!(!ConnectionError::Protocol("bad frame".to_string()).is_transient());
    }

    #[test]
    fn protocol_errors_convert() {
        let err: ConnectionError = tandem_proto::ProtocolError::Truncated("eof").into();
        assert!(matches!(err, ConnectionError::Protocol(_)));
        let err: PublishError = tandem_proto::ProtocolError::Json("x".to_string()).into();
        assert!(matches!(err, PublishError::Encode(_)));
    }
}
