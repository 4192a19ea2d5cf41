//! Protocol error types.

use thiserror::Error;

/// Result alias for wire-level operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire data.
///
/// None of these are transient: a frame that fails to decode will fail again.
/// Callers drop the offending frame and keep the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before the frame's NUL terminator.
    #[error("frame truncated: {0}")]
    Truncated(&'static str),

    /// Command line is not a known STOMP command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// Header line without a `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Header contains an escape sequence STOMP does not define.
    #[error("invalid header escape in {0:?}")]
    InvalidEscape(String),

    /// Frame body exceeds the protocol limit.
    #[error("frame body too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual body size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// `content-length` header is not a number or disagrees with the body.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    /// A header required by the frame's command is absent.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// Text was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Body could not be (de)serialized as JSON.
    #[error("json error: {0}")]
    Json(String),

    /// User id was zero, negative or not a number.
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    /// Presence body matched neither the signed nor the object encoding.
    #[error("invalid presence body: {0:?}")]
    InvalidPresence(String),

    /// Signal is missing the field its type requires.
    #[error("invalid {kind} signal: {reason}")]
    InvalidSignal {
        /// Signal type as it appears on the wire
        kind: &'static str,
        /// What is missing or inconsistent
        reason: &'static str,
    },

    /// `heart-beat` header is not `<ms>,<ms>`.
    #[error("invalid heart-beat header: {0:?}")]
    InvalidHeartBeat(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
