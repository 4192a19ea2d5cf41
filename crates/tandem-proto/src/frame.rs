//! STOMP frame type and codec.
//!
//! A `Frame` is one STOMP 1.2 packet:
//!
//! ```text
//! COMMAND\n
//! name:value\n      (zero or more, escaped)
//! \n
//! body\0
//! ```
//!
//! Between frames either side may send a bare end-of-line as a heart-beat;
//! [`Packet`] distinguishes the two on decode.
//!
//! This is a pure data holder. Typed bodies live in [`crate::payloads`].

use bytes::{BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    header::{self, Headers, HeartBeat},
};

/// STOMP protocol version this crate speaks.
pub const STOMP_VERSION: &str = "1.2";

/// STOMP command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (STOMP 1.2 alias of `CONNECT`).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription request.
    Subscribe,
    /// Client subscription cancel.
    Unsubscribe,
    /// Client graceful close.
    Disconnect,
    /// Server delivery on a subscription.
    Message,
    /// Server acknowledgement of a `receipt` header.
    Receipt,
    /// Server-side failure. The server closes the connection after sending it.
    Error,
}

impl Command {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a command line.
    pub fn parse(line: &str) -> Result<Self> {
        Ok(match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        })
    }

    /// Handshake frames carry raw header values.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

/// Complete STOMP frame.
///
/// # Invariants
///
/// - Body Limit: `body.len()` MUST NOT exceed [`Frame::MAX_BODY_SIZE`].
///   Enforced by [`Frame::encode`] and [`Frame::decode`].
/// - Content Length: when a body is present, the encoded frame always carries
///   a `content-length` header matching it, so bodies may contain NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command line
    pub command: Command,
    /// Header block in wire order
    pub headers: Headers,
    /// Raw body bytes (JSON or plain text)
    pub body: Bytes,
}

/// One decoded unit from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Bare EOL between frames.
    Heartbeat,
    /// A full frame.
    Frame(Frame),
}

impl Frame {
    /// Largest body accepted in either direction (1 MiB).
    pub const MAX_BODY_SIZE: usize = 1024 * 1024;

    /// Frame with no headers and no body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Headers::new(), body: Bytes::new() }
    }

    /// Add a header (builder style).
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Set the body (builder style).
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// `CONNECT` frame identifying the session as `login`.
    pub fn connect(host: &str, login: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("login", login)
            .header("heart-beat", heart_beat.to_header())
    }

    /// `SUBSCRIBE` frame.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `UNSUBSCRIBE` frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// `SEND` frame.
    pub fn send(destination: &str, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", content_type)
            .body(body)
    }

    /// `DISCONNECT` frame asking for a receipt.
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    /// `CONNECTED` reply (relay side, used by simulations).
    pub fn connected(heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connected)
            .header("version", STOMP_VERSION)
            .header("heart-beat", heart_beat.to_header())
    }

    /// `MESSAGE` delivery (relay side, used by simulations).
    pub fn message(
        destination: &str,
        subscription: &str,
        message_id: &str,
        body: impl Into<Bytes>,
    ) -> Self {
        Self::new(Command::Message)
            .header("destination", destination)
            .header("subscription", subscription)
            .header("message-id", message_id)
            .body(body)
    }

    /// `ERROR` frame (relay side, used by simulations).
    pub fn error(message: &str) -> Self {
        Self::new(Command::Error).header("message", message)
    }

    /// `RECEIPT` frame (relay side, used by simulations).
    pub fn receipt(receipt_id: &str) -> Self {
        Self::new(Command::Receipt).header("receipt-id", receipt_id)
    }

    /// `destination` header, if present.
    pub fn destination(&self) -> Option<&str> {
        self.headers.get("destination")
    }

    /// Body as UTF-8 text.
    pub fn body_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|_| ProtocolError::InvalidUtf8("frame body"))
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds
    ///   [`Frame::MAX_BODY_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.body.len() > Self::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.body.len(),
                max: Self::MAX_BODY_SIZE,
            });
        }

        let escaped = self.command.escapes_headers();
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in self.headers.iter() {
            if name == "content-length" {
                continue;
            }
            if escaped {
                dst.put_slice(header::escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(header::escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !self.body.is_empty() {
            dst.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
        Ok(())
    }

    /// Encode into a fresh vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64 + self.body.len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Encode as text for transports that carry text messages.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidUtf8` if the body is binary
    pub fn to_text(&self) -> Result<String> {
        String::from_utf8(self.to_bytes()?).map_err(|_| ProtocolError::InvalidUtf8("frame body"))
    }

    /// Decode exactly one frame from `bytes`.
    ///
    /// Leading heart-beat EOLs are skipped. Trailing bytes after the frame's
    /// NUL terminator are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;
        loop {
            match Packet::decode(rest)? {
                Some((Packet::Heartbeat, used)) => rest = &rest[used..],
                Some((Packet::Frame(frame), _)) => return Ok(frame),
                None => return Err(ProtocolError::Truncated("missing frame terminator")),
            }
        }
    }
}

impl Packet {
    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds an incomplete frame, otherwise the
    /// packet and the number of bytes it consumed.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        match buf {
            [] => return Ok(None),
            [b'\n', ..] => return Ok(Some((Self::Heartbeat, 1))),
            [b'\r', b'\n', ..] => return Ok(Some((Self::Heartbeat, 2))),
            [b'\r'] => return Ok(None),
            _ => {},
        }

        let Some((head_len, sep_len)) = find_head_end(buf) else {
            if buf.len() > Frame::MAX_BODY_SIZE {
                return Err(ProtocolError::PayloadTooLarge {
                    size: buf.len(),
                    max: Frame::MAX_BODY_SIZE,
                });
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&buf[..head_len])
            .map_err(|_| ProtocolError::InvalidUtf8("frame header"))?;
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));
        let command = Command::parse(lines.next().unwrap_or_default())?;

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push(header::unescape(name)?, header::unescape(value)?);
            } else {
                headers.push(name, value);
            }
        }

        let body_start = head_len + sep_len;
        let body_len = match headers.get("content-length") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?;
                if len > Frame::MAX_BODY_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: len,
                        max: Frame::MAX_BODY_SIZE,
                    });
                }
                let Some(&terminator) = buf.get(body_start + len) else {
                    return Ok(None);
                };
                if terminator != 0 {
                    return Err(ProtocolError::InvalidContentLength(raw.to_string()));
                }
                len
            },
            None => match buf[body_start..].iter().position(|&b| b == 0) {
                Some(len) => len,
                None => return Ok(None),
            },
        };

        if body_len > Frame::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: body_len, max: Frame::MAX_BODY_SIZE });
        }

        let body = Bytes::copy_from_slice(&buf[body_start..body_start + body_len]);
        let consumed = body_start + body_len + 1;
        Ok(Some((Self::Frame(Frame { command, headers, body }), consumed)))
    }

    /// Decode every packet in `buf`.
    ///
    /// Used for transports that deliver whole frames per message (WebSocket
    /// text messages, long-poll responses).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if `buf` ends inside a frame
    pub fn decode_all(buf: &[u8]) -> Result<Vec<Self>> {
        let mut packets = Vec::new();
        let mut rest = buf;
        while !rest.is_empty() {
            match Self::decode(rest)? {
                Some((packet, used)) => {
                    packets.push(packet);
                    rest = &rest[used..];
                },
                None => return Err(ProtocolError::Truncated("missing frame terminator")),
            }
        }
        Ok(packets)
    }
}

/// Locate the blank line ending the header block.
///
/// Returns the header length (command line included, trailing EOL excluded)
/// and the separator length.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == 0 {
            return None;
        }
        if buf[i] == b'\n' {
            match buf.get(i + 1..) {
                Some([b'\n', ..]) => return Some((i, 2)),
                Some([b'\r', b'\n', ..]) => return Some((i, 3)),
                _ => {},
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn send_frame_text_layout() {
        let frame = Frame::send("/app/chat.send", "application/json", r#"{"a":1}"#);
        let text = frame.to_text().unwrap();
        insta::assert_snapshot!(
            text.replace('\0', "^@").replace('\n', "|"),
            @r#"SEND|destination:/app/chat.send|content-type:application/json|content-length:7||{"a":1}^@"#
        );
    }

    #[test]
    fn connect_frame_keeps_raw_header_values() {
        let frame = Frame::connect("relay:443", "42", HeartBeat::symmetric(Duration::from_secs(10)));
        let text = frame.to_text().unwrap();
        assert!(text.contains("host:relay:443\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));

        let decoded = Frame::decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.headers.get("host"), Some("relay:443"));
    }

    #[test]
    fn message_header_values_are_escaped() {
        let frame = Frame::message("/topic/presence", "sub:1", "m-1", "7");
        let text = frame.to_text().unwrap();
        assert!(text.contains("subscription:sub\\c1\n"));
        let decoded = Frame::decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.headers.get("subscription"), Some("sub:1"));
    }

    #[test]
    fn decode_without_content_length_stops_at_nul() {
        let raw = b"MESSAGE\ndestination:/topic/presence\n\n-42\0\n";
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.body_str().unwrap(), "-42");
    }

    #[test]
    fn decode_accepts_crlf_line_endings() {
        let raw = b"CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.headers.get("heart-beat"), Some("0,0"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn content_length_allows_embedded_nul() {
        let frame = Frame::send("/x", "application/octet-stream", &b"a\0b"[..]);
        let bytes = frame.to_bytes().unwrap();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(&decoded.body[..], b"a\0b");
    }

    #[test]
    fn content_length_mismatch_is_rejected() {
        let raw = b"SEND\ndestination:/x\ncontent-length:2\n\nabc\0";
        assert!(matches!(Frame::decode(raw), Err(ProtocolError::InvalidContentLength(_))));
    }

    #[test]
    fn incomplete_frame_is_not_an_error_for_streaming() {
        assert_eq!(Packet::decode(b"SEND\ndestination:/x\n").unwrap(), None);
        assert_eq!(Packet::decode(b"SEND\n\nbody").unwrap(), None);
        assert!(matches!(
            Packet::decode_all(b"SEND\n\nbody"),
            Err(ProtocolError::Truncated(_))
        ));
    }

    #[test]
    fn heartbeats_between_frames() {
        let mut buf = b"\n\r\n".to_vec();
        buf.extend(Frame::receipt("r-1").to_bytes().unwrap());
        buf.push(b'\n');
        let packets = Packet::decode_all(&buf).unwrap();
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0], Packet::Heartbeat);
        assert_eq!(packets[1], Packet::Heartbeat);
        assert!(matches!(&packets[2], Packet::Frame(f) if f.command == Command::Receipt));
        assert_eq!(packets[3], Packet::Heartbeat);
    }

    #[test]
    fn unknown_command_and_bad_header() {
        assert!(matches!(Frame::decode(b"PING\n\n\0"), Err(ProtocolError::UnknownCommand(_))));
        assert!(matches!(
            Frame::decode(b"SEND\nnocolon\n\n\0"),
            Err(ProtocolError::MalformedHeader(_))
        ));
    }

    #[test]
    fn oversized_body_rejected_on_encode() {
        let frame = Frame::send("/x", "text/plain", vec![b'a'; Frame::MAX_BODY_SIZE + 1]);
        assert!(matches!(frame.to_bytes(), Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
