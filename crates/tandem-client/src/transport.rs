//! Relay transports.
//!
//! Two ways to carry STOMP frames to the relay, both exposing the same
//! [`TransportHandle`] so the runtime never knows which one it got:
//!
//! - WebSocket: one text message per frame, heart-beats as a bare EOL
//! - HTTP long-polling: `POST {base}/send` per frame and a `GET {base}/poll`
//!   loop returning zero or more frames
//!
//! [`connect_with_fallback`] tries the WebSocket first and switches to
//! long-polling against the matching `http(s)://` base when the upgrade fails.
//! Frame decoding is strict: a message that does not decode is logged and
//! dropped, the transport stays up.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tandem_app::{Connector, TransportHandle, WireCommand, WireEvent};
use tandem_proto::{Packet, ProtocolError, UserId};
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use uuid::Uuid;

use crate::ClientConfig;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// URL scheme is not `ws`, `wss`, `http` or `https`.
    #[error("unsupported relay url: {0}")]
    InvalidUrl(String),

    /// WebSocket upgrade or I/O failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// Long-poll request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Frame could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<tungstenite::Error> for TransportError {
    fn from(error: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

/// Opens relay transports, falling back to long-polling.
#[derive(Debug, Clone)]
pub struct RelayConnector {
    http: reqwest::Client,
    request_timeout: Duration,
    poll_timeout: Duration,
}

impl RelayConnector {
    /// Connector sharing `http` for long-polling.
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self { http, request_timeout: config.request_timeout, poll_timeout: config.poll_timeout }
    }
}

impl Connector for RelayConnector {
    type Error = TransportError;

    fn open(
        &self,
        url: &str,
        user: UserId,
    ) -> impl Future<Output = Result<TransportHandle, TransportError>> + Send {
        let this = self.clone();
        let url = url.to_string();
        async move { connect_with_fallback(&this, &url, user).await }
    }
}

/// Open a transport to `url`, preferring WebSocket.
///
/// # Errors
///
/// - `TransportError::InvalidUrl` for unknown schemes
/// - `TransportError::WebSocket` only when no fallback base can be derived
pub async fn connect_with_fallback(
    connector: &RelayConnector,
    url: &str,
    user: UserId,
) -> Result<TransportHandle, TransportError> {
    match scheme(url) {
        Some("ws" | "wss") => match websocket(url).await {
            Ok(handle) => Ok(handle),
            Err(error) => {
                tracing::warn!(%url, %error, "websocket failed, falling back to long-polling");
                let base = http_base(url).ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
                long_poll(connector, &base, user)
            },
        },
        Some("http" | "https") => long_poll(connector, url, user),
        _ => Err(TransportError::InvalidUrl(url.to_string())),
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket transport.
///
/// # Errors
///
/// Returns an error if the upgrade fails.
pub async fn websocket(url: &str) -> Result<TransportHandle, TransportError> {
    let (stream, _response) = connect_async(url).await?;
    tracing::debug!(%url, "websocket open");

    let (handle, commands, events) = TransportHandle::pair();
    tokio::spawn(run_websocket(stream, commands, events));
    Ok(handle)
}

async fn run_websocket(
    stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<WireCommand>,
    events: mpsc::UnboundedSender<WireEvent>,
) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => {
                let message = match command {
                    Some(WireCommand::Frame(frame)) => match frame.to_text() {
                        Ok(text) => Message::text(text),
                        Err(error) => {
                            tracing::warn!(%error, command = frame.command.as_str(), "dropping unencodable frame");
                            continue;
                        },
                    },
                    Some(WireCommand::Heartbeat) => Message::text("\n"),
                    Some(WireCommand::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    },
                };
                if let Err(error) = sink.send(message).await {
                    let _ = events.send(WireEvent::Closed(error.to_string()));
                    return;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !deliver(text.as_bytes(), &events) {
                        return;
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    if !deliver(&data, &events) {
                        return;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(|| "closed by relay".to_string(), |f| f.reason.to_string());
                    let _ = events.send(WireEvent::Closed(reason));
                    return;
                },
                // Ping and pong are answered by tungstenite.
                Some(Ok(_)) => {},
                Some(Err(error)) => {
                    let _ = events.send(WireEvent::Closed(error.to_string()));
                    return;
                },
                None => {
                    let _ = events.send(WireEvent::Closed("stream ended".to_string()));
                    return;
                },
            },
        }
    }
}

/// Open a long-polling transport against `base`.
///
/// Nothing is sent until the first command; an unreachable relay surfaces as
/// a `Closed` event from the first failed request.
///
/// # Errors
///
/// Infallible today; kept fallible for parity with [`websocket`].
pub fn long_poll(
    connector: &RelayConnector,
    base: &str,
    user: UserId,
) -> Result<TransportHandle, TransportError> {
    let session = LongPollSession {
        http: connector.http.clone(),
        base: base.trim_end_matches('/').to_string(),
        session: Uuid::new_v4().to_string(),
        user: user.to_string(),
        request_timeout: connector.request_timeout,
        poll_timeout: connector.poll_timeout,
    };
    tracing::debug!(base = %session.base, session = %session.session, "long-poll session");

    let (handle, commands, events) = TransportHandle::pair();
    tokio::spawn(session.run(commands, events));
    Ok(handle)
}

#[derive(Clone)]
struct LongPollSession {
    http: reqwest::Client,
    base: String,
    session: String,
    user: String,
    request_timeout: Duration,
    poll_timeout: Duration,
}

impl LongPollSession {
    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<WireCommand>,
        events: mpsc::UnboundedSender<WireEvent>,
    ) {
        let poller = tokio::spawn(self.clone().poll(events.clone()));

        while let Some(command) = commands.recv().await {
            let body = match command {
                WireCommand::Frame(frame) => match frame.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        tracing::warn!(%error, "dropping unencodable frame");
                        continue;
                    },
                },
                WireCommand::Heartbeat => b"\n".to_vec(),
                WireCommand::Close => break,
            };
            if let Err(error) = self.send(body).await {
                let _ = events.send(WireEvent::Closed(error.to_string()));
                break;
            }
        }

        poller.abort();
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), TransportError> {
        self.http
            .post(format!("{}/send", self.base))
            .query(&[("session", self.session.as_str()), ("user", self.user.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .timeout(self.request_timeout)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn poll(self, events: mpsc::UnboundedSender<WireEvent>) {
        loop {
            let response = self
                .http
                .get(format!("{}/poll", self.base))
                .query(&[("session", self.session.as_str()), ("user", self.user.as_str())])
                .timeout(self.poll_timeout)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);

            let body = match response {
                Ok(response) => response.bytes().await,
                Err(error) if error.is_timeout() => continue,
                Err(error) => Err(error),
            };
            match body {
                Ok(bytes) => {
                    if !deliver(&bytes, &events) {
                        return;
                    }
                },
                Err(error) => {
                    let _ = events.send(WireEvent::Closed(error.to_string()));
                    return;
                },
            }
        }
    }
}

/// Decode a transport message into events. Returns `false` once the
/// receiving side is gone.
fn deliver(bytes: &[u8], events: &mpsc::UnboundedSender<WireEvent>) -> bool {
    let packets = match Packet::decode_all(bytes) {
        Ok(packets) => packets,
        Err(error) => {
            tracing::warn!(%error, len = bytes.len(), "dropping undecodable relay message");
            return true;
        },
    };
    for packet in packets {
        let event = match packet {
            Packet::Heartbeat => WireEvent::Heartbeat,
            Packet::Frame(frame) => WireEvent::Frame(frame),
        };
        if events.send(event).is_err() {
            return false;
        }
    }
    true
}

fn scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

/// `http(s)://` base matching a `ws(s)://` URL.
fn http_base(url: &str) -> Option<String> {
    if let Some(rest) = url.strip_prefix("wss://") {
        Some(format!("https://{rest}"))
    } else {
        url.strip_prefix("ws://").map(|rest| format!("http://{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::{Frame, HeartBeat};

    use super::*;

    #[test]
    fn http_base_maps_schemes() {
        assert_eq!(http_base("ws://relay:8080/ws").as_deref(), Some("http://relay:8080/ws"));
        assert_eq!(http_base("wss://relay/ws").as_deref(), Some("https://relay/ws"));
        assert_eq!(http_base("http://relay/ws"), None);
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(scheme("wss://relay/ws"), Some("wss"));
        assert_eq!(scheme("relay/ws"), None);
    }

    #[test]
    fn deliver_splits_heartbeats_and_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bytes = b"\n".to_vec();
        bytes.extend(Frame::connected(HeartBeat::DISABLED).to_bytes().unwrap());
        bytes.extend(b"\n");

        assert!(deliver(&bytes, &tx));

        assert_eq!(rx.try_recv().unwrap(), WireEvent::Heartbeat);
        assert!(matches!(rx.try_recv().unwrap(), WireEvent::Frame(f) if f.command == tandem_proto::Command::Connected));
        assert_eq!(rx.try_recv().unwrap(), WireEvent::Heartbeat);
    }

    #[test]
    fn deliver_drops_garbage_without_closing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(deliver(b"NOT A FRAME\n\n\0", &tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn deliver_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!deliver(b"\n", &tx));
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let connector = RelayConnector::new(reqwest::Client::new(), &ClientConfig::default());
        let result = connect_with_fallback(&connector, "ftp://relay", UserId::new(1).unwrap()).await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn unreachable_websocket_falls_back_to_long_poll() {
        let connector = RelayConnector::new(reqwest::Client::new(), &ClientConfig::default());
        // Port 9 (discard) refuses connections on test hosts.
        let result = connect_with_fallback(&connector, "ws://127.0.0.1:9/ws", UserId::new(1).unwrap()).await;
        assert!(result.is_ok());
    }
}
