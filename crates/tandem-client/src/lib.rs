//! Tandem production I/O.
//!
//! Concrete implementations of the [`tandem_app`] driver seams, so the
//! [`Runtime`] can run against a real relay, history service and media stack.
//!
//! # Components
//!
//! - [`RelayConnector`]: WebSocket transport with HTTP long-poll fallback
//! - [`HttpHistory`]: REST history service and user directory
//! - [`SystemEnv`]: Production environment (real time, OS randomness)
//! - [`HeadlessMedia`]: Signaling-only media backend for terminals
//!
//! # WebRTC (optional)
//!
//! With the `webrtc` feature enabled, [`WebRtcMedia`] runs real peer
//! connections.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod history;
mod media;
#[cfg(feature = "webrtc")]
mod rtc;
mod system_env;
mod transport;

pub use config::{ClientConfig, DEFAULT_POLL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use history::{HistoryError, HttpHistory};
pub use media::HeadlessMedia;
#[cfg(feature = "webrtc")]
pub use rtc::WebRtcMedia;
pub use system_env::SystemEnv;
use tandem_app::{AppHandle, DriverParts, Runtime};
use tandem_core::MediaBackend;
pub use transport::{RelayConnector, TransportError, connect_with_fallback, long_poll, websocket};

/// Driver wiring production I/O around a media backend.
pub type ClientDriver<M> = DriverParts<SystemEnv, RelayConnector, HttpHistory, M>;

/// Build the production driver for `config`.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created.
pub fn driver<M: MediaBackend>(config: &ClientConfig, media: M) -> reqwest::Result<ClientDriver<M>> {
    let http = config.http_client()?;
    Ok(DriverParts {
        env: SystemEnv::new(),
        connector: RelayConnector::new(http.clone(), config),
        history: HttpHistory::new(http, config),
        media,
    })
}

/// Build a runtime and its handle for `config`.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created.
pub fn runtime<M: MediaBackend>(
    config: &ClientConfig,
    media: M,
) -> reqwest::Result<(Runtime<ClientDriver<M>>, AppHandle)> {
    let driver = driver(config, media)?;
    Ok(Runtime::new(driver, config.app_config()))
}
