//! Client configuration.

use std::time::Duration;

use tandem_app::AppConfig;

/// Default request timeout for REST calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a long-poll request may stay open.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints and credentials for the production client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay endpoint (`ws(s)://` for WebSocket with long-poll fallback,
    /// `http(s)://` for long-polling only)
    pub relay_url: String,
    /// Base URL of the history service and user directory
    pub api_url: String,
    /// Bearer token issued by the external auth service
    pub token: Option<String>,
    /// Timeout for REST calls and long-poll sends
    pub request_timeout: Duration,
    /// Upper bound on a single long-poll request
    pub poll_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/ws".to_string(),
            api_url: "http://localhost:8080/api".to_string(),
            token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// App configuration pointing the relay connection at `relay_url`.
    pub fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.connection.relay_url.clone_from(&self.relay_url);
        config
    }

    /// Shared HTTP client honouring `poll_timeout`.
    ///
    /// Individual REST calls apply the shorter `request_timeout` themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder().timeout(self.poll_timeout + self.request_timeout).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_uses_relay_url() {
        let config = ClientConfig { relay_url: "wss://relay.example/ws".into(), ..ClientConfig::default() };
        assert_eq!(config.app_config().connection.relay_url, "wss://relay.example/ws");
        assert_eq!(config.app_config().connection.host(), "relay.example");
    }
}
