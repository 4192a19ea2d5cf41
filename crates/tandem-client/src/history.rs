//! REST history service and user directory.
//!
//! | Call | Request |
//! |---|---|
//! | conversations | `GET {api}/conversations/{userId}` |
//! | messages | `GET {api}/messages/{userId}/{otherId}` |
//! | mark read | `PUT {api}/messages/read` with `{receiverId, senderId}` |
//! | contact | `GET {api}/users/{id}` |
//!
//! A bearer token is attached to every request when configured.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tandem_app::HistoryService;
use tandem_proto::{ChatMessage, ConversationSummary, ReadReceipt, UserId, UserProfile};
use thiserror::Error;

use crate::ClientConfig;

/// History service errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with a non-success status.
    #[error("{url} returned {status}")]
    Status {
        /// Requested URL
        url: String,
        /// Response status
        status: StatusCode,
    },

    /// Response body did not match the expected shape.
    #[error("invalid response from {url}: {source}")]
    Decode {
        /// Requested URL
        url: String,
        /// Decoder error
        source: serde_json::Error,
    },
}

/// REST client for history and the user directory.
#[derive(Debug, Clone)]
pub struct HttpHistory {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpHistory {
    /// Client for the service at `config.api_url`.
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            base: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: config.request_timeout,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder =
            self.http.request(method, format!("{}{path}", self.base)).timeout(self.timeout);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, HistoryError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(HistoryError::Status { url: response.url().to_string(), status });
    }
    Ok(response)
}

async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, HistoryError> {
    let response = send(request).await?;
    let url = response.url().to_string();
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| HistoryError::Decode { url, source })
}

impl HistoryService for HttpHistory {
    type Error = HistoryError;

    fn conversations(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, HistoryError>> + Send {
        fetch(self.request(Method::GET, &format!("/conversations/{user}")))
    }

    fn messages(
        &self,
        user: UserId,
        other: UserId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, HistoryError>> + Send {
        fetch(self.request(Method::GET, &format!("/messages/{user}/{other}")))
    }

    fn mark_read(&self, receipt: ReadReceipt) -> impl Future<Output = Result<(), HistoryError>> + Send {
        let request = self.request(Method::PUT, "/messages/read").json(&receipt);
        async move {
            send(request).await?;
            Ok(())
        }
    }

    fn user(&self, id: UserId) -> impl Future<Output = Result<UserProfile, HistoryError>> + Send {
        fetch(self.request(Method::GET, &format!("/users/{id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(token: Option<&str>) -> HttpHistory {
        let config = ClientConfig {
            api_url: "http://api.example/v1/".into(),
            token: token.map(str::to_string),
            ..ClientConfig::default()
        };
        HttpHistory::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn builds_urls_without_double_slash() {
        let request = history(None).request(Method::GET, "/conversations/7").build().unwrap();
        assert_eq!(request.url().as_str(), "http://api.example/v1/conversations/7");
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn attaches_bearer_token() {
        let request = history(Some("secret")).request(Method::GET, "/users/2").build().unwrap();
        let auth = request.headers().get(reqwest::header::AUTHORIZATION).unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer secret");
    }

    #[test]
    fn mark_read_body_is_camel_case() {
        let receipt =
            ReadReceipt { receiver_id: UserId::new(1).unwrap(), sender_id: UserId::new(2).unwrap() };
        let request = history(None).request(Method::PUT, "/messages/read").json(&receipt).build().unwrap();
        let body = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        assert_eq!(body, br#"{"receiverId":1,"senderId":2}"#);
    }
}
