//! Configuration for the chat HTTP client.

use crate::protocol::defaults;
use serde::{Deserialize, Serialize};

/// Configuration for [`ChatClient`](super::ChatClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:8000/api/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Timeout for REST requests in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for the stream request to return its response head.
    /// The body itself is unbounded.
    #[serde(default = "default_request_timeout_ms")]
    pub stream_timeout_ms: u64,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Proxy URL (empty for none).
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum idle connections kept per host.
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
    /// Capacity of the channel between the stream reader and its consumer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    defaults::REQUEST_TIMEOUT_MS
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("chat-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_idle_connections() -> usize {
    100
}

fn default_event_buffer() -> usize {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            stream_timeout_ms: default_request_timeout_ms(),
            connection_timeout_secs: default_connection_timeout_secs(),
            proxy_url: String::new(),
            user_agent: default_user_agent(),
            max_idle_connections: default_max_idle_connections(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = proxy_url.into();
        self
    }
}
