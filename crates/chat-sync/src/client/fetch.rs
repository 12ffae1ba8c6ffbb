//! REST side of the chat HTTP client.

use crate::client::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::protocol::{media_types, paths};
use crate::traits::ChatApi;
use crate::types::{ConversationId, ConversationRecord, Message, NewConversation, SubmitRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// HTTP client for the chat server.
///
/// Implements both [`ChatApi`] and
/// [`StreamTransport`](crate::traits::StreamTransport); cloning is cheap.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: Arc<Url>,
    pub(crate) config: Arc<ClientConfig>,
}

/// `POST /conversations/{id}/messages` answers with a list, but a single
/// object is accepted as well.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Message>),
    One(Box<Message>),
}

impl From<OneOrMany> for Vec<Message> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::Many(messages) => messages,
            OneOrMany::One(message) => vec![*message],
        }
    }
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(ClientConfig::new(base_url))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connection_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(config.max_idle_connections)
            .user_agent(config.user_agent.clone());

        if !config.proxy_url.is_empty() {
            let proxy = reqwest::Proxy::all(&config.proxy_url)
                .map_err(|e| SyncError::Config(format!("invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        Self::with_client(client, config)
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client, config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "base URL cannot carry paths: {}",
                config.base_url
            )));
        }

        Ok(ChatClient {
            client,
            base_url: Arc::new(base_url),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Base URL joined with percent-encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = (*self.base_url).clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config("base URL cannot carry paths".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn messages_url(&self, conversation: &ConversationId) -> Result<Url> {
        self.endpoint(&[paths::CONVERSATIONS, conversation.as_str(), paths::MESSAGES])
    }

    pub fn stream_url(&self, conversation: &ConversationId) -> Result<Url> {
        self.endpoint(&[
            paths::CONVERSATIONS,
            conversation.as_str(),
            paths::MESSAGES_STREAM,
        ])
    }

    pub(crate) fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.auth_token.as_deref() {
            Some(token) if !token.is_empty() => builder.bearer_auth(token),
            _ => builder,
        }
    }

    fn rest(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, media_types::JSON)
            .timeout(Duration::from_millis(self.config.request_timeout_ms));
        self.authorize(builder)
    }

    async fn send_json<T>(&self, builder: reqwest::RequestBuilder) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = builder.send().await?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Turn a non-2xx response into [`SyncError::Status`] carrying the body.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), "Request rejected: {}", body);
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn list_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        let url = self.messages_url(conversation)?;
        tracing::debug!(%conversation, "GET {}", url);
        self.send_json(self.rest(reqwest::Method::GET, url)).await
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        request: &SubmitRequest,
    ) -> Result<Vec<Message>> {
        let url = self.messages_url(conversation)?;
        tracing::debug!(%conversation, "POST {}", url);
        let created: OneOrMany = self
            .send_json(self.rest(reqwest::Method::POST, url).json(request))
            .await?;
        Ok(created.into())
    }

    async fn create_conversation(&self, request: &NewConversation) -> Result<ConversationId> {
        let url = self.endpoint(&[paths::CONVERSATIONS])?;
        tracing::debug!("POST {}", url);
        let record: ConversationRecord = self
            .send_json(self.rest(reqwest::Method::POST, url).json(request))
            .await?;
        tracing::info!(conversation = %record.uuid, "Created conversation {:?}", record.name);
        Ok(record.uuid)
    }
}
