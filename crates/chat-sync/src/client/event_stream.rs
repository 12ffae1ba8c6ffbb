//! Event-stream side of [`ChatClient`].

use crate::client::fetch::{ensure_success, ChatClient};
use crate::error::{Result, SyncError};
use crate::protocol::{media_types, SseParser};
use crate::traits::{EventReceiver, StreamTransport};
use crate::types::{ConversationId, StreamPayload};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// How often an idle reader checks whether its consumer went away.
const CLOSED_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
impl StreamTransport for ChatClient {
    async fn connect(&self, conversation: &ConversationId) -> Result<EventReceiver> {
        let url = self.stream_url(conversation)?;
        let request = self
            .authorize(self.http().get(url.clone()))
            .header(reqwest::header::ACCEPT, media_types::EVENT_STREAM)
            .header(reqwest::header::CACHE_CONTROL, "no-cache");

        tracing::info!(%conversation, "Opening event stream {}", url);

        let head_timeout = Duration::from_millis(self.config.stream_timeout_ms);
        let response = tokio::time::timeout(head_timeout, request.send())
            .await
            .map_err(|_| SyncError::Timeout)??;
        let response = ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with(media_types::EVENT_STREAM) {
            tracing::warn!(%conversation, "Unexpected stream content type {:?}", content_type);
        }

        let (tx, rx) = async_channel::bounded(self.config.event_buffer.max(1));
        let mut body = response.bytes_stream();
        let conversation = conversation.clone();

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut closed_check = tokio::time::interval(CLOSED_CHECK_INTERVAL);
            closed_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                let chunk = tokio::select! {
                    chunk = body.next() => chunk,
                    _ = closed_check.tick() => {
                        if tx.is_closed() {
                            tracing::debug!(%conversation, "Stream consumer went away");
                            return;
                        }
                        continue;
                    }
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        tracing::trace!(%conversation, "Received {} bytes", bytes.len());
                        let frames = match parser.feed(&bytes) {
                            Ok(frames) => frames,
                            Err(e) => {
                                tracing::warn!(%conversation, "Abandoning event stream: {}", e);
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        };
                        for frame in frames {
                            tracing::trace!(
                                %conversation,
                                event = ?frame.event,
                                id = ?frame.id,
                                "Stream frame"
                            );
                            let item = match StreamPayload::decode(&frame.data) {
                                Ok(Some(payload)) => Ok(payload),
                                Ok(None) => continue,
                                Err(e) => Err(e),
                            };
                            if tx.send(item).await.is_err() {
                                tracing::debug!(%conversation, "Stream consumer went away");
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(%conversation, "Event stream read failed: {}", e);
                        let _ = tx.send(Err(SyncError::from(e))).await;
                        return;
                    }
                    None => {
                        if parser.pending() > 0 {
                            tracing::debug!(
                                %conversation,
                                "Discarding {} bytes of an unterminated event",
                                parser.pending()
                            );
                        }
                        tracing::debug!(%conversation, "Event stream ended");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
