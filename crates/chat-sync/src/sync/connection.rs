//! One live push channel for one conversation.

use crate::client::{HeartbeatConfig, RetryConfig, RetryDecision, RetryState, Subscription};
use crate::sync::timer::TaskGuard;
use crate::traits::{EventReceiver, StreamTransport};
use crate::types::{ConversationId, StreamPayload};
use parking_lot::Mutex;
use std::sync::Arc;

/// Signals a [`StreamConnection`] reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// The stream was accepted; the failure counter is back at zero.
    Connected,
    Payload(StreamPayload),
    /// The stream dropped or could not be opened and a reconnect is
    /// scheduled. Only sent below the failure threshold.
    Failed { consecutive: u32, reason: String },
    /// Threshold reached, sent instead of a final `Failed`. The connection
    /// has stopped and will not retry.
    FallbackRequired { failures: u32 },
}

#[derive(Default)]
struct Shared {
    receiver: Option<EventReceiver>,
    closed: bool,
}

/// Owns the connect/read/reconnect task of a single conversation's stream.
///
/// Dropping the connection closes it. After [`close`](Self::close) returns,
/// the event callback is never invoked again.
pub struct StreamConnection {
    conversation: ConversationId,
    shared: Arc<Mutex<Shared>>,
    task: TaskGuard,
}

impl StreamConnection {
    pub fn open<F>(
        transport: Arc<dyn StreamTransport>,
        conversation: ConversationId,
        retry: RetryConfig,
        heartbeat: Option<HeartbeatConfig>,
        on_event: F,
    ) -> Self
    where
        F: Fn(StreamSignal) + Send + Sync + 'static,
    {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let task = TaskGuard::spawn(run(
            transport,
            conversation.clone(),
            retry,
            heartbeat,
            shared.clone(),
            on_event,
        ));

        StreamConnection {
            conversation,
            shared,
            task,
        }
    }

    /// Close the stream. Idempotent.
    pub fn close(&self) {
        {
            let mut shared = self.shared.lock();
            if !shared.closed {
                tracing::debug!(conversation = %self.conversation, "Closing event stream");
            }
            shared.closed = true;
            if let Some(receiver) = shared.receiver.take() {
                receiver.close();
            }
        }
        self.task.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Invoke the callback unless the connection was closed. The lock is held
/// across the call so `close` cannot interleave with a delivery.
fn emit<F>(shared: &Mutex<Shared>, on_event: &F, signal: StreamSignal) -> bool
where
    F: Fn(StreamSignal),
{
    let guard = shared.lock();
    if guard.closed {
        return false;
    }
    on_event(signal);
    true
}

async fn run<F>(
    transport: Arc<dyn StreamTransport>,
    conversation: ConversationId,
    retry: RetryConfig,
    heartbeat: Option<HeartbeatConfig>,
    shared: Arc<Mutex<Shared>>,
    on_event: F,
) where
    F: Fn(StreamSignal) + Send + Sync + 'static,
{
    let mut retry = RetryState::new(retry);

    loop {
        let reason = match transport.connect(&conversation).await {
            Ok(receiver) => {
                {
                    let mut guard = shared.lock();
                    if guard.closed {
                        receiver.close();
                        return;
                    }
                    guard.receiver = Some(receiver.clone());
                }

                retry.reset();
                tracing::info!(%conversation, "Event stream connected");
                if !emit(&shared, &on_event, StreamSignal::Connected) {
                    return;
                }

                let mut subscription = match heartbeat.clone() {
                    Some(config) => Subscription::with_heartbeat(receiver, config),
                    None => Subscription::new(receiver),
                };

                let reason = loop {
                    match subscription.next().await {
                        Some(Ok(payload)) => {
                            tracing::trace!(%conversation, kind = payload.kind(), "Stream event");
                            if !emit(&shared, &on_event, StreamSignal::Payload(payload)) {
                                return;
                            }
                        }
                        Some(Err(e)) if e.is_payload_error() => {
                            tracing::warn!(%conversation, "Dropping malformed stream event: {}", e);
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    }
                };

                shared.lock().receiver = None;
                reason
            }
            Err(e) => e.to_string(),
        };

        match retry.record_failure() {
            RetryDecision::Retry(delay) => {
                let consecutive = retry.consecutive_failures;
                tracing::warn!(
                    %conversation,
                    consecutive,
                    "Event stream failed ({}), reconnecting in {:?}",
                    reason,
                    delay
                );
                if !emit(
                    &shared,
                    &on_event,
                    StreamSignal::Failed {
                        consecutive,
                        reason,
                    },
                ) {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Fallback => {
                let failures = retry.consecutive_failures;
                tracing::warn!(
                    %conversation,
                    failures,
                    "Event stream failed ({}), giving up",
                    reason
                );
                emit(&shared, &on_event, StreamSignal::FallbackRequired { failures });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Refusing;

    #[async_trait]
    impl StreamTransport for Refusing {
        async fn connect(&self, _conversation: &ConversationId) -> Result<EventReceiver> {
            Err(SyncError::Http("connection refused".to_string()))
        }
    }

    /// Accepts every connect and hands the sending side to the test.
    struct Accepting {
        senders: mpsc::UnboundedSender<async_channel::Sender<Result<StreamPayload>>>,
    }

    #[async_trait]
    impl StreamTransport for Accepting {
        async fn connect(&self, _conversation: &ConversationId) -> Result<EventReceiver> {
            let (tx, rx) = async_channel::bounded(8);
            let _ = self.senders.send(tx);
            Ok(rx)
        }
    }

    fn collect() -> (
        impl Fn(StreamSignal) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<StreamSignal>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |signal| {
                let _ = tx.send(signal);
            },
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_threshold() {
        let (on_event, mut signals) = collect();
        let connection = StreamConnection::open(
            Arc::new(Refusing),
            "c1".into(),
            RetryConfig::default(),
            None,
            on_event,
        );

        let mut seen = Vec::new();
        while let Some(signal) = signals.recv().await {
            let done = matches!(signal, StreamSignal::FallbackRequired { .. });
            seen.push(signal);
            if done {
                break;
            }
        }

        let counts: Vec<u32> = seen
            .iter()
            .filter_map(|s| match s {
                StreamSignal::Failed { consecutive, .. } => Some(*consecutive),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(
            seen.last(),
            Some(&StreamSignal::FallbackRequired { failures: 3 })
        );

        // Nothing after giving up.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(signals.try_recv().is_err());
        drop(connection);
    }

    #[tokio::test]
    async fn test_close_is_synchronous() {
        let (senders_tx, mut senders) = mpsc::unbounded_channel();
        let (on_event, mut signals) = collect();
        let connection = StreamConnection::open(
            Arc::new(Accepting {
                senders: senders_tx,
            }),
            "c1".into(),
            RetryConfig::default(),
            None,
            on_event,
        );

        let server = senders.recv().await.unwrap();
        assert_eq!(signals.recv().await, Some(StreamSignal::Connected));

        connection.close();
        assert!(connection.is_closed());
        assert!(server.is_closed());
        assert!(server
            .send(Ok(StreamPayload::Heartbeat {
                timestamp: String::new()
            }))
            .await
            .is_err());
        assert!(signals.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_connection() {
        let (senders_tx, mut senders) = mpsc::unbounded_channel();
        let (on_event, mut signals) = collect();
        let _connection = StreamConnection::open(
            Arc::new(Accepting {
                senders: senders_tx,
            }),
            "c1".into(),
            RetryConfig::default(),
            None,
            on_event,
        );

        let server = senders.recv().await.unwrap();
        assert_eq!(signals.recv().await, Some(StreamSignal::Connected));

        server
            .send(Err(SyncError::Payload("bad json".to_string())))
            .await
            .unwrap();
        server
            .send(Ok(StreamPayload::Heartbeat {
                timestamp: "t".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(
            signals.recv().await,
            Some(StreamSignal::Payload(StreamPayload::Heartbeat {
                timestamp: "t".to_string()
            }))
        );
        assert!(!server.is_closed());
    }
}
