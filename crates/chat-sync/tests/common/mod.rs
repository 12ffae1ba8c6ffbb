//! Scripted in-memory network shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chat_sync::{
    ChatApi, ConversationId, EventReceiver, Message, Result, Role, StreamPayload,
    StreamTransport, SubmitRequest, SyncConfig, SyncError,
};
use chat_sync::types::NewConversation;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub type ServerSender = async_channel::Sender<Result<StreamPayload>>;

/// Calls the engine made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(ConversationId),
    List {
        conversation: ConversationId,
        open_streams: usize,
    },
    Post(ConversationId, String),
    Create,
}

struct StreamSlot {
    conversation: ConversationId,
    sender: Option<ServerSender>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    refuse_connects: bool,
    streams: Vec<StreamSlot>,
    lists: HashMap<ConversationId, Vec<Message>>,
    list_delay: Duration,
    post_results: VecDeque<Result<Vec<Message>>>,
    post_delay: Duration,
    created: Option<ConversationId>,
    create_delay: Duration,
    failing_creates: usize,
}

/// Test double for both the REST API and the event stream.
pub struct MockNetwork {
    inner: Mutex<Inner>,
    connects: watch::Sender<usize>,
    lists: watch::Sender<usize>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MockNetwork {
            inner: Mutex::new(Inner::default()),
            connects: watch::channel(0).0,
            lists: watch::channel(0).0,
        })
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.lock().refuse_connects = refuse;
    }

    pub fn set_list(&self, conversation: &str, messages: Vec<Message>) {
        self.inner
            .lock()
            .lists
            .insert(conversation.into(), messages);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.inner.lock().list_delay = delay;
    }

    pub fn push_post_result(&self, result: Result<Vec<Message>>) {
        self.inner.lock().post_results.push_back(result);
    }

    pub fn set_post_delay(&self, delay: Duration) {
        self.inner.lock().post_delay = delay;
    }

    pub fn set_created(&self, conversation: &str) {
        self.inner.lock().created = Some(conversation.into());
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.inner.lock().create_delay = delay;
    }

    /// The next `n` conversation creations fail.
    pub fn fail_creates(&self, n: usize) {
        self.inner.lock().failing_creates = n;
    }

    pub fn create_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Create).count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        *self.connects.borrow()
    }

    pub fn connects_for(&self, conversation: &str) -> usize {
        let conversation = ConversationId::from(conversation);
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Connect(id) if *id == conversation))
            .count()
    }

    pub fn list_count(&self) -> usize {
        *self.lists.borrow()
    }

    pub async fn wait_for_connects(&self, n: usize) {
        let mut rx = self.connects.subscribe();
        within(rx.wait_for(|count| *count >= n)).await.unwrap();
    }

    pub async fn wait_for_lists(&self, n: usize) {
        let mut rx = self.lists.subscribe();
        within(rx.wait_for(|count| *count >= n)).await.unwrap();
    }

    /// Sending side of the `index`-th accepted stream.
    pub fn stream(&self, index: usize) -> ServerSender {
        self.inner.lock().streams[index]
            .sender
            .clone()
            .expect("stream already ended by the test")
    }

    pub async fn send(&self, index: usize, payload: StreamPayload) {
        self.stream(index).send(Ok(payload)).await.unwrap();
    }

    pub async fn send_err(&self, index: usize, error: SyncError) {
        self.stream(index).send(Err(error)).await.unwrap();
    }

    /// Server closes the `index`-th stream.
    pub fn end_stream(&self, index: usize) {
        self.inner.lock().streams[index].sender.take();
    }

    /// True once the client side of the `index`-th stream is gone.
    pub fn is_stream_closed(&self, index: usize) -> bool {
        match &self.inner.lock().streams[index].sender {
            Some(sender) => sender.is_closed(),
            None => true,
        }
    }

    pub fn open_streams(&self) -> usize {
        open_streams(&self.inner.lock())
    }
}

fn open_streams(inner: &Inner) -> usize {
    inner
        .streams
        .iter()
        .filter(|s| s.sender.as_ref().is_some_and(|tx| !tx.is_closed()))
        .count()
}

#[async_trait]
impl StreamTransport for MockNetwork {
    async fn connect(&self, conversation: &ConversationId) -> Result<EventReceiver> {
        let result = {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Connect(conversation.clone()));
            if inner.refuse_connects {
                Err(SyncError::Http("connection refused".to_string()))
            } else {
                let (tx, rx) = async_channel::bounded(32);
                inner.streams.push(StreamSlot {
                    conversation: conversation.clone(),
                    sender: Some(tx),
                });
                Ok(rx)
            }
        };
        self.connects.send_modify(|n| *n += 1);
        result
    }
}

#[async_trait]
impl ChatApi for MockNetwork {
    async fn list_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        let (delay, messages) = {
            let mut inner = self.inner.lock();
            let open_streams = open_streams(&inner);
            inner.calls.push(Call::List {
                conversation: conversation.clone(),
                open_streams,
            });
            (
                inner.list_delay,
                inner.lists.get(conversation).cloned().unwrap_or_default(),
            )
        };
        self.lists.send_modify(|n| *n += 1);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(messages)
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        request: &SubmitRequest,
    ) -> Result<Vec<Message>> {
        let (delay, result) = {
            let mut inner = self.inner.lock();
            inner
                .calls
                .push(Call::Post(conversation.clone(), request.content.clone()));
            let result = inner.post_results.pop_front().unwrap_or_else(|| {
                Ok(vec![
                    user(
                        &format!("u-{}", request.content),
                        &request.content,
                        conversation.as_str(),
                    ),
                    assistant(
                        &format!("a-{}", request.content),
                        "",
                        conversation.as_str(),
                        true,
                    ),
                ])
            });
            (inner.post_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn create_conversation(&self, _request: &NewConversation) -> Result<ConversationId> {
        let (delay, result) = {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Create);
            let result = if inner.failing_creates > 0 {
                inner.failing_creates -= 1;
                Err(SyncError::Status {
                    status: 503,
                    body: "create failed".to_string(),
                })
            } else {
                inner.created.clone().ok_or_else(|| SyncError::Status {
                    status: 500,
                    body: "no conversation scripted".to_string(),
                })
            };
            (inner.create_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

pub fn user(id: &str, content: &str, chat: &str) -> Message {
    Message::new(id, Role::User, content, Some(chat.into()))
}

pub fn assistant(id: &str, content: &str, chat: &str, in_progress: bool) -> Message {
    Message::new(id, Role::Assistant, content, Some(chat.into())).with_in_progress(in_progress)
}

/// Engine config for paused-clock tests: no heartbeat watchdog.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_heartbeat_interval(None)
}

/// Bound every wait so a broken engine fails the test instead of hanging it.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(600), future)
        .await
        .expect("timed out waiting for the sync engine")
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.uuid.to_string()).collect()
}
