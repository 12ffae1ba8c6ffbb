//! Capability traits at the network seam.
//!
//! The engine talks to the server only through these traits, so tests and
//! alternative transports can stand in for [`ChatClient`](crate::ChatClient).

use crate::error::Result;
use crate::types::{ConversationId, Message, NewConversation, StreamPayload, SubmitRequest};
use async_trait::async_trait;

/// Receiving end of one stream connection.
///
/// Items are decoded payloads or per-event errors. The channel closing means
/// the stream ended. Closing it from the receiving side tells the producer to
/// stop.
pub type EventReceiver = async_channel::Receiver<Result<StreamPayload>>;

/// REST operations on conversations.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// Full, ordered message list of a conversation.
    async fn list_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>>;

    /// Submit a user message. Returns the created messages, typically the
    /// user prompt followed by an in-progress assistant reply.
    async fn post_message(
        &self,
        conversation: &ConversationId,
        request: &SubmitRequest,
    ) -> Result<Vec<Message>>;

    async fn create_conversation(&self, request: &NewConversation) -> Result<ConversationId>;
}

/// Push channel for live conversation updates.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Open a stream. Resolves once the server accepted the request.
    async fn connect(&self, conversation: &ConversationId) -> Result<EventReceiver>;
}
