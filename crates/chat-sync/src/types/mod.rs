pub mod conversation;
pub mod event;
pub mod message;
pub mod request;

pub use conversation::{ConversationId, ConversationRecord, NewConversation};
pub use event::StreamPayload;
pub use message::{Message, MessageId, Role};
pub use request::SubmitRequest;
