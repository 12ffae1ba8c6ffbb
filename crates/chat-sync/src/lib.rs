//! Client-side message synchronization for chat conversations.
//!
//! Keeps a displayed conversation consistent while messages arrive from an
//! optimistic local write, a server-sent event stream and REST polling.
//!
//! ```no_run
//! use chat_sync::{ChatClient, ClientConfig, SyncConfig, SyncController};
//! use std::sync::Arc;
//!
//! # async fn demo() -> chat_sync::Result<()> {
//! let client = Arc::new(ChatClient::with_config(ClientConfig::new("http://localhost:8000/api/v1"))?);
//! let sync = SyncController::spawn(client.clone(), client, SyncConfig::default());
//! sync.set_conversation(Some("c1".into())).await?;
//! sync.submit_text("Hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod traits;
pub mod types;

pub use client::{ChatClient, ClientConfig};
pub use error::{Result, SyncError};
pub use sync::{
    ConversationContext, ReconciliationStore, SyncConfig, SyncController, SyncHandle, SyncState,
    SyncStatus, UpsertOutcome,
};
pub use traits::{ChatApi, EventReceiver, StreamTransport};
pub use types::{ConversationId, Message, MessageId, Role, StreamPayload, SubmitRequest};
