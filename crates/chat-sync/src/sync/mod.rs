//! Conversation synchronization engine.

pub mod config;
pub mod connection;
pub mod context;
pub mod controller;
pub mod store;
mod submit;
pub mod timer;

pub use config::SyncConfig;
pub use connection::{StreamConnection, StreamSignal};
pub use context::ConversationContext;
pub use controller::{SyncController, SyncHandle, SyncState, SyncStatus};
pub use store::{ReconciliationStore, StoreSnapshot, UpsertOutcome};
pub use timer::{TaskGuard, Ticket};
