//! Chat server HTTP client: REST calls and the event stream.

mod config;
mod event_stream;
mod fetch;
pub mod retry;
mod subscription;

pub use config::ClientConfig;
pub use fetch::ChatClient;
pub use retry::{RetryConfig, RetryDecision, RetryState};
pub use subscription::{HeartbeatConfig, Subscription};
