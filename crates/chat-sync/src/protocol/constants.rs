//! Wire constants for the chat sync protocol.
//!
//! ```text
//! constants/
//! ├── paths          - REST and stream path segments
//! ├── media_types    - Content types the client sends and expects
//! ├── payload_types  - `type` discriminators of stream payloads
//! └── defaults       - Timing defaults shared by the client and the engine
//! ```

/// Path segments, relative to the configured base URL.
///
/// | Method | Path | Purpose |
/// |--------|------|---------|
/// | GET | `/conversations/{id}/messages` | Full message list |
/// | POST | `/conversations/{id}/messages` | Submit a message |
/// | GET | `/conversations/{id}/messages-stream` | Event stream |
/// | POST | `/conversations` | Create a conversation |
pub mod paths {
    pub const CONVERSATIONS: &str = "conversations";
    pub const MESSAGES: &str = "messages";
    pub const MESSAGES_STREAM: &str = "messages-stream";
}

pub mod media_types {
    pub const EVENT_STREAM: &str = "text/event-stream";
    pub const JSON: &str = "application/json";
}

/// Values of the `type` field in stream payloads.
pub mod payload_types {
    pub const SNAPSHOT: &str = "snapshot";
    pub const MESSAGE: &str = "message";
    pub const HEARTBEAT: &str = "heartbeat";

    pub const KNOWN: &[&str] = &[SNAPSHOT, MESSAGE, HEARTBEAT];
}

pub mod defaults {
    /// Interval at which the server emits heartbeat events.
    pub const HEARTBEAT_INTERVAL_SECS: f64 = 25.0;
    /// Consecutive stream failures before switching to polling.
    pub const FAILURE_THRESHOLD: u32 = 3;
    pub const POLL_INTERVAL_MS: u64 = 5_000;
    pub const COOLDOWN_MS: u64 = 30_000;
    pub const RECONNECT_INITIAL_MS: u64 = 1_000;
    pub const RECONNECT_MAX_MS: u64 = 3_000;
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_types() {
        assert_eq!(payload_types::KNOWN.len(), 3);
        assert!(payload_types::KNOWN.contains(&"heartbeat"));
    }

    #[test]
    fn test_defaults_are_consistent() {
        assert!(defaults::RECONNECT_INITIAL_MS <= defaults::RECONNECT_MAX_MS);
        assert!(defaults::POLL_INTERVAL_MS < defaults::COOLDOWN_MS);
    }
}
