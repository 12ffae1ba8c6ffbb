//! Consuming side of an event stream, with heartbeat timeout detection.

use crate::error::{Result, SyncError};
use crate::traits::EventReceiver;
use crate::types::StreamPayload;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for heartbeat timeout detection.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub interval_secs: f64,
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Allows for one late heartbeat plus some slack.
    pub fn new(interval_secs: f64) -> Self {
        let timeout_secs = 1.2 * interval_secs + 3.0;
        Self {
            interval_secs,
            timeout: Duration::from_secs_f64(timeout_secs.max(0.0)),
        }
    }
}

pub struct Subscription {
    receiver: EventReceiver,
    heartbeat_config: Option<HeartbeatConfig>,
    last_activity: Instant,
}

impl Subscription {
    pub fn new(receiver: EventReceiver) -> Self {
        Subscription {
            receiver,
            heartbeat_config: None,
            last_activity: Instant::now(),
        }
    }

    pub fn with_heartbeat(receiver: EventReceiver, heartbeat_config: HeartbeatConfig) -> Self {
        Subscription {
            receiver,
            heartbeat_config: Some(heartbeat_config),
            last_activity: Instant::now(),
        }
    }

    /// Next item from the stream.
    ///
    /// `None` means the stream ended. A silent stream yields
    /// `Some(Err(SyncError::Timeout))` once the heartbeat deadline passes.
    pub async fn next(&mut self) -> Option<Result<StreamPayload>> {
        if let Some(ref config) = self.heartbeat_config {
            let deadline = self.last_activity + config.timeout;
            tokio::select! {
                result = self.receiver.recv() => {
                    self.last_activity = Instant::now();
                    result.ok()
                }
                _ = tokio::time::sleep_until(deadline) => {
                    Some(Err(SyncError::Timeout))
                }
            }
        } else {
            let result = self.receiver.recv().await.ok();
            self.last_activity = Instant::now();
            result
        }
    }

}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
    }
}
