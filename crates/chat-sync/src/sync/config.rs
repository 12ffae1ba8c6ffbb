use crate::client::{HeartbeatConfig, RetryConfig};
use crate::error::Result;
use crate::protocol::defaults;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Tuning for the sync engine. All fields have defaults, so a partial JSON
/// file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Consecutive stream failures before falling back to polling.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time spent polling before the stream is probed again.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Expected server heartbeat interval. `None` disables the watchdog.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: Option<f64>,
}

fn default_failure_threshold() -> u32 {
    defaults::FAILURE_THRESHOLD
}

fn default_poll_interval_ms() -> u64 {
    defaults::POLL_INTERVAL_MS
}

fn default_cooldown_ms() -> u64 {
    defaults::COOLDOWN_MS
}

fn default_reconnect_initial_ms() -> u64 {
    defaults::RECONNECT_INITIAL_MS
}

fn default_reconnect_max_ms() -> u64 {
    defaults::RECONNECT_MAX_MS
}

fn default_heartbeat_interval_secs() -> Option<f64> {
    Some(defaults::HEARTBEAT_INTERVAL_SECS)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            poll_interval_ms: default_poll_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Load from a JSON file. A missing, empty or unparseable file yields
    /// the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !fs::try_exists(path).await? {
            tracing::debug!("No sync config at {}, using defaults", path.display());
            return Ok(SyncConfig::default());
        }

        let content = fs::read_to_string(path).await?;

        if content.trim().is_empty() {
            tracing::warn!("Sync config {} is empty, using defaults", path.display());
            return Ok(SyncConfig::default());
        }

        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse sync config {} ({}), using defaults",
                    path.display(),
                    e
                );
                Ok(SyncConfig::default())
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_initial_backoff(Duration::from_millis(self.reconnect_initial_ms))
            .with_max_backoff(Duration::from_millis(
                self.reconnect_max_ms.max(self.reconnect_initial_ms),
            ))
    }

    pub fn heartbeat(&self) -> Option<HeartbeatConfig> {
        self.heartbeat_interval_secs
            .filter(|secs| *secs > 0.0)
            .map(HeartbeatConfig::new)
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_ms = initial.as_millis() as u64;
        self.reconnect_max_ms = max.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval_secs: Option<f64>) -> Self {
        self.heartbeat_interval_secs = interval_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.heartbeat().unwrap().timeout, Duration::from_secs(33));

        let retry = config.retry_config();
        assert_eq!(retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(retry.max_backoff, Duration::from_secs(3));
    }

    #[test]
    fn test_heartbeat_can_be_disabled() {
        let config = SyncConfig::default().with_heartbeat_interval(None);
        assert!(config.heartbeat().is_none());
        let config = SyncConfig::default().with_heartbeat_interval(Some(0.0));
        assert!(config.heartbeat().is_none());
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        tokio::fs::write(&path, r#"{"cooldown_ms": 1000, "heartbeat_interval_secs": null}"#)
            .await
            .unwrap();

        let config = SyncConfig::load(&path).await.unwrap();
        assert_eq!(config.cooldown(), Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 3);
        assert!(config.heartbeat_interval_secs.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_empty_or_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();

        let missing = SyncConfig::load(dir.path().join("nope.json")).await.unwrap();
        assert_eq!(missing, SyncConfig::default());

        let empty = dir.path().join("empty.json");
        tokio::fs::write(&empty, "  \n").await.unwrap();
        assert_eq!(SyncConfig::load(&empty).await.unwrap(), SyncConfig::default());

        let corrupt = dir.path().join("corrupt.json");
        tokio::fs::write(&corrupt, "{ failure_threshold: ").await.unwrap();
        assert_eq!(SyncConfig::load(&corrupt).await.unwrap(), SyncConfig::default());
    }
}
