//! Sync configuration

use std::time::Duration;

use eyre::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Remote authority and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push/pull against the remote authority at all
    pub enabled: bool,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API token
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Retries of a single HTTP request before the push counts as failed
    #[serde(rename = "max-request-retries")]
    pub max_request_retries: u32,

    /// Seconds between background push/pull rounds
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// First outbox retry delay
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling for outbox retry delay
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// After this long unsynced, a change is flagged "not yet synced"
    #[serde(rename = "unsynced-window-secs")]
    pub unsynced_window_secs: u64,

    /// Capacity of the sync signal channel
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8080/api".to_string(),
            api_key_env: "STAGETRACK_API_TOKEN".to_string(),
            timeout_ms: 10_000,
            max_request_retries: 2,
            poll_interval_secs: 30,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            unsynced_window_secs: 900,
            channel_buffer: 32,
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn unsynced_window_ms(&self) -> i64 {
        (self.unsynced_window_secs as i64).saturating_mul(1000)
    }

    /// Delay before the next retry after `attempts` failures (without jitter)
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        let exp = attempts.saturating_sub(1).min(32);
        self.initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_backoff_ms)
    }

    /// `backoff_ms` plus up to 10% random jitter
    pub fn backoff_with_jitter_ms(&self, attempts: u32) -> u64 {
        let base = self.backoff_ms(attempts);
        let jitter = base / 10;
        if jitter == 0 {
            return base;
        }
        base + rand::rng().random_range(0..=jitter)
    }

    /// Read the API token from the configured environment variable
    ///
    /// A missing variable means unauthenticated requests.
    pub fn api_key(&self) -> Option<String> {
        debug!(api_key_env = %self.api_key_env, "api_key: called");
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    /// Check the config is usable before starting sync
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.base_url.trim().is_empty() {
            return Err(eyre::eyre!("sync is enabled but sync.base-url is empty"));
        }
        if self.initial_backoff_ms == 0 {
            return Err(eyre::eyre!("sync.initial-backoff-ms must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = SyncConfig {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            ..Default::default()
        };
        assert_eq!(config.backoff_ms(1), 1_000);
        assert_eq!(config.backoff_ms(2), 2_000);
        assert_eq!(config.backoff_ms(3), 4_000);
        assert_eq!(config.backoff_ms(4), 5_000);
        assert_eq!(config.backoff_ms(60), 5_000);
    }

    #[test]
    fn test_parses_kebab_case_yaml() {
        let yaml = "enabled: true\nbase-url: https://plant.example/api\nunsynced-window-secs: 60\n";
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.base_url, "https://plant.example/api");
        assert_eq!(config.unsynced_window_ms(), 60_000);
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[test]
    fn test_validate_rejects_empty_url_when_enabled() {
        let config = SyncConfig {
            enabled: true,
            base_url: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(SyncConfig::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn jitter_stays_within_ten_percent(attempts in 1u32..40) {
            let config = SyncConfig::default();
            let base = config.backoff_ms(attempts);
            let jittered = config.backoff_with_jitter_ms(attempts);
            prop_assert!(jittered >= base);
            prop_assert!(jittered <= base + base / 10);
        }
    }
}
