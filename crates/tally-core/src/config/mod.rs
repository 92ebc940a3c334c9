//! Sync engine configuration.
//!
//! `SyncSettings` carries every tunable of the outbox/orchestrator pair. All
//! fields default to production values, so an empty JSON object is a valid
//! configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::FULL_SYNC_HORIZON_SECS;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PERIODIC_INTERVAL_SECS: u64 = 30;
const DEFAULT_BACKOFF_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;
const DEFAULT_RETENTION_DAYS: u32 = 180;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Tunables for the local store and sync orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Base URL of the reconciliation API (e.g. `https://api.example.com`)
    pub api_base_url: Option<String>,
    /// Outbox entries uploaded per request
    pub batch_size: usize,
    /// Delivery attempts before an outbox entry is abandoned
    pub max_retries: u32,
    /// Seconds between periodic sync cycles
    pub periodic_interval_secs: u64,
    /// Seconds to wait in `Backoff` before retrying
    pub backoff_delay_secs: u64,
    /// Consecutive backoff retries before returning to `Idle`
    pub max_recovery_attempts: u32,
    /// Age after which a full sync is forced
    pub full_sync_horizon_secs: i64,
    /// Synced records older than this are dropped by retention cleanup
    pub retention_days: u32,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Version reported to `download_updates`
    pub client_version: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            periodic_interval_secs: DEFAULT_PERIODIC_INTERVAL_SECS,
            backoff_delay_secs: DEFAULT_BACKOFF_DELAY_SECS,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            full_sync_horizon_secs: FULL_SYNC_HORIZON_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON and validate them.
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)?;
        settings.validated()
    }

    /// Normalize and range-check every field.
    pub fn validated(mut self) -> Result<Self> {
        self.api_base_url = normalize_text_option(self.api_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        if let Some(url) = self.api_base_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if !(1..=500).contains(&self.batch_size) {
            return Err(Error::InvalidInput(
                "batch_size must be in [1, 500]".to_string(),
            ));
        }
        if !(1..=20).contains(&self.max_retries) {
            return Err(Error::InvalidInput(
                "max_retries must be in [1, 20]".to_string(),
            ));
        }
        if self.periodic_interval_secs == 0 || self.backoff_delay_secs == 0 {
            return Err(Error::InvalidInput(
                "periodic_interval_secs and backoff_delay_secs must be positive".to_string(),
            ));
        }
        if self.full_sync_horizon_secs <= 0 {
            return Err(Error::InvalidInput(
                "full_sync_horizon_secs must be positive".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(Error::InvalidInput(
                "retention_days must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    /// Full URL of the sync action endpoint, if configured.
    pub fn sync_endpoint(&self) -> Option<String> {
        self.api_base_url
            .as_deref()
            .map(|base| format!("{base}/v1/sync"))
    }

    pub const fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub const fn backoff_delay(&self) -> Duration {
        Duration::from_secs(self.backoff_delay_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retention horizon in milliseconds.
    pub fn retention_horizon_ms(&self) -> i64 {
        i64::from(self.retention_days) * 24 * 60 * 60 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let settings = SyncSettings::from_json("{}").unwrap();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.periodic_interval(), Duration::from_secs(30));
        assert_eq!(settings.backoff_delay(), Duration::from_secs(5));
        assert_eq!(settings.full_sync_horizon_secs, 7 * 24 * 60 * 60);
        assert!(settings.sync_endpoint().is_none());
    }

    #[test]
    fn base_url_is_trimmed_and_checked() {
        let settings =
            SyncSettings::from_json(r#"{"api_base_url": " https://api.example.com/ "}"#).unwrap();
        assert_eq!(
            settings.sync_endpoint().as_deref(),
            Some("https://api.example.com/v1/sync")
        );

        let error = SyncSettings::from_json(r#"{"api_base_url": "api.example.com"}"#).unwrap_err();
        assert!(error.to_string().contains("http://"));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_ranges() {
        assert!(SyncSettings::from_json(r#"{"batch": 10}"#).is_err());
        assert!(SyncSettings::from_json(r#"{"batch_size": 0}"#).is_err());
        assert!(SyncSettings::from_json(r#"{"max_retries": 0}"#).is_err());
        assert!(SyncSettings::from_json(r#"{"retention_days": 0}"#).is_err());
    }

    #[test]
    fn retention_horizon_in_millis() {
        let settings = SyncSettings {
            retention_days: 1,
            ..SyncSettings::default()
        };
        assert_eq!(settings.retention_horizon_ms(), 86_400_000);
    }
}
