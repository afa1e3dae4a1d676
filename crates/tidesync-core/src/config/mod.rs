//! Sync client configuration.
//!
//! `SyncSettings` is loaded from a JSON file or from `TIDESYNC_*` environment
//! variables. Only `app_id`, `app_api_access_key` and `endpoint` are required.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{AesGcmCipher, Cipher};
use crate::error::{Error, Result};
use crate::sync::request::BatchLimits;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BATCH_LIMIT: usize = 100;

pub const ENV_APP_ID: &str = "TIDESYNC_APP_ID";
pub const ENV_API_ACCESS_KEY: &str = "TIDESYNC_API_ACCESS_KEY";
pub const ENV_ENDPOINT: &str = "TIDESYNC_ENDPOINT";
pub const ENV_ENCRYPTION_KEY: &str = "TIDESYNC_ENCRYPTION_KEY";
pub const ENV_POLL_INTERVAL_MS: &str = "TIDESYNC_POLL_INTERVAL_MS";

/// Settings for one application's sync client.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    pub app_id: String,
    pub app_api_access_key: String,
    pub endpoint: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_batch_limit")]
    pub change_batch_limit: usize,
    #[serde(default = "default_batch_limit")]
    pub group_batch_limit: usize,
    /// Passphrase for the default cipher; `app_id` when absent
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Register a group automatically the first time a record is committed into it
    #[serde(default = "default_true")]
    pub auto_subscribe_groups: bool,
}

const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

const fn default_true() -> bool {
    true
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("app_id", &self.app_id)
            .field("app_api_access_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("change_batch_limit", &self.change_batch_limit)
            .field("group_batch_limit", &self.group_batch_limit)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("auto_subscribe_groups", &self.auto_subscribe_groups)
            .finish()
    }
}

impl SyncSettings {
    pub fn new(
        app_id: impl Into<String>,
        app_api_access_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_api_access_key: app_api_access_key.into(),
            endpoint: endpoint.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            change_batch_limit: DEFAULT_BATCH_LIMIT,
            group_batch_limit: DEFAULT_BATCH_LIMIT,
            encryption_key: None,
            auto_subscribe_groups: true,
        }
    }

    /// Load and validate settings from a JSON file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)
            .map_err(|error| Error::Config(format!("invalid settings file: {error}")))?;
        settings.validate()
    }

    /// Load and validate settings from `TIDESYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            normalize_text_option(lookup(key))
                .ok_or_else(|| Error::Config(format!("{key} is not set")))
        };

        let mut settings = Self::new(
            required(ENV_APP_ID)?,
            required(ENV_API_ACCESS_KEY)?,
            required(ENV_ENDPOINT)?,
        );
        settings.encryption_key = lookup(ENV_ENCRYPTION_KEY);
        if let Some(interval) = normalize_text_option(lookup(ENV_POLL_INTERVAL_MS)) {
            settings.poll_interval_ms = interval.parse().map_err(|_| {
                Error::Config(format!("{ENV_POLL_INTERVAL_MS} must be an integer"))
            })?;
        }
        settings.validate()
    }

    /// Normalize text fields and check ranges
    pub fn validate(mut self) -> Result<Self> {
        self.app_id = normalize_required(&self.app_id, "app_id")?;
        self.app_api_access_key =
            normalize_required(&self.app_api_access_key, "app_api_access_key")?;

        let endpoint = normalize_required(&self.endpoint, "endpoint")?;
        if !is_http_url(&endpoint) {
            return Err(Error::Config(
                "endpoint must include http:// or https://".to_string(),
            ));
        }
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self.encryption_key = normalize_text_option(self.encryption_key);

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        if self.change_batch_limit == 0 || self.group_batch_limit == 0 {
            return Err(Error::Config("batch limits must be positive".into()));
        }

        Ok(self)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            changes: self.change_batch_limit,
            groups: self.group_batch_limit,
        }
    }

    /// Default AES-GCM cipher keyed by `encryption_key`, or `app_id` without one
    pub fn cipher(&self) -> Arc<dyn Cipher> {
        let passphrase = self.encryption_key.as_deref().unwrap_or(&self.app_id);
        Arc::new(AesGcmCipher::from_passphrase(passphrase))
    }
}

fn normalize_required(raw: &str, field: &str) -> Result<String> {
    normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::Config(format!("{field} is required")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_minimal_settings_with_defaults() {
        let settings: SyncSettings = serde_json::from_str(
            r#"{"app_id": "app", "app_api_access_key": "key", "endpoint": "https://sync.example.com/"}"#,
        )
        .unwrap();
        let settings = settings.validate().unwrap();

        assert_eq!(settings.endpoint, "https://sync.example.com");
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.batch_limits(),
            BatchLimits {
                changes: 100,
                groups: 100
            }
        );
        assert!(settings.auto_subscribe_groups);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = serde_json::from_str::<SyncSettings>(
            r#"{"app_id": "app", "app_api_access_key": "key", "endpoint": "https://x", "extra": 1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SyncSettings::new(" ", "key", "https://x").validate().is_err());
        assert!(SyncSettings::new("app", "key", "sync.example.com")
            .validate()
            .is_err());

        let mut zero_interval = SyncSettings::new("app", "key", "https://x");
        zero_interval.poll_interval_ms = 0;
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn reads_environment_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_APP_ID, "app"),
            (ENV_API_ACCESS_KEY, "key"),
            (ENV_ENDPOINT, "http://localhost:8080"),
            (ENV_POLL_INTERVAL_MS, "250"),
        ]);
        let settings =
            SyncSettings::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();

        assert_eq!(settings.app_id, "app");
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.encryption_key, None);
    }

    #[test]
    fn missing_environment_is_a_config_error() {
        let result = SyncSettings::from_lookup(|_| None);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load_from_path_reads_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"app_id": "app", "app_api_access_key": "key", "endpoint": "https://x", "encryption_key": "secret"}"#,
        )
        .unwrap();

        let settings = SyncSettings::load_from_path(&path).unwrap();
        assert_eq!(settings.encryption_key.as_deref(), Some("secret"));
    }

    #[test]
    fn cipher_is_keyed_by_app_id_without_encryption_key() {
        let settings = SyncSettings::new("app", "key", "https://x");
        let blob = settings.cipher().encrypt(b"hello").unwrap();
        let same_key = AesGcmCipher::from_passphrase("app");
        assert_eq!(same_key.decrypt(&blob).unwrap(), b"hello");
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut settings = SyncSettings::new("app", "top-secret", "https://x");
        settings.encryption_key = Some("hunter2".into());
        let debug = format!("{settings:?}");
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("hunter2"));
    }
}
