//! Sync configuration.

use std::time::Duration;

use recsync_credentials::{CredentialOptions, OAuthSettings};
use recsync_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT_SECS, RetryPolicy, TransferConfig};
use serde::{Deserialize, Serialize};

/// Default destination folder for recordings.
pub const DEFAULT_FOLDER_NAME: &str = "Recordings";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Provider endpoints. `None` uses the adapter's built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_folder_name")]
    pub folder_name: String,
    /// Explicit destination folder, bypassing lookup by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
}

fn default_folder_name() -> String {
    DEFAULT_FOLDER_NAME.into()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    RetryPolicy::default().base_delay.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    RetryPolicy::default().max_delay.as_millis() as u64
}

fn default_chunk_timeout_secs() -> u64 {
    DEFAULT_CHUNK_TIMEOUT_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folder_name: default_folder_name(),
            folder_id: None,
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            oauth: OAuthSettings::default(),
            provider: ProviderSettings::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.folder_name.trim().is_empty() && self.folder_id.is_none() {
            return Err(invalid("folder_name", "must not be empty"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must allow at least one attempt"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(
                "base_delay_ms",
                format!(
                    "{} exceeds max_delay_ms ({})",
                    self.base_delay_ms, self.max_delay_ms
                ),
            ));
        }
        if self.chunk_timeout_secs == 0 {
            return Err(invalid("chunk_timeout_secs", "must be positive"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.chunk_size,
            retry: self.retry_policy(),
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
        }
    }

    pub fn credential_options(&self) -> CredentialOptions {
        CredentialOptions::from(&self.oauth)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.folder_name, "Recordings");
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.chunk_timeout_secs, 60);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
folder_name = "Field notes"
chunk_size = 262144

[oauth]
client_id = "abc.apps.example"

[provider]
api_base_url = "http://localhost:9000"
"#,
        )
        .unwrap();
        assert_eq!(config.folder_name, "Field notes");
        assert_eq!(config.chunk_size, 262_144);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.oauth.client_id, "abc.apps.example");
        assert_eq!(config.oauth.consent_timeout_secs, 300);
        assert_eq!(
            config.provider.api_base_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(config.provider.upload_base_url.is_none());
    }

    #[test]
    fn toml_roundtrip() {
        let config = SyncConfig {
            folder_id: Some("abc123".into()),
            max_attempts: 3,
            ..SyncConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SyncConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = SyncConfig {
            chunk_size: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "chunk_size",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = SyncConfig {
            max_attempts: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "max_attempts",
                ..
            })
        ));
    }

    #[test]
    fn rejects_base_delay_above_cap() {
        let config = SyncConfig {
            base_delay_ms: 60_000,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "base_delay_ms",
                ..
            })
        ));
    }

    #[test]
    fn explicit_folder_id_allows_empty_name() {
        let config = SyncConfig {
            folder_name: String::new(),
            folder_id: Some("abc".into()),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn converts_to_engine_settings() {
        let config = SyncConfig {
            chunk_size: 1024,
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            chunk_timeout_secs: 5,
            ..SyncConfig::default()
        };
        let transfer = config.transfer_config();
        assert_eq!(transfer.chunk_size, 1024);
        assert_eq!(transfer.retry.max_attempts, 2);
        assert_eq!(transfer.retry.base_delay, Duration::from_millis(100));
        assert_eq!(transfer.retry.max_delay, Duration::from_secs(1));
        assert_eq!(transfer.chunk_timeout, Duration::from_secs(5));

        let options = config.credential_options();
        assert_eq!(options.consent_timeout, Duration::from_secs(300));
        assert_eq!(options.grace, chrono::Duration::seconds(60));
    }
}
