//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/recsync/config.toml` (`~/.config` fallback)
//! - Windows: `%APPDATA%/recsync/config.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use recsync_sync::SyncConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Credential file used when the OS keyring is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    #[serde(flatten)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Loads configuration from `path`, or writes and returns the default
    /// if the file does not exist yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            let config = AppConfig::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            config
        };
        config.sync.validate()?;
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix (holds the OAuth client secret).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("recsync").join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata).join("recsync").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("recsync")
            .join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AppConfig::default();
        assert!(config.credentials_file.is_none());
        assert_eq!(config.sync.folder_name, "Recordings");
        assert!(config.sync.oauth.client_id.is_empty());
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = AppConfig {
            credentials_file: Some(PathBuf::from("/tmp/recsync-creds.json")),
            ..AppConfig::default()
        };
        config.sync.folder_name = "Voice memos".into();
        config.sync.oauth.client_id = "client.apps.example".into();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
folder_name = "Interviews"

[oauth]
client_id = "abc"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.folder_name, "Interviews");
        assert_eq!(config.sync.oauth.client_id, "abc");
        assert_eq!(config.sync.max_attempts, 5);
        assert!(config.credentials_file.is_none());
    }

    #[test]
    fn load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn load_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "folder_name = \"Field\"\nchunk_size = 524288\n").unwrap();

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config.sync.folder_name, "Field");
        assert_eq!(config.sync.chunk_size, 524_288);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_attempts = 0\n").unwrap();

        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        if let Ok(path) = config_path() {
            assert!(path.ends_with("recsync/config.toml") || path.ends_with("recsync\\config.toml"));
        }
    }
}
