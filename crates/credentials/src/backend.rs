//! Durable credential storage.
//!
//! The OS secret store is preferred. When it is not usable (headless
//! Linux without a Secret Service, sandboxed CI) the credential falls
//! back to a JSON file readable only by the current user.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use recsync_protocol::Credential;
use tracing::{debug, warn};

use crate::error::CredentialError;

/// Keyring service name.
const SERVICE: &str = "recsync";

/// Keyring account holding the serialized credential.
const ACCOUNT: &str = "remote-store-credential";

/// Durable home for the single credential record.
///
/// Calls are short and blocking (a keyring round-trip or a small file).
pub trait SecretBackend: Send + Sync {
    /// Loads the stored credential, `None` if nothing is stored.
    fn load(&self) -> Result<Option<Credential>, CredentialError>;

    /// Replaces the stored credential.
    fn save(&self, credential: &Credential) -> Result<(), CredentialError>;

    /// Removes the stored credential. Removing nothing is not an error.
    fn clear(&self) -> Result<(), CredentialError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

/// Stores the credential as JSON in the OS secret store.
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_account(ACCOUNT)
    }

    pub fn with_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, CredentialError> {
        Ok(keyring::Entry::new(SERVICE, &self.account)?)
    }

    /// Returns `true` if the platform secret store answers at all.
    pub fn is_usable(&self) -> bool {
        let Ok(entry) = self.entry() else {
            return false;
        };
        // NoEntry still proves the store is reachable.
        matches!(entry.get_password(), Ok(_) | Err(keyring::Error::NoEntry))
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretBackend for KeyringBackend {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        match self.entry()?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let json = serde_json::to_string(credential)?;
        self.entry()?.set_password(&json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("os keyring ({SERVICE}/{})", self.account)
    }
}

// ---------------------------------------------------------------------------
// Permission-restricted file
// ---------------------------------------------------------------------------

/// Stores the credential as a JSON file with `0o600` permissions on Unix.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretBackend for FileBackend {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let credential: Credential = serde_json::from_str(&data)?;
        debug!(path = %self.path.display(), "loaded credential from file");
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(credential)?;
        write_private(&self.path, json.as_bytes())?;
        debug!(path = %self.path.display(), "persisted credential to file");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("file ({})", self.path.display())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    // Pre-existing files keep their old mode through open(); tighten it.
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Non-durable backend for embedding and tests.
#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Credential>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl SecretBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Picks the OS keyring when it answers, otherwise the file at `fallback`.
pub fn default_backend(fallback: PathBuf) -> Box<dyn SecretBackend> {
    let keyring = KeyringBackend::new();
    if keyring.is_usable() {
        debug!("using os keyring for credential storage");
        Box::new(keyring)
    } else {
        warn!(
            path = %fallback.display(),
            "os keyring unavailable, falling back to credential file"
        );
        Box::new(FileBackend::new(fallback))
    }
}

/// Returns the default credential file path.
pub fn default_credential_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("recsync").join("credentials.json"))
}

/// Returns the platform-specific config directory.
pub(crate) fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
