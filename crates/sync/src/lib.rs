//! Recording sync service.
//!
//! The public surface other subsystems depend on: [`FileSyncService`] for
//! moving recordings to and from the remote store, and
//! [`StorageInfoProvider`] for quota display.
//!
//! # Upload pipeline
//!
//! 1. **Fingerprint**: SHA-256 of the file bytes
//! 2. **Dedup**: look the fingerprint up remotely, stop if found
//! 3. **Folder**: resolve or create the destination folder
//! 4. **Transfer**: resumable chunked upload
//! 5. **Record**: stamp the fingerprint on the new object

pub mod config;
pub mod dedup;
pub mod error;
pub mod folder;
pub mod metadata;
pub mod service;
pub mod storage;

pub use config::{ConfigError, ProviderSettings, SyncConfig};
pub use dedup::{DedupEntry, DeduplicationIndex};
pub use error::{SyncError, UserAction};
pub use folder::FolderIndex;
pub use metadata::{mime_type_for, parse_tags};
pub use service::{FileSyncService, UploadOutcome};
pub use storage::StorageInfoProvider;
