//! Public sync contract.

use std::io;
use std::path::Path;

use recsync_protocol::{FolderHandle, RemoteEntry, RemoteObject, UploadMetadata};
use recsync_transfer::{
    ChunkedTransferEngine, ProgressFn, TransferClient, TransferError, sha256_file,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::dedup::DeduplicationIndex;
use crate::error::SyncError;
use crate::folder::FolderIndex;
use crate::metadata::mime_type_for;

/// Result of [`FileSyncService::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A new remote object was created.
    Uploaded(RemoteObject),
    /// Identical content already existed remotely; nothing was sent.
    Duplicate(RemoteObject),
}

impl UploadOutcome {
    pub fn object(&self) -> &RemoteObject {
        match self {
            UploadOutcome::Uploaded(o) | UploadOutcome::Duplicate(o) => o,
        }
    }

    pub fn into_object(self) -> RemoteObject {
        match self {
            UploadOutcome::Uploaded(o) | UploadOutcome::Duplicate(o) => o,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, UploadOutcome::Duplicate(_))
    }
}

/// Moves recordings between local disk and the remote store.
///
/// Calls may run concurrently; each transfer owns its own session and
/// only the credential and the folder cache are shared.
pub struct FileSyncService {
    engine: ChunkedTransferEngine,
    folders: FolderIndex,
    dedup: DeduplicationIndex,
    folder_name: String,
}

impl FileSyncService {
    /// Uploads land in the root folder called `folder_name`.
    pub fn new(engine: ChunkedTransferEngine, folder_name: impl Into<String>) -> Self {
        Self {
            folders: FolderIndex::new(engine.clone()),
            dedup: DeduplicationIndex::new(engine.clone()),
            engine,
            folder_name: folder_name.into(),
        }
    }

    /// Builds the service from validated configuration. An explicit
    /// `folder_id` pins the destination folder.
    pub fn from_config(client: TransferClient, config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let engine = ChunkedTransferEngine::new(client, config.transfer_config())?;
        let folders = match &config.folder_id {
            Some(id) => FolderIndex::pinned(
                engine.clone(),
                FolderHandle {
                    remote_id: id.clone(),
                    display_name: config.folder_name.clone(),
                },
            ),
            None => FolderIndex::new(engine.clone()),
        };
        Ok(Self {
            folders,
            dedup: DeduplicationIndex::new(engine.clone()),
            engine,
            folder_name: config.folder_name.clone(),
        })
    }

    pub fn engine(&self) -> &ChunkedTransferEngine {
        &self.engine
    }

    pub fn folders(&self) -> &FolderIndex {
        &self.folders
    }

    pub fn dedup(&self) -> &DeduplicationIndex {
        &self.dedup
    }

    /// Resolves (creating if needed) the configured destination folder.
    pub async fn recordings_folder(
        &self,
        cancel: &CancellationToken,
    ) -> Result<FolderHandle, SyncError> {
        self.folders.ensure_folder(&self.folder_name, cancel).await
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Uploads `local_path` unless identical content already exists
    /// remotely.
    ///
    /// `display_name` defaults to the file name.
    pub async fn upload(
        &self,
        local_path: &Path,
        display_name: Option<&str>,
        tags: &[String],
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let name = match display_name {
            Some(name) => name.to_string(),
            None => file_name(local_path)?,
        };

        let content_hash = hash_file(local_path).await?;
        if let Some(existing) = self.dedup.lookup(&content_hash, cancel).await? {
            info!(
                name = %name,
                remote_id = %existing.remote_id,
                "identical content already uploaded, skipping"
            );
            return Ok(UploadOutcome::Duplicate(existing));
        }

        let folder = self.recordings_folder(cancel).await?;
        let metadata = UploadMetadata {
            name,
            parent_id: folder.remote_id,
            mime_type: mime_type_for(local_path).to_string(),
            size: 0,
            content_hash: content_hash.clone(),
            tags: tags.to_vec(),
        };
        let object = self
            .engine
            .upload(local_path, metadata, progress, cancel)
            .await?;

        // The object exists either way; a failed stamp only weakens future
        // dedup for this content.
        if let Err(e) = self.dedup.record(&content_hash, &object, cancel).await {
            warn!(
                remote_id = %object.remote_id,
                error = %e,
                "failed to record content fingerprint"
            );
        }
        Ok(UploadOutcome::Uploaded(object))
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Downloads `remote_id` to `local_path`, replacing any existing file
    /// only once every byte has arrived.
    ///
    /// Content is not verified; see [`verify_download`](Self::verify_download).
    pub async fn download(
        &self,
        remote_id: &str,
        local_path: &Path,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<RemoteObject, SyncError> {
        Ok(self
            .engine
            .download(remote_id, local_path, progress, cancel)
            .await?)
    }

    /// Compares the SHA-256 of `local_path` with the remote fingerprint.
    ///
    /// Objects without a fingerprint cannot be verified and report `false`.
    pub async fn verify_download(
        &self,
        local_path: &Path,
        remote_id: &str,
    ) -> Result<bool, SyncError> {
        let client = self.engine.client();
        let object = self
            .engine
            .call_with_retry("get_object", &CancellationToken::new(), || {
                client.get_object(remote_id)
            })
            .await?;
        let Some(expected) = object.content_hash else {
            warn!(remote_id, "remote object carries no fingerprint");
            return Ok(false);
        };
        let actual = hash_file(local_path).await?;
        if actual != expected {
            warn!(remote_id, expected = %expected, actual = %actual, "content mismatch");
        }
        Ok(actual == expected)
    }

    // -----------------------------------------------------------------------
    // Listing and deletion
    // -----------------------------------------------------------------------

    /// Every file directly inside `folder_id`, across all pages.
    pub async fn list(&self, folder_id: &str) -> Result<Vec<RemoteObject>, SyncError> {
        let client = self.engine.client();
        let cancel = CancellationToken::new();
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.as_deref();
            let page = self
                .engine
                .call_with_retry("list_children", &cancel, || {
                    client.list_children(folder_id, token)
                })
                .await?;
            files.extend(page.items.into_iter().filter_map(|entry| match entry {
                RemoteEntry::File(object) => Some(object),
                RemoteEntry::Folder(_) => None,
            }));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(files),
            }
        }
    }

    /// Deletes `remote_id`. `Ok(false)` means it was already gone.
    pub async fn delete(&self, remote_id: &str) -> Result<bool, SyncError> {
        let client = self.engine.client();
        let result = self
            .engine
            .call_with_retry("delete", &CancellationToken::new(), || {
                client.delete(remote_id)
            })
            .await;
        match result {
            Ok(()) => {
                info!(remote_id, "deleted remote object");
                Ok(true)
            }
            Err(TransferError::NotFound(_)) => {
                info!(remote_id, "remote object already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn file_name(path: &Path) -> Result<String, SyncError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .ok_or_else(|| {
            SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no file name in {}", path.display()),
            ))
        })
}

async fn hash_file(path: &Path) -> Result<String, SyncError> {
    let path = path.to_path_buf();
    let hash = tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(io::Error::other)??;
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use recsync_protocol::{RemoteError, TransferProgress};
    use recsync_transfer::testing::{MemoryStore, Op, credential_store};
    use recsync_transfer::{RetryPolicy, TransferConfig, sha256_hex};
    use tempfile::TempDir;

    use super::*;
    use crate::error::UserAction;

    fn setup(chunk_size: u64) -> (Arc<MemoryStore>, FileSyncService) {
        let store = Arc::new(MemoryStore::new());
        let client = TransferClient::new(store.clone(), credential_store("tok"));
        let config = TransferConfig {
            chunk_size,
            retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            ..TransferConfig::default()
        };
        let engine = ChunkedTransferEngine::new(client, config).unwrap();
        (store, FileSyncService::new(engine, "Recordings"))
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn upload_builds_metadata() {
        let (store, service) = setup(8);
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "take1.wav", b"0123456789abcdefghij");
        let tags = vec!["interview".to_string()];

        let outcome = service
            .upload(&path, None, &tags, None, &CancellationToken::new())
            .await
            .unwrap();

        let object = outcome.object();
        assert!(!outcome.is_duplicate());
        assert_eq!(object.name, "take1.wav");
        assert_eq!(object.size, 20);
        assert_eq!(object.mime_type.as_deref(), Some("audio/wav"));
        assert_eq!(object.tags, tags);
        assert_eq!(
            object.content_hash.as_deref(),
            Some(sha256_hex(b"0123456789abcdefghij").as_str())
        );
        let folder = store.folders().into_iter().next().unwrap();
        assert_eq!(folder.display_name, "Recordings");
        assert_eq!(object.parent_folder_id.as_deref(), Some(folder.remote_id.as_str()));
        assert_eq!(store.object_data(&object.remote_id).unwrap(), b"0123456789abcdefghij");
        // The upload already carried the fingerprint.
        assert_eq!(store.calls(Op::SetHash), 0);
    }

    #[tokio::test]
    async fn upload_uses_display_name() {
        let (_store, service) = setup(8);
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "rec-0001.m4a", b"abc");

        let object = service
            .upload(&path, Some("Morning memo"), &[], None, &CancellationToken::new())
            .await
            .unwrap()
            .into_object();

        assert_eq!(object.name, "Morning memo");
        assert_eq!(object.mime_type.as_deref(), Some("audio/mp4"));
    }

    #[tokio::test]
    async fn duplicate_skips_transfer() {
        let (store, service) = setup(8);
        let dir = TempDir::new().unwrap();
        let existing = store.add_object(
            "old.wav",
            "root",
            b"same bytes",
            Some(&sha256_hex(b"same bytes")),
        );
        let path = write(&dir, "new.wav", b"same bytes");

        let outcome = service
            .upload(&path, None, &[], None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, UploadOutcome::Duplicate(existing));
        assert_eq!(store.calls(Op::StartUpload), 0);
        assert_eq!(store.calls(Op::UploadChunk), 0);
        assert_eq!(store.calls(Op::CreateFolder), 0);
    }

    #[tokio::test]
    async fn upload_missing_file_is_io() {
        let (store, service) = setup(8);
        let dir = TempDir::new().unwrap();

        let err = service
            .upload(
                &dir.path().join("gone.wav"),
                None,
                &[],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Io(_)));
        assert_eq!(store.calls(Op::FindByHash), 0);
    }

    #[tokio::test]
    async fn upload_cancelled_before_start_touches_nothing() {
        let (store, service) = setup(8);
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.wav", b"abc");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service
            .upload(&path, None, &[], None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(!err.is_user_visible_failure());
        assert_eq!(store.calls(Op::FindByHash), 0);
    }

    #[tokio::test]
    async fn upload_reports_progress() {
        let (_store, service) = setup(8);
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.wav", &[7u8; 20]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = move |p: TransferProgress| sink.lock().unwrap().push(p.bytes_transferred);

        service
            .upload(&path, None, &[], Some(&progress), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![8, 16, 20]);
    }

    #[tokio::test]
    async fn download_and_verify() {
        let (store, service) = setup(4);
        let dir = TempDir::new().unwrap();
        let data = b"recorded audio payload";
        let object = store.add_object("a.wav", "root", data, Some(&sha256_hex(data)));
        let dest = dir.path().join("a.wav");

        let downloaded = service
            .download(&object.remote_id, &dest, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(downloaded.remote_id, object.remote_id);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(service.verify_download(&dest, &object.remote_id).await.unwrap());
    }

    #[tokio::test]
    async fn verify_detects_corruption() {
        let (store, service) = setup(4);
        let dir = TempDir::new().unwrap();
        let data = b"original";
        let object = store.add_object("a.wav", "root", data, Some(&sha256_hex(data)));
        store.corrupt_object(&object.remote_id, b"garbage!");
        let dest = dir.path().join("a.wav");

        service
            .download(&object.remote_id, &dest, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!service.verify_download(&dest, &object.remote_id).await.unwrap());
    }

    #[tokio::test]
    async fn verify_without_fingerprint_is_false() {
        let (store, service) = setup(4);
        let dir = TempDir::new().unwrap();
        let object = store.add_object("a.wav", "root", b"abc", None);
        let dest = write(&dir, "a.wav", b"abc");

        assert!(!service.verify_download(&dest, &object.remote_id).await.unwrap());
    }

    #[tokio::test]
    async fn download_missing_object_is_not_found() {
        let (_store, service) = setup(4);
        let dir = TempDir::new().unwrap();

        let err = service
            .download("nope", &dir.path().join("x"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_aggregates_pages_and_skips_folders() {
        let (store, service) = setup(8);
        store.set_page_size(2);
        let folder = store.add_folder("Recordings", "root");
        store.add_folder("Nested", &folder.remote_id);
        for i in 0..5 {
            store.add_object(&format!("{i}.wav"), &folder.remote_id, b"x", None);
        }
        store.add_object("elsewhere.wav", "root", b"x", None);

        let files = service.list(&folder.remote_id).await.unwrap();

        let names: Vec<_> = files.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["0.wav", "1.wav", "2.wav", "3.wav", "4.wav"]);
        assert_eq!(store.calls(Op::ListChildren), 3);
    }

    #[tokio::test]
    async fn list_empty_folder() {
        let (store, service) = setup(8);
        let folder = store.add_folder("Recordings", "root");

        assert!(service.list(&folder.remote_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoked_grant_asks_for_reauthentication() {
        let (store, service) = setup(8);
        let folder = store.add_folder("Recordings", "root");
        store.fail_next(Op::ListChildren, RemoteError::Unauthorized);
        store.fail_next(Op::ListChildren, RemoteError::Unauthorized);

        let err = service.list(&folder.remote_id).await.unwrap_err();

        assert!(matches!(err, SyncError::RefreshFailed(_)));
        assert_eq!(err.suggested_action(), UserAction::Reauthenticate);
        assert_eq!(store.calls(Op::ListChildren), 2);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let (store, service) = setup(8);
        let object = store.add_object("a.wav", "root", b"x", None);

        assert!(service.delete(&object.remote_id).await.unwrap());
        assert!(!service.delete(&object.remote_id).await.unwrap());
        assert!(store.objects().is_empty());
    }

    #[tokio::test]
    async fn delete_propagates_rejection() {
        let (store, service) = setup(8);
        let object = store.add_object("a.wav", "root", b"x", None);
        store.fail_next(
            Op::Delete,
            RemoteError::Rejected {
                status: 403,
                message: "insufficient permissions".into(),
            },
        );

        let err = service.delete(&object.remote_id).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::TransferRejected(RemoteError::Rejected { status: 403, .. })
        ));
        assert_eq!(store.objects().len(), 1);
    }

    #[tokio::test]
    async fn from_config_pins_explicit_folder() {
        let store = Arc::new(MemoryStore::new());
        let client = TransferClient::new(store.clone(), credential_store("tok"));
        let config = SyncConfig {
            folder_id: Some("shared-folder".into()),
            ..SyncConfig::default()
        };
        let service = FileSyncService::from_config(client, &config).unwrap();
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.wav", b"abc");

        let object = service
            .upload(&path, None, &[], None, &CancellationToken::new())
            .await
            .unwrap()
            .into_object();

        assert_eq!(object.parent_folder_id.as_deref(), Some("shared-folder"));
        assert_eq!(store.calls(Op::ListChildren), 0);
        assert_eq!(store.calls(Op::CreateFolder), 0);
    }

    #[test]
    fn from_config_rejects_invalid_settings() {
        let client = TransferClient::new(Arc::new(MemoryStore::new()), credential_store("tok"));
        let config = SyncConfig {
            chunk_size: 0,
            ..SyncConfig::default()
        };

        assert!(matches!(
            FileSyncService::from_config(client, &config),
            Err(SyncError::Config(_))
        ));
    }
}
