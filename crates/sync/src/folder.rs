//! Destination folder resolution.

use std::collections::HashMap;

use recsync_protocol::{FolderHandle, RemoteEntry};
use recsync_transfer::ChunkedTransferEngine;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;

#[derive(Default)]
struct Cache {
    pinned: Option<FolderHandle>,
    by_name: HashMap<String, FolderHandle>,
}

/// Resolves folder names under the provider root to remote ids.
///
/// First resolution of a name holds the cache lock across the remote
/// lookup, so concurrent callers in this process issue one create at most.
/// Other processes can still race; duplicate remote folders are tolerated
/// and the first match wins on lookup.
pub struct FolderIndex {
    engine: ChunkedTransferEngine,
    cache: Mutex<Cache>,
}

impl FolderIndex {
    pub fn new(engine: ChunkedTransferEngine) -> Self {
        Self {
            engine,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// An index that resolves every name to `folder`.
    pub fn pinned(engine: ChunkedTransferEngine, folder: FolderHandle) -> Self {
        Self {
            engine,
            cache: Mutex::new(Cache {
                pinned: Some(folder),
                by_name: HashMap::new(),
            }),
        }
    }

    /// Returns the folder called `name` under the root, creating it if
    /// absent. An override set via [`override_folder`](Self::override_folder)
    /// wins over any name.
    pub async fn ensure_folder(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<FolderHandle, SyncError> {
        let mut cache = self.cache.lock().await;
        if let Some(folder) = &cache.pinned {
            return Ok(folder.clone());
        }
        if let Some(folder) = cache.by_name.get(name) {
            return Ok(folder.clone());
        }

        let folder = match self.find_root_folder(name, cancel).await? {
            Some(folder) => {
                debug!(name, remote_id = %folder.remote_id, "found existing folder");
                folder
            }
            None => {
                let client = self.engine.client();
                let root = client.root_folder_id();
                let folder = self
                    .engine
                    .call_with_retry("create_folder", cancel, || {
                        client.create_folder(name, root)
                    })
                    .await?;
                info!(name, remote_id = %folder.remote_id, "created folder");
                folder
            }
        };
        cache.by_name.insert(name.to_string(), folder.clone());
        Ok(folder)
    }

    /// Pins an explicit folder, bypassing lookup and creation.
    pub async fn override_folder(&self, folder: FolderHandle) {
        info!(remote_id = %folder.remote_id, "folder override set");
        self.cache.lock().await.pinned = Some(folder);
    }

    async fn find_root_folder(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<FolderHandle>, SyncError> {
        let client = self.engine.client();
        let root = client.root_folder_id();
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.as_deref();
            let page = self
                .engine
                .call_with_retry("list_children", cancel, || client.list_children(root, token))
                .await?;
            let found = page.items.into_iter().find_map(|entry| match entry {
                RemoteEntry::Folder(folder) if folder.display_name == name => Some(folder),
                _ => None,
            });
            if found.is_some() {
                return Ok(found);
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(None),
            }
        }
    }
}
