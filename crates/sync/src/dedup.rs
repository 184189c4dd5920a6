//! Content-hash deduplication.
//!
//! The fingerprint lives on the remote object itself, so lookups survive
//! restarts and always reflect what the remote actually holds.

use chrono::{DateTime, Utc};
use recsync_protocol::RemoteObject;
use recsync_transfer::ChunkedTransferEngine;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SyncError;

/// A fingerprint recorded against an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub content_hash: String,
    pub remote_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Global, hash-keyed duplicate detection.
pub struct DeduplicationIndex {
    engine: ChunkedTransferEngine,
}

impl DeduplicationIndex {
    pub fn new(engine: ChunkedTransferEngine) -> Self {
        Self { engine }
    }

    /// First remote object carrying `content_hash`, if any.
    pub async fn lookup(
        &self,
        content_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteObject>, SyncError> {
        let client = self.engine.client();
        let found = self
            .engine
            .call_with_retry("find_by_content_hash", cancel, || {
                client.find_by_content_hash(content_hash)
            })
            .await?;
        debug!(
            content_hash,
            remote_id = found.as_ref().map(|o| o.remote_id.as_str()),
            "dedup lookup"
        );
        Ok(found)
    }

    /// Records `content_hash` against a freshly uploaded object, stamping
    /// the remote unless the upload already carried the fingerprint.
    pub async fn record(
        &self,
        content_hash: &str,
        object: &RemoteObject,
        cancel: &CancellationToken,
    ) -> Result<DedupEntry, SyncError> {
        if object.content_hash.as_deref() != Some(content_hash) {
            let client = self.engine.client();
            self.engine
                .call_with_retry("set_content_hash", cancel, || {
                    client.set_content_hash(&object.remote_id, content_hash)
                })
                .await?;
        }
        let entry = DedupEntry {
            content_hash: content_hash.to_string(),
            remote_id: object.remote_id.clone(),
            recorded_at: Utc::now(),
        };
        debug!(content_hash, remote_id = %object.remote_id, "recorded fingerprint");
        Ok(entry)
    }
}
