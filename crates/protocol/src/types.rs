use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// OAuth-style bearer credential.
///
/// Owned by the credential store; other components only ever see the
/// access token string it hands out per call.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Credential {
    /// Returns `true` if the access token stays valid for at least `grace`
    /// past `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.expires_at - grace > now
    }

    /// Returns `true` if a refresh can be attempted.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// A file that exists on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub remote_id: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A resolved destination folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderHandle {
    pub remote_id: String,
    pub display_name: String,
}

/// One child of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEntry {
    File(RemoteObject),
    Folder(FolderHandle),
}

impl RemoteEntry {
    /// Display name of the entry regardless of kind.
    pub fn name(&self) -> &str {
        match self {
            RemoteEntry::File(obj) => &obj.name,
            RemoteEntry::Folder(folder) => &folder.display_name,
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// A final page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Metadata sent when opening a resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub name: String,
    pub parent_id: String,
    pub mime_type: String,
    pub size: u64,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Opaque handle to a server-side resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSessionHandle {
    pub session_uri: String,
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted byte range {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Content-Range` value for an upload chunk of a `total`-byte object.
    pub fn content_range(&self, total: u64) -> String {
        if self.is_empty() {
            format!("bytes */{total}")
        } else {
            format!("bytes {}-{}/{total}", self.start, self.end - 1)
        }
    }

    /// `Range` request header value for a download.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Server response to an uploaded chunk or a session status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The server has durably received the first `committed_bytes` bytes.
    Accepted { committed_bytes: u64 },
    /// The final byte arrived and the object now exists.
    Complete(RemoteObject),
}

/// Lifecycle of a single resumable transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }
}

/// Progress snapshot pushed to caller callbacks. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// `None` when the total is unknown (zero), i.e. indeterminate.
    pub percent: Option<f64>,
    #[serde(default)]
    pub bytes_per_second: f64,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes > 0 {
            Some(bytes_transferred as f64 / total_bytes as f64 * 100.0)
        } else {
            None
        };
        Self {
            bytes_transferred,
            total_bytes,
            percent,
            bytes_per_second: 0.0,
        }
    }

    pub fn with_speed(mut self, bytes_per_second: f64) -> Self {
        self.bytes_per_second = bytes_per_second;
        self
    }

    pub fn is_indeterminate(&self) -> bool {
        self.percent.is_none()
    }
}

/// Remote storage usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub used_bytes: u64,
    /// `None` for accounts without a storage cap.
    pub limit_bytes: Option<u64>,
}

impl QuotaInfo {
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.limit_bytes
            .map(|limit| limit.saturating_sub(self.used_bytes))
    }

    /// Fraction of the limit in use, 0.0-1.0.
    pub fn usage_fraction(&self) -> Option<f64> {
        match self.limit_bytes {
            Some(0) | None => None,
            Some(limit) => Some(self.used_bytes as f64 / limit as f64),
        }
    }
}
