//! Shared data model for the recsync synchronization engine.
//!
//! Everything that crosses a crate boundary lives here: credentials,
//! remote objects and folders, transfer progress snapshots, and the
//! [`RemoteError`] taxonomy every provider adapter reports through.

pub mod error;
pub mod types;

pub use error::RemoteError;
pub use types::{
    ByteRange, ChunkOutcome, Credential, FolderHandle, Page, QuotaInfo, RemoteEntry, RemoteObject,
    TransferProgress, TransferState, UploadMetadata, UploadSessionHandle,
};

/// Private remote property carrying the SHA-256 content fingerprint.
pub const CONTENT_HASH_PROPERTY: &str = "recsyncSha256";

/// Private remote property carrying comma-joined user tags.
pub const TAGS_PROPERTY: &str = "recsyncTags";
