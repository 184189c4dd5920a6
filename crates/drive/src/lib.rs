//! Google Drive v3 adapter.
//!
//! Implements [`recsync_transfer::RemoteStore`] over the Drive REST API:
//! resumable uploads, ranged media downloads, and content fingerprints
//! kept in each file's private `appProperties`.

pub mod client;
pub mod types;

pub use client::{CHUNK_GRANULARITY, DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE, DriveStore};
