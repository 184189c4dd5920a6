//! Resumable chunked transfers against a remote object store.
//!
//! [`RemoteStore`] is the provider adapter boundary, [`TransferClient`]
//! binds it to the live credential, and [`ChunkedTransferEngine`] drives
//! one upload or download to a terminal state.

mod chunked;
mod client;
mod engine;
mod error;
mod progress;
mod retry;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chunked::{ChunkReader, ChunkWriter, sha256_file, sha256_hex};
pub use client::{RemoteFuture, RemoteStore, TransferClient};
pub use engine::{ChunkedTransferEngine, TransferConfig};
pub use error::{ClientError, TransferError};
pub use progress::{ProgressFn, ThroughputWindow};
pub use retry::{Backoff, RetryPolicy};
pub use types::{Chunk, TransferSession};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default bound on a single chunk call.
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 60;
