//! Drives one resumable upload or download to a terminal state.
//!
//! Chunks go strictly in order. Cancellation is checked between chunks
//! and during backoff sleeps, never in the middle of a chunk call. After
//! a transient upload failure the engine asks the server how much it
//! actually kept before resending, so a response lost after the server
//! committed the bytes neither duplicates nor drops data.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recsync_protocol::{
    ChunkOutcome, RemoteError, RemoteObject, UploadMetadata, UploadSessionHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunked::{ChunkReader, ChunkWriter};
use crate::client::TransferClient;
use crate::error::{ClientError, TransferError};
use crate::progress::{ProgressFn, ThroughputWindow};
use crate::retry::{Backoff, RetryPolicy};
use crate::types::{Chunk, TransferSession};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT_SECS};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Requested chunk size, rounded down to the adapter's granularity.
    pub chunk_size: u64,
    pub retry: RetryPolicy,
    /// Bound on one remote call; expiry counts as a transient failure.
    pub chunk_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            chunk_timeout: Duration::from_secs(DEFAULT_CHUNK_TIMEOUT_SECS),
        }
    }
}

/// Result of one chunk after retries.
enum ChunkStep<T> {
    Done(T),
    /// The server holds a different committed offset; continue from there.
    Resync(u64),
    /// The server already finished the object.
    Finished(RemoteObject),
}

/// Resumable transfer driver.
#[derive(Clone)]
pub struct ChunkedTransferEngine {
    client: TransferClient,
    config: TransferConfig,
}

impl ChunkedTransferEngine {
    pub fn new(client: TransferClient, config: TransferConfig) -> Result<Self, TransferError> {
        if config.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk size must be positive".into(),
            ));
        }
        if config.retry.max_attempts == 0 {
            return Err(TransferError::InvalidConfig(
                "retry budget must allow at least one attempt".into(),
            ));
        }
        Ok(Self { client, config })
    }

    pub fn client(&self) -> &TransferClient {
        &self.client
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Configured chunk size rounded down to the adapter's granularity,
    /// never below one granule.
    pub fn effective_chunk_size(&self) -> u64 {
        let granule = self.client.chunk_granularity();
        (self.config.chunk_size / granule).max(1) * granule
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Uploads `path` as a new remote object described by `metadata`.
    ///
    /// `metadata.size` is overwritten with the file's size.
    pub async fn upload(
        &self,
        path: &Path,
        mut metadata: UploadMetadata,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<RemoteObject, TransferError> {
        let chunk_size = self.effective_chunk_size();
        let reader = ChunkReader::open(path, chunk_size)?;
        let total = reader.size();
        metadata.size = total;

        check_cancelled(cancel)?;
        let handle = self
            .call_with_retry("start_resumable_upload", cancel, || {
                self.client.start_resumable_upload(&metadata)
            })
            .await?;

        let mut session = TransferSession::new(total, chunk_size);
        session.start(Some(handle.session_uri.clone()));
        info!(
            session = session.session_id(),
            name = %metadata.name,
            total_bytes = total,
            chunk_size,
            "upload started"
        );

        let speed = ThroughputWindow::default();
        speed.record(0);

        let result = self
            .upload_loop(&mut session, reader, &handle, progress, &speed, cancel)
            .await;

        match result {
            Ok(object) => {
                session.complete();
                emit(progress, &session, &speed);
                info!(
                    session = session.session_id(),
                    remote_id = %object.remote_id,
                    bytes = total,
                    elapsed_ms = session.elapsed().unwrap_or_default().as_millis() as u64,
                    "upload completed"
                );
                Ok(object)
            }
            Err(TransferError::Cancelled) => {
                session.cancel();
                info!(
                    session = session.session_id(),
                    bytes = session.bytes_transferred(),
                    "upload cancelled"
                );
                // Best effort; abandoned sessions also expire server-side.
                if let Err(e) = self.client.cancel_upload(&handle).await {
                    warn!(error = %e, "failed to release upload session");
                }
                Err(TransferError::Cancelled)
            }
            Err(e) => {
                session.fail(&e.to_string());
                error!(session = session.session_id(), error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn upload_loop(
        &self,
        session: &mut TransferSession,
        mut reader: ChunkReader,
        handle: &UploadSessionHandle,
        progress: Option<&ProgressFn>,
        speed: &ThroughputWindow,
        cancel: &CancellationToken,
    ) -> Result<RemoteObject, TransferError> {
        let total = session.total_bytes();
        // One budget covers every attempt until the committed offset moves
        // past its previous high point.
        let mut backoff = Backoff::new(&self.config.retry);
        let mut high_water = session.bytes_transferred();
        loop {
            check_cancelled(cancel)?;

            let chunk = match session.next_range() {
                Some(range) => {
                    let (r, chunk) = read_chunk(reader, range.start).await?;
                    reader = r;
                    chunk
                }
                // Empty source: one zero-length call finalizes the object.
                None => Chunk {
                    offset: total,
                    data: Vec::new(),
                },
            };
            let range = chunk.range();

            let step = self
                .chunk_with_retry(session, &mut backoff, cancel, || {
                    self.client.upload_chunk(handle, range, total, &chunk.data)
                })
                .await?;

            let (committed, resynced) = match step {
                ChunkStep::Finished(object) | ChunkStep::Done(ChunkOutcome::Complete(object)) => {
                    return Ok(object);
                }
                ChunkStep::Done(ChunkOutcome::Accepted { committed_bytes }) => {
                    (committed_bytes, false)
                }
                ChunkStep::Resync(offset) => {
                    debug!(
                        session = session.session_id(),
                        from = session.bytes_transferred(),
                        to = offset,
                        "resuming from server-reported offset"
                    );
                    (offset, true)
                }
            };

            if committed > total {
                return Err(TransferError::Rejected(RemoteError::Malformed(format!(
                    "server committed {committed} of {total} bytes"
                ))));
            }
            if committed == total {
                // Every byte is in but no object came back; ask for it.
                return match self.client.query_upload_status(handle, total).await {
                    Ok(ChunkOutcome::Complete(object)) => Ok(object),
                    Ok(ChunkOutcome::Accepted { .. }) => Err(TransferError::Rejected(
                        RemoteError::Malformed("upload finished without an object".into()),
                    )),
                    Err(e) => Err(TransferError::permanent(e)),
                };
            }

            let before = session.bytes_transferred();
            session.set_transferred(committed);
            if committed > high_water {
                high_water = committed;
                backoff.reset();
                speed.record(committed.saturating_sub(before));
                debug!(
                    session = session.session_id(),
                    committed,
                    total,
                    "chunk accepted"
                );
                emit(progress, session, speed);
                continue;
            }
            // A resync already paid for its failed attempt.
            if resynced {
                continue;
            }

            // Acknowledged without progress: a failed attempt like any other.
            let Some(delay) = backoff.fail(None) else {
                return Err(TransferError::Exhausted {
                    attempts: backoff.attempts(),
                    last_error: ClientError::Remote(RemoteError::Malformed(format!(
                        "server kept acknowledging without advancing past {committed} of {total} bytes"
                    ))),
                });
            };
            warn!(
                session = session.session_id(),
                committed,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "chunk acknowledged without progress, backing off"
            );
            session.pause();
            sleep_or_cancel(delay, cancel).await?;
            session.resume();
        }
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Downloads `remote_id` into `dest`.
    ///
    /// Bytes land in `<dest>.part` and are renamed into place once
    /// complete. A failed or cancelled download leaves no partial file.
    pub async fn download(
        &self,
        remote_id: &str,
        dest: &Path,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<RemoteObject, TransferError> {
        check_cancelled(cancel)?;
        let object = self
            .call_with_retry("get_object", cancel, || self.client.get_object(remote_id))
            .await?;

        let chunk_size = self.effective_chunk_size();
        let part = part_path(dest);
        let mut writer = ChunkWriter::create(&part)?;
        let mut session = TransferSession::new(object.size, chunk_size);
        session.start(None);
        info!(
            session = session.session_id(),
            remote_id,
            total_bytes = object.size,
            "download started"
        );

        let speed = ThroughputWindow::default();
        speed.record(0);

        let result = self
            .download_loop(&mut session, &mut writer, remote_id, progress, &speed, cancel)
            .await;
        let result = match result {
            Ok(()) => writer.finish().map_err(TransferError::from),
            Err(e) => {
                drop(writer);
                Err(e)
            }
        };
        let result = match result {
            Ok(written) => tokio::fs::rename(&written, dest)
                .await
                .map_err(TransferError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                session.complete();
                emit(progress, &session, &speed);
                info!(
                    session = session.session_id(),
                    remote_id,
                    dest = %dest.display(),
                    "download completed"
                );
                Ok(object)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %part.display(), error = %rm, "failed to remove partial download");
                }
                if matches!(e, TransferError::Cancelled) {
                    session.cancel();
                    info!(session = session.session_id(), remote_id, "download cancelled");
                } else {
                    session.fail(&e.to_string());
                    error!(session = session.session_id(), remote_id, error = %e, "download failed");
                }
                Err(e)
            }
        }
    }

    async fn download_loop(
        &self,
        session: &mut TransferSession,
        writer: &mut ChunkWriter,
        remote_id: &str,
        progress: Option<&ProgressFn>,
        speed: &ThroughputWindow,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let mut backoff = Backoff::new(&self.config.retry);
        while let Some(range) = session.next_range() {
            check_cancelled(cancel)?;

            let step = self
                .chunk_with_retry(session, &mut backoff, cancel, || {
                    self.client.download_range(remote_id, range)
                })
                .await?;
            let data = match step {
                ChunkStep::Done(data) => data,
                // Downloads carry no upload session to resync against.
                ChunkStep::Resync(_) | ChunkStep::Finished(_) => continue,
            };

            // A short read is fine; an empty or oversized one is not.
            if data.is_empty() || data.len() as u64 > range.len() {
                return Err(TransferError::Rejected(RemoteError::Malformed(format!(
                    "asked for {} bytes at {}, got {}",
                    range.len(),
                    range.start,
                    data.len()
                ))));
            }

            let chunk = Chunk {
                offset: range.start,
                data,
            };
            writer.write_chunk(&chunk)?;
            session.set_transferred(chunk.end());
            backoff.reset();
            speed.record(chunk.data.len() as u64);
            debug!(
                session = session.session_id(),
                written = chunk.end(),
                total = session.total_bytes(),
                "chunk written"
            );
            emit(progress, session, speed);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    /// Runs one chunk call with timeout, backoff and, for uploads, a
    /// status query after every transient failure.
    ///
    /// Failures are charged to `backoff`, which the caller resets only on
    /// forward progress.
    async fn chunk_with_retry<T, F, Fut>(
        &self,
        session: &mut TransferSession,
        backoff: &mut Backoff<'_>,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<ChunkStep<T>, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let offset = session.bytes_transferred();
        let upload = session
            .remote_upload_url()
            .map(|uri| UploadSessionHandle {
                session_uri: uri.to_string(),
            });

        loop {
            let err = match self.bounded(call()).await {
                Ok(value) => return Ok(ChunkStep::Done(value)),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(TransferError::permanent(err));
            }
            let Some(delay) = backoff.fail(err.retry_after()) else {
                return Err(TransferError::Exhausted {
                    attempts: backoff.attempts(),
                    last_error: err,
                });
            };
            warn!(
                session = session.session_id(),
                offset,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient chunk failure, backing off"
            );
            session.pause();
            sleep_or_cancel(delay, cancel).await?;
            session.resume();

            if let Some(handle) = &upload {
                match self
                    .bounded(self.client.query_upload_status(handle, session.total_bytes()))
                    .await
                {
                    Ok(ChunkOutcome::Complete(object)) => return Ok(ChunkStep::Finished(object)),
                    Ok(ChunkOutcome::Accepted { committed_bytes }) if committed_bytes != offset => {
                        return Ok(ChunkStep::Resync(committed_bytes));
                    }
                    Ok(ChunkOutcome::Accepted { .. }) => {}
                    // The resend below surfaces anything persistent.
                    Err(e) => debug!(error = %e, "upload status query failed"),
                }
            }
        }
    }

    /// Runs a single non-chunk remote call under the engine's timeout and
    /// retry policy.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        op: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut backoff = Backoff::new(&self.config.retry);
        loop {
            let err = match self.bounded(call()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_transient() {
                return Err(TransferError::permanent(err));
            }
            let Some(delay) = backoff.fail(err.retry_after()) else {
                return Err(TransferError::Exhausted {
                    attempts: backoff.attempts(),
                    last_error: err,
                });
            };
            warn!(
                op,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, backing off"
            );
            sleep_or_cancel(delay, cancel).await?;
        }
    }

    /// Applies the per-call timeout.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(self.config.chunk_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Remote(RemoteError::Timeout)),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        Err(TransferError::Cancelled)
    } else {
        Ok(())
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), TransferError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
    }
}

fn emit(progress: Option<&ProgressFn>, session: &TransferSession, speed: &ThroughputWindow) {
    if let Some(cb) = progress {
        cb(session.progress(speed.bytes_per_second()));
    }
}

/// Reads the chunk at `offset` on the blocking pool.
async fn read_chunk(
    mut reader: ChunkReader,
    offset: u64,
) -> Result<(ChunkReader, Chunk), TransferError> {
    let joined = tokio::task::spawn_blocking(move || {
        let chunk = reader.read_at(offset)?;
        Ok::<_, std::io::Error>((reader, chunk))
    })
    .await
    .map_err(std::io::Error::other)?;
    Ok(joined?)
}

/// `<dest>.part`, next to the destination.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, Op, credential_store};
    use recsync_protocol::{ByteRange, TransferProgress};
    use std::sync::{Arc, Mutex};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    fn engine(store: &Arc<MemoryStore>, chunk_size: u64, max_attempts: u32) -> ChunkedTransferEngine {
        let client = TransferClient::new(store.clone(), credential_store("tok"));
        ChunkedTransferEngine::new(
            client,
            TransferConfig {
                chunk_size,
                retry: fast_retry(max_attempts),
                chunk_timeout: Duration::from_secs(60),
            },
        )
        .unwrap()
    }

    fn source(dir: &tempfile::TempDir, data: &[u8]) -> PathBuf {
        let path = dir.path().join("save.dat");
        std::fs::write(&path, data).unwrap();
        path
    }

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            name: "save.dat".into(),
            parent_id: "root".into(),
            mime_type: "application/octet-stream".into(),
            size: 0,
            content_hash: "abc".into(),
            tags: vec![],
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn ranges(log: &[ByteRange]) -> Vec<(u64, u64)> {
        log.iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn rejects_degenerate_config() {
        let store = Arc::new(MemoryStore::new());
        let client = TransferClient::new(store.clone(), credential_store("tok"));
        let zero_chunk = TransferConfig {
            chunk_size: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(
            ChunkedTransferEngine::new(client.clone(), zero_chunk),
            Err(TransferError::InvalidConfig(_))
        ));
        let zero_attempts = TransferConfig {
            retry: fast_retry(0),
            ..TransferConfig::default()
        };
        assert!(matches!(
            ChunkedTransferEngine::new(client, zero_attempts),
            Err(TransferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn chunk_size_rounds_down_to_granularity() {
        let store = Arc::new(MemoryStore::new());
        store.set_granularity(4);
        assert_eq!(engine(&store, 10, 3).effective_chunk_size(), 8);
        assert_eq!(engine(&store, 3, 3).effective_chunk_size(), 4);
    }

    #[tokio::test]
    async fn uploads_in_order_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(20);
        let path = source(&dir, &data);
        let store = Arc::new(MemoryStore::new());
        store.set_granularity(4);

        let seen = Arc::new(Mutex::new(Vec::<TransferProgress>::new()));
        let sink = seen.clone();
        let progress = move |p: TransferProgress| sink.lock().unwrap().push(p);

        let object = engine(&store, 10, 3)
            .upload(&path, metadata(), Some(&progress), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(object.size, 20);
        assert_eq!(store.object_data(&object.remote_id).unwrap(), data);
        assert_eq!(ranges(&store.chunk_log()), vec![(0, 8), (8, 16), (16, 20)]);

        let seen = seen.lock().unwrap();
        let bytes: Vec<u64> = seen.iter().map(|p| p.bytes_transferred).collect();
        assert_eq!(bytes, vec![8, 16, 20]);
        assert_eq!(seen.last().unwrap().percent, Some(100.0));
    }

    #[tokio::test]
    async fn empty_file_sends_one_empty_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, b"");
        let store = Arc::new(MemoryStore::new());

        let object = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(object.size, 0);
        assert_eq!(ranges(&store.chunk_log()), vec![(0, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_response_resumes_from_committed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(20);
        let path = source(&dir, &data);
        let store = Arc::new(MemoryStore::new());
        store.fail_next_after_commit(
            Op::UploadChunk,
            RemoteError::Network("connection reset".into()),
        );

        let object = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap();

        // The first chunk landed despite the error, so it is not resent.
        assert_eq!(ranges(&store.chunk_log()), vec![(0, 8), (8, 16), (16, 20)]);
        assert_eq!(store.calls(Op::QueryStatus), 1);
        assert_eq!(store.object_data(&object.remote_id).unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_before_commit_resends_the_same_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(20);
        let path = source(&dir, &data);
        let store = Arc::new(MemoryStore::new());
        store.fail_next(
            Op::UploadChunk,
            RemoteError::Server {
                status: 503,
                message: "unavailable".into(),
            },
        );

        let object = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.calls(Op::UploadChunk), 4);
        assert_eq!(store.object_data(&object.remote_id).unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_final_response_completes_via_status_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, &pattern(6));
        let store = Arc::new(MemoryStore::new());
        store.fail_next_after_commit(Op::UploadChunk, RemoteError::Timeout);

        let object = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.calls(Op::UploadChunk), 1);
        assert_eq!(store.objects(), vec![object]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_attempts_and_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, &pattern(20));
        let store = Arc::new(MemoryStore::new());
        for _ in 0..3 {
            store.fail_next(Op::UploadChunk, RemoteError::Network("down".into()));
        }

        let err = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TransferError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    last_error,
                    ClientError::Remote(RemoteError::Network("down".into()))
                );
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(store.calls(Op::UploadChunk), 3);
        assert!(store.objects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgements_without_progress_exhaust_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, &pattern(20));
        let store = Arc::new(MemoryStore::new());
        store.drop_next_chunks(usize::MAX);

        let err = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TransferError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    last_error,
                    ClientError::Remote(RemoteError::Malformed(_))
                ));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(store.calls(Op::UploadChunk), 3);
        assert!(store.objects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_after_stalled_acknowledgements_restores_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(20);
        let path = source(&dir, &data);
        let store = Arc::new(MemoryStore::new());
        store.drop_next_chunks(2);

        let object = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            ranges(&store.chunk_log()),
            vec![(0, 8), (0, 8), (0, 8), (8, 16), (16, 20)]
        );
        assert_eq!(store.object_data(&object.remote_id).unwrap(), data);
    }

    #[tokio::test]
    async fn quota_exceeded_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, &pattern(20));
        let store = Arc::new(MemoryStore::new());
        store.set_quota_limit(Some(10));

        let err = engine(&store, 8, 5)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Rejected(RemoteError::QuotaExceeded(_))
        ));
        assert_eq!(store.calls(Op::UploadChunk), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_chunk_times_out_and_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(20);
        let path = source(&dir, &data);
        let store = Arc::new(MemoryStore::new());
        store.stall_next(Op::UploadChunk, Duration::from_secs(600));

        let object = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.calls(Op::UploadChunk), 4);
        assert_eq!(store.object_data(&object.remote_id).unwrap(), data);
    }

    #[tokio::test]
    async fn cancel_between_chunks_stops_and_releases_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, &pattern(20));
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let progress = move |_: TransferProgress| trigger.cancel();

        let err = engine(&store, 8, 3)
            .upload(&path, metadata(), Some(&progress), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(store.calls(Op::UploadChunk), 1);
        assert_eq!(store.cancelled_sessions().len(), 1);
        assert!(store.objects().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(&dir, &pattern(4));
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine(&store, 8, 3)
            .upload(&path, metadata(), None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(store.calls(Op::StartUpload), 0);
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let err = engine(&store, 8, 3)
            .upload(
                &dir.path().join("absent"),
                metadata(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
        assert_eq!(store.calls(Op::StartUpload), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(21);
        let store = Arc::new(MemoryStore::new());
        let remote = store.add_object("save.dat", "root", &data, None);
        store.fail_next(Op::DownloadRange, RemoteError::Network("blip".into()));

        let dest = dir.path().join("out").join("save.dat");
        let object = engine(&store, 8, 3)
            .download(&remote.remote_id, &dest, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(object, remote);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(!part_path(&dest).exists());
        // Three ranges plus the one retried.
        assert_eq!(store.calls(Op::DownloadRange), 4);
    }

    #[tokio::test]
    async fn failed_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let remote = store.add_object("save.dat", "root", &pattern(20), None);
        store.stall_next(Op::DownloadRange, Duration::ZERO);
        store.fail_next(
            Op::DownloadRange,
            RemoteError::Rejected {
                status: 403,
                message: "forbidden".into(),
            },
        );

        let dest = dir.path().join("save.dat");
        let err = engine(&store, 8, 3)
            .download(&remote.remote_id, &dest, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Rejected(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn download_of_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let err = engine(&store, 8, 3)
            .download("nope", &dir.path().join("x"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound(id) if id == "nope"));
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/a/save.dat")),
            PathBuf::from("/tmp/a/save.dat.part")
        );
    }
}
