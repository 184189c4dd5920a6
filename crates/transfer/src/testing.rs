//! In-memory [`RemoteStore`] and credential fixtures for tests.
//!
//! Enabled by the `testing` feature so downstream crates can drive the
//! engine end to end without a network.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use recsync_credentials::{
    CredentialError, CredentialOptions, CredentialStore, MemoryBackend, TokenEndpoint,
};
use recsync_protocol::{
    ByteRange, ChunkOutcome, Credential, FolderHandle, Page, QuotaInfo, RemoteEntry, RemoteError,
    RemoteObject, UploadMetadata, UploadSessionHandle,
};

use crate::client::{RemoteFuture, RemoteStore};

/// Store operations, for call counting and failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateFolder,
    ListChildren,
    StartUpload,
    UploadChunk,
    QueryStatus,
    CancelUpload,
    GetObject,
    DownloadRange,
    Delete,
    GetQuota,
    FindByHash,
    SetHash,
}

enum Script {
    /// Fail before doing anything.
    Fail(RemoteError),
    /// Do the work, then lose the response.
    FailAfterCommit(RemoteError),
    /// Sleep before answering.
    Stall(Duration),
}

struct StoredObject {
    object: RemoteObject,
    data: Vec<u8>,
}

struct UploadState {
    metadata: UploadMetadata,
    received: Vec<u8>,
    finished: Option<RemoteObject>,
}

#[derive(Default)]
struct State {
    folders: Vec<(FolderHandle, String)>,
    objects: Vec<StoredObject>,
    sessions: HashMap<String, UploadState>,
    cancelled_sessions: Vec<String>,
    chunk_log: Vec<ByteRange>,
    calls: HashMap<Op, usize>,
    scripts: HashMap<Op, VecDeque<Script>>,
    tokens: Vec<String>,
    next_id: u64,
    page_size: usize,
    granularity: u64,
    quota_limit: Option<u64>,
    dropped_chunks: usize,
}

/// A remote store held entirely in memory.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: 100,
                granularity: 1,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- scripting --------------------------------------------------------

    /// The next call to `op` fails with `err` without side effects.
    pub fn fail_next(&self, op: Op, err: RemoteError) {
        self.push_script(op, Script::Fail(err));
    }

    /// The next call to `op` takes effect but its response is lost.
    pub fn fail_next_after_commit(&self, op: Op, err: RemoteError) {
        self.push_script(op, Script::FailAfterCommit(err));
    }

    /// The next call to `op` sleeps for `delay` before answering.
    pub fn stall_next(&self, op: Op, delay: Duration) {
        self.push_script(op, Script::Stall(delay));
    }

    fn push_script(&self, op: Op, script: Script) {
        self.state().scripts.entry(op).or_default().push_back(script);
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size.max(1);
    }

    pub fn set_granularity(&self, granularity: u64) {
        self.state().granularity = granularity.max(1);
    }

    pub fn set_quota_limit(&self, limit: Option<u64>) {
        self.state().quota_limit = limit;
    }

    /// The next `count` upload chunks are acknowledged but not kept, so
    /// the committed offset does not move.
    pub fn drop_next_chunks(&self, count: usize) {
        self.state().dropped_chunks = count;
    }

    // -- seeding ----------------------------------------------------------

    pub fn add_folder(&self, name: &str, parent_id: &str) -> FolderHandle {
        let mut s = self.state();
        s.next_id += 1;
        let folder = FolderHandle {
            remote_id: format!("folder-{}", s.next_id),
            display_name: name.to_string(),
        };
        s.folders.push((folder.clone(), parent_id.to_string()));
        folder
    }

    pub fn add_object(
        &self,
        name: &str,
        parent_id: &str,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> RemoteObject {
        let mut s = self.state();
        s.next_id += 1;
        let object = RemoteObject {
            remote_id: format!("file-{}", s.next_id),
            name: name.to_string(),
            size: data.len() as u64,
            content_hash: content_hash.map(String::from),
            parent_folder_id: Some(parent_id.to_string()),
            etag: Some(format!("etag-{}", s.next_id)),
            mime_type: None,
            tags: vec![],
        };
        s.objects.push(StoredObject {
            object: object.clone(),
            data: data.to_vec(),
        });
        object
    }

    /// Overwrites an object's bytes in place (simulated corruption).
    pub fn corrupt_object(&self, remote_id: &str, data: &[u8]) {
        if let Some(o) = self
            .state()
            .objects
            .iter_mut()
            .find(|o| o.object.remote_id == remote_id)
        {
            o.data = data.to_vec();
        }
    }

    // -- inspection -------------------------------------------------------

    pub fn calls(&self, op: Op) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.state().tokens.clone()
    }

    pub fn objects(&self) -> Vec<RemoteObject> {
        self.state().objects.iter().map(|o| o.object.clone()).collect()
    }

    pub fn object_data(&self, remote_id: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .iter()
            .find(|o| o.object.remote_id == remote_id)
            .map(|o| o.data.clone())
    }

    pub fn folders(&self) -> Vec<FolderHandle> {
        self.state().folders.iter().map(|(f, _)| f.clone()).collect()
    }

    /// Ranges of every upload chunk call, in order.
    pub fn chunk_log(&self) -> Vec<ByteRange> {
        self.state().chunk_log.clone()
    }

    pub fn cancelled_sessions(&self) -> Vec<String> {
        self.state().cancelled_sessions.clone()
    }

    // -- plumbing ---------------------------------------------------------

    /// Records the call and applies any script. `Ok(Some(e))` means the
    /// call should take effect and then fail with `e`.
    async fn enter(&self, op: Op, token: &str) -> Result<Option<RemoteError>, RemoteError> {
        let script = {
            let mut s = self.state();
            *s.calls.entry(op).or_default() += 1;
            s.tokens.push(token.to_string());
            s.scripts.get_mut(&op).and_then(VecDeque::pop_front)
        };
        match script {
            None => Ok(None),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::FailAfterCommit(e)) => Ok(Some(e)),
            Some(Script::Stall(d)) => {
                tokio::time::sleep(d).await;
                Ok(None)
            }
        }
    }

    fn next_id(s: &mut State, prefix: &str) -> String {
        s.next_id += 1;
        format!("{prefix}-{}", s.next_id)
    }

    fn find_object<'s>(s: &'s State, remote_id: &str) -> Result<&'s StoredObject, RemoteError> {
        s.objects
            .iter()
            .find(|o| o.object.remote_id == remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))
    }

    fn do_upload_chunk(
        &self,
        session: &UploadSessionHandle,
        range: ByteRange,
        total: u64,
        data: &[u8],
    ) -> Result<ChunkOutcome, RemoteError> {
        let mut s = self.state();
        s.chunk_log.push(range);
        let granularity = s.granularity;
        let used: u64 = s.objects.iter().map(|o| o.object.size).sum();
        let quota_limit = s.quota_limit;
        let dropped = s.dropped_chunks > 0;
        if dropped {
            s.dropped_chunks -= 1;
        }

        let upload = s
            .sessions
            .get_mut(&session.session_uri)
            .ok_or(RemoteError::SessionExpired)?;
        if let Some(obj) = &upload.finished {
            return Ok(ChunkOutcome::Complete(obj.clone()));
        }
        if range.len() != data.len() as u64 || total != upload.metadata.size {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "range does not match payload".into(),
            });
        }
        if range.start > upload.received.len() as u64 {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "non-contiguous chunk".into(),
            });
        }
        if range.end < total && range.len() % granularity != 0 {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "chunk not aligned to granularity".into(),
            });
        }
        if let Some(limit) = quota_limit
            && used + total > limit
        {
            return Err(RemoteError::QuotaExceeded("storage quota exceeded".into()));
        }

        if dropped {
            return Ok(ChunkOutcome::Accepted {
                committed_bytes: upload.received.len() as u64,
            });
        }

        upload.received.truncate(range.start as usize);
        upload.received.extend_from_slice(data);
        let committed = upload.received.len() as u64;
        if committed < total {
            return Ok(ChunkOutcome::Accepted {
                committed_bytes: committed,
            });
        }

        let metadata = upload.metadata.clone();
        let bytes = std::mem::take(&mut upload.received);
        let remote_id = Self::next_id(&mut s, "file");
        let object = RemoteObject {
            remote_id: remote_id.clone(),
            name: metadata.name,
            size: total,
            content_hash: Some(metadata.content_hash),
            parent_folder_id: Some(metadata.parent_id),
            etag: Some(format!("etag-{remote_id}")),
            mime_type: Some(metadata.mime_type),
            tags: metadata.tags,
        };
        s.objects.push(StoredObject {
            object: object.clone(),
            data: bytes,
        });
        if let Some(upload) = s.sessions.get_mut(&session.session_uri) {
            upload.finished = Some(object.clone());
        }
        Ok(ChunkOutcome::Complete(object))
    }
}

fn lose<T>(result: Result<T, RemoteError>, lost: Option<RemoteError>) -> Result<T, RemoteError> {
    match lost {
        Some(e) if result.is_ok() => Err(e),
        _ => result,
    }
}

impl RemoteStore for MemoryStore {
    fn root_folder_id(&self) -> &str {
        "root"
    }

    fn chunk_granularity(&self) -> u64 {
        self.state().granularity
    }

    fn create_folder<'a>(
        &'a self,
        token: &'a str,
        name: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, FolderHandle> {
        Box::pin(async move {
            let lost = self.enter(Op::CreateFolder, token).await?;
            lose(Ok(self.add_folder(name, parent_id)), lost)
        })
    }

    fn list_children<'a>(
        &'a self,
        token: &'a str,
        folder_id: &'a str,
        page_token: Option<&'a str>,
    ) -> RemoteFuture<'a, Page<RemoteEntry>> {
        Box::pin(async move {
            let lost = self.enter(Op::ListChildren, token).await?;
            let s = self.state();
            let entries: Vec<RemoteEntry> = s
                .folders
                .iter()
                .filter(|(_, parent)| parent == folder_id)
                .map(|(f, _)| RemoteEntry::Folder(f.clone()))
                .chain(
                    s.objects
                        .iter()
                        .filter(|o| o.object.parent_folder_id.as_deref() == Some(folder_id))
                        .map(|o| RemoteEntry::File(o.object.clone())),
                )
                .collect();
            let start: usize = match page_token {
                Some(t) => t.parse().map_err(|_| RemoteError::Rejected {
                    status: 400,
                    message: "bad page token".into(),
                })?,
                None => 0,
            };
            let end = (start + s.page_size).min(entries.len());
            let next_page_token = (end < entries.len()).then(|| end.to_string());
            let items = entries.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
            lose(
                Ok(Page {
                    items,
                    next_page_token,
                }),
                lost,
            )
        })
    }

    fn start_resumable_upload<'a>(
        &'a self,
        token: &'a str,
        metadata: &'a UploadMetadata,
    ) -> RemoteFuture<'a, UploadSessionHandle> {
        Box::pin(async move {
            let lost = self.enter(Op::StartUpload, token).await?;
            let mut s = self.state();
            let uri = format!("mem://upload/{}", Self::next_id(&mut s, "session"));
            s.sessions.insert(
                uri.clone(),
                UploadState {
                    metadata: metadata.clone(),
                    received: Vec::new(),
                    finished: None,
                },
            );
            lose(Ok(UploadSessionHandle { session_uri: uri }), lost)
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
        range: ByteRange,
        total: u64,
        data: &'a [u8],
    ) -> RemoteFuture<'a, ChunkOutcome> {
        Box::pin(async move {
            let lost = self.enter(Op::UploadChunk, token).await?;
            lose(self.do_upload_chunk(session, range, total, data), lost)
        })
    }

    fn query_upload_status<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
        _total: u64,
    ) -> RemoteFuture<'a, ChunkOutcome> {
        Box::pin(async move {
            let lost = self.enter(Op::QueryStatus, token).await?;
            let s = self.state();
            let upload = s
                .sessions
                .get(&session.session_uri)
                .ok_or(RemoteError::SessionExpired)?;
            let outcome = match &upload.finished {
                Some(obj) => ChunkOutcome::Complete(obj.clone()),
                None => ChunkOutcome::Accepted {
                    committed_bytes: upload.received.len() as u64,
                },
            };
            lose(Ok(outcome), lost)
        })
    }

    fn cancel_upload<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let lost = self.enter(Op::CancelUpload, token).await?;
            let mut s = self.state();
            s.sessions.remove(&session.session_uri);
            s.cancelled_sessions.push(session.session_uri.clone());
            lose(Ok(()), lost)
        })
    }

    fn get_object<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
    ) -> RemoteFuture<'a, RemoteObject> {
        Box::pin(async move {
            let lost = self.enter(Op::GetObject, token).await?;
            let s = self.state();
            let result = Self::find_object(&s, remote_id).map(|o| o.object.clone());
            lose(result, lost)
        })
    }

    fn download_range<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
        range: ByteRange,
    ) -> RemoteFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let lost = self.enter(Op::DownloadRange, token).await?;
            let s = self.state();
            let result = Self::find_object(&s, remote_id).map(|o| {
                let len = o.data.len() as u64;
                let start = range.start.min(len) as usize;
                let end = range.end.min(len) as usize;
                o.data[start..end].to_vec()
            });
            lose(result, lost)
        })
    }

    fn delete<'a>(&'a self, token: &'a str, remote_id: &'a str) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let lost = self.enter(Op::Delete, token).await?;
            let mut s = self.state();
            let before = s.objects.len();
            s.objects.retain(|o| o.object.remote_id != remote_id);
            let result = if s.objects.len() < before {
                Ok(())
            } else {
                Err(RemoteError::NotFound(remote_id.to_string()))
            };
            lose(result, lost)
        })
    }

    fn get_quota<'a>(&'a self, token: &'a str) -> RemoteFuture<'a, QuotaInfo> {
        Box::pin(async move {
            let lost = self.enter(Op::GetQuota, token).await?;
            let s = self.state();
            let quota = QuotaInfo {
                used_bytes: s.objects.iter().map(|o| o.object.size).sum(),
                limit_bytes: s.quota_limit,
            };
            lose(Ok(quota), lost)
        })
    }

    fn find_by_content_hash<'a>(
        &'a self,
        token: &'a str,
        content_hash: &'a str,
    ) -> RemoteFuture<'a, Option<RemoteObject>> {
        Box::pin(async move {
            let lost = self.enter(Op::FindByHash, token).await?;
            let s = self.state();
            let found = s
                .objects
                .iter()
                .find(|o| o.object.content_hash.as_deref() == Some(content_hash))
                .map(|o| o.object.clone());
            lose(Ok(found), lost)
        })
    }

    fn set_content_hash<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
        content_hash: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let lost = self.enter(Op::SetHash, token).await?;
            let mut s = self.state();
            let result = match s.objects.iter_mut().find(|o| o.object.remote_id == remote_id) {
                Some(o) => {
                    o.object.content_hash = Some(content_hash.to_string());
                    Ok(())
                }
                None => Err(RemoteError::NotFound(remote_id.to_string())),
            };
            lose(result, lost)
        })
    }
}

// ---------------------------------------------------------------------------
// Credential fixtures
// ---------------------------------------------------------------------------

/// Token endpoint that hands out a fixed token on refresh.
pub struct StaticEndpoint {
    refreshed_token: String,
    refreshes: AtomicUsize,
}

impl StaticEndpoint {
    pub fn new(refreshed_token: &str) -> Arc<Self> {
        Arc::new(Self {
            refreshed_token: refreshed_token.to_string(),
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl TokenEndpoint for StaticEndpoint {
    fn authorization_url(&self, state: &str, _code_challenge: &str, redirect_uri: &str) -> String {
        format!("{redirect_uri}?state={state}")
    }

    fn exchange_code<'a>(
        &'a self,
        _code: &'a str,
        _code_verifier: &'a str,
        _redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, CredentialError>> + Send + 'a>> {
        Box::pin(async { Err(CredentialError::ConsentDenied("not interactive".into())) })
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, CredentialError>> + Send + 'a>> {
        Box::pin(async move {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                access_token: self.refreshed_token.clone(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                refresh_token: None,
                scopes: vec![],
            })
        })
    }
}

fn credential(token: &str) -> Credential {
    Credential {
        access_token: token.to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        refresh_token: Some("refresh".into()),
        scopes: vec![],
    }
}

/// A store holding a valid `token`.
pub fn credential_store(token: &str) -> CredentialStore {
    expiring_credential_store(token, &format!("{token}-refreshed")).0
}

/// A store holding `first`, refreshing to `second` when `first` is
/// rejected.
pub fn expiring_credential_store(
    first: &str,
    second: &str,
) -> (CredentialStore, Arc<StaticEndpoint>) {
    let endpoint = StaticEndpoint::new(second);
    let store = CredentialStore::new(
        Box::new(MemoryBackend::with_credential(credential(first))),
        Some(endpoint.clone() as Arc<dyn TokenEndpoint>),
        CredentialOptions::default(),
    );
    (store, endpoint)
}
