//! Drive v3 REST client implementing [`RemoteStore`].
//!
//! Bearer tokens arrive per call; the client itself holds no credential.

use std::time::Duration;

use recsync_protocol::{
    ByteRange, CONTENT_HASH_PROPERTY, ChunkOutcome, FolderHandle, Page, QuotaInfo, RemoteEntry,
    RemoteError, RemoteObject, UploadMetadata, UploadSessionHandle,
};
use recsync_transfer::{RemoteFuture, RemoteStore};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE, RETRY_AFTER};
use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{About, DriveFile, ErrorEnvelope, FileList, NewFile};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Drive rejects non-final resumable chunks that are not multiples of this.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

const FILE_FIELDS: &str = "id,name,mimeType,size,parents,version,appProperties";
const PAGE_SIZE: &str = "100";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Drive's "resume incomplete" status for resumable uploads.
const RESUME_INCOMPLETE: u16 = 308;

/// Drive answers a successful session cancel with this non-standard code.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Drive v3 remote store.
pub struct DriveStore {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
}

impl DriveStore {
    /// Creates a client against the public Drive endpoints.
    pub fn new() -> Result<Self, RemoteError> {
        Self::with_base_urls(DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE)
    }

    /// Creates a client against custom endpoints (proxies, tests).
    pub fn with_base_urls(api_base: &str, upload_base: &str) -> Result<Self, RemoteError> {
        // 308 is Drive's resume-incomplete signal, not a redirect.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        })
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api_base)
    }

    fn file_url(&self, remote_id: &str) -> String {
        format!("{}/files/{remote_id}", self.api_base)
    }

    async fn get_file(&self, token: &str, remote_id: &str) -> Result<RemoteObject, RemoteError> {
        let resp = self
            .http
            .get(self.file_url(remote_id))
            .bearer_auth(token)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(transport)?;
        let file: DriveFile = json(check(resp).await?).await?;
        file.into_object()
    }

    async fn search(&self, token: &str, q: &str) -> Result<FileList, RemoteError> {
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let resp = self
            .http
            .get(self.files_url())
            .bearer_auth(token)
            .query(&[("q", q), ("fields", fields.as_str()), ("pageSize", "1")])
            .send()
            .await
            .map_err(transport)?;
        json(check(resp).await?).await
    }

    /// Sends one `PUT` to a resumable session.
    async fn put_session(
        &self,
        token: &str,
        session: &UploadSessionHandle,
        content_range: String,
        body: Vec<u8>,
    ) -> Result<ChunkOutcome, RemoteError> {
        let resp = self
            .http
            .put(&session.session_uri)
            .bearer_auth(token)
            .header(CONTENT_RANGE, content_range)
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        chunk_outcome(resp).await
    }
}

impl RemoteStore for DriveStore {
    fn root_folder_id(&self) -> &str {
        "root"
    }

    fn chunk_granularity(&self) -> u64 {
        CHUNK_GRANULARITY
    }

    fn create_folder<'a>(
        &'a self,
        token: &'a str,
        name: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, FolderHandle> {
        Box::pin(async move {
            let resp = self
                .http
                .post(self.files_url())
                .bearer_auth(token)
                .query(&[("fields", "id,name,mimeType")])
                .json(&NewFile::folder(name, parent_id))
                .send()
                .await
                .map_err(transport)?;
            let file: DriveFile = json(check(resp).await?).await?;
            debug!(folder_id = %file.id, name, "created folder");
            Ok(file.into_folder())
        })
    }

    fn list_children<'a>(
        &'a self,
        token: &'a str,
        folder_id: &'a str,
        page_token: Option<&'a str>,
    ) -> RemoteFuture<'a, Page<RemoteEntry>> {
        Box::pin(async move {
            let q = format!("{} in parents and trashed = false", quote(folder_id));
            let fields = format!("nextPageToken,files({FILE_FIELDS})");
            let mut req = self
                .http
                .get(self.files_url())
                .bearer_auth(token)
                .query(&[
                    ("q", q.as_str()),
                    ("fields", fields.as_str()),
                    ("pageSize", PAGE_SIZE),
                ]);
            if let Some(page_token) = page_token {
                req = req.query(&[("pageToken", page_token)]);
            }
            let resp = req.send().await.map_err(transport)?;
            let list: FileList = json(check(resp).await?).await?;
            let items = list
                .files
                .into_iter()
                .map(DriveFile::into_entry)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                next_page_token: list.next_page_token,
            })
        })
    }

    fn start_resumable_upload<'a>(
        &'a self,
        token: &'a str,
        metadata: &'a UploadMetadata,
    ) -> RemoteFuture<'a, UploadSessionHandle> {
        Box::pin(async move {
            let resp = self
                .http
                .post(format!("{}/files", self.upload_base))
                .bearer_auth(token)
                .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
                .header("X-Upload-Content-Type", &metadata.mime_type)
                .header("X-Upload-Content-Length", metadata.size)
                .json(&NewFile::upload(metadata))
                .send()
                .await
                .map_err(transport)?;
            let resp = check(resp).await?;
            let session_uri = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| RemoteError::Malformed("upload session without Location".into()))?
                .to_string();
            Ok(UploadSessionHandle { session_uri })
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
            self.put_session(token, session, range.content_range(total), data.to_vec())
                .await
        })
    }

    fn query_upload_status<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
        total: u64,
    ) -> RemoteFuture<'a, ChunkOutcome> {
        Box::pin(async move {
            self.put_session(token, session, format!("bytes */{total}"), Vec::new())
                .await
        })
    }

    fn cancel_upload<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let resp = self
                .http
                .delete(&session.session_uri)
                .bearer_auth(token)
                .send()
                .await
                .map_err(transport)?;
            let status = resp.status();
            if status.is_success() || status.as_u16() == CLIENT_CLOSED_REQUEST {
                Ok(())
            } else {
                Err(error_from(resp).await)
            }
        })
    }

    fn get_object<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
    ) -> RemoteFuture<'a, RemoteObject> {
        Box::pin(self.get_file(token, remote_id))
    }

    fn download_range<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
        range: ByteRange,
    ) -> RemoteFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(self.file_url(remote_id))
                .bearer_auth(token)
                .query(&[("alt", "media")])
                .header(RANGE, range.range_header())
                .send()
                .await
                .map_err(transport)?;
            let resp = check(resp).await?;
            Ok(resp.bytes().await.map_err(transport)?.to_vec())
        })
    }

    fn delete<'a>(&'a self, token: &'a str, remote_id: &'a str) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let resp = self
                .http
                .delete(self.file_url(remote_id))
                .bearer_auth(token)
                .send()
                .await
                .map_err(transport)?;
            check(resp).await?;
            Ok(())
        })
    }

    fn get_quota<'a>(&'a self, token: &'a str) -> RemoteFuture<'a, QuotaInfo> {
        Box::pin(async move {
            let resp = self
                .http
                .get(format!("{}/about", self.api_base))
                .bearer_auth(token)
                .query(&[("fields", "storageQuota")])
                .send()
                .await
                .map_err(transport)?;
            let about: About = json(check(resp).await?).await?;
            about.storage_quota.into_quota()
        })
    }

    fn find_by_content_hash<'a>(
        &'a self,
        token: &'a str,
        content_hash: &'a str,
    ) -> RemoteFuture<'a, Option<RemoteObject>> {
        Box::pin(async move {
            let q = format!(
                "appProperties has {{ key={} and value={} }} and trashed = false",
                quote(CONTENT_HASH_PROPERTY),
                quote(content_hash)
            );
            let list = self.search(token, &q).await?;
            list.files
                .into_iter()
                .next()
                .map(DriveFile::into_object)
                .transpose()
        })
    }

    fn set_content_hash<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
        content_hash: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::json!({
                "appProperties": { CONTENT_HASH_PROPERTY: content_hash }
            });
            let resp = self
                .http
                .patch(self.file_url(remote_id))
                .bearer_auth(token)
                .query(&[("fields", "id")])
                .json(&body)
                .send()
                .await
                .map_err(transport)?;
            check(resp).await?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

/// Passes 2xx responses through, turns anything else into a [`RemoteError`].
async fn check(resp: Response) -> Result<Response, RemoteError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(error_from(resp).await)
    }
}

async fn error_from(resp: Response) -> RemoteError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    let (reason, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => (
            env.error.errors.into_iter().find_map(|e| e.reason),
            env.error.message,
        ),
        Err(_) => (None, body),
    };
    RemoteError::from_status(status, reason.as_deref(), message, retry_after)
}

async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    let bytes = resp.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Malformed(e.to_string()))
}

/// Maps a resumable-session response onto a chunk outcome.
async fn chunk_outcome(resp: Response) -> Result<ChunkOutcome, RemoteError> {
    match resp.status().as_u16() {
        200 | 201 => {
            let file: DriveFile = json(resp).await?;
            Ok(ChunkOutcome::Complete(file.into_object()?))
        }
        RESUME_INCOMPLETE => {
            // No Range header means nothing has been persisted yet.
            let committed_bytes = resp
                .headers()
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .map(|v| {
                    committed_from_range(v)
                        .ok_or_else(|| RemoteError::Malformed(format!("bad Range header {v:?}")))
                })
                .transpose()?
                .unwrap_or(0);
            Ok(ChunkOutcome::Accepted { committed_bytes })
        }
        404 | 410 => Err(RemoteError::SessionExpired),
        _ => Err(error_from(resp).await),
    }
}

/// `bytes=0-N` → `N + 1`.
fn committed_from_range(value: &str) -> Option<u64> {
    let (_, last) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    last.parse::<u64>().ok().map(|n| n + 1)
}

fn transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Malformed(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

/// Single-quoted Drive query literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
