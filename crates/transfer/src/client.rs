//! Provider adapter trait and the credential-bound client over it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use recsync_credentials::{CredentialError, CredentialStore};
use recsync_protocol::{
    ByteRange, ChunkOutcome, FolderHandle, Page, QuotaInfo, RemoteEntry, RemoteError,
    RemoteObject, UploadMetadata, UploadSessionHandle,
};
use tracing::warn;

use crate::error::ClientError;

/// Boxed future returned by [`RemoteStore`] methods.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// The remote object-store capability set.
///
/// One implementation per provider. Every call carries the bearer token
/// to use; adapters never see the credential store.
pub trait RemoteStore: Send + Sync {
    /// Identifier of the provider's root folder.
    fn root_folder_id(&self) -> &str;

    /// Upload chunks (except the last) must be a multiple of this.
    fn chunk_granularity(&self) -> u64 {
        1
    }

    fn create_folder<'a>(
        &'a self,
        token: &'a str,
        name: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, FolderHandle>;

    /// One page of a folder's children. `page_token` continues a listing.
    fn list_children<'a>(
        &'a self,
        token: &'a str,
        folder_id: &'a str,
        page_token: Option<&'a str>,
    ) -> RemoteFuture<'a, Page<RemoteEntry>>;

    fn start_resumable_upload<'a>(
        &'a self,
        token: &'a str,
        metadata: &'a UploadMetadata,
    ) -> RemoteFuture<'a, UploadSessionHandle>;

    /// Sends `data` as bytes `range` of a `total`-byte object.
    fn upload_chunk<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
        range: ByteRange,
        total: u64,
        data: &'a [u8],
    ) -> RemoteFuture<'a, ChunkOutcome>;

    /// Asks how many bytes the server has durably received.
    fn query_upload_status<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
        total: u64,
    ) -> RemoteFuture<'a, ChunkOutcome>;

    /// Releases an unfinished upload session.
    fn cancel_upload<'a>(
        &'a self,
        token: &'a str,
        session: &'a UploadSessionHandle,
    ) -> RemoteFuture<'a, ()>;

    fn get_object<'a>(&'a self, token: &'a str, remote_id: &'a str)
    -> RemoteFuture<'a, RemoteObject>;

    fn download_range<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
        range: ByteRange,
    ) -> RemoteFuture<'a, Vec<u8>>;

    fn delete<'a>(&'a self, token: &'a str, remote_id: &'a str) -> RemoteFuture<'a, ()>;

    fn get_quota<'a>(&'a self, token: &'a str) -> RemoteFuture<'a, QuotaInfo>;

    /// First object carrying `content_hash` in its private metadata.
    fn find_by_content_hash<'a>(
        &'a self,
        token: &'a str,
        content_hash: &'a str,
    ) -> RemoteFuture<'a, Option<RemoteObject>>;

    /// Stamps `content_hash` into an object's private metadata.
    fn set_content_hash<'a>(
        &'a self,
        token: &'a str,
        remote_id: &'a str,
        content_hash: &'a str,
    ) -> RemoteFuture<'a, ()>;
}

/// Runs one store call with a fresh token. A 401 marks that token stale
/// and repeats the call exactly once; a second 401 means the grant itself
/// is no longer honoured.
macro_rules! authorized {
    ($client:expr, $op:literal, |$token:ident| $call:expr) => {{
        let mut retried = false;
        loop {
            let $token = $client.credentials.access_token().await?;
            match $call.await {
                Err(RemoteError::Unauthorized) if !retried => {
                    retried = true;
                    warn!(op = $op, "remote rejected access token, refreshing once");
                    $client.credentials.expire_access_token(&$token);
                }
                Err(RemoteError::Unauthorized) => {
                    warn!(op = $op, "remote rejected the refreshed token too");
                    break Err(ClientError::Credential(CredentialError::RefreshFailed(
                        format!("{} rejected a freshly refreshed access token", $op),
                    )));
                }
                other => break other.map_err(ClientError::from),
            }
        }
    }};
}

/// Credential-bound view of a [`RemoteStore`].
///
/// Cheap to clone; clones share the adapter and the credential store.
#[derive(Clone)]
pub struct TransferClient {
    store: Arc<dyn RemoteStore>,
    credentials: CredentialStore,
}

impl TransferClient {
    pub fn new(store: Arc<dyn RemoteStore>, credentials: CredentialStore) -> Self {
        Self { store, credentials }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn root_folder_id(&self) -> &str {
        self.store.root_folder_id()
    }

    pub fn chunk_granularity(&self) -> u64 {
        self.store.chunk_granularity().max(1)
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<FolderHandle, ClientError> {
        authorized!(self, "create_folder", |token| self
            .store
            .create_folder(&token, name, parent_id))
    }

    pub async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<RemoteEntry>, ClientError> {
        authorized!(self, "list_children", |token| self
            .store
            .list_children(&token, folder_id, page_token))
    }

    pub async fn start_resumable_upload(
        &self,
        metadata: &UploadMetadata,
    ) -> Result<UploadSessionHandle, ClientError> {
        authorized!(self, "start_resumable_upload", |token| self
            .store
            .start_resumable_upload(&token, metadata))
    }

    pub async fn upload_chunk(
        &self,
        session: &UploadSessionHandle,
        range: ByteRange,
        total: u64,
        data: &[u8],
    ) -> Result<ChunkOutcome, ClientError> {
        authorized!(self, "upload_chunk", |token| self
            .store
            .upload_chunk(&token, session, range, total, data))
    }

    pub async fn query_upload_status(
        &self,
        session: &UploadSessionHandle,
        total: u64,
    ) -> Result<ChunkOutcome, ClientError> {
        authorized!(self, "query_upload_status", |token| self
            .store
            .query_upload_status(&token, session, total))
    }

    pub async fn cancel_upload(&self, session: &UploadSessionHandle) -> Result<(), ClientError> {
        authorized!(self, "cancel_upload", |token| self
            .store
            .cancel_upload(&token, session))
    }

    pub async fn get_object(&self, remote_id: &str) -> Result<RemoteObject, ClientError> {
        authorized!(self, "get_object", |token| self
            .store
            .get_object(&token, remote_id))
    }

    pub async fn download_range(
        &self,
        remote_id: &str,
        range: ByteRange,
    ) -> Result<Vec<u8>, ClientError> {
        authorized!(self, "download_range", |token| self
            .store
            .download_range(&token, remote_id, range))
    }

    pub async fn delete(&self, remote_id: &str) -> Result<(), ClientError> {
        authorized!(self, "delete", |token| self.store.delete(&token, remote_id))
    }

    pub async fn get_quota(&self) -> Result<QuotaInfo, ClientError> {
        authorized!(self, "get_quota", |token| self.store.get_quota(&token))
    }

    pub async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<RemoteObject>, ClientError> {
        authorized!(self, "find_by_content_hash", |token| self
            .store
            .find_by_content_hash(&token, content_hash))
    }

    pub async fn set_content_hash(
        &self,
        remote_id: &str,
        content_hash: &str,
    ) -> Result<(), ClientError> {
        authorized!(self, "set_content_hash", |token| self
            .store
            .set_content_hash(&token, remote_id, content_hash))
    }
}
