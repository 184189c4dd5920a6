//! Wires configuration into live components.

use std::sync::Arc;

use anyhow::Context as _;
use recsync_credentials::{
    CredentialStore, OAuthClient, TokenEndpoint, default_backend, default_credential_path,
};
use recsync_drive::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE, DriveStore};
use recsync_sync::{FileSyncService, StorageInfoProvider, SyncConfig};
use recsync_transfer::TransferClient;

use crate::config::AppConfig;

pub struct Context {
    pub config: SyncConfig,
    pub credentials: CredentialStore,
    pub client: TransferClient,
    oauth_configured: bool,
}

impl Context {
    pub fn new(app: &AppConfig) -> anyhow::Result<Self> {
        let config = app.sync.clone();

        let endpoint: Option<Arc<dyn TokenEndpoint>> = match OAuthClient::new(config.oauth.clone())
        {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::debug!(error = %e, "token endpoint not configured");
                None
            }
        };
        let oauth_configured = endpoint.is_some();

        let fallback = app
            .credentials_file
            .clone()
            .or_else(default_credential_path)
            .context("no configuration directory for credential storage")?;
        let credentials = CredentialStore::new(
            default_backend(fallback),
            endpoint,
            config.credential_options(),
        );

        let store = DriveStore::with_base_urls(
            config
                .provider
                .api_base_url
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE),
            config
                .provider
                .upload_base_url
                .as_deref()
                .unwrap_or(DEFAULT_UPLOAD_BASE),
        )?;
        let client = TransferClient::new(Arc::new(store), credentials.clone());

        Ok(Self {
            config,
            credentials,
            client,
            oauth_configured,
        })
    }

    pub fn oauth_configured(&self) -> bool {
        self.oauth_configured
    }

    pub fn sync_service(&self) -> anyhow::Result<FileSyncService> {
        Ok(FileSyncService::from_config(
            self.client.clone(),
            &self.config,
        )?)
    }

    pub fn storage(&self) -> StorageInfoProvider {
        StorageInfoProvider::new(self.client.clone())
    }
}
