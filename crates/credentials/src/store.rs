//! The credential store: lazy load, single-flight refresh, consent.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use recsync_protocol::Credential;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::SecretBackend;
use crate::consent::ConsentFlow;
use crate::endpoint::{OAuthSettings, TokenEndpoint};
use crate::error::CredentialError;
use crate::{DEFAULT_CONSENT_TIMEOUT_SECS, DEFAULT_GRACE_SECS};

type RefreshResult = Result<Credential, CredentialError>;

/// Tuning for [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct CredentialOptions {
    /// Minimum remaining lifetime of a credential handed to callers.
    pub grace: chrono::Duration,
    /// Loopback port for the consent callback. 0 picks a free port.
    pub redirect_port: u16,
    pub consent_timeout: Duration,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            grace: chrono::Duration::seconds(DEFAULT_GRACE_SECS),
            redirect_port: 0,
            consent_timeout: Duration::from_secs(DEFAULT_CONSENT_TIMEOUT_SECS),
        }
    }
}

impl From<&OAuthSettings> for CredentialOptions {
    fn from(settings: &OAuthSettings) -> Self {
        Self {
            grace: chrono::Duration::seconds(settings.grace_secs),
            redirect_port: settings.redirect_port,
            consent_timeout: Duration::from_secs(settings.consent_timeout_secs),
        }
    }
}

/// Display-oriented summary of the stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    NotAuthenticated,
    Valid { expires_at: DateTime<Utc> },
    Expired { refreshable: bool },
}

#[derive(Default)]
struct State {
    credential: Option<Credential>,
    loaded: bool,
    /// Set when the remote rejected the cached access token.
    stale: bool,
    /// Bumped by `invalidate` so an in-flight refresh cannot resurrect a
    /// cleared credential.
    generation: u64,
    inflight: Option<watch::Receiver<Option<RefreshResult>>>,
}

struct Shared {
    backend: Box<dyn SecretBackend>,
    endpoint: Option<Arc<dyn TokenEndpoint>>,
    options: CredentialOptions,
    state: Mutex<State>,
    /// Serializes the first backend load.
    loading: tokio::sync::Mutex<()>,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a backend call on the blocking pool. Keyring access can wait
    /// on IPC with the OS secret service.
    async fn with_backend<T, F>(self: &Arc<Self>, call: F) -> Result<T, CredentialError>
    where
        F: FnOnce(&dyn SecretBackend) -> Result<T, CredentialError> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(self);
        tokio::task::spawn_blocking(move || call(shared.backend.as_ref()))
            .await
            .map_err(|e| CredentialError::Storage(format!("backend task failed: {e}")))?
    }

    async fn ensure_loaded(self: &Arc<Self>) {
        let loaded = self.state().loaded;
        if loaded {
            return;
        }
        let _loading = self.loading.lock().await;
        let loaded = self.state().loaded;
        if loaded {
            return;
        }
        match self.with_backend(|backend| backend.load()).await {
            Ok(credential) => {
                debug!(
                    backend = %self.backend.describe(),
                    found = credential.is_some(),
                    "loaded stored credential"
                );
                let mut state = self.state();
                // A consent or invalidate that finished meanwhile wins.
                if !state.loaded {
                    state.credential = credential;
                    state.loaded = true;
                }
            }
            // Leave `loaded` unset so the next call retries the backend.
            Err(e) => warn!(error = %e, "failed to load stored credential"),
        }
    }
}

/// Owner of the single bearer credential.
///
/// Cloning is cheap and every clone shares the same state, so one store
/// can be handed to every concurrent transfer.
#[derive(Clone)]
pub struct CredentialStore {
    shared: Arc<Shared>,
}

enum Next {
    Ready(Credential),
    Wait(watch::Receiver<Option<RefreshResult>>),
}

impl CredentialStore {
    /// Creates a store. `endpoint` is `None` when no OAuth capability is
    /// configured; stored credentials are still served until they expire.
    pub fn new(
        backend: Box<dyn SecretBackend>,
        endpoint: Option<Arc<dyn TokenEndpoint>>,
        options: CredentialOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                endpoint,
                options,
                state: Mutex::new(State::default()),
                loading: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Returns a credential valid for at least the grace window,
    /// refreshing it if needed.
    ///
    /// Concurrent callers that find the credential expired share one
    /// refresh call and all receive its result.
    pub async fn get_valid_credential(&self) -> Result<Credential, CredentialError> {
        self.shared.ensure_loaded().await;
        let next = {
            let mut state = self.shared.state();

            let Some(current) = state.credential.clone() else {
                return Err(CredentialError::NotAuthenticated);
            };

            if !state.stale && current.is_valid_at(Utc::now(), self.shared.options.grace) {
                Next::Ready(current)
            } else if let Some(rx) = &state.inflight {
                Next::Wait(rx.clone())
            } else {
                let Some(refresh_token) = current.refresh_token.clone().filter(|t| !t.is_empty())
                else {
                    return Err(CredentialError::RefreshFailed(
                        "credential expired and carries no refresh token".into(),
                    ));
                };
                let Some(endpoint) = self.shared.endpoint.clone() else {
                    return Err(CredentialError::LibraryUnavailable(
                        "no token endpoint configured".into(),
                    ));
                };

                let (tx, rx) = watch::channel(None);
                state.inflight = Some(rx.clone());
                let generation = state.generation;
                let shared = Arc::clone(&self.shared);
                // Detached so that a caller dropping its future does not
                // strand the other waiters.
                tokio::spawn(async move {
                    let result = run_refresh(&shared, endpoint, refresh_token, current, generation).await;
                    shared.state().inflight = None;
                    let _ = tx.send(Some(result));
                });
                Next::Wait(rx)
            }
        };

        match next {
            Next::Ready(credential) => Ok(credential),
            Next::Wait(mut rx) => {
                let outcome = rx.wait_for(|v| v.is_some()).await.map_err(|_| {
                    CredentialError::RefreshFailed("refresh task ended without a result".into())
                })?;
                match outcome.as_ref() {
                    Some(result) => result.clone(),
                    None => Err(CredentialError::RefreshFailed("refresh produced no result".into())),
                }
            }
        }
    }

    /// Convenience for callers that only need the bearer string.
    pub async fn access_token(&self) -> Result<String, CredentialError> {
        Ok(self.get_valid_credential().await?.access_token)
    }

    /// Marks the cached access token as rejected by the remote.
    ///
    /// Only takes effect if `rejected` is still the cached token, so a
    /// burst of 401s for the same token triggers one refresh, and a 401
    /// for a token that has since been replaced is ignored.
    pub fn expire_access_token(&self, rejected: &str) {
        let mut state = self.shared.state();
        let matches = state
            .credential
            .as_ref()
            .is_some_and(|c| c.access_token == rejected);
        if matches && !state.stale {
            debug!("access token rejected by remote, marking stale");
            state.stale = true;
        }
    }

    /// Runs the interactive consent flow. `launcher` receives the consent
    /// URL and is expected to show it to the user.
    pub async fn acquire_interactive_with<F>(&self, launcher: F) -> Result<Credential, CredentialError>
    where
        F: FnOnce(&str) + Send,
    {
        let flow = self.consent_flow();
        let endpoint = self.endpoint()?;
        let grant = flow.run_with(endpoint.as_ref(), launcher).await?;
        self.finish_consent(endpoint.as_ref(), grant).await
    }

    /// Clears the credential in memory and in durable storage.
    pub async fn invalidate(&self) -> Result<(), CredentialError> {
        {
            let mut state = self.shared.state();
            state.credential = None;
            state.stale = false;
            state.loaded = true;
            state.generation += 1;
        }
        self.shared.with_backend(|backend| backend.clear()).await?;
        info!("credential invalidated");
        Ok(())
    }

    /// Summarizes the stored credential without touching the network.
    pub async fn status(&self) -> CredentialStatus {
        self.shared.ensure_loaded().await;
        let state = self.shared.state();
        match &state.credential {
            None => CredentialStatus::NotAuthenticated,
            Some(c) if !state.stale && c.is_valid_at(Utc::now(), self.shared.options.grace) => {
                CredentialStatus::Valid {
                    expires_at: c.expires_at,
                }
            }
            Some(c) => CredentialStatus::Expired {
                refreshable: c.can_refresh() && self.shared.endpoint.is_some(),
            },
        }
    }

    fn consent_flow(&self) -> ConsentFlow {
        ConsentFlow::new(
            self.shared.options.redirect_port,
            self.shared.options.consent_timeout,
        )
    }

    fn endpoint(&self) -> Result<Arc<dyn TokenEndpoint>, CredentialError> {
        self.shared.endpoint.clone().ok_or_else(|| {
            CredentialError::LibraryUnavailable("no token endpoint configured".into())
        })
    }

    async fn finish_consent(
        &self,
        endpoint: &dyn TokenEndpoint,
        grant: crate::consent::AuthorizationGrant,
    ) -> Result<Credential, CredentialError> {
        let credential = endpoint
            .exchange_code(&grant.code, &grant.code_verifier, &grant.redirect_uri)
            .await?;
        let stored = credential.clone();
        self.shared
            .with_backend(move |backend| backend.save(&stored))
            .await?;

        let mut state = self.shared.state();
        state.credential = Some(credential.clone());
        state.stale = false;
        state.loaded = true;
        state.generation += 1;
        info!(expires_at = %credential.expires_at, "credential acquired");
        Ok(credential)
    }
}

async fn run_refresh(
    shared: &Arc<Shared>,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_token: String,
    previous: Credential,
    generation: u64,
) -> RefreshResult {
    let mut fresh = match endpoint.refresh(&refresh_token).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "credential refresh failed");
            return Err(e);
        }
    };
    if fresh.refresh_token.is_none() {
        fresh.refresh_token = Some(refresh_token);
    }
    if fresh.scopes.is_empty() {
        fresh.scopes = previous.scopes;
    }

    {
        let mut state = shared.state();
        if state.generation != generation {
            return Err(CredentialError::NotAuthenticated);
        }
        state.credential = Some(fresh.clone());
        state.stale = false;
    }

    let stored = fresh.clone();
    if let Err(e) = shared
        .with_backend(move |backend| backend.save(&stored))
        .await
    {
        // The in-memory credential is still good for this process.
        warn!(error = %e, "failed to persist refreshed credential");
    }
    info!(expires_at = %fresh.expires_at, "credential refreshed");
    Ok(fresh)
}
