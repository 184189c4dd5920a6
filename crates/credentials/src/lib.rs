//! Credential lifecycle for the remote store.
//!
//! [`CredentialStore`] owns the one bearer credential the engine uses:
//! it acquires it through an interactive consent flow, persists it to a
//! [`SecretBackend`], and refreshes it single-flight so that concurrent
//! transfers never race each other to the token endpoint.

pub mod backend;
pub mod consent;
pub mod endpoint;
pub mod error;
pub mod store;

pub use backend::{
    FileBackend, KeyringBackend, MemoryBackend, SecretBackend, default_backend,
    default_credential_path,
};
pub use consent::{AuthorizationGrant, ConsentFlow};
pub use endpoint::{OAuthClient, OAuthSettings, TokenEndpoint};
pub use error::CredentialError;
pub use store::{CredentialOptions, CredentialStatus, CredentialStore};

/// Minimum remaining lifetime for a credential handed out to callers.
pub const DEFAULT_GRACE_SECS: i64 = 60;

/// How long the interactive consent flow waits for the browser callback.
pub const DEFAULT_CONSENT_TIMEOUT_SECS: u64 = 300;
