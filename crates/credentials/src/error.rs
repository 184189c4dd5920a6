//! Credential error types.

/// Errors produced by the credential store.
///
/// `Clone` because a single refresh outcome is delivered to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("consent denied: {0}")]
    ConsentDenied(String),

    #[error("consent timed out after {timeout_secs}s")]
    ConsentTimeout { timeout_secs: u64 },

    #[error("token refresh rejected: {0}")]
    RefreshFailed(String),

    #[error("authorization capability unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("authorization endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("consent callback failed: {0}")]
    CallbackFailed(String),
}

impl From<std::io::Error> for CredentialError {
    fn from(err: std::io::Error) -> Self {
        CredentialError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::Storage(err.to_string())
    }
}

impl From<keyring::Error> for CredentialError {
    fn from(err: keyring::Error) -> Self {
        CredentialError::Storage(err.to_string())
    }
}
