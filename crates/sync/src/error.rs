//! Sync error taxonomy.

use recsync_credentials::CredentialError;
use recsync_protocol::RemoteError;
use recsync_transfer::{ClientError, TransferError};

use crate::config::ConfigError;

/// Errors surfaced by [`FileSyncService`](crate::FileSyncService) and
/// [`StorageInfoProvider`](crate::StorageInfoProvider).
///
/// Transient network failures never appear here directly; they are
/// retried and only surface as [`SyncError::TransferExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("consent denied: {0}")]
    ConsentDenied(String),

    #[error("consent not completed within {timeout_secs}s")]
    ConsentTimeout { timeout_secs: u64 },

    #[error("credential refresh rejected: {0}")]
    RefreshFailed(String),

    #[error("remote storage unavailable: {0}")]
    LibraryUnavailable(String),

    /// Credential storage or consent plumbing failed locally.
    #[error(transparent)]
    Credential(CredentialError),

    #[error("transfer failed after {attempts} attempts: {last_error}")]
    TransferExhausted { attempts: u32, last_error: ClientError },

    #[error("transfer rejected: {0}")]
    TransferRejected(RemoteError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage quota unavailable: {0}")]
    QuotaUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What a front end should do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Run the interactive consent flow again.
    Reauthenticate,
    /// Offer a manual retry.
    RetryManually,
    /// Show a specific, non-retryable message.
    ShowMessage,
    /// Nothing to show.
    None,
}

impl SyncError {
    /// Cancellation is the caller's own request, not a failure.
    pub fn is_user_visible_failure(&self) -> bool {
        !matches!(self, SyncError::Cancelled)
    }

    pub fn suggested_action(&self) -> UserAction {
        match self {
            SyncError::NotAuthenticated
            | SyncError::ConsentDenied(_)
            | SyncError::ConsentTimeout { .. }
            | SyncError::RefreshFailed(_) => UserAction::Reauthenticate,
            SyncError::TransferExhausted { .. } => UserAction::RetryManually,
            SyncError::Cancelled => UserAction::None,
            SyncError::LibraryUnavailable(_)
            | SyncError::Credential(_)
            | SyncError::TransferRejected(_)
            | SyncError::QuotaUnavailable(_)
            | SyncError::NotFound(_)
            | SyncError::Io(_)
            | SyncError::Config(_) => UserAction::ShowMessage,
        }
    }
}

impl From<CredentialError> for SyncError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotAuthenticated => SyncError::NotAuthenticated,
            CredentialError::ConsentDenied(reason) => SyncError::ConsentDenied(reason),
            CredentialError::ConsentTimeout { timeout_secs } => {
                SyncError::ConsentTimeout { timeout_secs }
            }
            CredentialError::RefreshFailed(reason) => SyncError::RefreshFailed(reason),
            CredentialError::LibraryUnavailable(reason) => SyncError::LibraryUnavailable(reason),
            other => SyncError::Credential(other),
        }
    }
}

impl From<TransferError> for SyncError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Credential(e) => e.into(),
            TransferError::Exhausted {
                attempts,
                last_error,
            } => SyncError::TransferExhausted {
                attempts,
                last_error,
            },
            TransferError::Rejected(e) => SyncError::TransferRejected(e),
            TransferError::Cancelled => SyncError::Cancelled,
            TransferError::NotFound(what) => SyncError::NotFound(what),
            TransferError::Io(e) => SyncError::Io(e),
            TransferError::InvalidConfig(reason) => {
                SyncError::Config(ConfigError::InvalidValue {
                    field: "transfer",
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_silent() {
        let err = SyncError::from(TransferError::Cancelled);
        assert!(!err.is_user_visible_failure());
        assert_eq!(err.suggested_action(), UserAction::None);
    }

    #[test]
    fn credential_failures_prompt_reauthentication() {
        for err in [
            CredentialError::NotAuthenticated,
            CredentialError::ConsentDenied("access_denied".into()),
            CredentialError::ConsentTimeout { timeout_secs: 300 },
            CredentialError::RefreshFailed("invalid_grant".into()),
        ] {
            let err = SyncError::from(TransferError::Credential(err));
            assert!(err.is_user_visible_failure());
            assert_eq!(err.suggested_action(), UserAction::Reauthenticate);
        }
    }

    #[test]
    fn exhaustion_offers_retry_and_rejection_does_not() {
        let exhausted = SyncError::from(TransferError::Exhausted {
            attempts: 5,
            last_error: RemoteError::Timeout.into(),
        });
        assert_eq!(exhausted.suggested_action(), UserAction::RetryManually);

        let rejected = SyncError::from(TransferError::Rejected(RemoteError::QuotaExceeded(
            "full".into(),
        )));
        assert!(matches!(
            rejected,
            SyncError::TransferRejected(RemoteError::QuotaExceeded(_))
        ));
        assert_eq!(rejected.suggested_action(), UserAction::ShowMessage);
    }

    #[test]
    fn storage_failures_keep_their_detail() {
        let err = SyncError::from(CredentialError::Storage("keyring locked".into()));
        assert!(matches!(err, SyncError::Credential(CredentialError::Storage(_))));
        assert_eq!(err.suggested_action(), UserAction::ShowMessage);
    }
}
