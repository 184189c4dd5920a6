use recsync_credentials::CredentialError;
use recsync_protocol::RemoteError;

/// Failure of a single [`TransferClient`](crate::TransferClient) call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl ClientError {
    /// Transient failures are retried by the transfer engine.
    ///
    /// An unreachable token endpoint is a network blip like any other.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Remote(e) => e.is_transient(),
            ClientError::Credential(CredentialError::Unreachable(_)) => true,
            ClientError::Credential(_) => false,
        }
    }

    /// Server-suggested minimum wait, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            ClientError::Remote(e) => e.retry_after(),
            ClientError::Credential(_) => None,
        }
    }
}

/// Terminal outcome of a failed transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The credential could not be obtained; re-authentication is needed.
    #[error(transparent)]
    Credential(CredentialError),

    #[error("transfer failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: ClientError },

    #[error("transfer rejected: {0}")]
    Rejected(RemoteError),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("remote object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid transfer configuration: {0}")]
    InvalidConfig(String),
}

impl TransferError {
    /// Maps a non-retried client failure onto the terminal taxonomy.
    pub(crate) fn permanent(err: ClientError) -> Self {
        match err {
            ClientError::Credential(e) => TransferError::Credential(e),
            ClientError::Remote(RemoteError::NotFound(what)) => TransferError::NotFound(what),
            ClientError::Remote(e) => TransferError::Rejected(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_token_endpoint_is_transient() {
        let err = ClientError::from(CredentialError::Unreachable("dns".into()));
        assert!(err.is_transient());
        assert!(!ClientError::from(CredentialError::NotAuthenticated).is_transient());
    }

    #[test]
    fn permanent_mapping() {
        assert!(matches!(
            TransferError::permanent(RemoteError::NotFound("f1".into()).into()),
            TransferError::NotFound(id) if id == "f1"
        ));
        assert!(matches!(
            TransferError::permanent(RemoteError::QuotaExceeded("full".into()).into()),
            TransferError::Rejected(RemoteError::QuotaExceeded(_))
        ));
        assert!(matches!(
            TransferError::permanent(CredentialError::RefreshFailed("x".into()).into()),
            TransferError::Credential(CredentialError::RefreshFailed(_))
        ));
    }
}
