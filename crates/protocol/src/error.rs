//! Remote error taxonomy and HTTP-status classification.

use std::time::Duration;

/// Errors reported by a remote store adapter.
///
/// Adapters map their wire-level failures onto these variants; the
/// transfer engine only ever looks at [`RemoteError::is_transient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("upload session expired")]
    SessionExpired,
}

impl RemoteError {
    /// Transient errors are expected to succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. }
                | RemoteError::Server { .. }
                | RemoteError::Network(_)
                | RemoteError::Timeout
        )
    }

    /// Server-suggested minimum wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classifies an HTTP-equivalent failure.
    ///
    /// `reason` is the provider's machine-readable error reason, if any
    /// (e.g. `storageQuotaExceeded`); some providers report quota and
    /// rate-limit conditions as 403 and only the reason tells them apart.
    pub fn from_status(
        status: u16,
        reason: Option<&str>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = message.into();

        if let Some(reason) = reason {
            match reason {
                "storageQuotaExceeded" | "quotaExceeded" | "teamDriveFileLimitExceeded" => {
                    return RemoteError::QuotaExceeded(message);
                }
                "rateLimitExceeded" | "userRateLimitExceeded" => {
                    return RemoteError::RateLimited { retry_after };
                }
                _ => {}
            }
        }

        match status {
            401 => RemoteError::Unauthorized,
            404 => RemoteError::NotFound(message),
            408 => RemoteError::Timeout,
            410 => RemoteError::SessionExpired,
            413 | 507 => RemoteError::QuotaExceeded(message),
            429 => RemoteError::RateLimited { retry_after },
            500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Rejected { status, message },
        }
    }
}
