//! Storage quota for informational display.

use recsync_protocol::QuotaInfo;
use recsync_transfer::TransferClient;
use tracing::{debug, warn};

use crate::error::SyncError;

pub struct StorageInfoProvider {
    client: TransferClient,
}

impl StorageInfoProvider {
    pub fn new(client: TransferClient) -> Self {
        Self { client }
    }

    /// One remote call, no retries. Any failure, credential problems
    /// included, surfaces as [`SyncError::QuotaUnavailable`].
    pub async fn get_quota(&self) -> Result<QuotaInfo, SyncError> {
        match self.client.get_quota().await {
            Ok(quota) => {
                debug!(
                    used_bytes = quota.used_bytes,
                    limit_bytes = quota.limit_bytes,
                    "storage quota"
                );
                Ok(quota)
            }
            Err(e) => {
                warn!(error = %e, "storage quota unavailable");
                Err(SyncError::QuotaUnavailable(e.to_string()))
            }
        }
    }
}
