use thiserror::Error;

use crate::download::DownloadError;
use crate::feed::FeedError;
use crate::store::StoreError;

/// Anything that ends a sync early.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl SyncError {
    /// Whether a fresh credential could get the sync going again.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Feed(e) if e.is_auth())
    }
}
