use std::path::PathBuf;

use thiserror::Error;

/// Typed download errors.
///
/// `is_skippable()` separates an image we could not get this time (server
/// said no, connection dropped) from a local failure that must stop the sync.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error fetching {url}: {source}")]
    Http { source: reqwest::Error, url: String },

    #[error("Body stream interrupted for {url}: {message}")]
    Stream { url: String, message: String },

    #[error("Destination appeared during download: {0}")]
    Conflict(PathBuf),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether this failure only costs us the one image.
    pub fn is_skippable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { .. } => true,
            DownloadError::Http { .. } => true,
            DownloadError::Stream { .. } => true,
            DownloadError::Conflict(_) => false,
            DownloadError::Disk(_) => false,
        }
    }
}
