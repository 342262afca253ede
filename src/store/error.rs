//! Error types for the local record store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing local files.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another writer published the file between our check and our write.
    #[error("File appeared while writing: {0}")]
    Conflict(PathBuf),

    /// A record or checkpoint could not be encoded.
    #[error("Could not encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A file on disk does not hold what we expect.
    #[error("Unreadable file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is a missing file rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
