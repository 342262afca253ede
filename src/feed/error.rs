use thiserror::Error;

/// Errors raised while fetching or decoding a page of the generation feed.
///
/// `is_retryable()` separates server hiccups from failures that a retry
/// cannot fix (bad credentials, a response we do not understand).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Server error (HTTP {http_status}) at {path}: {message}")]
    TransientServer {
        http_status: u16,
        path: String,
        message: String,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("API error {code} (HTTP {http_status}): {message}")]
    Api {
        code: String,
        http_status: u16,
        message: String,
    },

    #[error("Malformed feed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl FeedError {
    /// Whether the request is worth repeating unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::TransientServer { .. } => true,
            FeedError::Http(_) => true,
            FeedError::Unauthorized { .. } => false,
            FeedError::Api { .. } => false,
            FeedError::MalformedResponse(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FeedError::Unauthorized { .. })
    }
}
