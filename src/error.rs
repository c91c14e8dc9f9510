use thiserror::Error;

/// Errors returned by the remote collaborators (upload API and object store).
#[derive(Error, Debug)]
pub enum ApiError {
    /// The API refused to issue a destination because the caller is over quota.
    #[error("{detail}")]
    RateLimited { detail: String },

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_quota(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

/// Errors raised while reading or writing the persisted queue state.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised while turning a local path into an upload candidate.
#[derive(Error, Debug)]
pub enum CandidateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a regular file: {0}")]
    NotAFile(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
