//! Error types for server access, posters and snapshot storage

use thiserror::Error;

/// Failures talking to the media server.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, timeout or body read failure
    #[error("request failed: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("HTTP {code} for {url}: {body}")]
    Status { code: u16, url: String, body: String },

    /// Response parsed but required fields are absent
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Body was not valid JSON for the expected shape
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No credentials available for the handshake
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl From<ureq::Error> for ApiError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(code) => ApiError::Status {
                code,
                url: String::new(),
                body: String::new(),
            },
            other => ApiError::Transport(other.to_string()),
        }
    }
}

/// Failures writing to the durable session store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write would push the store past its quota
    #[error("storage quota exceeded ({needed} chars needed, {available} available)")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("could not serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A poster that could not be fetched or decoded.
#[derive(Debug, Error)]
pub enum PosterError {
    #[error(transparent)]
    Fetch(#[from] ApiError),

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// A blur-hash string that cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlurHashError {
    #[error("blur hash too short ({0} chars)")]
    TooShort(usize),

    #[error("blur hash length {actual} does not match {expected} for its component count")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid blur hash character {0:?}")]
    InvalidChar(char),
}
