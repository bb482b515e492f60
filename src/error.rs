use thiserror::Error;

/// Library error type for carousel fetch, cache and decode operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying IO error (cache directory, local image files).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The server answered with something other than `200 OK`.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The gallery endpoint returned a body that is not the expected JSON shape.
    #[error("malformed gallery response: {0}")]
    MalformedGallery(#[from] serde_json::Error),

    /// An image reference could not be turned into a request URL.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Image bytes could not be decoded or resized.
    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
