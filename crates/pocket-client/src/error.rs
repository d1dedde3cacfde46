use thiserror::Error;

#[derive(Debug, Error)]
pub enum PocketError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("rate limited by {url}")]
    RateLimited { url: String },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid node record for {address}: {reason}")]
    InvalidNode { address: String, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
