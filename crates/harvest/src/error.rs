//! Error types for the harvester.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T, E = HarvestError> = std::result::Result<T, E>;

/// Classified failure of a single page request.
///
/// Produced by the page fetcher; the pagination driver decides what to do
/// with it (back off, stop early, or propagate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// The API signalled throttling. No retry-after value is trusted.
    #[error("rate limited by the remote API")]
    RateLimited,

    /// Any other non-success status.
    #[error("API error: {status} - {body}")]
    Remote { status: u16, body: String },

    /// Connection-level failure, including request timeouts.
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response that does not match the expected schema.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by the harvester.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Missing or invalid process configuration (e.g. no bearer token).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input resource is readable but does not have the expected shape.
    #[error("input format error: {0}")]
    InputFormat(String),

    /// Input resource does not exist.
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Time window violates the API constraints.
    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Query file could not be parsed.
    #[error("query file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A pagination loop stopped on a non-recoverable fetch failure.
    #[error("fetch for '{scope}' failed: {source}")]
    Fetch {
        scope: String,
        #[source]
        source: FetchFailure,
    },

    /// A pagination loop kept getting rate limited.
    #[error("fetch for '{scope}' gave up after {attempts} rate-limit retries")]
    RetryBudgetExceeded { scope: String, attempts: u32 },

    /// A pagination loop was cancelled before it finished.
    #[error("fetch for '{scope}' was cancelled")]
    Cancelled { scope: String },
}
