//! Error taxonomy for the crawl pipeline
//!
//! The split matters for retry policy: `Transport` and retryable
//! `HttpStatus` values (5xx, 429) go back through the fetch layer's backoff
//! loop, everything else is terminal for the attempt.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CrawlerError {
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("URL {url} is outside the crawl origin {expected_origin}")]
    DomainViolation { url: String, expected_origin: String },

    #[error("{url} is not a broker review page")]
    InvalidPageKind { url: String },

    #[error("failed to parse {url}: {message}")]
    Parse { url: String, message: String },

    #[error("persistence failure: {message}")]
    Persistence { message: String },

    #[error("a crawl run is already in progress on this instance")]
    AlreadyRunning,

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl CrawlerError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn persistence(message: impl ToString) -> Self {
        Self::Persistence {
            message: message.to_string(),
        }
    }

    /// Whether the fetch layer may retry after this error.
    ///
    /// Retryable: any transport-level failure (timeout, reset, DNS,
    /// connection refused), HTTP 5xx and HTTP 429. Other HTTP statuses are
    /// terminal, as is everything that never reached the network.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
