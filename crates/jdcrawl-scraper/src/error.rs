use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {url} (retry after {retry_after_secs:?}s)")]
    RateLimited {
        url: String,
        retry_after_secs: Option<u64>,
    },

    #[error("server error {status} from {url}")]
    ServerError { status: u16, url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("session expired while requesting {url}")]
    SessionExpired { url: String },

    #[error("authentication required: {reason}")]
    AuthRequired { reason: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response shape for {context}: {reason}")]
    Schema { context: String, reason: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<CrawlError>,
    },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Coarse classification used by the retry controller and the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient: timeouts, connection failures, 5xx, 429.
    Retryable,
    /// The session must be re-established before retrying.
    SessionExpired,
    /// An operator must complete an external login step.
    AuthRequired,
    /// All retry attempts were used up.
    Exhausted,
    /// The response does not have the expected shape.
    Schema,
    /// Anything else: non-retriable 4xx, bad URLs, builder errors.
    Fatal,
}

impl CrawlError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Http(e) => {
                if e.is_builder() || e.is_redirect() {
                    ErrorKind::Fatal
                } else if e.is_decode() {
                    ErrorKind::Schema
                } else if e.status().is_some_and(|s| s.is_client_error()) {
                    ErrorKind::Fatal
                } else {
                    ErrorKind::Retryable
                }
            }
            CrawlError::RateLimited { .. } | CrawlError::ServerError { .. } => {
                ErrorKind::Retryable
            }
            CrawlError::SessionExpired { .. } => ErrorKind::SessionExpired,
            CrawlError::AuthRequired { .. } => ErrorKind::AuthRequired,
            CrawlError::Exhausted { .. } => ErrorKind::Exhausted,
            CrawlError::Deserialize { .. } | CrawlError::Schema { .. } => ErrorKind::Schema,
            CrawlError::UnexpectedStatus { .. } | CrawlError::InvalidUrl { .. } => {
                ErrorKind::Fatal
            }
        }
    }

    pub(crate) fn schema(context: impl Into<String>, reason: impl Into<String>) -> Self {
        CrawlError::Schema {
            context: context.into(),
            reason: reason.into(),
        }
    }
}
