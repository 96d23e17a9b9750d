use thiserror::Error;

/// Why a single fetch attempt (or a whole fetch) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("client error (HTTP {0})")]
    ClientError(u16),
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("server error (HTTP {0})")]
    ServerError(u16),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("retries exhausted, last failure: {0}")]
    Exhausted(Box<FetchErrorKind>),
    #[error("cancelled")]
    Cancelled,
}

impl FetchErrorKind {
    /// Map a non-2xx HTTP status to its failure kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FetchErrorKind::RateLimited,
            500..=599 => FetchErrorKind::ServerError(status),
            _ => FetchErrorKind::ClientError(status),
        }
    }

    /// Short stable label used in reports and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::ConnectionFailed(_) => "connection_failed",
            FetchErrorKind::ClientError(_) => "client_error",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::ServerError(_) => "server_error",
            FetchErrorKind::InvalidUrl(_) => "invalid_url",
            FetchErrorKind::Exhausted(_) => "exhausted",
            FetchErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("GET {url} failed after {attempts} attempt(s): {kind}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
    pub attempts: u32,
}

impl FetchError {
    pub fn new(url: impl Into<String>, kind: FetchErrorKind, attempts: u32) -> Self {
        Self {
            url: url.into(),
            kind,
            attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Exhausted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FetchErrorKind::Cancelled
    }
}

/// One entry (or page) that could not be turned into a seat-map candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed entry: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AirlineLookupError {
    #[error("unknown airline: {0:?}")]
    NotFound(String),
    #[error("airline name {input:?} matches several carriers: {}", .candidates.join(", "))]
    Ambiguous {
        input: String,
        candidates: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    WriteConflict(String),
    #[error("storage I/O failure: {0}")]
    IoFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub(crate) fn io(msg: impl Into<String>) -> Self {
        StoreError::IoFailure(msg.into().into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::IoFailure(Box::new(e))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoFailure(Box::new(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::IoFailure(Box::new(e))
    }
}
