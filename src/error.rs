//! Error types for the Replit Database client.

use thiserror::Error;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Main error type for database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("access denied")]
    AccessDenied,

    #[error("unauthenticated access denied")]
    Unauthenticated,

    /// `path` is relative to the database URL, which embeds the access token.
    #[error("the specified URL was not found: {path}")]
    NotFound { path: String },

    #[error("the database service reported the request as invalid")]
    InvalidRequest,

    #[error("the database service encountered an internal error ({status})")]
    ServiceInternalError { status: u16 },

    #[error("the database service is not currently reachable ({status})")]
    ServiceUnavailable { status: u16 },

    #[error("unexpected HTTP status code: {status}")]
    Unsupported { status: u16 },

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("timeout")]
    Timeout,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("json error: {0}")]
    Json(String),

    #[error("no database URL configured")]
    MissingBaseUrl,

    #[error("iterator closed")]
    IteratorClosed,

    #[error("a previous advance was cancelled before it completed")]
    Cancelled,

    #[error("key listings cannot be reset; start a new listing instead")]
    ResetUnsupported,
}

impl DbError {
    /// Create error from a non-success HTTP status code.
    ///
    /// `path` is the request target relative to the database URL.
    pub fn from_status(status: u16, path: &str) -> Self {
        match status {
            400 => DbError::InvalidRequest,
            401 => DbError::Unauthenticated,
            403 => DbError::AccessDenied,
            404 => DbError::NotFound {
                path: path.to_string(),
            },
            500 => DbError::ServiceInternalError { status },
            502..=504 => DbError::ServiceUnavailable { status },
            _ => DbError::Unsupported { status },
        }
    }

    /// Whether this error is worth retrying by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::ServiceUnavailable { .. } | DbError::Network(_) | DbError::Timeout
        )
    }

    /// HTTP status code if applicable
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DbError::InvalidRequest => Some(400),
            DbError::Unauthenticated => Some(401),
            DbError::AccessDenied => Some(403),
            DbError::NotFound { .. } => Some(404),
            DbError::ServiceInternalError { status }
            | DbError::ServiceUnavailable { status }
            | DbError::Unsupported { status } => Some(*status),
            _ => None,
        }
    }

    /// Convert to a stable error code string (used by the adapter binary).
    pub fn to_error_code(&self) -> &'static str {
        match self {
            DbError::AccessDenied => "ACCESS_DENIED",
            DbError::Unauthenticated => "UNAUTHENTICATED",
            DbError::NotFound { .. } => "NOT_FOUND",
            DbError::InvalidRequest => "INVALID_REQUEST",
            DbError::ServiceInternalError { .. } => "SERVICE_INTERNAL_ERROR",
            DbError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            DbError::Network(_) | DbError::Timeout => "NETWORK_ERROR",
            DbError::Decode(_) => "DECODE_ERROR",
            DbError::Json(_) => "JSON_ERROR",
            DbError::MissingBaseUrl => "MISSING_BASE_URL",
            DbError::IteratorClosed => "ITERATOR_CLOSED",
            DbError::Cancelled => "CANCELLED",
            DbError::ResetUnsupported => "RESET_UNSUPPORTED",
            DbError::Unsupported { .. } => "UNEXPECTED_STATUS",
        }
    }
}

/// Map a response status to success or the matching [`DbError`].
///
/// Called after every request and before any body is read, so an error
/// body is never mistaken for data.
pub fn check_status(status: u16, path: &str) -> Result<(), DbError> {
    match status {
        200 | 201 | 202 => Ok(()),
        _ => Err(DbError::from_status(status, path)),
    }
}

impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DbError::Timeout
        } else {
            DbError::Network(err)
        }
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Json(err.to_string())
    }
}
