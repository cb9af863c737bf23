use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;
use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for the counter pipeline and its backends.
#[derive(Error, Debug, Clone)]
pub enum CounterError {
    /// Subject or row does not exist in durable storage
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or missing request input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing or wrong credentials on a protected endpoint
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend call timed out
    #[error("Operation timed out: {0}")]
    TimedOut(String),

    /// Backend unreachable - connection refused, reset, DNS, etc.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Backend answered with a non-success HTTP status
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Backend lacks the requested primitive (e.g. the atomic delta RPC)
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Validation error with every issue found
    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    /// Backend temporarily refusing work (circuit open, retries exhausted)
    #[error("Resource temporarily unavailable: {0}")]
    NotReady(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl CounterError {
    /// HTTP status reported to clients for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CounterError::NotFound(_) => StatusCode::NOT_FOUND,
            CounterError::InvalidArgument(_)
            | CounterError::ParseError(_)
            | CounterError::ValidationError(_) => StatusCode::BAD_REQUEST,
            CounterError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CounterError::TimedOut(_)
            | CounterError::NetworkError(_)
            | CounterError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            CounterError::ApiError { status, .. } => match status {
                408 | 429 | 502 | 503 | 504 => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            CounterError::Unsupported(_) | CounterError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CounterError::TimedOut(_)
                | CounterError::NetworkError(_)
                | CounterError::NotReady(_)
                | CounterError::ApiError {
                    status: 408 | 429 | 502 | 503 | 504,
                    ..
                }
        )
    }

    /// Check if this error indicates the backend could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CounterError::TimedOut(_) | CounterError::NetworkError(_) | CounterError::NotReady(_)
        )
    }
}

impl IntoResponse for CounterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Backend details stay in the logs
        let message = if status.is_server_error() {
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for CounterError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::NotFound => CounterError::NotFound(e.to_string()),
    std::io::ErrorKind::TimedOut => CounterError::TimedOut(e.to_string()),
    std::io::ErrorKind::InvalidInput => CounterError::InvalidArgument(e.to_string()),
    std::io::ErrorKind::ConnectionRefused
    | std::io::ErrorKind::ConnectionReset
    | std::io::ErrorKind::ConnectionAborted => CounterError::NetworkError(e.to_string()),
    _ => CounterError::IoError(e.to_string()),
});

impl_from_error!(reqwest::Error, e => if e.is_timeout() {
    CounterError::TimedOut(e.to_string())
} else if e.is_connect() {
    CounterError::NetworkError(format!("Backend disconnected: {}", e))
} else if e.is_request() {
    CounterError::NetworkError(e.to_string())
} else if e.is_decode() {
    CounterError::ParseError(e.to_string())
} else {
    CounterError::IoError(format!("HTTP error: {}", e))
});

impl_from_error!(serde_json::Error, e => CounterError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => CounterError::ParseError(e.to_string()));

/// Result type alias for operations that can fail with CounterError.
pub type CounterResult<T> = Result<T, CounterError>;
