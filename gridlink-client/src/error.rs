//! Error types for the transport adapter

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors a transport operation can end with
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The URL could not be parsed or uses an unsupported scheme
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Could not reach the server
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The request did not complete before the deadline
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-success status
    #[error("Server error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        message: String,
    },

    /// Any other failure while sending or receiving
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The request task ended without producing a result
    #[error("Request was aborted")]
    Aborted,

    /// The handle does not name an in-flight request
    #[error("Unknown request handle {0}")]
    UnknownRequest(u64),
}

impl TransportError {
    /// Create a status error from code and body
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            Self::status(status.as_u16(), err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}
