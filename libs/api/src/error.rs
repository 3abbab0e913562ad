//! Error taxonomy for cloud API calls.

use thiserror::Error;

/// Errors returned by [`crate::CloudApi`] implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Credentials were rejected (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The API asked us to slow down (429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The API failed on its side (5xx).
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No capacity left for the requested instance type and contract.
    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    /// Account quota or balance exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Request rejected for any other reason (invalid image, bad parameters).
    #[error("request rejected ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The request did not complete within the client timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Map an HTTP error response onto the taxonomy.
    pub fn from_response(status: u16, code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match (status, code) {
            (401 | 403, _) => ApiError::Unauthorized(message),
            (404, _) => ApiError::NotFound(message),
            (429, _) => ApiError::RateLimited(message),
            (500..=599, _) => ApiError::Server { status, message },
            (_, "insufficient_resources" | "no_capacity") => {
                ApiError::InsufficientCapacity(message)
            }
            (_, "quota_exceeded" | "insufficient_funds") => ApiError::QuotaExceeded(message),
            _ => ApiError::Rejected {
                status,
                code: code.to_string(),
                message,
            },
        }
    }

    /// Returns true if retrying the same request may succeed.
    ///
    /// Timeouts are not transient: the request may have been applied.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_) | ApiError::Server { .. } | ApiError::Connection(_)
        )
    }

    /// Returns true if the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    /// Returns true if the requested contract has no capacity.
    pub fn is_insufficient_capacity(&self) -> bool {
        matches!(self, ApiError::InsufficientCapacity(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_connect() {
            ApiError::Connection(err.to_string())
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::from_response(status.as_u16(), "unknown", err.to_string())
        } else {
            ApiError::Rejected {
                status: 0,
                code: "transport".to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_response(401, "unauthorized_request", "bad token"),
            ApiError::Unauthorized(_)
        ));
        assert!(ApiError::from_response(404, "not_found", "gone").is_not_found());
        assert!(ApiError::from_response(429, "rate_limited", "slow down").is_transient());
        assert!(ApiError::from_response(503, "unknown", "maintenance").is_transient());
        assert!(ApiError::from_response(400, "insufficient_resources", "sold out")
            .is_insufficient_capacity());
        assert!(matches!(
            ApiError::from_response(400, "insufficient_funds", "top up"),
            ApiError::QuotaExceeded(_)
        ));
    }

    #[test]
    fn test_terminal_errors() {
        let invalid_image = ApiError::from_response(400, "invalid_request", "unknown image");
        assert!(!invalid_image.is_transient());
        assert!(matches!(invalid_image, ApiError::Rejected { status: 400, .. }));

        assert!(!ApiError::Timeout("30s".to_string()).is_transient());
        assert!(!ApiError::QuotaExceeded("limit".to_string()).is_transient());
    }
}
