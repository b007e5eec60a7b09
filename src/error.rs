use bytes::Bytes;
use http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{Response, StatusCode};
use thiserror::Error;

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Gating errors
    #[error("Authorization credential is required")]
    AuthRequired,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("URL matches blacklist pattern: {pattern}")]
    BlacklistMatch { pattern: String },

    // Proxy errors
    #[error("No proxy available for strategy {strategy}")]
    NoProxyAvailable { strategy: String },

    #[error("Proxy connection failed: {0}")]
    ProxyConnection(String),

    #[error("Proxy request timed out")]
    ProxyTimeout,

    #[error("Unexpected upstream error: {0}")]
    UnexpectedUpstream(String),

    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i64 },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Blacklist errors
    #[error("Invalid blacklist pattern '{pattern}': {reason}")]
    InvalidBlacklistPattern { pattern: String, reason: String },

    // Collaborator errors
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Activity log failed: {0}")]
    ActivityLog(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Get the HTTP status code surfaced to the original caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            GatewayError::InvalidRequest(_)
            | GatewayError::InvalidProxyAddress(_)
            | GatewayError::UnsupportedProtocol(_)
            | GatewayError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            GatewayError::AuthRequired | GatewayError::AuthenticationFailed => {
                StatusCode::UNAUTHORIZED
            }

            // 404 Not Found
            GatewayError::ProxyNotFound { .. } => StatusCode::NOT_FOUND,

            // 403 Forbidden
            GatewayError::BlacklistMatch { .. } => StatusCode::FORBIDDEN,

            // 502 Bad Gateway
            GatewayError::NoProxyAvailable { .. }
            | GatewayError::ProxyConnection(_)
            | GatewayError::UnexpectedUpstream(_)
            | GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            GatewayError::ProxyTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            GatewayError::InvalidBlacklistPattern { .. }
            | GatewayError::ActivityLog(_)
            | GatewayError::Io(_)
            | GatewayError::Http(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure may be retried within the current strategy's budget
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::ProxyConnection(_)
                | GatewayError::ProxyTimeout
                | GatewayError::UnexpectedUpstream(_)
        )
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Build the synthetic plain-text response returned to the caller
    pub fn to_response(&self) -> Response<Bytes> {
        let status = self.status_code();
        let message = match self {
            GatewayError::AuthRequired | GatewayError::AuthenticationFailed => {
                "Unauthorized: Authorization header with credential is required".to_string()
            }
            GatewayError::BlacklistMatch { .. } => {
                "Forbidden: URL matches blacklist pattern".to_string()
            }
            GatewayError::NoProxyAvailable { .. } => {
                "Bad Gateway: No upstream proxy available".to_string()
            }
            GatewayError::ProxyTimeout => "Gateway Timeout".to_string(),
            e if e.is_retryable() => "Bad Gateway: All proxy attempts failed".to_string(),
            e => format!("{}: {}", status.canonical_reason().unwrap_or("Error"), e),
        };

        let mut builder = Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "text/plain");
        if status == StatusCode::UNAUTHORIZED {
            builder = builder.header(WWW_AUTHENTICATE, "Bearer");
        }

        builder.body(Bytes::from(message)).unwrap_or_else(|_| {
            let mut response = Response::new(Bytes::new());
            *response.status_mut() = status;
            response
        })
    }
}

// Convert from hyper errors
impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidProxyAddress(err.to_string())
    }
}

// Classify reqwest failures the way the retry loop needs them
impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::ProxyTimeout
        } else if err.is_connect() {
            GatewayError::ProxyConnection(err.to_string())
        } else {
            GatewayError::UnexpectedUpstream(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            GatewayError::AuthRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::BlacklistMatch {
                pattern: ".*".to_string()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::NoProxyAvailable {
                strategy: "best".to_string()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::ProxyConnection("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::ProxyTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::InvalidConfig("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_retryable_classification() {
        assert!(GatewayError::ProxyConnection("reset".to_string()).is_retryable());
        assert!(GatewayError::ProxyTimeout.is_retryable());
        assert!(GatewayError::UnexpectedUpstream("boom".to_string()).is_retryable());

        assert!(!GatewayError::AuthRequired.is_retryable());
        assert!(!GatewayError::NoProxyAvailable {
            strategy: "lru".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::BlacklistMatch {
            pattern: "x".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(GatewayError::AuthRequired.is_client_error());
        assert!(!GatewayError::AuthRequired.is_server_error());

        assert!(GatewayError::ProxyTimeout.is_server_error());
        assert!(!GatewayError::ProxyTimeout.is_client_error());
    }

    #[test]
    fn test_unauthorized_response_has_bearer_challenge() {
        let response = GatewayError::AuthRequired.to_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_forbidden_response_body() {
        let response = GatewayError::BlacklistMatch {
            pattern: "^.*facebook\\.com.*$".to_string(),
        }
        .to_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.body().as_ref(),
            b"Forbidden: URL matches blacklist pattern"
        );
    }
}
