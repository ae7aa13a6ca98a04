use bridge_traits::error::BridgeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// Caller input rejected before any network call.
    #[error("{0}")]
    Validation(String),

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{0}")]
    Network(#[from] BridgeError),

    #[error("429: {code}, You are being rate limited, No API Key is 10 Requests / Minute.")]
    RateLimited { code: String },

    #[error("{status}: {code}, Codes in the 4xx range indicate an error that failed given the information provided.")]
    Client { status: u16, code: String },

    #[error("{status}: {code}, Codes in the 5xx range indicate an error with Songlink's servers.")]
    Server { status: u16, code: String },

    #[error("{status}: {code}")]
    UnexpectedStatus { status: i64, code: String },

    /// Non-2xx status reported by the transport itself.
    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("API returned an unexpected result.")]
    MalformedResponse,
}

impl LinkError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Transient failures the executor may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout { .. } | LinkError::Network(_) | LinkError::HttpStatus { .. }
        )
    }

    /// Whether the same request may succeed later. Client-side statuses such
    /// as 404 are final even though the executor retries them.
    pub fn is_transient(&self) -> bool {
        match self {
            LinkError::Timeout { .. } | LinkError::Network(_) => true,
            LinkError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Status code carried by the failure, if the upstream produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LinkError::RateLimited { .. } => Some(429),
            LinkError::Client { status, .. }
            | LinkError::Server { status, .. }
            | LinkError::HttpStatus { status, .. } => Some(*status),
            LinkError::UnexpectedStatus { status, .. } => u16::try_from(*status).ok(),
            _ => None,
        }
    }

    /// Coarse classification used for batch failure records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::Validation(_) => ErrorKind::BadRequest,
            LinkError::Timeout { .. } => ErrorKind::Timeout,
            LinkError::RateLimited { .. } => ErrorKind::RateLimited,
            LinkError::Client { status, .. } | LinkError::HttpStatus { status, .. } => {
                ErrorKind::from_status(*status)
            }
            _ => ErrorKind::Unknown,
        }
    }

    /// Taxonomy name recorded in error metrics.
    pub fn name(&self) -> &'static str {
        match self {
            LinkError::Validation(_) => "ValidationError",
            LinkError::Timeout { .. } => "TimeoutError",
            LinkError::Network(_) => "NetworkError",
            LinkError::RateLimited { .. } => "RateLimitError",
            LinkError::Client { .. } => "ClientError",
            LinkError::Server { .. } => "ServerError",
            LinkError::UnexpectedStatus { .. } => "UnexpectedStatusError",
            LinkError::HttpStatus { .. } => "HttpStatusError",
            LinkError::MalformedResponse => "MalformedResponseError",
        }
    }
}

/// Failure category reported per item by batch lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    RateLimited,
    NotFound,
    Timeout,
    Unknown,
}

impl ErrorKind {
    fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::BadRequest,
            401 | 403 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            _ => ErrorKind::Unknown,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => {
                "Check that the URL is a song or album link from a supported platform."
            }
            ErrorKind::Unauthorized => {
                "Verify your API key, or request one at https://odesli.co/ for access."
            }
            ErrorKind::RateLimited => {
                "Slow down requests or use an API key for higher limits (10 requests/minute without one)."
            }
            ErrorKind::NotFound => {
                "The track may not exist or may be unavailable in the requested country."
            }
            ErrorKind::Timeout => "Retry the request or increase the timeout.",
            ErrorKind::Unknown => "Retry later; if the problem persists, check the lookup service status.",
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_messages() {
        let err = LinkError::RateLimited {
            code: "TOO_MANY_REQUESTS".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "429: TOO_MANY_REQUESTS, You are being rate limited, No API Key is 10 Requests / Minute."
        );

        let err = LinkError::Client {
            status: 400,
            code: "BAD_REQUEST".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "400: BAD_REQUEST, Codes in the 4xx range indicate an error that failed given the information provided."
        );

        let err = LinkError::Server {
            status: 500,
            code: "INTERNAL_ERROR".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "500: INTERNAL_ERROR, Codes in the 5xx range indicate an error with Songlink's servers."
        );

        assert_eq!(
            LinkError::UnexpectedStatus {
                status: 302,
                code: "FOUND".to_string()
            }
            .to_string(),
            "302: FOUND"
        );
        assert_eq!(
            LinkError::Timeout { timeout_ms: 10000 }.to_string(),
            "Request timeout after 10000ms"
        );
        assert_eq!(
            LinkError::MalformedResponse.to_string(),
            "API returned an unexpected result."
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(LinkError::Timeout { timeout_ms: 1 }.is_retryable());
        assert!(LinkError::Network(BridgeError::ConnectionFailed("refused".into())).is_retryable());
        assert!(LinkError::HttpStatus {
            status: 503,
            reason: "Service Unavailable".into()
        }
        .is_retryable());

        assert!(!LinkError::MalformedResponse.is_retryable());
        assert!(!LinkError::validation("No URL was provided to fetch()").is_retryable());
        assert!(!LinkError::RateLimited { code: "x".into() }.is_retryable());
        assert!(!LinkError::Server {
            status: 502,
            code: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_transient_classification() {
        let not_found = LinkError::HttpStatus {
            status: 404,
            reason: "Not Found".into(),
        };
        assert!(not_found.is_retryable());
        assert!(!not_found.is_transient());

        assert!(LinkError::HttpStatus {
            status: 503,
            reason: "Service Unavailable".into()
        }
        .is_transient());
        assert!(LinkError::Timeout { timeout_ms: 1 }.is_transient());
        assert!(LinkError::Network(BridgeError::ConnectionFailed("refused".into())).is_transient());
        assert!(!LinkError::RateLimited { code: "x".into() }.is_transient());
        assert!(!LinkError::validation("bad").is_transient());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(LinkError::validation("bad").kind(), ErrorKind::BadRequest);
        assert_eq!(
            LinkError::Client {
                status: 401,
                code: "UNAUTHORIZED".into()
            }
            .kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            LinkError::Client {
                status: 404,
                code: "NOT_FOUND".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LinkError::RateLimited { code: "x".into() }.kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            LinkError::Timeout { timeout_ms: 5 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(LinkError::MalformedResponse.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_status_code() {
        assert_eq!(
            LinkError::RateLimited { code: "x".into() }.status_code(),
            Some(429)
        );
        assert_eq!(
            LinkError::UnexpectedStatus {
                status: -1,
                code: "x".into()
            }
            .status_code(),
            None
        );
        assert_eq!(LinkError::MalformedResponse.status_code(), None);
    }

    #[test]
    fn test_error_kind_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::RateLimited).unwrap(),
            "\"RATE_LIMITED\""
        );
        assert!(!ErrorKind::NotFound.suggestion().is_empty());
    }
}
