//! Error types shared by the identity resolver, the cache-aside engine and the routes.

use std::fmt;

/// Result type for marquee operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for identity, cache and upstream operations.
///
/// The three authentication variants are kept apart so tests and logs can
/// tell them apart; the HTTP layer collapses them into one 403 response.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The `Authorization` header is missing or is not `Bearer <token>`.
    Unauthenticated(String),

    /// Token signature verification failed, or the token is expired.
    InvalidToken(String),

    /// Token is cryptographically valid but no session marker exists for
    /// the subject in the shared cache.
    ///
    /// Carries the subject id for internal logging only.
    SessionRevoked(String),

    /// Upstream content provider could not be reached (connect error,
    /// timeout, body read failure).
    UpstreamUnavailable(String),

    /// Upstream content provider answered with a non-2xx status.
    UpstreamError(u16),

    /// KV store is unreachable or returned a protocol error.
    ///
    /// **Recovery:** callers either fail the request or degrade to calling
    /// the upstream directly, see [`crate::strategy::FailurePolicy`].
    CacheUnavailable(String),

    /// Value could not be encoded for the store.
    SerializationError(String),

    /// Upstream body or stored value is not the expected JSON shape.
    DeserializationError(String),

    /// Caller input is malformed (bad id, empty query, invalid body).
    ValidationError(String),

    /// Relational store failed.
    RepositoryError(String),

    /// Requested record does not exist.
    NotFound(String),

    /// Record exists but belongs to another subject.
    Forbidden(String),

    /// Configuration error during startup.
    ///
    /// Common causes:
    /// - Missing `SECRET_KEY` or upstream credentials
    /// - Unparseable numeric setting
    /// - Invalid redis URL
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// True for the three failures that surface as 403.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::Unauthenticated(_) | Error::InvalidToken(_) | Error::SessionRevoked(_)
        )
    }

    /// Short machine-readable name, used in log lines and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "unauthenticated",
            Error::InvalidToken(_) => "invalid_token",
            Error::SessionRevoked(_) => "session_revoked",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::UpstreamError(_) => "upstream_error",
            Error::CacheUnavailable(_) => "cache_unavailable",
            Error::SerializationError(_) => "serialization",
            Error::DeserializationError(_) => "deserialization",
            Error::ValidationError(_) => "validation",
            Error::RepositoryError(_) => "repository",
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::ConfigError(_) => "config",
            Error::Other(_) => "other",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unauthenticated(msg) => write!(f, "Unauthenticated: {}", msg),
            Error::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Error::SessionRevoked(subject) => {
                write!(f, "Session revoked for subject {}", subject)
            }
            Error::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            Error::UpstreamError(status) => {
                write!(f, "Upstream returned status {}", status)
            }
            Error::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::CacheUnavailable(e.to_string())
        } else if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if !status.is_success() => Error::UpstreamError(status.as_u16()),
            _ if e.is_decode() => Error::DeserializationError(e.to_string()),
            _ => Error::UpstreamUnavailable(e.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::InvalidToken(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::RepositoryError(other.to_string()),
        }
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UpstreamError(502);
        assert_eq!(err.to_string(), "Upstream returned status 502");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_auth_failures_are_grouped() {
        assert!(Error::Unauthenticated("missing".into()).is_auth_failure());
        assert!(Error::InvalidToken("bad".into()).is_auth_failure());
        assert!(Error::SessionRevoked("u1".into()).is_auth_failure());
        assert!(!Error::CacheUnavailable("down".into()).is_auth_failure());
    }

    #[test]
    fn test_json_syntax_error_maps_to_deserialization() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "deserialization");
    }
}
