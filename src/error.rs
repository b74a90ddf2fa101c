//! Error types for the petpet server
//!
//! Provides structured error types for the cache engine, the upstream
//! avatar provider, the renderer, and configuration loading.

use std::sync::Arc;
use thiserror::Error;

/// Unified error type for the server
///
/// The type is `Clone` so that the outcome of a single production can be
/// handed to every request waiting on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    #[error("Avatar {id} unavailable{}: {reason}", status_suffix(.status))]
    SourceUnavailable {
        id: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Generation failed for {key}: {reason}")]
    GenerationFailed { key: String, reason: String },

    #[error("Renderer error: {0}")]
    Renderer(String),

    // =========================================================================
    // Cache Storage Errors
    // =========================================================================
    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Compression error: {0}")]
    Compression(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid {param} parameter: {message}")]
    InvalidParameter { param: &'static str, message: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParse(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::TomlParse(err.to_string())
    }
}

/// Broad failure categories a caller can react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The avatar provider failed or refused the request
    UpstreamUnavailable,
    /// The renderer failed to produce an image
    GenerationFailed,
    /// Cache storage misbehaved; callers should treat it as a miss
    StorageDegraded,
    /// Bad configuration or request input
    ConfigurationInvalid,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Error::GenerationFailed { .. } | Error::Renderer(_) => ErrorKind::GenerationFailed,
            Error::Storage(_) | Error::Compression(_) | Error::Io(_) | Error::JsonParse(_) => {
                ErrorKind::StorageDegraded
            }
            Error::Configuration(_) | Error::TomlParse(_) | Error::InvalidParameter { .. } => {
                ErrorKind::ConfigurationInvalid
            }
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if a later, independent request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            // 4xx from the provider (unknown user etc.) will not fix itself
            Error::SourceUnavailable { status, .. } => {
                !matches!(status, Some(code) if (400..500).contains(code))
            }
            Error::Io(_) | Error::Storage(_) => true,
            _ => false,
        }
    }

    /// Upstream HTTP status carried by this error, if any
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::SourceUnavailable { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

/// Result type alias for the server
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::SourceUnavailable {
            id: "42".into(),
            status: Some(404),
            reason: "Not Found".into(),
        };
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(err.upstream_status(), Some(404));

        let err = Error::GenerationFailed {
            key: "42_0x0_0x0_12_100_128_16_both".into(),
            reason: "renderer exited with 1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::GenerationFailed);
        assert_eq!(err.upstream_status(), None);

        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::StorageDegraded);
    }

    #[test]
    fn test_error_transient() {
        let not_found = Error::SourceUnavailable {
            id: "1".into(),
            status: Some(404),
            reason: "Not Found".into(),
        };
        assert!(!not_found.is_transient());

        let bad_gateway = Error::SourceUnavailable {
            id: "1".into(),
            status: Some(502),
            reason: "Bad Gateway".into(),
        };
        assert!(bad_gateway.is_transient());

        let network = Error::SourceUnavailable {
            id: "1".into(),
            status: None,
            reason: "connection reset".into(),
        };
        assert!(network.is_transient());

        assert!(!Error::Configuration("invalid".into()).is_transient());
    }

    #[test]
    fn test_source_unavailable_message() {
        let err = Error::SourceUnavailable {
            id: "42".into(),
            status: Some(404),
            reason: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "Avatar 42 unavailable (HTTP 404): Not Found");

        let err = Error::SourceUnavailable {
            id: "42".into(),
            status: None,
            reason: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Avatar 42 unavailable: timeout");
    }

    #[test]
    fn test_error_is_clone() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
