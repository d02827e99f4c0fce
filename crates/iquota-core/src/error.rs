//! Error types for iquota.
//!
//! The four kinds callers are expected to branch on are `NotFound`,
//! `Unauthorized`, `Backend` and `StoreUnavailable`. The remaining variants
//! describe adapter transport failures and local problems (config, JSON, IO).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed source for store errors, which come from more than one client crate.
pub type StoreSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the iquota library.
#[derive(Debug, Error)]
pub enum IquotaError {
    /// Confirmed absent: no quota for this principal or path.
    #[error("Quota not found: {what}")]
    NotFound { what: String },

    /// Access policy denial.
    #[error("Access denied: {message}")]
    Unauthorized { message: String },

    /// Opaque error reported by a backend, passed through untouched.
    #[error("Backend error: {code} - {message}")]
    Backend { code: String, message: String },

    /// The cache store could not be reached or spoke garbage.
    #[error("Cache store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[source]
        source: Option<StoreSource>,
    },

    // Adapter transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for iquota operations.
pub type Result<T> = std::result::Result<T, IquotaError>;

impl From<std::io::Error> for IquotaError {
    fn from(err: std::io::Error) -> Self {
        IquotaError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for IquotaError {
    fn from(err: serde_json::Error) -> Self {
        IquotaError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for IquotaError {
    fn from(err: rusqlite::Error) -> Self {
        IquotaError::StoreUnavailable {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for IquotaError {
    fn from(err: redis::RedisError) -> Self {
        IquotaError::StoreUnavailable {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for IquotaError {
    fn from(err: toml::de::Error) -> Self {
        IquotaError::Config {
            message: err.to_string(),
        }
    }
}

impl IquotaError {
    /// Create a not-found error for the given lookup.
    pub fn not_found(what: impl Into<String>) -> Self {
        IquotaError::NotFound { what: what.into() }
    }

    /// Create an access denial.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        IquotaError::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a backend passthrough error.
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        IquotaError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a store error without an underlying cause.
    pub fn store(message: impl Into<String>) -> Self {
        IquotaError::StoreUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        IquotaError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IquotaError::NotFound { .. })
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, IquotaError::StoreUnavailable { .. })
    }

    /// Machine-readable code rendered to callers.
    ///
    /// Backend codes pass through unchanged so front ends can show
    /// backend-specific guidance.
    pub fn error_code(&self) -> &str {
        match self {
            IquotaError::NotFound { .. } => "AEC_NOT_FOUND",
            IquotaError::Unauthorized { .. } => "AEC_FORBIDDEN",
            IquotaError::Backend { code, .. } => code.as_str(),
            IquotaError::StoreUnavailable { .. } => "AEC_STORE_UNAVAILABLE",
            IquotaError::Validation { .. } => "AEC_BAD_REQUEST",
            IquotaError::Network { .. } | IquotaError::Timeout(_) => "AEC_BACKEND_UNREACHABLE",
            _ => "AEC_SYSTEM",
        }
    }

    /// HTTP status used by the front end.
    pub fn http_status(&self) -> u16 {
        match self {
            IquotaError::NotFound { .. } => 404,
            IquotaError::Unauthorized { .. } => 403,
            IquotaError::Backend { .. } | IquotaError::Validation { .. } => 400,
            IquotaError::StoreUnavailable { .. } => 503,
            IquotaError::Network { .. } => 502,
            IquotaError::Timeout(_) => 504,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IquotaError::backend("AEC_ARG_REQUIRED", "Field: path required");
        assert_eq!(
            err.to_string(),
            "Backend error: AEC_ARG_REQUIRED - Field: path required"
        );
    }

    #[test]
    fn test_backend_code_passthrough() {
        let err = IquotaError::backend("AEC_UNAUTHORIZED", "bad credentials");
        assert_eq!(err.error_code(), "AEC_UNAUTHORIZED");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_classification() {
        assert!(IquotaError::not_found("/ifs/home:USER:bob").is_not_found());
        assert!(!IquotaError::store("connection refused").is_not_found());
        assert!(IquotaError::store("connection refused").is_store_unavailable());
        assert_eq!(IquotaError::store("x").http_status(), 503);
        assert_eq!(IquotaError::unauthorized("nope").error_code(), "AEC_FORBIDDEN");
    }

    #[test]
    fn test_sqlite_errors_are_store_errors() {
        let err: IquotaError = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_store_unavailable());
    }
}
