//! Error types for the pool daemon
//!
//! Infrastructure failures are represented here with `thiserror`. Consensus
//! decisions (share outcomes, block acceptance) are typed results in their
//! own modules and never travel through this hierarchy.

use std::time::Duration;
use thiserror::Error;

/// Configuration error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} (expected: {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors talking to the main-chain node
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum RpcError {
    #[error("Connection failed to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Request timeout after {timeout:?} for {method}")]
    Timeout { method: String, timeout: Duration },

    #[error("HTTP error {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Daemon returned error for {method}: {message}")]
    Daemon { method: String, message: String },

    #[error("Unexpected response schema for {method}: {message}")]
    BadSchema { method: String, message: String },

    #[error("Node is incompatible: {message}")]
    Incompatible { message: String },
}

/// Errors decoding consensus blobs
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum CodecError {
    #[error("Unexpected end of input at offset {offset}")]
    Truncated { offset: usize },

    #[error("Varint overflows 64 bits at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("Invalid field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Trailing bytes after block: {count}")]
    TrailingBytes { count: usize },
}

/// Main error type for the pool daemon
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Configuration errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Main-chain node RPC errors
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Consensus blob decoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors (kept for automatic conversion)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic errors with context
    #[error("Error in {context}: {message}")]
    Other { context: String, message: String },
}

/// Result type alias for the pool daemon
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a missing field configuration error
    pub fn config_missing_field(field: impl Into<String>) -> Self {
        Self::Config(ConfigError::MissingField {
            field: field.into(),
        })
    }

    /// Create an invalid value configuration error
    pub fn config_invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        })
    }

    /// Create a generic configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::ValidationError {
            message: msg.into(),
        })
    }

    /// Create a daemon-side RPC error
    pub fn rpc_daemon(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc(RpcError::Daemon {
            method: method.into(),
            message: message.into(),
        })
    }

    /// Create a bad schema RPC error
    pub fn rpc_schema(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc(RpcError::BadSchema {
            method: method.into(),
            message: message.into(),
        })
    }

    /// Create an incompatible node error
    pub fn rpc_incompatible(message: impl Into<String>) -> Self {
        Self::Rpc(RpcError::Incompatible {
            message: message.into(),
        })
    }

    /// Create a generic error
    pub fn other(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Boot-time RPCs retry indefinitely on these; steady-state callers log
    /// and fall back to polling.
    pub fn should_retry(&self) -> bool {
        match self {
            Error::Rpc(RpcError::ConnectionFailed { .. })
            | Error::Rpc(RpcError::Timeout { .. })
            | Error::Rpc(RpcError::HttpStatus { .. }) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Rpc(_) => "rpc",
            Error::Codec(_) => "codec",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
            Error::Http(_) => "http",
            Error::Other { .. } => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("bad wallet");
        assert!(err.to_string().contains("Validation failed: bad wallet"));

        let err = Error::rpc_daemon("get_info", "busy");
        assert!(err.to_string().contains("get_info"));
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_retry_classification() {
        let retryable = Error::Rpc(RpcError::Timeout {
            method: "get_info".into(),
            timeout: Duration::from_secs(10),
        });
        assert!(retryable.should_retry());

        assert!(!Error::config_missing_field("wallet").should_retry());
        assert!(!Error::rpc_incompatible("RPC v3.7").should_retry());
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::config("x").category(), "configuration");
        assert_eq!(Error::rpc_daemon("m", "x").category(), "rpc");
        assert_eq!(
            Error::Codec(CodecError::Truncated { offset: 3 }).category(),
            "codec"
        );
    }
}
