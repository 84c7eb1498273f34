//! Error types for simbridge.
//!
//! A single error enum covers the component registries, the stream protocol,
//! the RPC layer and the registration handshake. Handler errors only ever cross
//! the stream as a `Nak` carrying `to_string()` of the error.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the simbridge library.
#[derive(Debug, Error)]
pub enum SimError {
    // Component lifecycle errors
    #[error("Factory returned no transport for component {component_id}")]
    Factory { component_id: String },

    #[error("Failed to start transport for component {component_id}: {message}")]
    Start {
        component_id: String,
        message: String,
    },

    #[error("Failed to stop transport for component {component_id}: {message}")]
    Stop {
        component_id: String,
        message: String,
    },

    #[error("Unknown component ID: {component_id}")]
    UnknownComponent { component_id: String },

    #[error("Send failed for component {component_id}: {message}")]
    Send {
        component_id: String,
        message: String,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Handler error: {0}")]
    Handler(String),

    // Registration errors
    #[error("ServiceAddress is required for sidecar registration")]
    MissingAddress,

    #[error("Allocator error: {message}")]
    Allocator {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Registration failed: {0}")]
    Registration(String),

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // Stream and protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Stream closed")]
    StreamClosed,

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Lock poisoned: {0}")]
    Lock(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for simbridge operations.
pub type Result<T> = std::result::Result<T, SimError>;

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SimError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SimError::Timeout(Duration::from_secs(0))
        } else {
            SimError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl SimError {
    /// Build a handler error from anything displayable.
    pub fn handler(message: impl std::fmt::Display) -> Self {
        SimError::Handler(message.to_string())
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32000: Network/connectivity error
    /// - -32001: Unknown component
    /// - -32002: Transport factory/start/stop/send failure
    /// - -32003: Handler error
    /// - -32004: Registration error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            SimError::Json { .. } => -32700,
            SimError::Protocol { .. } => -32600,
            SimError::MethodNotFound { .. } => -32601,
            SimError::InvalidParams { .. } => -32602,

            SimError::Network { .. } | SimError::Timeout(_) | SimError::StreamClosed => -32000,

            SimError::UnknownComponent { .. } => -32001,

            SimError::Factory { .. }
            | SimError::Start { .. }
            | SimError::Stop { .. }
            | SimError::Send { .. } => -32002,

            SimError::Handler(_) => -32003,

            SimError::MissingAddress | SimError::Allocator { .. } | SimError::Registration(_) => {
                -32004
            }

            SimError::Remote { code, .. } => *code,

            _ => -32603,
        }
    }

    /// Whether this error came from the peer going away rather than a bad request.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SimError::StreamClosed | SimError::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::UnknownComponent {
            component_id: "rx-1".into(),
        };
        assert_eq!(err.to_string(), "Unknown component ID: rx-1");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            SimError::UnknownComponent {
                component_id: "c".into()
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(
            SimError::MethodNotFound {
                method: "nope".into()
            }
            .to_rpc_error_code(),
            -32601
        );
        assert_eq!(SimError::Other("x".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_disconnect_errors() {
        assert!(SimError::StreamClosed.is_disconnect());
        assert!(!SimError::MissingAddress.is_disconnect());
    }
}
