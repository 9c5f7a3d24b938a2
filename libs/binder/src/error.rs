//! Binder Error Types
//!
//! Error taxonomy for the synchronization client. Protocol-level
//! anomalies on the inbound path (unknown reply channels, misdirected
//! message kinds) are absorbed by the dispatcher with a diagnostic and
//! never surface here; `Protocol` is returned only where the caller can
//! act on it, e.g. a reply that fails descriptor validation.

use crate::connection::ConnectionState;
use thiserror::Error;

/// Main error type for binder operations
#[derive(Error, Debug)]
pub enum BindError {
    /// Transport-level failure before or during readiness
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation attempted while the connection is not Ready
    #[error("Not ready: connection is {state:?}")]
    NotReady { state: ConnectionState },

    /// The connection reached its terminal state
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// Lifecycle misuse, e.g. connect() on a non-Disconnected manager
    #[error("Invalid state: expected {expected:?}, was {actual:?}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    /// Reply did not match the declared object shape
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// No reply arrived within the configured bound
    #[error("Request for '{type_name}' timed out after {timeout_ms}ms")]
    RequestTimeout { type_name: String, timeout_ms: u64 },

    /// Codec or framing failure
    #[error(transparent)]
    Wire(#[from] wire::WireError),
}

/// Result type alias for binder operations
pub type Result<T> = std::result::Result<T, BindError>;

impl BindError {
    /// Create a connection error without a source
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping a transport error
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a closed error
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// True when the operation failed because the connection is gone
    /// for good and a retry on this manager cannot succeed
    pub fn is_terminal(&self) -> bool {
        matches!(self, BindError::Closed { .. })
    }
}
