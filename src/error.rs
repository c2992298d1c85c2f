//! Error types for the AMI client

use thiserror::Error;

/// Result alias used throughout the crate
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors produced by the AMI client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// TCP dial or greeting failure
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Server rejected the Login action
    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// Socket read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the TCP connection, or the generation was torn down
    #[error("connection closed")]
    ConnectionClosed,

    /// Low-level operation exceeded its deadline
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// No response (or list completion) arrived within the action timeout
    #[error("action {action} timed out after {timeout_ms}ms")]
    ActionTimeout { action: String, timeout_ms: u64 },

    /// `send` was called while no connection is online
    #[error("not connected to Asterisk")]
    NotConnected,

    /// Frame line without a `Name: Value` separator
    #[error("malformed frame line: {line}")]
    MalformedFrame { line: String },

    /// Invalid outgoing data or inbound framing violation
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// Receive buffer exceeded its hard limit
    #[error("buffer overflow: {size} bytes exceeds limit of {limit}")]
    BufferOverflow { size: usize, limit: usize },

    /// Subscriber fell behind and items were dropped
    #[error("subscriber queue full, items dropped")]
    QueueFull,

    /// Server answered the action with `Response: Error`
    #[error("action failed: {message}")]
    ActionFailed { message: String },

    /// Typed decoding of a field map failed
    #[error("cannot decode field {field}: {reason}")]
    Decode { field: String, reason: String },
}

impl AmiError {
    /// Build a [`AmiError::ProtocolError`]
    pub fn protocol_error(message: impl Into<String>) -> Self {
        AmiError::ProtocolError {
            message: message.into(),
        }
    }

    /// Build a [`AmiError::AuthFailed`]
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        AmiError::AuthFailed {
            reason: reason.into(),
        }
    }

    /// Failures that end the connection the action was riding on.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AmiError::Connect { .. }
                | AmiError::Io(_)
                | AmiError::ConnectionClosed
                | AmiError::Timeout { .. }
                | AmiError::BufferOverflow { .. }
        )
    }
}
