//! Error types for tcpwire.

use thiserror::Error;

/// Main error type for all tcpwire operations.
#[derive(Debug, Error)]
pub enum TcpwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serializer read failure (truncated or negative length).
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protocol error (oversized body, invalid command, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Host string is not a valid IP address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Port outside 1..65535.
    #[error("Invalid port: {0}")]
    InvalidPort(i64),

    /// Handler registered with an empty method name.
    #[error("Method name must not be empty")]
    EmptyMethod,

    /// A handler is already registered for this method.
    #[error("Method already registered: {0}")]
    DuplicateMethod(String),

    /// A call with the same correlation key is still outstanding.
    #[error("Call already outstanding: {0}")]
    DuplicateCall(String),

    /// Operation requires a live connection.
    #[error("Not connected")]
    NotConnected,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using TcpwireError.
pub type Result<T> = std::result::Result<T, TcpwireError>;
