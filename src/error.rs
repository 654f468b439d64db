//! Error types for the card-room client.

use thiserror::Error;

use crate::error_codes::ErrorCode;

/// Errors that can occur when using the card-room client.
#[derive(Debug, Error)]
pub enum CardRoomError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server rejected the handshake token.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        /// Human-readable reason from the server.
        reason: String,
    },

    /// The server acked a request with a failure.
    #[error("server error: {message}")]
    Server {
        /// Human-readable error message from the server.
        message: String,
        /// Structured error code, if provided by the server.
        error_code: Option<ErrorCode>,
    },

    /// The server acked a request with a message of the wrong shape.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for card-room client operations.
pub type Result<T> = std::result::Result<T, CardRoomError>;
