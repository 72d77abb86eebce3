//! Error types for sockwire.

use thiserror::Error;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SockwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Codec-level protocol violation on inbound data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Inbound frame announces a payload larger than the configured maximum.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Hostname resolved to zero usable addresses.
    #[error("address {0} is not suitable")]
    AddressResolution(String),

    /// `connect()` was called before any endpoint was configured.
    #[error("No remote endpoint configured")]
    NoEndpoint,

    /// The client was built outside of a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The client has been disposed.
    #[error("Client disposed")]
    Disposed,
}

/// Result type alias using [`SockwireError`].
pub type Result<T> = std::result::Result<T, SockwireError>;

/// Failure returned synchronously by [`Client::send`](crate::Client::send).
///
/// Transport failures never surface here; they are turned into a disconnect.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError<C: std::fmt::Debug> {
    /// The codec refused to serialize the message.
    #[error("Codec rejected message with code {0:?}")]
    Rejected(C),

    /// The client has been disposed; the message was dropped.
    #[error("Client disposed")]
    Disposed,
}
