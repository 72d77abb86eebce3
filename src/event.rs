//! Lifecycle notifications published by a [`Client`](crate::Client).
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel. Publishing
//! is fire-and-forget: the client never waits for subscribers, and a
//! subscriber that falls behind sees `RecvError::Lagged` instead of slowing
//! the connection down.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::state::ConnectionState;

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called `disconnect()`.
    Requested,
    /// The client is being disposed.
    Disposed,
    /// A receive completed with zero bytes.
    RemoteClosed,
    /// The transport reported a failure while sending.
    SendFailed(io::ErrorKind),
    /// The transport reported a failure while receiving.
    ReceiveFailed(io::ErrorKind),
    /// The receive consumer (usually the codec) rejected inbound data.
    ConsumerFault(String),
}

impl DisconnectReason {
    /// Whether the transport or the consumer caused the disconnect, as
    /// opposed to the application.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::Requested | Self::Disposed)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::Disposed => f.write_str("client disposed"),
            Self::RemoteClosed => f.write_str("remote closed the connection"),
            Self::SendFailed(kind) => write!(f, "send failed: {}", kind),
            Self::ReceiveFailed(kind) => write!(f, "receive failed: {}", kind),
            Self::ConsumerFault(msg) => write!(f, "inbound data rejected: {}", msg),
        }
    }
}

/// Notification emitted by a client.
#[derive(Debug, Clone)]
pub enum ConnectionEvent<A> {
    /// The derived connection state changed.
    StateChanged(ConnectionState),
    /// A connect attempt succeeded; the connection is now active.
    Connected {
        /// Remote address, when the transport can report it.
        peer: Option<SocketAddr>,
    },
    /// The retry budget was spent without a successful connect.
    ///
    /// Fires at most once per connect cycle.
    ConnectFailed {
        /// Retries performed after the first attempt.
        attempts: u32,
        /// Error kind of the last failed attempt, if any completed.
        last_error: Option<io::ErrorKind>,
    },
    /// The connection was torn down.
    Disconnected(DisconnectReason),
    /// Raw bytes from one transport read, before decoding.
    BytesReceived(Bytes),
    /// The codec recovered one or more messages from a read.
    Message {
        /// Decoded acknowledgement value.
        ack: A,
        /// Number of logical messages represented by `ack`.
        count: usize,
    },
}

impl<A> ConnectionEvent<A> {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state_changed",
            Self::Connected { .. } => "connected",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::Disconnected(_) => "disconnected",
            Self::BytesReceived(_) => "bytes_received",
            Self::Message { .. } => "message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(DisconnectReason::RemoteClosed.to_string(), "remote closed the connection");
        assert!(DisconnectReason::SendFailed(io::ErrorKind::BrokenPipe)
            .to_string()
            .starts_with("send failed"));
    }

    #[test]
    fn test_reason_is_fault() {
        assert!(!DisconnectReason::Requested.is_fault());
        assert!(!DisconnectReason::Disposed.is_fault());
        assert!(DisconnectReason::RemoteClosed.is_fault());
        assert!(DisconnectReason::ReceiveFailed(io::ErrorKind::ConnectionReset).is_fault());
        assert!(DisconnectReason::ConsumerFault("bad".into()).is_fault());
    }

    #[test]
    fn test_event_kind() {
        let event: ConnectionEvent<()> = ConnectionEvent::Disconnected(DisconnectReason::Requested);
        assert_eq!(event.kind(), "disconnected");

        let event: ConnectionEvent<u8> = ConnectionEvent::Message { ack: 1, count: 1 };
        assert_eq!(event.kind(), "message");
    }
}
