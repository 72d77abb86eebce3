//! Transport module - the raw stream socket capability.
//!
//! [`Transport`] is the minimal surface the client needs from a socket:
//! connect, send, receive, disconnect, plus state and endpoint accessors.
//! It keeps the connection engine independent of the concrete socket so it
//! can be driven by a test double.
//!
//! Provided implementations:
//! - [`TcpTransport`] - tokio `TcpStream`
//! - [`MemoryTransport`] - scriptable in-process double for tests
//!
//! # Contract
//!
//! - `connect` (re)initializes the transport for a new connection. The
//!   client never calls it while a previous connection is still open.
//! - `send` writes the whole payload or fails. At most one `send` and one
//!   `receive` are in flight at any time.
//! - `receive` returns `Ok(0)` when the stream is closed, including when
//!   `disconnect` is called while the receive is blocked.
//! - `disconnect` half-closes then fully closes the connection. The
//!   transport stays reusable for a later `connect`.

mod memory;
mod resolve;
mod tcp;

use std::future::Future;
use std::io;
use std::net::SocketAddr;

pub use memory::{MemoryPeer, MemoryTransport};
pub use resolve::resolve_endpoint;
pub use tcp::TcpTransport;

/// Async stream socket used by a [`Client`](crate::Client).
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `addr`.
    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<()>> + Send;

    /// Write all of `payload`.
    fn send(&self, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Read into `buf`, returning the number of bytes read (0 = closed).
    fn receive(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Gracefully shut down and close the current connection.
    fn disconnect(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Whether a connection is currently open.
    fn is_connected(&self) -> bool;

    /// Remote address of the open connection.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Local address of the open connection.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Error returned when an operation needs an open connection.
pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport not connected")
}
