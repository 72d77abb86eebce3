//! TCP transport over tokio.
//!
//! The stream is split into owned halves so a send and a receive can be in
//! flight at the same time. Each half sits behind its own async mutex; the
//! client's one-send/one-receive discipline means neither is contended in
//! practice.
//!
//! A blocked read or write is woken by `disconnect()` through a watch
//! channel whose value is bumped on every close.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::transport::{TcpTransport, Transport};
//!
//! let transport = TcpTransport::new();
//! transport.connect("127.0.0.1:9000".parse()?).await?;
//! transport.send(b"ping").await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use super::{not_connected, Transport};

#[derive(Debug, Default, Clone, Copy)]
struct Endpoints {
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

/// Tokio TCP implementation of [`Transport`].
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Bumped on every disconnect to wake blocked I/O.
    closed: watch::Sender<u64>,
    connected: AtomicBool,
    endpoints: StdMutex<Endpoints>,
    nodelay: bool,
}

impl TcpTransport {
    /// Create a transport with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self::with_nodelay(true)
    }

    /// Create a transport with an explicit `TCP_NODELAY` setting.
    pub fn with_nodelay(nodelay: bool) -> Self {
        let (closed, _) = watch::channel(0);
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closed,
            connected: AtomicBool::new(false),
            endpoints: StdMutex::new(Endpoints::default()),
            nodelay,
        }
    }

    fn set_endpoints(&self, endpoints: Endpoints) {
        *self.endpoints.lock().unwrap_or_else(PoisonError::into_inner) = endpoints;
    }

    fn endpoints(&self) -> Endpoints {
        *self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(self.nodelay)?;

        let endpoints = Endpoints {
            peer: stream.peer_addr().ok(),
            local: stream.local_addr().ok(),
        };
        let (read_half, write_half) = stream.into_split();

        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        self.set_endpoints(endpoints);
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!("TCP connected to {} from {:?}", addr, endpoints.local);
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut closed = self.closed.subscribe();
        if !self.connected.load(Ordering::SeqCst) {
            return Err(not_connected());
        }

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(not_connected)?;

        tokio::select! {
            res = stream.write_all(payload) => res,
            _ = closed.changed() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "transport disconnected during send",
            )),
        }
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let mut reader = self.reader.lock().await;
        let stream = reader.as_mut().ok_or_else(not_connected)?;

        tokio::select! {
            res = stream.read(buf) => res,
            _ = closed.changed() => Ok(0),
        }
    }

    async fn disconnect(&self) -> io::Result<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.closed.send_modify(|generation| *generation = generation.wrapping_add(1));

        // Half-close first so the peer sees a clean FIN, then drop both halves.
        let mut result = Ok(());
        if let Some(mut write_half) = self.writer.lock().await.take() {
            result = write_half.shutdown().await;
        }
        self.reader.lock().await.take();
        self.set_endpoints(Endpoints::default());

        if was_connected {
            tracing::debug!("TCP transport closed");
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.endpoints().peer
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoints().local
    }
}
