//! In-memory transport for tests and in-process wiring.
//!
//! [`MemoryTransport`] is driven by the client; the paired [`MemoryPeer`]
//! plays the remote side. The peer scripts what the transport does: refuse
//! or delay connects, feed inbound bytes, close the stream, fail sends. It
//! also records what happened (payloads, call counts, send concurrency) so
//! tests can assert on it.
//!
//! # Example
//!
//! ```
//! use sockwire::transport::{MemoryTransport, Transport};
//!
//! # tokio_test_block_on(async {
//! let (transport, peer) = MemoryTransport::pair();
//! transport.connect("127.0.0.1:9000".parse().unwrap()).await.unwrap();
//! transport.send(b"hello").await.unwrap();
//! assert_eq!(peer.sent()[0].as_ref(), b"hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use super::{not_connected, Transport};

/// Poll interval of [`MemoryPeer::wait_for_sent`].
const WAIT_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
enum Inbound {
    Data(Bytes),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Debug)]
struct Control {
    accepting: bool,
    connected: bool,
    peer: Option<SocketAddr>,
    inbound: VecDeque<Inbound>,
    sent: Vec<Bytes>,
    connect_delay: Duration,
    send_delay: Duration,
    fail_sends: Option<io::ErrorKind>,
    connect_attempts: u32,
    receive_calls: u32,
    disconnects: u32,
    sends_in_flight: u32,
    max_sends_in_flight: u32,
}

#[derive(Debug)]
struct Shared {
    control: Mutex<Control>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Remote side of a [`MemoryTransport`], used to script and inspect it.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create a transport and its peer. Connects are accepted by default.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                accepting: true,
                connected: false,
                peer: None,
                inbound: VecDeque::new(),
                sent: Vec::new(),
                connect_delay: Duration::ZERO,
                send_delay: Duration::ZERO,
                fail_sends: None,
                connect_attempts: 0,
                receive_calls: 0,
                disconnects: 0,
                sends_in_flight: 0,
                max_sends_in_flight: 0,
            }),
            changed: Notify::new(),
        });
        (
            MemoryTransport {
                shared: shared.clone(),
            },
            MemoryPeer { shared },
        )
    }
}

impl Transport for MemoryTransport {
    async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let delay = {
            let mut control = self.shared.lock();
            control.connect_attempts += 1;
            control.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut control = self.shared.lock();
        if !control.accepting {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory peer refused connection",
            ));
        }
        control.connected = true;
        control.peer = Some(addr);
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let delay = {
            let mut control = self.shared.lock();
            if !control.connected {
                return Err(not_connected());
            }
            if let Some(kind) = control.fail_sends {
                return Err(io::Error::new(kind, "memory peer failed send"));
            }
            control.sends_in_flight += 1;
            control.max_sends_in_flight = control.max_sends_in_flight.max(control.sends_in_flight);
            control.send_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut control = self.shared.lock();
        control.sends_in_flight -= 1;
        control.sent.push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut control = self.shared.lock();
            control.receive_calls += 1;
            if !control.connected {
                return Err(not_connected());
            }
        }

        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut control = self.shared.lock();
                if !control.connected {
                    return Ok(0);
                }
                match control.inbound.pop_front() {
                    Some(Inbound::Data(mut data)) => {
                        let n = data.len().min(buf.len());
                        buf[..n].copy_from_slice(&data[..n]);
                        if n < data.len() {
                            control.inbound.push_front(Inbound::Data(data.split_off(n)));
                        }
                        return Ok(n);
                    }
                    Some(Inbound::Eof) => return Ok(0),
                    Some(Inbound::Error(kind)) => {
                        return Err(io::Error::new(kind, "memory peer failed receive"))
                    }
                    None => {}
                }
            }

            notified.await;
        }
    }

    async fn disconnect(&self) -> io::Result<()> {
        {
            let mut control = self.shared.lock();
            if control.connected {
                control.disconnects += 1;
            }
            control.connected = false;
            control.peer = None;
            control.inbound.clear();
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().peer
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.is_connected()
            .then(|| SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }
}

impl MemoryPeer {
    fn enqueue(&self, item: Inbound) {
        self.shared.lock().inbound.push_back(item);
        self.shared.changed.notify_waiters();
    }

    /// Deliver bytes to the transport's next receive.
    pub fn push(&self, data: impl Into<Bytes>) {
        self.enqueue(Inbound::Data(data.into()));
    }

    /// Close the stream: the next receive returns 0 bytes.
    pub fn close(&self) {
        self.enqueue(Inbound::Eof);
    }

    /// Make the next receive fail with `kind`.
    pub fn fail_receive(&self, kind: io::ErrorKind) {
        self.enqueue(Inbound::Error(kind));
    }

    /// Accept (`true`) or refuse (`false`) future connects.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.lock().accepting = accepting;
    }

    /// Delay every connect attempt by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.shared.lock().connect_delay = delay;
    }

    /// Delay every send completion by `delay`.
    pub fn set_send_delay(&self, delay: Duration) {
        self.shared.lock().send_delay = delay;
    }

    /// Make every send fail with `kind` (`None` restores normal sends).
    pub fn fail_sends(&self, kind: Option<io::ErrorKind>) {
        self.shared.lock().fail_sends = kind;
    }

    /// Payloads received from the transport, in completion order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.shared.lock().sent.clone()
    }

    /// Wait until at least `count` payloads were sent, or `timeout` elapses.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<Bytes> {
        let _ = tokio::time::timeout(timeout, async {
            while self.shared.lock().sent.len() < count {
                tokio::time::sleep(WAIT_INTERVAL).await;
            }
        })
        .await;
        self.sent()
    }

    /// Number of connect calls made so far.
    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    /// Number of receive calls made so far.
    pub fn receive_calls(&self) -> u32 {
        self.shared.lock().receive_calls
    }

    /// Number of disconnects of an open connection.
    pub fn disconnects(&self) -> u32 {
        self.shared.lock().disconnects
    }

    /// Highest number of sends observed in flight at once.
    pub fn max_sends_in_flight(&self) -> u32 {
        self.shared.lock().max_sends_in_flight
    }

    /// Whether the transport side currently holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}
