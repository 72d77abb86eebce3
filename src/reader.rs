//! Continuous receive loop.
//!
//! One fixed buffer is allocated up front and reused for every read. Each
//! completed read is handed to a consumer as `&buf[..n]`; the loop then
//! re-arms over the whole buffer. No framing happens here: one transport
//! read is one consumer call.

use std::io;

use tokio::sync::Mutex;

use crate::error::SockwireError;
use crate::transport::Transport;

/// Default receive buffer size in bytes.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1024;

/// Why a receive loop stopped.
#[derive(Debug)]
pub(crate) enum ReceiveStop {
    /// The transport reported end of stream.
    Closed,
    /// The transport read failed.
    Failed(io::Error),
    /// The consumer rejected a buffer.
    Rejected(SockwireError),
}

/// Receive slot: the reusable buffer, held for the lifetime of one loop.
#[derive(Debug)]
pub(crate) struct ReceiveEngine {
    slot: Mutex<Box<[u8]>>,
    capacity: usize,
}

impl ReceiveEngine {
    pub fn new(buffer_size: usize) -> Self {
        let capacity = buffer_size.max(1);
        Self {
            slot: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receive until the stream closes, a read fails or `consume` errors.
    ///
    /// Holding the slot for the whole loop keeps at most one receive in
    /// flight, even if a new loop is started before the old one exits.
    pub async fn run<T, F>(&self, transport: &T, mut consume: F) -> ReceiveStop
    where
        T: Transport,
        F: FnMut(&[u8]) -> Result<(), SockwireError>,
    {
        let mut buf = self.slot.lock().await;
        loop {
            match transport.receive(&mut buf[..]).await {
                Ok(0) => return ReceiveStop::Closed,
                Ok(n) => {
                    if let Err(e) = consume(&buf[..n]) {
                        return ReceiveStop::Rejected(e);
                    }
                }
                Err(e) => return ReceiveStop::Failed(e),
            }
        }
    }
}
