//! Ordered send engine.
//!
//! Payloads leave in submission order with at most one transport send in
//! flight. The in-flight counter and the FIFO backlog live under one lock,
//! so a caller never observes one updated without the other:
//!
//! ```text
//! send() ─► admit ─┬─ counter 0 → 1 ─► Dispatch ─► drain loop ─► Transport
//!                  └─ counter ≥ 1   ─► backlog ───────┘ (complete() pops next)
//! ```
//!
//! Whoever gets `Dispatch` runs [`drain`], which keeps popping the backlog
//! after each completed send until the counter reaches zero.

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::transport::Transport;

/// Result of handing a payload to the queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admit {
    /// Queue was idle: the caller owns dispatch of this payload.
    Dispatch(Bytes),
    /// Another send is in flight; the payload waits in the backlog.
    Queued,
    /// Queue is closed; the payload was dropped.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Payloads accepted and not yet completed, the live one included.
    in_flight: usize,
    backlog: VecDeque<Bytes>,
    closed: bool,
}

/// In-flight counter plus backlog.
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    state: Mutex<QueueState>,
}

/// A transport send failed while draining.
#[derive(Debug)]
pub(crate) struct SendFailure {
    pub error: io::Error,
    /// Backlog entries discarded because of the failure.
    pub dropped: usize,
    /// Connection session the failed send was issued on.
    pub session: u64,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn admit(&self, payload: Bytes) -> Admit {
        let mut state = self.lock();
        if state.closed {
            return Admit::Closed;
        }
        state.in_flight += 1;
        if state.in_flight == 1 {
            Admit::Dispatch(payload)
        } else {
            state.backlog.push_back(payload);
            Admit::Queued
        }
    }

    /// Mark the live send complete and take the next payload to dispatch.
    pub fn complete(&self) -> Option<Bytes> {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            return None;
        }
        let next = state.backlog.pop_front();
        if next.is_none() {
            state.in_flight = 0;
        }
        next
    }

    /// Discard the backlog after a failed send. Returns the number dropped.
    pub fn fail(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.backlog.len();
        state.backlog.clear();
        state.in_flight = 0;
        dropped
    }

    /// Refuse further payloads and discard the backlog.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.backlog.len();
        state.backlog.clear();
        state.in_flight = 0;
        dropped
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    #[cfg(test)]
    fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }
}

/// Send `first`, then every payload the queue hands back, one at a time.
///
/// Returns the number of payloads written. On a transport error the backlog
/// is discarded and the failure is returned with the session that was
/// current when the failed send was issued.
pub(crate) async fn drain<T, S>(
    queue: &SendQueue,
    transport: &T,
    first: Bytes,
    session: S,
) -> Result<usize, SendFailure>
where
    T: Transport,
    S: Fn() -> u64,
{
    let mut next = Some(first);
    let mut written = 0;

    while let Some(payload) = next {
        let current = session();
        if let Err(error) = transport.send(&payload).await {
            let dropped = queue.fail();
            return Err(SendFailure {
                error,
                dropped,
                session: current,
            });
        }
        written += 1;
        next = queue.complete();
    }

    Ok(written)
}
