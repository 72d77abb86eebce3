//! Connection state and the gate that linearizes its transitions.
//!
//! The externally visible [`ConnectionState`] is derived from a small set of
//! flags. `Active` is not stored anywhere: it is reported whenever both
//! `connected` and `initialized` hold. `Disposed` is terminal, every
//! transition method refuses to touch the flags once it is set.
//!
//! ```text
//!  Initialized ──connect()──▶ Connecting ──attempt ok──▶ Active
//!       ▲                        │                         │
//!       │      retries exhausted │          disconnect()   │
//!       └────────────────────────┴─────────────────────────┘
//!
//!  any ──dispose()──▶ Disposed
//! ```

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Observable state of a [`Client`](crate::Client) connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Torn down for good. No transition leaves this state.
    Disposed,
    /// Constructed and idle, not connected.
    Initialized,
    /// A connect cycle (first attempt plus retries) is running.
    Connecting,
    /// Connected at the transport level but not initialized.
    Connected,
    /// Connected and initialized; sends and receives flow.
    Active,
}

impl ConnectionState {
    /// True when the transport is connected (`Connected` or `Active`).
    #[inline]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Active)
    }

    /// True when the connection is fully usable.
    #[inline]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// True once the client has been disposed.
    #[inline]
    pub fn is_disposed(self) -> bool {
        self == Self::Disposed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disposed => "disposed",
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// Raw flags behind [`ConnectionState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StateFlags {
    pub initialized: bool,
    pub connecting: bool,
    pub connected: bool,
    pub disposed: bool,
    /// Incremented on every activation; identifies one physical connection.
    pub session: u64,
}

impl StateFlags {
    /// Derive the public state. `Active` is `connected && initialized`.
    pub fn state(&self) -> ConnectionState {
        if self.disposed {
            ConnectionState::Disposed
        } else if self.connected && self.initialized {
            ConnectionState::Active
        } else if self.connected {
            ConnectionState::Connected
        } else if self.connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Initialized
        }
    }
}

/// Single mutual-exclusion gate over the connection flags.
///
/// Every transition takes a `notify` callback that runs under the lock when
/// the derived state changed, so state-change notifications are observed in
/// the same order the transitions happened.
#[derive(Debug)]
pub(crate) struct StateGate {
    flags: Mutex<StateFlags>,
}

impl StateGate {
    /// New gate in the `Initialized` state.
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(StateFlags {
                initialized: true,
                ..StateFlags::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition<R>(
        &self,
        notify: impl FnOnce(ConnectionState),
        f: impl FnOnce(&mut StateFlags) -> R,
    ) -> R {
        let mut flags = self.lock();
        let before = flags.state();
        let result = f(&mut flags);
        let after = flags.state();
        if before != after {
            tracing::debug!("Connection state {} -> {}", before, after);
            notify(after);
        }
        result
    }

    /// Current derived state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state()
    }

    /// Current session number (changes on every activation).
    pub fn session(&self) -> u64 {
        self.lock().session
    }

    /// Enter `Connecting`. Returns false when disposed or already connected.
    pub fn begin_connecting(&self, notify: impl FnOnce(ConnectionState)) -> bool {
        self.transition(notify, |flags| {
            if flags.disposed || flags.connected {
                return false;
            }
            flags.connecting = true;
            true
        })
    }

    /// Leave `Connecting` without having connected.
    pub fn end_connecting(&self, notify: impl FnOnce(ConnectionState)) {
        self.transition(notify, |flags| {
            if !flags.disposed {
                flags.connecting = false;
            }
        })
    }

    /// Set the flags that compose `Active`. Idempotent.
    ///
    /// Returns the session number of the active connection, or `None` when
    /// the gate is disposed. A fresh session is only opened when the
    /// connection was not already connected.
    pub fn activate(&self, notify: impl FnOnce(ConnectionState)) -> Option<u64> {
        self.transition(notify, |flags| {
            if flags.disposed {
                return None;
            }
            if !flags.connected {
                flags.session = flags.session.wrapping_add(1);
            }
            flags.connected = true;
            flags.initialized = true;
            flags.connecting = false;
            Some(flags.session)
        })
    }

    /// Clear `Connected`, optionally only if `session` is still current.
    ///
    /// Returns false when there was nothing to clear, which is what makes
    /// disconnect idempotent.
    pub fn clear_connected(
        &self,
        session: Option<u64>,
        notify: impl FnOnce(ConnectionState),
    ) -> bool {
        self.transition(notify, |flags| {
            if !flags.connected || flags.disposed {
                return false;
            }
            if session.is_some_and(|s| s != flags.session) {
                return false;
            }
            flags.connected = false;
            true
        })
    }

    /// Move to `Disposed`. Returns false if it already was.
    pub fn dispose(&self, notify: impl FnOnce(ConnectionState)) -> bool {
        self.transition(notify, |flags| {
            if flags.disposed {
                return false;
            }
            flags.disposed = true;
            flags.connected = false;
            flags.connecting = false;
            flags.initialized = false;
            true
        })
    }
}

impl Default for StateGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(_: ConnectionState) {}

    #[test]
    fn test_new_gate_is_initialized() {
        let gate = StateGate::new();
        assert_eq!(gate.state(), ConnectionState::Initialized);
        assert_eq!(gate.session(), 0);
    }

    #[test]
    fn test_active_iff_connected_and_initialized() {
        for bits in 0u8..8 {
            let flags = StateFlags {
                initialized: bits & 1 != 0,
                connecting: bits & 2 != 0,
                connected: bits & 4 != 0,
                disposed: false,
                session: 0,
            };
            assert_eq!(
                flags.state().is_active(),
                flags.connected && flags.initialized,
                "flags {:?}",
                flags
            );
        }
    }

    #[test]
    fn test_connected_without_initialized() {
        let flags = StateFlags {
            connected: true,
            ..StateFlags::default()
        };
        assert_eq!(flags.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_full_cycle_notifications() {
        let gate = StateGate::new();
        let mut seen = Vec::new();

        assert!(gate.begin_connecting(|s| seen.push(s)));
        assert_eq!(gate.activate(|s| seen.push(s)), Some(1));
        assert!(gate.clear_connected(None, |s| seen.push(s)));

        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Active,
                ConnectionState::Initialized
            ]
        );
    }

    #[test]
    fn test_activate_is_idempotent() {
        let gate = StateGate::new();
        let mut notified = 0;

        assert_eq!(gate.activate(|_| notified += 1), Some(1));
        assert_eq!(gate.activate(|_| notified += 1), Some(1));

        assert_eq!(notified, 1);
        assert_eq!(gate.state(), ConnectionState::Active);
    }

    #[test]
    fn test_session_advances_per_connection() {
        let gate = StateGate::new();
        assert_eq!(gate.activate(quiet), Some(1));
        gate.clear_connected(None, quiet);
        assert_eq!(gate.activate(quiet), Some(2));
    }

    #[test]
    fn test_clear_connected_is_idempotent() {
        let gate = StateGate::new();
        gate.activate(quiet);

        assert!(gate.clear_connected(None, quiet));
        assert!(!gate.clear_connected(None, quiet));
    }

    #[test]
    fn test_clear_connected_ignores_stale_session() {
        let gate = StateGate::new();
        let first = gate.activate(quiet).unwrap();
        gate.clear_connected(None, quiet);
        gate.activate(quiet);

        assert!(!gate.clear_connected(Some(first), quiet));
        assert!(gate.state().is_active());
    }

    #[test]
    fn test_begin_connecting_refused_when_connected() {
        let gate = StateGate::new();
        gate.activate(quiet);
        assert!(!gate.begin_connecting(quiet));
    }

    #[test]
    fn test_end_connecting_returns_to_initialized() {
        let gate = StateGate::new();
        gate.begin_connecting(quiet);
        gate.end_connecting(quiet);
        assert_eq!(gate.state(), ConnectionState::Initialized);
    }

    #[test]
    fn test_disposed_is_terminal() {
        let gate = StateGate::new();
        gate.activate(quiet);

        assert!(gate.dispose(quiet));
        assert!(!gate.dispose(quiet));
        assert!(!gate.begin_connecting(quiet));
        assert_eq!(gate.activate(quiet), None);
        assert!(!gate.clear_connected(None, quiet));
        gate.end_connecting(quiet);

        assert_eq!(gate.state(), ConnectionState::Disposed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Active.to_string(), "active");
        assert_eq!(ConnectionState::Disposed.to_string(), "disposed");
    }
}
