//! Reconnect policy bookkeeping.
//!
//! [`RetryState`] is a plain state machine driven by two inputs: connect
//! attempt completions and retry timer ticks. It owns no tasks and performs
//! no I/O; the client acts on the decisions it returns.
//!
//! One connect *cycle* starts with `connect()` and ends either with a
//! successful attempt or with the retry budget exhausted. Within a cycle at
//! most one attempt is pending at a time. Attempt ids let the client discard
//! completions that arrive after their cycle was cancelled.

use std::io;
use std::time::Duration;

/// Default number of retries before giving up (0 means unlimited).
pub const DEFAULT_RETRY_LIMIT: u32 = 10;

/// Default delay between retry ticks.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1500);

/// Result of the most recent connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// What an attempt completion means for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Belongs to a cancelled cycle or a superseded attempt.
    Stale,
    /// Attempt failed; the timer decides what happens next.
    Failed,
    /// Attempt succeeded; the cycle is over.
    Succeeded,
}

/// What a timer tick asks the client to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
    /// Keep the timer running. `reissue` carries the id of a new attempt to
    /// start, or `None` when the previous attempt is still pending.
    Retry { reissue: Option<u64> },
    /// Budget spent without success: stop the timer and report failure.
    Exhausted {
        attempts: u32,
        last_error: Option<io::ErrorKind>,
    },
    /// Nothing to do: stop the timer.
    Idle,
}

#[derive(Debug)]
pub(crate) struct RetryState {
    limit: u32,
    interval: Duration,
    count: u32,
    cycle_active: bool,
    attempt: u64,
    outcome: AttemptOutcome,
    last_error: Option<io::ErrorKind>,
}

impl RetryState {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit,
            interval,
            count: 0,
            cycle_active: false,
            attempt: 0,
            outcome: AttemptOutcome::Failed,
            last_error: None,
        }
    }

    #[inline]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_cycle_active(&self) -> bool {
        self.cycle_active
    }

    /// Start a new cycle and return the id of its first attempt.
    pub fn begin_cycle(&mut self) -> u64 {
        self.count = 0;
        self.cycle_active = true;
        self.last_error = None;
        self.next_attempt()
    }

    fn next_attempt(&mut self) -> u64 {
        self.attempt = self.attempt.wrapping_add(1);
        self.outcome = AttemptOutcome::Pending;
        self.attempt
    }

    /// Record the completion of attempt `attempt`.
    pub fn complete(&mut self, attempt: u64, result: Result<(), io::ErrorKind>) -> Completion {
        if !self.cycle_active || attempt != self.attempt {
            return Completion::Stale;
        }

        match result {
            Ok(()) => {
                self.outcome = AttemptOutcome::Succeeded;
                self.count = 0;
                self.cycle_active = false;
                Completion::Succeeded
            }
            Err(kind) => {
                self.outcome = AttemptOutcome::Failed;
                self.last_error = Some(kind);
                Completion::Failed
            }
        }
    }

    /// Advance the policy by one timer tick.
    pub fn tick(&mut self) -> TickAction {
        if !self.cycle_active {
            return TickAction::Idle;
        }

        let succeeded = self.outcome == AttemptOutcome::Succeeded;
        if !succeeded && (self.limit == 0 || self.count < self.limit) {
            self.count += 1;
            let reissue = match self.outcome {
                AttemptOutcome::Failed => Some(self.next_attempt()),
                _ => None,
            };
            return TickAction::Retry { reissue };
        }

        self.cycle_active = false;
        if succeeded {
            return TickAction::Idle;
        }

        // Invalidate any attempt still in flight.
        self.attempt = self.attempt.wrapping_add(1);
        TickAction::Exhausted {
            attempts: self.count,
            last_error: self.last_error,
        }
    }

    /// Abandon the current cycle (dispose). Pending attempts become stale.
    pub fn cancel(&mut self) {
        self.cycle_active = false;
        self.attempt = self.attempt.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFUSED: io::ErrorKind = io::ErrorKind::ConnectionRefused;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_RETRY_LIMIT, 10);
        assert_eq!(DEFAULT_RETRY_INTERVAL, Duration::from_millis(1500));
    }

    #[test]
    fn test_success_on_first_attempt() {
        let mut retry = RetryState::new(3, DEFAULT_RETRY_INTERVAL);
        let id = retry.begin_cycle();

        assert_eq!(retry.complete(id, Ok(())), Completion::Succeeded);
        assert_eq!(retry.count(), 0);
        assert!(!retry.is_cycle_active());
        assert_eq!(retry.tick(), TickAction::Idle);
    }

    #[test]
    fn test_exhausts_after_limit() {
        let mut retry = RetryState::new(3, DEFAULT_RETRY_INTERVAL);
        let mut id = retry.begin_cycle();

        for expected in 1..=3 {
            assert_eq!(retry.complete(id, Err(REFUSED)), Completion::Failed);
            match retry.tick() {
                TickAction::Retry { reissue: Some(next) } => id = next,
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(retry.count(), expected);
        }

        retry.complete(id, Err(REFUSED));
        assert_eq!(
            retry.tick(),
            TickAction::Exhausted {
                attempts: 3,
                last_error: Some(REFUSED)
            }
        );
        assert_eq!(retry.count(), 3);
        assert_eq!(retry.tick(), TickAction::Idle);
    }

    #[test]
    fn test_counter_monotonic_while_failing() {
        let mut retry = RetryState::new(0, DEFAULT_RETRY_INTERVAL);
        let mut id = retry.begin_cycle();
        let mut last = 0;

        for _ in 0..50 {
            retry.complete(id, Err(REFUSED));
            if let TickAction::Retry { reissue: Some(next) } = retry.tick() {
                id = next;
            }
            assert!(retry.count() >= last);
            last = retry.count();
        }
        assert_eq!(last, 50);
        assert!(retry.is_cycle_active());
    }

    #[test]
    fn test_counter_resets_on_success() {
        let mut retry = RetryState::new(10, DEFAULT_RETRY_INTERVAL);
        let id = retry.begin_cycle();
        retry.complete(id, Err(REFUSED));
        let TickAction::Retry { reissue: Some(id) } = retry.tick() else {
            panic!("expected retry");
        };
        assert_eq!(retry.count(), 1);

        assert_eq!(retry.complete(id, Ok(())), Completion::Succeeded);
        assert_eq!(retry.count(), 0);
    }

    #[test]
    fn test_pending_attempt_counted_not_reissued() {
        let mut retry = RetryState::new(2, DEFAULT_RETRY_INTERVAL);
        let id = retry.begin_cycle();

        assert_eq!(retry.tick(), TickAction::Retry { reissue: None });
        assert_eq!(retry.tick(), TickAction::Retry { reissue: None });
        assert!(matches!(retry.tick(), TickAction::Exhausted { attempts: 2, .. }));

        // The attempt that was still pending is now stale.
        assert_eq!(retry.complete(id, Ok(())), Completion::Stale);
    }

    #[test]
    fn test_superseded_attempt_is_stale() {
        let mut retry = RetryState::new(5, DEFAULT_RETRY_INTERVAL);
        let first = retry.begin_cycle();
        retry.complete(first, Err(REFUSED));
        retry.tick();

        assert_eq!(retry.complete(first, Ok(())), Completion::Stale);
    }

    #[test]
    fn test_cancel_makes_pending_stale() {
        let mut retry = RetryState::new(5, DEFAULT_RETRY_INTERVAL);
        let id = retry.begin_cycle();
        retry.cancel();

        assert_eq!(retry.complete(id, Ok(())), Completion::Stale);
        assert_eq!(retry.tick(), TickAction::Idle);
    }

    #[test]
    fn test_new_cycle_resets_counter() {
        let mut retry = RetryState::new(1, DEFAULT_RETRY_INTERVAL);
        let id = retry.begin_cycle();
        retry.complete(id, Err(REFUSED));
        retry.tick();
        retry.tick();
        assert_eq!(retry.count(), 1);

        retry.begin_cycle();
        assert_eq!(retry.count(), 0);
        assert!(retry.is_cycle_active());
    }

    #[test]
    fn test_limit_and_interval_are_configurable() {
        let mut retry = RetryState::new(DEFAULT_RETRY_LIMIT, DEFAULT_RETRY_INTERVAL);
        retry.set_limit(0);
        retry.set_interval(Duration::from_millis(100));
        assert_eq!(retry.limit(), 0);
        assert_eq!(retry.interval(), Duration::from_millis(100));
    }
}
