//! Lamport logical clock.
//!
//! Every broker and client process owns exactly one [`LamportClock`]. The
//! clock is ticked before each outbound message and the returned value is the
//! timestamp carried by that message; every inbound message that carries a
//! timestamp is passed to [`LamportClock::observe`] before its body is acted
//! upon. Together this gives the happened-before guarantee: a timestamp
//! attached to an outgoing message is strictly greater than any timestamp the
//! process has previously sent or seen.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest remote timestamp a clock will accept. Anything above it is
/// treated as corrupt, which keeps half the range free for local ticks.
pub const MAX_TIMESTAMP: u64 = u64::MAX / 2;

/// Plain logical clock value with Lamport update rules.
///
/// This is the unsynchronized building block; shared code uses [`LamportClock`].
///
/// ```rust
/// use murmur_core::time::LogicalClock;
///
/// let mut clock = LogicalClock::new();
/// assert_eq!(clock.tick(), 1);
/// assert_eq!(clock.observe(10), 11);
/// assert_eq!(clock.tick(), 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LogicalClock {
    value: u64,
}

impl LogicalClock {
    /// Create a clock starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Create a clock with a specific starting value.
    #[must_use]
    pub const fn with_value(value: u64) -> Self {
        Self { value }
    }

    /// Current value without advancing.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Advance for a local event (a send) and return the new value.
    pub fn tick(&mut self) -> u64 {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Merge a received timestamp: `max(local, remote) + 1`. A remote value
    /// above [`MAX_TIMESTAMP`] only counts as a local event.
    pub fn observe(&mut self, remote: u64) -> u64 {
        let remote = if remote > MAX_TIMESTAMP { 0 } else { remote };
        self.value = self.value.max(remote).saturating_add(1);
        self.value
    }
}

impl fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Process-wide Lamport clock guarded by its own lock.
///
/// The lock is only held for the arithmetic; callers tick, release, and then
/// send, so two concurrent senders may interleave. That is fine: Lamport
/// ordering needs monotonicity, not exclusivity.
#[derive(Debug, Default)]
pub struct LamportClock {
    inner: Mutex<LogicalClock>,
}

impl LamportClock {
    /// Create a clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock before a send and return the timestamp to attach.
    pub fn tick(&self) -> u64 {
        self.inner.lock().tick()
    }

    /// Fold a received timestamp into the clock and return the new value.
    pub fn observe(&self, remote: u64) -> u64 {
        self.inner.lock().observe(remote)
    }

    /// Observe when the message carried a timestamp; no-op otherwise.
    pub fn observe_opt(&self, remote: Option<u64>) {
        if let Some(ts) = remote {
            self.observe(ts);
        }
    }

    /// Current value.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.inner.lock().value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_logical_clock_tick() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.value(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn test_observe_takes_max_plus_one() {
        let mut clock = LogicalClock::with_value(5);
        assert_eq!(clock.observe(3), 6);
        assert_eq!(clock.observe(10), 11);
    }

    #[test]
    fn test_out_of_range_remote_cannot_pin_the_clock() {
        let mut clock = LogicalClock::with_value(7);
        assert_eq!(clock.observe(u64::MAX), 8);
        assert_eq!(clock.observe(MAX_TIMESTAMP), MAX_TIMESTAMP + 1);

        let first = clock.tick();
        let second = clock.tick();
        assert!(second > first);
        assert!(clock.observe(u64::MAX - 1) > second);
    }

    #[test]
    fn test_sent_timestamps_exceed_everything_seen() {
        let clock = LamportClock::new();
        let mut highest_seen = 0;
        for remote in [4_u64, 1, 17, 17, 3, 250, 0, 251] {
            let sent = clock.tick();
            assert!(sent > highest_seen);
            highest_seen = highest_seen.max(sent);

            clock.observe(remote);
            highest_seen = highest_seen.max(remote);
        }
        assert!(clock.tick() > highest_seen);
    }

    #[test]
    fn test_concurrent_ticks_are_unique() {
        let clock = Arc::new(LamportClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..250).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert_eq!(clock.now(), 1000);
    }

    #[test]
    fn test_observe_opt_ignores_missing() {
        let clock = LamportClock::new();
        clock.observe_opt(None);
        assert_eq!(clock.now(), 0);
        clock.observe_opt(Some(9));
        assert_eq!(clock.now(), 10);
    }
}
