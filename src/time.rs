//! Monotonic time: instants, durations, and the host-supplied tick oracle.
//!
//! The spec explicitly rules out a wall-clock source: every timer in this
//! crate is driven off a millisecond tick handed in by whatever embeds the
//! crate, via the [`Clock`] trait. This mirrors `original_source`'s
//! `util::Time &time` parameter threaded through every `execute()` call,
//! rather than the teacher's `embassy_time::Instant::now()` global (which
//! needs a registered time driver and can't be swapped out for a
//! deterministic one in tests).

use crate::poll::Poll;

/// An opaque monotonic instant, in milliseconds since some unspecified
/// epoch fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Saturating duration since an earlier instant.
    pub fn checked_duration_since(self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    pub fn checked_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        self.checked_add(rhs)
    }
}

impl core::ops::Sub for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        self.checked_duration_since(rhs)
    }
}

/// A saturating, millisecond-resolution duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1000))
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

/// A source of monotonic time.
///
/// Implemented by the host integration (a hardware tick counter, or in
/// tests a [`MockClock`] that is advanced explicitly).
pub trait Clock {
    fn now(&self) -> Instant;
}

/// A one-shot timer: pending until `now() >= deadline`, then ready forever.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    deadline: Instant,
}

impl Delay {
    pub fn new(clock: &impl Clock, timeout: Duration) -> Self {
        Self {
            deadline: clock.now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn poll(&self, clock: &impl Clock) -> Poll<()> {
        if clock.now() >= self.deadline {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    pub fn is_expired(&self, clock: &impl Clock) -> bool {
        self.poll(clock).is_ready()
    }

    /// Resets the deadline to `timeout` from now, discarding any elapsed
    /// progress towards the previous deadline.
    pub fn reset(&mut self, clock: &impl Clock, timeout: Duration) {
        self.deadline = clock.now() + timeout;
    }
}

/// A repeating timer that becomes ready once per `interval`, then
/// immediately re-arms for the next interval.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    interval: Duration,
    next: Instant,
}

impl Debounce {
    pub fn new(clock: &impl Clock, interval: Duration) -> Self {
        Self {
            interval,
            next: clock.now() + interval,
        }
    }

    pub fn poll(&mut self, clock: &impl Clock) -> Poll<()> {
        let now = clock.now();
        if now >= self.next {
            self.next = now + self.interval;
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// A clock driven explicitly by test code instead of a hardware tick.
#[cfg(any(test, feature = "std"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct MockClock {
    now: core::cell::Cell<u64>,
}

#[cfg(any(test, feature = "std"))]
impl MockClock {
    pub fn new() -> Self {
        Self {
            now: core::cell::Cell::new(0),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.now.set(self.now.get().saturating_add(d.as_millis()));
    }

    pub fn set(&self, instant: Instant) {
        self.now.set(instant.as_millis());
    }
}

#[cfg(any(test, feature = "std"))]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_pending_then_ready() {
        let clock = MockClock::new();
        let d = Delay::new(&clock, Duration::from_millis(100));
        assert!(d.poll(&clock).is_pending());
        clock.advance(Duration::from_millis(99));
        assert!(d.poll(&clock).is_pending());
        clock.advance(Duration::from_millis(1));
        assert!(d.poll(&clock).is_ready());
        // stays ready
        clock.advance(Duration::from_millis(1));
        assert!(d.poll(&clock).is_ready());
    }

    #[test]
    fn debounce_rearms_each_interval() {
        let clock = MockClock::new();
        let mut d = Debounce::new(&clock, Duration::from_millis(10));
        assert!(d.poll(&clock).is_pending());
        clock.advance(Duration::from_millis(10));
        assert!(d.poll(&clock).is_ready());
        assert!(d.poll(&clock).is_pending());
        clock.advance(Duration::from_millis(10));
        assert!(d.poll(&clock).is_ready());
    }

    #[test]
    fn duration_subtraction_saturates() {
        let clock = MockClock::new();
        let earlier = clock.now();
        clock.advance(Duration::from_millis(5));
        let later = clock.now();
        assert_eq!(earlier - later, Duration::ZERO);
        assert_eq!(later - earlier, Duration::from_millis(5));
    }
}
