//! Reference-clock abstraction and the periodic-signal primitive.
//!
//! The engine never owns the lifetime of the clock that paces it: the
//! [`crate::pacer::FramePacer`] holds a [`std::sync::Weak`] back-reference and
//! only upgrades it for the duration of an activation cycle. A clock raises a
//! [`PeriodicSignal`] once per frame interval after an advise has been
//! registered with [`ReferenceClock::advise_periodic`].
//!
//! [`SystemClock`] is the built-in implementation over [`std::time::Instant`];
//! a host pipeline with its own clock implements [`ReferenceClock`] instead.

use std::collections::HashMap;
use std::ops::{Add, Sub};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Errors reported by a [`ReferenceClock`].
#[derive(thiserror::Error, Eq, PartialEq, Clone, Copy, Debug)]
pub enum ClockError {
    /// The clock cannot service advises (disconnected or shutting down).
    #[error("The reference clock is unavailable")]
    Unavailable,
    /// A periodic advise was requested with a zero period.
    #[error("The advise period must be greater than zero")]
    InvalidPeriod,
    /// The token passed to [`ReferenceClock::unadvise`] was not registered.
    #[error("Unknown advise token")]
    UnknownToken,
}

/// A monotonic timestamp read from a [`ReferenceClock`], expressed as the
/// elapsed time since the clock's origin.
#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Debug, Default)]
pub struct ClockTime(Duration);

impl ClockTime {
    /// The clock origin.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Constructs a timestamp from the elapsed time since the clock origin.
    #[inline]
    #[must_use]
    pub const fn from_elapsed(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Gets the elapsed time since the clock origin.
    #[inline]
    #[must_use]
    pub const fn as_elapsed(self) -> Duration {
        self.0
    }
}

impl Add<Duration> for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for ClockTime {
    type Output = Duration;

    /// Elapsed time between two timestamps, saturating at zero if `rhs` is
    /// later than `self`.
    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Returned by [`PeriodicSignal::wait`] when the signal was cancelled while
/// (or before) waiting.
#[derive(thiserror::Error, Eq, PartialEq, Clone, Copy, Debug)]
#[error("The periodic signal was cancelled")]
pub struct WaitCancelled;

#[derive(Debug, Default)]
struct SignalState {
    pending: u64,
    cancelled: bool,
}

/// A counting wait primitive raised once per frame interval.
///
/// Capacity is effectively unbounded: every [`PeriodicSignal::raise`] is
/// remembered, so a waiter that falls behind observes each missed period on
/// its next waits instead of silently dropping them.
#[derive(Debug, Default)]
pub struct PeriodicSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl PeriodicSignal {
    /// Creates a new signal ready to be shared with a clock.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one period and wakes a waiter.
    pub fn raise(&self) {
        let mut state = self.state.lock();
        state.pending += 1;
        drop(state);
        self.cond.notify_one();
    }

    /// Blocks until a period has been raised, or fails once the signal has
    /// been cancelled. Pending periods raised before cancellation are
    /// discarded.
    pub fn wait(&self) -> Result<(), WaitCancelled> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return Err(WaitCancelled);
            }
            if state.pending > 0 {
                state.pending -= 1;
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    /// Cancels the signal, unblocking every current and future waiter with
    /// [`WaitCancelled`].
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Whether [`PeriodicSignal::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

/// Opaque registration handle returned by [`ReferenceClock::advise_periodic`].
///
/// Deliberately not `Copy` or `Clone`: a pacing cycle registers at most one
/// advise, and the token is consumed by [`ReferenceClock::unadvise`].
#[derive(Eq, PartialEq, Debug)]
pub struct AdviseToken(u64);

impl AdviseToken {
    /// Constructs a token from a clock-assigned identifier. Only clock
    /// implementations should need this.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Gets the clock-assigned identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.0
    }
}

/// An external monotonic time source used to pace frame delivery.
pub trait ReferenceClock: Send + Sync {
    /// Reads the current clock time.
    fn now(&self) -> ClockTime;

    /// Registers a periodic advise: starting at `first_due`, `signal` is
    /// raised once every `period` until the returned token is passed to
    /// [`ReferenceClock::unadvise`].
    fn advise_periodic(
        &self,
        first_due: ClockTime,
        period: Duration,
        signal: Arc<PeriodicSignal>,
    ) -> Result<AdviseToken, ClockError>;

    /// Cancels a periodic advise. After this returns, the signal is no longer
    /// raised on behalf of the token.
    fn unadvise(&self, token: AdviseToken) -> Result<(), ClockError>;
}

struct TimerStop {
    stopped: Mutex<bool>,
    cond: Condvar,
}

struct TimerHandle {
    stop: Arc<TimerStop>,
    thread: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SystemClockInner {
    next_token: u64,
    timers: HashMap<u64, TimerHandle>,
}

/// A [`ReferenceClock`] over [`std::time::Instant`].
///
/// Each advise runs a dedicated timer thread that sleeps until the next due
/// time and raises the signal; [`ReferenceClock::unadvise`] cancels the sleep
/// and joins the thread, so no timer outlives its registration.
pub struct SystemClock {
    origin: Instant,
    inner: Mutex<SystemClockInner>,
}

impl SystemClock {
    /// Creates a clock whose origin is the moment of this call.
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now(), inner: Mutex::new(SystemClockInner::default()) }
    }

    fn stop_timer(mut handle: TimerHandle) {
        let mut stopped = handle.stop.stopped.lock();
        *stopped = true;
        drop(stopped);
        handle.stop.cond.notify_all();

        if let Some(thread) = handle.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceClock for SystemClock {
    fn now(&self) -> ClockTime {
        ClockTime::from_elapsed(self.origin.elapsed())
    }

    fn advise_periodic(
        &self,
        first_due: ClockTime,
        period: Duration,
        signal: Arc<PeriodicSignal>,
    ) -> Result<AdviseToken, ClockError> {
        if period.is_zero() {
            return Err(ClockError::InvalidPeriod);
        }

        let stop = Arc::new(TimerStop { stopped: Mutex::new(false), cond: Condvar::new() });
        let thread_stop = Arc::clone(&stop);
        let origin = self.origin;

        let thread = std::thread::Builder::new()
            .name("clock-advise".to_string())
            .spawn(move || {
                let mut due = first_due;
                loop {
                    {
                        let mut stopped = thread_stop.stopped.lock();
                        loop {
                            if *stopped {
                                return;
                            }
                            let now = ClockTime::from_elapsed(origin.elapsed());
                            if now >= due {
                                break;
                            }
                            thread_stop.cond.wait_for(&mut stopped, due - now);
                        }
                    }
                    signal.raise();
                    due = due + period;
                }
            })
            .map_err(|_| ClockError::Unavailable)?;

        let mut inner = self.inner.lock();
        let id = inner.next_token;
        inner.next_token += 1;
        inner.timers.insert(id, TimerHandle { stop, thread: Some(thread) });

        Ok(AdviseToken::new(id))
    }

    fn unadvise(&self, token: AdviseToken) -> Result<(), ClockError> {
        let handle = self.inner.lock().timers.remove(&token.id()).ok_or(ClockError::UnknownToken)?;
        Self::stop_timer(handle);
        Ok(())
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        let timers = std::mem::take(&mut self.inner.lock().timers);
        for (_, handle) in timers {
            Self::stop_timer(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_counts_pending_raises() {
        let signal = PeriodicSignal::new();
        signal.raise();
        signal.raise();
        assert_eq!(signal.wait(), Ok(()));
        assert_eq!(signal.wait(), Ok(()));
    }

    #[test]
    fn cancel_unblocks_a_parked_waiter() {
        let signal = PeriodicSignal::new();
        let waiter = Arc::clone(&signal);
        let thread = std::thread::spawn(move || waiter.wait());

        std::thread::sleep(Duration::from_millis(20));
        signal.cancel();
        assert_eq!(thread.join().unwrap(), Err(WaitCancelled));
    }

    #[test]
    fn system_clock_raises_the_signal_each_period() {
        let clock = SystemClock::new();
        let signal = PeriodicSignal::new();
        let period = Duration::from_millis(10);

        let token = clock.advise_periodic(clock.now() + period, period, Arc::clone(&signal)).unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            signal.wait().unwrap();
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(25), "three periods fired after only {elapsed:?}");

        clock.unadvise(token).unwrap();
    }

    #[test]
    fn unadvise_stops_the_timer() {
        let clock = SystemClock::new();
        let signal = PeriodicSignal::new();
        let period = Duration::from_millis(5);

        let token = clock.advise_periodic(clock.now(), period, Arc::clone(&signal)).unwrap();
        signal.wait().unwrap();
        clock.unadvise(token).unwrap();

        // Drain anything raised before the unadvise completed, then confirm
        // the signal stays quiet.
        std::thread::sleep(Duration::from_millis(20));
        while signal.state.lock().pending > 0 {
            signal.wait().unwrap();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(signal.state.lock().pending, 0);
    }

    #[test]
    fn zero_period_advise_is_rejected() {
        let clock = SystemClock::new();
        let signal = PeriodicSignal::new();
        assert_eq!(
            clock.advise_periodic(clock.now(), Duration::ZERO, signal).unwrap_err(),
            ClockError::InvalidPeriod
        );
    }

    #[test]
    fn unknown_token_is_rejected() {
        let clock = SystemClock::new();
        assert_eq!(clock.unadvise(AdviseToken::new(99)), Err(ClockError::UnknownToken));
    }
}
