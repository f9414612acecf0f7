//! Clock-driven frame pacing.
//!
//! [`FramePacer`] synchronizes frame production to a [`ReferenceClock`]: the
//! first [`FramePacer::wait_frame_start`] of an activation registers a
//! periodic advise and returns immediately; every later call parks on the
//! periodic signal until the next interval elapses. [`FramePacer::mark_frame_end`]
//! stamps the frame end, clamping anomalously long frames so one stall cannot
//! skew downstream timing, and rolls the end time over as the next frame's
//! start so frames are back-to-back with no gaps.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::clock::{AdviseToken, ClockTime, PeriodicSignal, ReferenceClock};

/// Default target frame interval (30 FPS).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// Default multiple of the target interval above which a frame's reported
/// duration is clamped back to one interval.
pub const DEFAULT_DRIFT_CLAMP_FACTOR: u32 = 3;

/// Errors reported by the pacer.
#[derive(thiserror::Error, Eq, PartialEq, Clone, Copy, Debug)]
pub enum PacerError {
    /// The reference clock is gone or refused the periodic advise. Fatal for
    /// the current activation cycle.
    #[error("The reference clock is unavailable")]
    ClockUnavailable,
    /// The operation is not allowed in the pacer's current state. Rejected
    /// with no side effects.
    #[error("Invalid pacer state: {0}")]
    InvalidState(&'static str),
    /// The activation was torn down while a wait was parked.
    #[error("The pacing cycle was cancelled")]
    Cancelled,
}

struct PacingCycle {
    /// Keeps the clock's usage count held for exactly the Active lifetime.
    clock: Arc<dyn ReferenceClock>,
    signal: Arc<PeriodicSignal>,
    advise: Option<AdviseToken>,
    frame_start: ClockTime,
}

/// Paces frame production against an external reference clock.
///
/// The pacer holds only a weak back-reference to the clock; it acquires a
/// strong reference for the duration of each activation cycle and releases it
/// on [`FramePacer::deactivate`], so it never owns the clock's lifetime.
pub struct FramePacer {
    clock: Weak<dyn ReferenceClock>,
    target_interval: Duration,
    drift_clamp_factor: u32,
    cycle: Option<PacingCycle>,
}

impl FramePacer {
    /// Creates a pacer over `clock` with [`DEFAULT_FRAME_INTERVAL`] and
    /// [`DEFAULT_DRIFT_CLAMP_FACTOR`].
    #[must_use]
    pub fn new(clock: &Arc<dyn ReferenceClock>) -> Self {
        Self::with_drift_clamp(clock, DEFAULT_DRIFT_CLAMP_FACTOR)
    }

    /// Creates a pacer with a custom drift-clamp factor. A factor of zero
    /// disables the clamp.
    #[must_use]
    pub fn with_drift_clamp(clock: &Arc<dyn ReferenceClock>, drift_clamp_factor: u32) -> Self {
        Self {
            clock: Arc::downgrade(clock),
            target_interval: DEFAULT_FRAME_INTERVAL,
            drift_clamp_factor,
            cycle: None,
        }
    }

    /// Gets the configured target frame interval.
    #[inline]
    #[must_use]
    pub const fn latency(&self) -> Duration {
        self.target_interval
    }

    /// Sets the target frame interval.
    ///
    /// Fails with [`PacerError::InvalidState`] once an advise is registered:
    /// the cadence cannot change while the clock-driven cycle is running. The
    /// previous interval is left unchanged on failure.
    pub fn set_latency(&mut self, interval: Duration) -> Result<(), PacerError> {
        if self.is_advising() {
            return Err(PacerError::InvalidState("cannot change latency while the pacing cycle is running"));
        }
        if interval.is_zero() {
            return Err(PacerError::InvalidState("frame interval must be greater than zero"));
        }
        self.target_interval = interval;
        Ok(())
    }

    /// Whether a periodic advise is currently registered.
    #[inline]
    #[must_use]
    pub fn is_advising(&self) -> bool {
        self.cycle.as_ref().is_some_and(|cycle| cycle.advise.is_some())
    }

    /// Whether the pacer is between [`FramePacer::activate`] and
    /// [`FramePacer::deactivate`].
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cycle.is_some()
    }

    /// Starts an activation cycle: acquires the clock and creates the wait
    /// primitive. Fails with [`PacerError::ClockUnavailable`] if the clock is
    /// no longer reachable, which the caller must treat as fatal for this
    /// activation.
    ///
    /// Returns the cycle's wake handle so an owner can cancel a parked
    /// [`FramePacer::wait_frame_start`] from another thread during teardown.
    pub fn activate(&mut self) -> Result<Arc<PeriodicSignal>, PacerError> {
        if self.cycle.is_some() {
            return Err(PacerError::InvalidState("pacer is already active"));
        }
        let clock = self.clock.upgrade().ok_or(PacerError::ClockUnavailable)?;
        let signal = PeriodicSignal::new();
        self.cycle = Some(PacingCycle { clock, signal: Arc::clone(&signal), advise: None, frame_start: ClockTime::ZERO });
        Ok(signal)
    }

    /// Tears the activation cycle down: cancels the periodic advise, unblocks
    /// any parked waiter with [`PacerError::Cancelled`], and releases the
    /// clock reference. Idempotent.
    pub fn deactivate(&mut self) {
        if let Some(cycle) = self.cycle.take() {
            if let Some(token) = cycle.advise {
                let _ = cycle.clock.unadvise(token);
            }
            cycle.signal.cancel();
        }
    }

    /// Waits for the start of the next frame and returns its start timestamp.
    ///
    /// The first call after activation registers the periodic advise at
    /// `now + interval` and returns `now` without blocking; later calls park
    /// on the periodic signal and return the frame start recorded by the
    /// previous [`FramePacer::mark_frame_end`].
    pub fn wait_frame_start(&mut self) -> Result<ClockTime, PacerError> {
        let interval = self.target_interval;
        let cycle = self.cycle.as_mut().ok_or(PacerError::InvalidState("pacer is not active"))?;

        if cycle.advise.is_none() {
            let now = cycle.clock.now();
            let token = cycle
                .clock
                .advise_periodic(now + interval, interval, Arc::clone(&cycle.signal))
                .map_err(|_| PacerError::ClockUnavailable)?;
            cycle.advise = Some(token);
            cycle.frame_start = now;
            return Ok(now);
        }

        cycle.signal.wait().map_err(|_| PacerError::Cancelled)?;
        Ok(cycle.frame_start)
    }

    /// Reads the frame end timestamp, applies drift correction, and rolls it
    /// over as the next frame's start. Never blocks.
    ///
    /// If the elapsed time since the frame start exceeds
    /// `drift_clamp_factor × target_interval`, the end time is clamped to
    /// `frame_start + target_interval` so a single slow frame cannot
    /// permanently skew downstream playback timing.
    pub fn mark_frame_end(&mut self) -> Result<ClockTime, PacerError> {
        let interval = self.target_interval;
        let clamp = self.drift_clamp_factor;
        let cycle = self.cycle.as_mut().ok_or(PacerError::InvalidState("pacer is not active"))?;

        let mut end = cycle.clock.now();
        if end < cycle.frame_start {
            end = cycle.frame_start;
        }
        if clamp > 0 && !interval.is_zero() && end - cycle.frame_start > interval * clamp {
            end = cycle.frame_start + interval;
        }
        cycle.frame_start = end;
        Ok(end)
    }
}

impl Drop for FramePacer {
    fn drop(&mut self) {
        self.deactivate();
    }
}
