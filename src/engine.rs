//! The capture orchestrator.
//!
//! [`CaptureEngine`] ties a [`FramePacer`] and a [`FrameProvider`] together to
//! service the host pipeline's pull-based delivery thread: each
//! [`CaptureEngine::fill_next_frame`] waits for the frame start, captures into
//! the caller's buffer, marks the frame end and stamps the buffer. One coarse
//! lock serializes reconfiguration against an in-flight capture, since
//! swapping a duplication session underneath a running copy is unsafe.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::{DeliveryBuffer, FrameStamp};
use crate::clock::{PeriodicSignal, ReferenceClock};
use crate::pacer::{FramePacer, PacerError};
use crate::properties::CaptureProperties;
use crate::provider::{CaptureError, FrameProvider};

/// Smallest usable capture tile.
pub const MIN_CAPTURE_WIDTH: u32 = 320;
/// Smallest usable capture tile.
pub const MIN_CAPTURE_HEIGHT: u32 = 240;
/// Slowest supported cadence.
pub const MIN_FRAME_RATE: u32 = 4;
/// Fastest supported cadence.
pub const MAX_FRAME_RATE: u32 = 60;

/// Capability bounds reported to the host pipeline for format negotiation.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct Capabilities {
    pub min_width: u32,
    pub min_height: u32,
    /// Full virtual-desktop width of the active provider.
    pub max_width: u32,
    /// Full virtual-desktop height of the active provider.
    pub max_height: u32,
    /// Interval at [`MAX_FRAME_RATE`].
    pub min_frame_interval: Duration,
    /// Interval at [`MIN_FRAME_RATE`].
    pub max_frame_interval: Duration,
    /// Raw bandwidth of the smallest tile at the slowest cadence, bits/s.
    /// Used only for negotiation by the external pipeline.
    pub min_bitrate: u64,
    /// Raw bandwidth of the full desktop at the fastest cadence, bits/s.
    pub max_bitrate: u64,
}

impl Capabilities {
    fn for_desktop(desktop: (u32, u32)) -> Self {
        let max_width = desktop.0.max(MIN_CAPTURE_WIDTH);
        let max_height = desktop.1.max(MIN_CAPTURE_HEIGHT);
        Self {
            min_width: MIN_CAPTURE_WIDTH,
            min_height: MIN_CAPTURE_HEIGHT,
            max_width,
            max_height,
            min_frame_interval: Duration::from_nanos(1_000_000_000 / u64::from(MAX_FRAME_RATE)),
            max_frame_interval: Duration::from_nanos(1_000_000_000 / u64::from(MIN_FRAME_RATE)),
            min_bitrate: u64::from(MIN_CAPTURE_WIDTH) * u64::from(MIN_CAPTURE_HEIGHT) * 24 * u64::from(MIN_FRAME_RATE),
            max_bitrate: u64::from(max_width) * u64::from(max_height) * 32 * u64::from(MAX_FRAME_RATE),
        }
    }
}

/// Errors surfaced to the host pipeline.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The reference clock is invalid or unreachable. Fatal for the current
    /// activation; the caller must stop and may retry activation later.
    #[error("The reference clock is unavailable")]
    ClockUnavailable,
    /// Caller programming error. Rejected with no side effects.
    #[error("Invalid engine state: {0}")]
    InvalidState(&'static str),
    /// The stream was deactivated while a pull was parked waiting for its
    /// frame start.
    #[error("The stream was deactivated")]
    Deactivated,
    /// The frame could not be captured; the caller should treat it as a
    /// dropped frame and may retry on the next pull.
    #[error("Frame capture failed: {0}")]
    CaptureFailed(#[from] CaptureError),
}

impl From<PacerError> for EngineError {
    fn from(error: PacerError) -> Self {
        match error {
            PacerError::ClockUnavailable => Self::ClockUnavailable,
            PacerError::InvalidState(message) => Self::InvalidState(message),
            PacerError::Cancelled => Self::Deactivated,
        }
    }
}

struct EngineState {
    pacer: FramePacer,
    provider: Box<dyn FrameProvider>,
    active: bool,
}

/// Synchronized frame-capture engine: one provider, one pacer, one pull-based
/// caller at a time.
pub struct CaptureEngine {
    state: Mutex<EngineState>,
    /// Wake handle of the current activation, kept outside the coarse state
    /// lock so [`CaptureEngine::deactivate`] can unpark a waiting pull before
    /// contending for the lock.
    wake: Mutex<Option<Arc<PeriodicSignal>>>,
}

impl CaptureEngine {
    /// Creates an engine over `clock` and `provider`. The engine keeps only a
    /// weak reference to the clock; the provider is owned and disposed on
    /// deactivation and drop.
    #[must_use]
    pub fn new(clock: &Arc<dyn ReferenceClock>, provider: Box<dyn FrameProvider>) -> Self {
        Self {
            state: Mutex::new(EngineState { pacer: FramePacer::new(clock), provider, active: false }),
            wake: Mutex::new(None),
        }
    }

    /// Activates the stream: re-arms a provider disposed by a previous
    /// deactivation, acquires the reference clock and arms the pacer.
    pub fn activate(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.active {
            return Err(EngineError::InvalidState("stream is already active"));
        }
        state.provider.revive()?;
        let wake = state.pacer.activate()?;
        state.active = true;
        *self.wake.lock() = Some(wake);
        tracing::debug!("capture stream activated");
        Ok(())
    }

    /// Deactivates the stream.
    ///
    /// Unblocks a parked [`CaptureEngine::fill_next_frame`] with
    /// [`EngineError::Deactivated`], then cancels the periodic advise and
    /// releases the clock before disposing the provider's native resources.
    /// Idempotent.
    pub fn deactivate(&self) {
        // Unpark a waiting pull first; it exits with a failure and releases
        // the coarse lock we take next.
        let wake = self.wake.lock().take();
        if let Some(wake) = wake {
            wake.cancel();
        }

        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        state.pacer.deactivate();
        state.provider.dispose();
        state.active = false;
        tracing::debug!("capture stream deactivated");
    }

    /// Gets the target frame interval.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.state.lock().pacer.latency()
    }

    /// Sets the target frame interval. Fails with
    /// [`EngineError::InvalidState`] while the clock-driven cycle is running.
    pub fn set_latency(&self, interval: Duration) -> Result<(), EngineError> {
        self.state.lock().pacer.set_latency(interval).map_err(EngineError::from)
    }

    /// Gets a copy of the active provider's capture properties.
    #[must_use]
    pub fn capture_properties(&self) -> CaptureProperties {
        self.state.lock().provider.capture_properties()
    }

    /// Replaces the capture properties wholesale, reconfiguring the provider.
    ///
    /// Serialized against an in-flight frame copy by the engine's coarse
    /// lock. Properties outside the capability bounds are rejected with no
    /// side effects.
    pub fn set_capture_properties(&self, props: CaptureProperties) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let caps = Capabilities::for_desktop(state.provider.desktop_bounds());
        if props.width < caps.min_width
            || props.width > caps.max_width
            || props.pixel_height() < caps.min_height
            || props.pixel_height() > caps.max_height
        {
            return Err(EngineError::InvalidState("capture dimensions outside capability bounds"));
        }
        state.provider.set_capture_properties(props)?;
        tracing::debug!(
            width = props.width,
            height = props.height,
            bits = props.format.bits_per_pixel(),
            "capture properties replaced"
        );
        Ok(())
    }

    /// Reports the capability bounds used by the external pipeline for
    /// format negotiation.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_desktop(self.state.lock().provider.desktop_bounds())
    }

    /// Services one pull: waits for the frame start, captures the configured
    /// region into `buffer`, marks the frame end and stamps the buffer with
    /// `[start, end)` and the sync-point flag.
    ///
    /// A failed capture propagates immediately: no frame end is marked and no
    /// stamp is applied, so the next pull reuses the same frame start.
    pub fn fill_next_frame(&self, buffer: &mut DeliveryBuffer<'_>) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(EngineError::InvalidState("stream is not active"));
        }

        let start_time = state.pacer.wait_frame_start()?;

        if let Err(error) = state.provider.copy_screen_to_buffer(buffer.data, buffer.stride) {
            tracing::warn!(%error, "frame dropped");
            return Err(error.into());
        }

        let end_time = state.pacer.mark_frame_end()?;
        let actual_length = state.provider.capture_properties().buffer_size();
        buffer.stamp = Some(FrameStamp { start_time, end_time, actual_length, sync_point: true });
        Ok(())
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.deactivate();
    }
}
