//! Shared in-process fakes for the unit tests: a manually driven clock, a
//! solid-color raster surface, a scripted duplication backend, a scripted
//! pointer source and a recording provider.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{AdviseToken, ClockError, ClockTime, PeriodicSignal, ReferenceClock};
use crate::cursor::{PointerButtons, PointerGlyph, PointerSource, PointerState};
use crate::duplication::{AcquireError, DuplicationBackend, FrameInfo, MappedStaging};
use crate::properties::CaptureProperties;
use crate::provider::{CaptureError, FrameProvider};
use crate::raster::RasterSurface;

/// Shared call counter handed out by the mocks.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct RegisteredAdvise {
    pub first_due: ClockTime,
    pub period: Duration,
    pub signal: Arc<PeriodicSignal>,
}

#[derive(Default)]
struct MockClockState {
    now: Duration,
    advises: Vec<RegisteredAdvise>,
    next_token: u64,
    unadvised: usize,
}

/// A [`ReferenceClock`] whose time only moves when a test advances it; the
/// periodic signal is raised by the test, never by the clock.
#[derive(Default)]
pub struct MockClock {
    state: Mutex<MockClockState>,
}

impl MockClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn at(now: Duration) -> Arc<Self> {
        let clock = Self::default();
        clock.state.lock().now = now;
        Arc::new(clock)
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().now += by;
    }

    pub fn advise_count(&self) -> usize {
        self.state.lock().advises.len()
    }

    pub fn advise(&self, index: usize) -> RegisteredAdvise {
        self.state.lock().advises[index].clone()
    }

    pub fn unadvise_count(&self) -> usize {
        self.state.lock().unadvised
    }
}

impl ReferenceClock for MockClock {
    fn now(&self) -> ClockTime {
        ClockTime::from_elapsed(self.state.lock().now)
    }

    fn advise_periodic(
        &self,
        first_due: ClockTime,
        period: Duration,
        signal: Arc<PeriodicSignal>,
    ) -> Result<AdviseToken, ClockError> {
        let mut state = self.state.lock();
        state.advises.push(RegisteredAdvise { first_due, period, signal });
        let token = AdviseToken::new(state.next_token);
        state.next_token += 1;
        Ok(token)
    }

    fn unadvise(&self, _token: AdviseToken) -> Result<(), ClockError> {
        self.state.lock().unadvised += 1;
        Ok(())
    }
}

#[derive(Default)]
struct MockPointerState {
    position: (i32, i32),
    visible: bool,
    buttons: PointerButtons,
}

/// A [`PointerSource`] driven entirely by the test.
#[derive(Clone)]
pub struct MockPointer {
    shared: Arc<Mutex<MockPointerState>>,
    glyph: Option<PointerGlyph>,
}

impl MockPointer {
    /// An invisible pointer parked at `position` (clicks still register).
    pub fn hidden_at(position: (i32, i32)) -> Self {
        Self {
            shared: Arc::new(Mutex::new(MockPointerState { position, visible: false, buttons: PointerButtons::default() })),
            glyph: None,
        }
    }

    /// A visible pointer at `position` with an opaque white `size`×`size`
    /// glyph whose hot spot sits one pixel in from the corner, so edge
    /// clipping gets exercised.
    pub fn with_square_glyph(position: (i32, i32), size: u32) -> Self {
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for _ in 0..size * size {
            pixels.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        }
        Self {
            shared: Arc::new(Mutex::new(MockPointerState { position, visible: true, buttons: PointerButtons::default() })),
            glyph: Some(PointerGlyph { width: size, height: size, hotspot: (1, 1), pixels }),
        }
    }

    pub fn move_to(&self, position: (i32, i32)) {
        self.shared.lock().position = position;
    }

    pub fn press_left(&self) {
        self.shared.lock().buttons.left = true;
    }

    pub fn release_left(&self) {
        self.shared.lock().buttons.left = false;
    }
}

impl PointerSource for MockPointer {
    fn state(&mut self) -> PointerState {
        let state = self.shared.lock();
        PointerState { position: state.position, visible: state.visible, buttons: state.buttons }
    }

    fn glyph(&mut self) -> Option<&PointerGlyph> {
        self.glyph.as_ref()
    }
}

/// A [`RasterSurface`] that paints every blit in one solid color.
pub struct MockSurface {
    color: [u8; 4],
    pixels: Vec<u8>,
    fail_next: std::cell::Cell<bool>,
    released: bool,
    releases: Counter,
}

impl MockSurface {
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            color,
            pixels: Vec::new(),
            fail_next: std::cell::Cell::new(false),
            released: false,
            releases: Counter::default(),
        }
    }

    pub fn fail_next_blit(&self) {
        self.fail_next.set(true);
    }

    pub fn release_counter(&self) -> Counter {
        self.releases.clone()
    }
}

impl RasterSurface for MockSurface {
    fn desktop_bounds(&self) -> (u32, u32) {
        (1920, 1200)
    }

    fn blit_desktop(&mut self, _origin: (i32, i32), size: (u32, u32)) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.released {
            return Err("surface has been released".into());
        }
        if self.fail_next.take() {
            return Err("desktop is locked".into());
        }
        self.pixels.clear();
        for _ in 0..size.0 * size.1 {
            self.pixels.extend_from_slice(&self.color);
        }
        Ok(())
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.bump();
        }
    }

    fn reacquire(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.released = false;
        Ok(())
    }
}

/// One scripted outcome for [`MockDuplicationBackend::acquire_frame`].
#[derive(Clone, Copy, Debug)]
pub enum AcquireScript {
    /// A frame with content.
    Frame,
    /// A successful acquire with no accumulated updates.
    Empty,
    AccessLost,
    Timeout,
    BackendFailure,
}

#[derive(Default)]
struct MockDuplicationState {
    script: VecDeque<AcquireScript>,
    fail_next_reinit: bool,
    holding_frame: bool,
    staging: Option<(u32, u32)>,
    discards: usize,
}

/// A [`DuplicationBackend`] driven by a script of acquire outcomes. The
/// staged desktop image paints pixel `(x, y)` as `[x, y, 0xCC, 0xFF]`.
pub struct MockDuplicationBackend {
    desktop: (u32, u32),
    row_padding: usize,
    state: Arc<Mutex<MockDuplicationState>>,
    reinits: Counter,
    releases: Counter,
}

impl MockDuplicationBackend {
    pub fn new(desktop: (u32, u32)) -> Self {
        Self {
            desktop,
            row_padding: 0,
            state: Arc::new(Mutex::new(MockDuplicationState::default())),
            reinits: Counter::default(),
            releases: Counter::default(),
        }
    }

    /// Pads each mapped row by `padding` bytes beyond `width * 4`.
    pub fn with_row_padding(mut self, padding: usize) -> Self {
        self.row_padding = padding;
        self
    }

    pub fn script(&self, outcome: AcquireScript) {
        self.state.lock().script.push_back(outcome);
    }

    pub fn fail_next_reinit(&self) {
        self.state.lock().fail_next_reinit = true;
    }

    pub fn reinit_counter(&self) -> Counter {
        self.reinits.clone()
    }

    pub fn release_counter(&self) -> Counter {
        self.releases.clone()
    }

    pub fn staging_bounds(&self) -> Option<(u32, u32)> {
        self.state.lock().staging
    }

    pub fn discard_count(&self) -> usize {
        self.state.lock().discards
    }
}

impl DuplicationBackend for MockDuplicationBackend {
    fn desktop_bounds(&self) -> (u32, u32) {
        self.desktop
    }

    fn reinitialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_reinit) {
            state.staging = None;
            return Err("device creation failed".into());
        }
        state.holding_frame = false;
        state.staging = Some(self.desktop);
        self.reinits.bump();
        Ok(())
    }

    fn acquire_frame(&mut self, _timeout: Duration) -> Result<FrameInfo, AcquireError> {
        let outcome = self.state.lock().script.pop_front().unwrap_or(AcquireScript::Frame);
        match outcome {
            AcquireScript::Frame => {
                self.state.lock().holding_frame = true;
                Ok(FrameInfo { accumulated_frames: 1, present_updated: true })
            }
            AcquireScript::Empty => {
                self.state.lock().holding_frame = true;
                Ok(FrameInfo::default())
            }
            AcquireScript::AccessLost => Err(AcquireError::AccessLost),
            AcquireScript::Timeout => Err(AcquireError::Timeout),
            AcquireScript::BackendFailure => Err(AcquireError::Backend("device removed".into())),
        }
    }

    fn discard_frame(&mut self) {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.holding_frame) {
            state.discards += 1;
        }
    }

    fn stage_frame(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self.state.lock();
        if !std::mem::take(&mut state.holding_frame) {
            return Err("no frame held".into());
        }
        if state.staging.is_none() {
            return Err("no staging texture".into());
        }
        Ok(())
    }

    fn with_mapped(
        &mut self,
        read: &mut dyn FnMut(MappedStaging<'_>) -> Result<(), CaptureError>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some((width, height)) = self.state.lock().staging else {
            return Err("no staging texture".into());
        };
        let row_pitch = width as usize * 4 + self.row_padding;
        let mut data = vec![0u8; height as usize * row_pitch];
        for y in 0..height as usize {
            for x in 0..width as usize {
                let index = y * row_pitch + x * 4;
                data[index..index + 4].copy_from_slice(&[x as u8, y as u8, 0xCC, 0xFF]);
            }
        }
        read(MappedStaging { data: &data, row_pitch, width, height }).map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.to_string().into() })
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.holding_frame = false;
        state.staging = None;
        drop(state);
        self.releases.bump();
    }
}

/// A [`FrameProvider`] that records calls and fills the destination with a
/// fixed byte.
pub struct MockProvider {
    props: Mutex<CaptureProperties>,
    desktop: (u32, u32),
    fail_next: std::cell::Cell<bool>,
    delay: Option<(Arc<MockClock>, Duration)>,
    disposed: bool,
    disposals: Counter,
}

impl MockProvider {
    pub fn new(props: CaptureProperties) -> Self {
        Self {
            props: Mutex::new(props),
            desktop: (1920, 1200),
            fail_next: std::cell::Cell::new(false),
            delay: None,
            disposed: false,
            disposals: Counter::default(),
        }
    }

    pub fn with_desktop(mut self, desktop: (u32, u32)) -> Self {
        self.desktop = desktop;
        self
    }

    /// Advances `clock` by `delay` inside every capture, simulating a slow
    /// frame.
    pub fn with_capture_delay(mut self, clock: &Arc<MockClock>, delay: Duration) -> Self {
        self.delay = Some((Arc::clone(clock), delay));
        self
    }

    pub fn fail_next_capture(&self) {
        self.fail_next.set(true);
    }

    pub fn dispose_counter(&self) -> Counter {
        self.disposals.clone()
    }
}

impl FrameProvider for MockProvider {
    fn set_capture_properties(&mut self, props: CaptureProperties) -> Result<(), CaptureError> {
        *self.props.lock() = props;
        Ok(())
    }

    fn capture_properties(&self) -> CaptureProperties {
        *self.props.lock()
    }

    fn copy_screen_to_buffer(&mut self, dest: &mut [u8], _dest_stride: usize) -> Result<(), CaptureError> {
        if self.disposed {
            return Err(CaptureError::SurfaceUnavailable);
        }
        if self.fail_next.take() {
            return Err(CaptureError::SurfaceUnavailable);
        }
        if let Some((clock, delay)) = &self.delay {
            clock.advance(*delay);
        }
        dest.fill(0x5A);
        Ok(())
    }

    fn desktop_bounds(&self) -> (u32, u32) {
        self.desktop
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.disposals.bump();
        }
    }

    fn revive(&mut self) -> Result<(), CaptureError> {
        self.disposed = false;
        Ok(())
    }
}
