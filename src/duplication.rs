//! GPU desktop-duplication capture.
//!
//! [`DuplicationProvider`] drives a [`DuplicationBackend`] through the
//! acquire/stage/map cycle and owns the recovery policy around it: an
//! access-lost session is torn down and rebuilt transparently, an acquire
//! timeout or a frame with no accumulated updates is retried, and only a
//! genuinely unrecoverable condition reaches the caller as a dropped frame.
//!
//! The duplication API offers whole-output capture only, so the backend's
//! staging texture is always sized to the full desktop bounds and the
//! configured crop region is applied during the row copy, never to the
//! session itself.

use std::time::Duration;

use crate::properties::{CaptureProperties, PixelFormat};
use crate::provider::{self, CaptureError, FrameProvider};

/// How long one frame acquire may block before it is retried.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on acquire attempts (timeouts, empty frames and access-lost
/// recoveries included) for a single frame pull. Keeps control with the
/// caller's cadence instead of retrying forever inside the provider.
pub const MAX_ACQUIRE_ATTEMPTS: u32 = 8;

/// Metadata reported for an acquired frame.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub struct FrameInfo {
    /// Number of desktop updates accumulated since the previous acquire.
    pub accumulated_frames: u32,
    /// Whether a new present happened since the previous acquire.
    pub present_updated: bool,
}

impl FrameInfo {
    /// An acquire that carries neither accumulated updates nor a new present
    /// is the duplication API's "nothing changed" signal, not an error.
    #[inline]
    #[must_use]
    pub const fn has_content(&self) -> bool {
        self.accumulated_frames > 0 || self.present_updated
    }
}

/// Errors from [`DuplicationBackend::acquire_frame`].
#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    /// The duplication session was invalidated (display mode change, desktop
    /// switch) and must be recreated.
    #[error("Duplication access lost; the session must be recreated")]
    AccessLost,
    /// No frame became available within the timeout.
    #[error("Frame acquire timed out")]
    Timeout,
    /// Any other backend failure; not recovered internally.
    #[error("Duplication backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// CPU-visible view of the mapped staging texture.
///
/// `row_pitch` is the mapped pitch and may exceed `width * 4`; callers must
/// advance by the pitch, never by the logical row width.
pub struct MappedStaging<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
    pub width: u32,
    pub height: u32,
}

/// The native desktop-duplication surface the provider drives.
///
/// Implementations own the full native resource set (factory, adapter,
/// device, output, duplication session, staging texture), acquired in that
/// order and released in reverse. [`DuplicationBackend::release`] must be
/// idempotent and tolerate resources that were never acquired.
pub trait DuplicationBackend: Send {
    /// Full bounds of the duplicated output.
    fn desktop_bounds(&self) -> (u32, u32);

    /// Tears the session down and rebuilds it: device, output, duplication
    /// session and a staging texture sized to the desktop bounds. A failure
    /// here is fatal for the current frame pull.
    fn reinitialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Blocks up to `timeout` for the next desktop frame, keeping the frame
    /// resource held on success until it is staged or discarded.
    fn acquire_frame(&mut self, timeout: Duration) -> Result<FrameInfo, AcquireError>;

    /// Releases a held frame without staging it (the "nothing changed" path).
    fn discard_frame(&mut self);

    /// GPU-copies the held frame into the staging texture, then releases the
    /// frame resource and the GPU surface handle.
    fn stage_frame(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Maps the staging texture for CPU reads, hands the view to `read`, and
    /// unmaps on the way out.
    fn with_mapped(
        &mut self,
        read: &mut dyn FnMut(MappedStaging<'_>) -> Result<(), CaptureError>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Releases every native resource in reverse-acquisition order.
    /// Idempotent; releasing a resource that was never acquired is a no-op.
    fn release(&mut self);
}

/// Frame provider backed by a GPU desktop-duplication session.
///
/// Delivers raw desktop pixels only; no cursor compositing happens on this
/// path.
pub struct DuplicationProvider<B: DuplicationBackend> {
    backend: B,
    props: CaptureProperties,
    disposed: bool,
}

impl<B: DuplicationBackend> DuplicationProvider<B> {
    /// Creates a provider and initializes the backend session for `props`.
    pub fn new(mut backend: B, props: CaptureProperties) -> Result<Self, CaptureError> {
        validate_crop(&props, backend.desktop_bounds())?;
        backend.reinitialize().map_err(CaptureError::Backend)?;
        Ok(Self { backend, props, disposed: false })
    }

    /// Acquires the next frame with content, absorbing the recoverable
    /// conditions, and leaves it held in the backend for staging.
    fn acquire_with_recovery(&mut self) -> Result<FrameInfo, CaptureError> {
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            match self.backend.acquire_frame(ACQUIRE_TIMEOUT) {
                Ok(info) if info.has_content() => return Ok(info),
                Ok(_) => {
                    // Nothing changed since the last acquire; release and ask
                    // again.
                    tracing::trace!(attempt, "empty duplication frame, retrying");
                    self.backend.discard_frame();
                }
                Err(AcquireError::AccessLost) => {
                    tracing::warn!(attempt, "duplication access lost, rebuilding session");
                    self.backend.reinitialize().map_err(CaptureError::Backend)?;
                }
                Err(AcquireError::Timeout) => {
                    tracing::trace!(attempt, "duplication acquire timed out, retrying");
                }
                Err(AcquireError::Backend(error)) => return Err(CaptureError::Backend(error)),
            }
        }
        Err(CaptureError::SurfaceUnavailable)
    }
}

impl<B: DuplicationBackend> FrameProvider for DuplicationProvider<B> {
    /// Reconfigures the capture region and rebuilds the GPU session.
    ///
    /// The session and its staging texture are sized to the desktop, not the
    /// crop region, so any dimension change recreates both.
    fn set_capture_properties(&mut self, props: CaptureProperties) -> Result<(), CaptureError> {
        validate_crop(&props, self.backend.desktop_bounds())?;
        self.backend.reinitialize().map_err(CaptureError::Backend)?;
        self.props = props;
        Ok(())
    }

    fn capture_properties(&self) -> CaptureProperties {
        self.props
    }

    fn copy_screen_to_buffer(&mut self, dest: &mut [u8], dest_stride: usize) -> Result<(), CaptureError> {
        if self.disposed {
            return Err(CaptureError::SurfaceUnavailable);
        }

        self.acquire_with_recovery()?;
        self.backend.stage_frame().map_err(CaptureError::Backend)?;

        let props = self.props;
        let mut copy_result = Ok(());
        self.backend
            .with_mapped(&mut |mapped| {
                copy_result = copy_crop(&mapped, &props, dest, dest_stride);
                Ok(())
            })
            .map_err(CaptureError::Backend)?;
        copy_result
    }

    fn desktop_bounds(&self) -> (u32, u32) {
        self.backend.desktop_bounds()
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.backend.release();
            self.disposed = true;
        }
    }

    fn revive(&mut self) -> Result<(), CaptureError> {
        if self.disposed {
            self.backend.reinitialize().map_err(CaptureError::Backend)?;
            self.disposed = false;
        }
        Ok(())
    }
}

impl<B: DuplicationBackend> Drop for DuplicationProvider<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn validate_crop(props: &CaptureProperties, desktop: (u32, u32)) -> Result<(), CaptureError> {
    if props.format != PixelFormat::Bgra32 {
        return Err(CaptureError::UnsupportedProperties("the duplication backend delivers 32-bit frames only"));
    }
    if props.width == 0 || props.height == 0 {
        return Err(CaptureError::UnsupportedProperties("capture dimensions must be nonzero"));
    }
    if props.origin_x < 0 || props.origin_y < 0 {
        return Err(CaptureError::UnsupportedProperties("crop origin must lie on the duplicated output"));
    }
    let right = props.origin_x as u64 + u64::from(props.width);
    let bottom = props.origin_y as u64 + u64::from(props.pixel_height());
    if right > u64::from(desktop.0) || bottom > u64::from(desktop.1) {
        return Err(CaptureError::UnsupportedProperties("crop region exceeds the duplicated output"));
    }
    Ok(())
}

/// Copies the configured crop out of the mapped desktop image, honoring the
/// mapped row pitch.
fn copy_crop(
    mapped: &MappedStaging<'_>,
    props: &CaptureProperties,
    dest: &mut [u8],
    dest_stride: usize,
) -> Result<(), CaptureError> {
    let x = props.origin_x as usize;
    let y = props.origin_y as usize;
    let height = props.pixel_height() as usize;

    if (x + props.width as usize) > mapped.width as usize || (y + height) > mapped.height as usize {
        // The desktop shrank underneath the configured crop (mode change
        // between reconfigures); drop the frame rather than read past rows.
        return Err(CaptureError::SurfaceUnavailable);
    }

    let start = y * mapped.row_pitch + x * 4;
    let end = (y + height - 1) * mapped.row_pitch + x * 4 + props.width as usize * 4;
    let Some(window) = mapped.data.get(start..end) else {
        return Err(CaptureError::SurfaceUnavailable);
    };

    provider::transfer_rows(window, mapped.row_pitch, props, dest, dest_stride)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{AcquireScript, MockDuplicationBackend};

    fn props(width: u32, height: i32) -> CaptureProperties {
        CaptureProperties::new(0, 0, width, height, PixelFormat::Bgra32)
    }

    #[test]
    fn access_lost_on_frame_n_recovers_for_frame_n_plus_one() {
        let backend = MockDuplicationBackend::new((128, 96));
        let reinits = backend.reinit_counter();
        let mut provider = DuplicationProvider::new(backend, props(32, 24)).unwrap();
        assert_eq!(reinits.get(), 1);

        let mut dest = vec![0u8; props(32, 24).buffer_size()];
        provider.copy_screen_to_buffer(&mut dest, props(32, 24).dest_stride()).unwrap();

        provider.backend.script(AcquireScript::AccessLost);
        provider.backend.script(AcquireScript::Frame);
        provider.copy_screen_to_buffer(&mut dest, props(32, 24).dest_stride()).unwrap();

        // One rebuild from construction, one from the access-lost recovery,
        // and the rebuilt staging texture matches the desktop bounds.
        assert_eq!(reinits.get(), 2);
        assert_eq!(provider.backend.staging_bounds(), Some((128, 96)));
    }

    #[test]
    fn empty_frames_are_released_and_retried() {
        let backend = MockDuplicationBackend::new((128, 96));
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.backend.script(AcquireScript::Empty);
        provider.backend.script(AcquireScript::Empty);
        provider.backend.script(AcquireScript::Frame);

        let mut dest = vec![0u8; props(16, 16).buffer_size()];
        provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap();
        assert_eq!(provider.backend.discard_count(), 2);
    }

    #[test]
    fn timeouts_are_retried_without_surfacing() {
        let backend = MockDuplicationBackend::new((128, 96));
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.backend.script(AcquireScript::Timeout);
        provider.backend.script(AcquireScript::Frame);

        let mut dest = vec![0u8; props(16, 16).buffer_size()];
        provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap();
    }

    #[test]
    fn persistent_timeouts_exhaust_the_attempt_budget() {
        let backend = MockDuplicationBackend::new((128, 96));
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            provider.backend.script(AcquireScript::Timeout);
        }

        let mut dest = vec![0u8; props(16, 16).buffer_size()];
        let err = provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap_err();
        assert!(matches!(err, CaptureError::SurfaceUnavailable));
    }

    #[test]
    fn backend_failures_are_not_retried() {
        let backend = MockDuplicationBackend::new((128, 96));
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.backend.script(AcquireScript::BackendFailure);
        provider.backend.script(AcquireScript::Frame);

        let mut dest = vec![0u8; props(16, 16).buffer_size()];
        let err = provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap_err();
        assert!(matches!(err, CaptureError::Backend(_)));
    }

    #[test]
    fn failed_reinitialization_surfaces_as_a_capture_failure() {
        let backend = MockDuplicationBackend::new((128, 96));
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.backend.script(AcquireScript::AccessLost);
        provider.backend.fail_next_reinit();

        let mut dest = vec![0u8; props(16, 16).buffer_size()];
        let err = provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap_err();
        assert!(matches!(err, CaptureError::Backend(_)));
    }

    #[test]
    fn crop_honors_the_mapped_row_pitch() {
        let backend = MockDuplicationBackend::new((64, 32)).with_row_padding(48);
        let crop = CaptureProperties::new(8, 4, 16, 8, PixelFormat::Bgra32);
        let mut provider = DuplicationProvider::new(backend, crop).unwrap();

        let mut dest = vec![0u8; crop.buffer_size()];
        provider.copy_screen_to_buffer(&mut dest, crop.dest_stride()).unwrap();

        // The mock paints pixel (x, y) as [x, y, 0xCC, 0xFF]; the first
        // destination pixel must be desktop pixel (8, 4).
        assert_eq!(&dest[..4], &[8, 4, 0xCC, 0xFF]);
        let second_row = &dest[crop.dest_stride()..crop.dest_stride() + 4];
        assert_eq!(second_row, &[8, 5, 0xCC, 0xFF]);
    }

    #[test]
    fn reconfiguring_dimensions_rebuilds_the_session() {
        let backend = MockDuplicationBackend::new((128, 96));
        let reinits = backend.reinit_counter();
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.set_capture_properties(props(32, 32)).unwrap();
        assert_eq!(reinits.get(), 2);
        assert_eq!(provider.capture_properties().width, 32);
    }

    #[test]
    fn out_of_bounds_crop_is_rejected() {
        let backend = MockDuplicationBackend::new((128, 96));
        let err = DuplicationProvider::new(backend, props(129, 16)).err().unwrap();
        assert!(matches!(err, CaptureError::UnsupportedProperties(_)));
    }

    #[test]
    fn depth_other_than_32_bit_is_rejected() {
        let backend = MockDuplicationBackend::new((128, 96));
        let bad = CaptureProperties::new(0, 0, 16, 16, PixelFormat::Bgr24);
        let err = DuplicationProvider::new(backend, bad).err().unwrap();
        assert!(matches!(err, CaptureError::UnsupportedProperties(_)));
    }

    #[test]
    fn revive_rebuilds_a_disposed_session() {
        let backend = MockDuplicationBackend::new((128, 96));
        let reinits = backend.reinit_counter();
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.dispose();
        let mut dest = vec![0u8; props(16, 16).buffer_size()];
        let err = provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap_err();
        assert!(matches!(err, CaptureError::SurfaceUnavailable));

        provider.revive().unwrap();
        assert_eq!(reinits.get(), 2);
        assert_eq!(provider.backend.staging_bounds(), Some((128, 96)));
        provider.copy_screen_to_buffer(&mut dest, props(16, 16).dest_stride()).unwrap();
    }

    #[test]
    fn dispose_twice_releases_each_resource_once() {
        let backend = MockDuplicationBackend::new((128, 96));
        let releases = backend.release_counter();
        let mut provider = DuplicationProvider::new(backend, props(16, 16)).unwrap();

        provider.dispose();
        provider.dispose();
        drop(provider);
        assert_eq!(releases.get(), 1);
    }
}
