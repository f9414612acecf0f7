//! Legacy raster capture: a synchronous screen-to-bitmap block copy through
//! an off-screen drawing surface, with cursor compositing.

use std::time::Instant;

use crate::cursor::{CursorCompositor, PointerSource, RippleStyle};
use crate::properties::CaptureProperties;
use crate::provider::{self, CaptureError, FrameProvider};

/// An off-screen drawing surface a desktop region can be block-copied into.
///
/// After a successful [`RasterSurface::blit_desktop`], the surface exposes
/// packed top-down BGRA pixels of exactly the blitted size.
pub trait RasterSurface: Send {
    /// Full desktop bounds reachable through this surface.
    fn desktop_bounds(&self) -> (u32, u32);

    /// Block-copies the desktop region `[origin, origin + size)` into the
    /// surface's backing store, resizing it as needed.
    fn blit_desktop(&mut self, origin: (i32, i32), size: (u32, u32)) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Mutable view of the blitted pixels: `size.0 * size.1` BGRA values,
    /// row-major, top-down, tightly packed.
    fn pixels_mut(&mut self) -> &mut [u8];

    /// Releases the surface's native resources. Idempotent.
    fn release(&mut self);

    /// Re-opens the native surface after a [`RasterSurface::release`]. A
    /// no-op on a surface that is still live.
    fn reacquire(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Frame provider backed by a [`RasterSurface`], compositing the pointer
/// glyph and click ripple before handing rows to the destination.
pub struct LegacyRasterProvider<S: RasterSurface, P: PointerSource> {
    surface: S,
    compositor: CursorCompositor<P>,
    props: CaptureProperties,
    disposed: bool,
}

impl<S: RasterSurface, P: PointerSource> LegacyRasterProvider<S, P> {
    /// Creates a provider over `surface` and `pointer` with the default
    /// ripple style.
    #[must_use]
    pub fn new(surface: S, pointer: P, props: CaptureProperties) -> Self {
        Self::with_ripple_style(surface, pointer, props, RippleStyle::default())
    }

    /// Creates a provider with a custom click-ripple style.
    #[must_use]
    pub fn with_ripple_style(surface: S, pointer: P, props: CaptureProperties, style: RippleStyle) -> Self {
        Self { surface, compositor: CursorCompositor::with_style(pointer, style), props, disposed: false }
    }
}

impl<S: RasterSurface, P: PointerSource> FrameProvider for LegacyRasterProvider<S, P> {
    /// Stores a private copy of the properties. The surface itself is sized
    /// lazily on the next blit, so this always succeeds.
    fn set_capture_properties(&mut self, props: CaptureProperties) -> Result<(), CaptureError> {
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

        let props = self.props;
        let origin = (props.origin_x, props.origin_y);
        let size = (props.width, props.pixel_height());

        if let Err(error) = self.surface.blit_desktop(origin, size) {
            tracing::warn!(%error, "desktop blit failed, dropping frame");
            return Err(CaptureError::SurfaceUnavailable);
        }

        let pixels = self.surface.pixels_mut();
        self.compositor.composite(pixels, size.0, size.1, origin, Instant::now());

        provider::transfer_rows(pixels, size.0 as usize * 4, &props, dest, dest_stride)
    }

    fn desktop_bounds(&self) -> (u32, u32) {
        self.surface.desktop_bounds()
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.surface.release();
            self.disposed = true;
        }
    }

    fn revive(&mut self) -> Result<(), CaptureError> {
        if self.disposed {
            self.surface.reacquire().map_err(CaptureError::Backend)?;
            self.disposed = false;
        }
        Ok(())
    }
}

impl<S: RasterSurface, P: PointerSource> Drop for LegacyRasterProvider<S, P> {
    fn drop(&mut self) {
        self.dispose();
    }
}
