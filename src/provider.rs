//! The capture-backend seam.
//!
//! [`FrameProvider`] is the polymorphic surface the orchestrator drives; it
//! never branches on a concrete backend. Two implementations ship with the
//! crate: [`crate::raster::LegacyRasterProvider`] (synchronous block copy off
//! a drawing surface, with cursor compositing) and
//! [`crate::duplication::DuplicationProvider`] (GPU desktop duplication, raw
//! pixels only).

use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;

use crate::properties::{CaptureProperties, PixelFormat};

/// Errors a capture backend can surface to the orchestrator.
///
/// Everything here is a per-frame condition: the caller should treat the pull
/// as a dropped frame and may retry on the next one. Recoverable backend
/// states (access lost, acquire timeout, "nothing changed yet") are absorbed
/// inside the providers and never reach this type unless recovery itself
/// failed.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// The source or destination surface could not be acquired, e.g. the
    /// desktop is locked or the drawing surface is gone.
    #[error("The capture surface could not be acquired")]
    SurfaceUnavailable,
    /// The destination buffer cannot hold the frame at the required stride.
    #[error("Destination buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required for the configured region and stride.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// The provider cannot service the requested capture properties.
    #[error("Capture properties rejected: {0}")]
    UnsupportedProperties(&'static str),
    /// An unrecoverable backend failure.
    #[error("Capture backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A frame-capture strategy the orchestrator can drive.
pub trait FrameProvider: Send {
    /// Stores a private copy of `props` and reconfigures the backend for the
    /// new region and format.
    fn set_capture_properties(&mut self, props: CaptureProperties) -> Result<(), CaptureError>;

    /// Gets a copy of the currently configured capture properties.
    fn capture_properties(&self) -> CaptureProperties;

    /// Captures one frame of the configured region into `dest`, writing rows
    /// at `dest_stride` byte offsets.
    ///
    /// On failure nothing about `dest` may be relied on, and the caller must
    /// not deliver it downstream.
    fn copy_screen_to_buffer(&mut self, dest: &mut [u8], dest_stride: usize) -> Result<(), CaptureError>;

    /// Full desktop bounds available to this provider, used for capability
    /// negotiation.
    fn desktop_bounds(&self) -> (u32, u32);

    /// Releases all native resources. Idempotent: a second call is a no-op,
    /// and no handle is ever released twice.
    fn dispose(&mut self);

    /// Re-acquires the native resources released by
    /// [`FrameProvider::dispose`], so a stopped stream can be activated
    /// again. A no-op on a provider that is already live.
    fn revive(&mut self) -> Result<(), CaptureError>;
}

/// Transfers captured BGRA rows into a destination buffer, honoring the
/// destination stride, the bottom-up orientation carried by the height sign,
/// and a 32-to-24-bit depth conversion when the destination format asks for
/// it.
///
/// `src` holds top-down BGRA rows at `src_pitch` byte offsets; the pitch may
/// exceed the logical row width (mapped GPU staging memory usually pads rows).
pub(crate) fn transfer_rows(
    src: &[u8],
    src_pitch: usize,
    props: &CaptureProperties,
    dest: &mut [u8],
    dest_stride: usize,
) -> Result<(), CaptureError> {
    let width = props.width as usize;
    let height = props.pixel_height() as usize;
    let bytes = props.format.bytes_per_pixel();

    if width == 0 || height == 0 {
        return Err(CaptureError::UnsupportedProperties("capture dimensions must be nonzero"));
    }
    if dest_stride < width * bytes {
        return Err(CaptureError::BufferTooSmall { needed: width * bytes, available: dest_stride });
    }
    let needed = dest_stride * height;
    if dest.len() < needed {
        return Err(CaptureError::BufferTooSmall { needed, available: dest.len() });
    }
    if src_pitch < width * 4 || src.len() < (height - 1) * src_pitch + width * 4 {
        // The backend produced less than it claimed; treat as a failed grab.
        return Err(CaptureError::SurfaceUnavailable);
    }

    let bottom_up = props.is_bottom_up();
    let format = props.format;

    dest[..needed].par_chunks_mut(dest_stride).enumerate().for_each(|(row, out)| {
        let src_row = if bottom_up { height - 1 - row } else { row };
        let line = &src[src_row * src_pitch..src_row * src_pitch + width * 4];
        match format {
            PixelFormat::Bgra32 => out[..width * 4].copy_from_slice(line),
            PixelFormat::Bgr24 => {
                for x in 0..width {
                    out[x * 3..x * 3 + 3].copy_from_slice(&line[x * 4..x * 4 + 3]);
                }
            }
        }
    });

    Ok(())
}
