//! Capture-region and pixel-format description.
//!
//! [`CaptureProperties`] is the value type every provider is configured with.
//! It is a plain `Copy` value: callers hand the engine a whole new value when
//! the region or format changes, so a provider never observes a partial
//! mutation.

/// Capture dimensions are padded to this alignment before computing the
/// delivery buffer size, matching the row alignment the downstream pipeline
/// negotiates.
pub const DIMENSION_ALIGNMENT: u32 = 16;

/// Rounds `value` up to the next multiple of [`DIMENSION_ALIGNMENT`].
#[inline]
#[must_use]
pub const fn align_dimension(value: u32) -> u32 {
    value.div_ceil(DIMENSION_ALIGNMENT) * DIMENSION_ALIGNMENT
}

/// Pixel format of the delivered frame.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum PixelFormat {
    /// 24-bit BGR, no alpha channel.
    Bgr24,
    /// 32-bit BGRA.
    Bgra32,
}

impl PixelFormat {
    /// Gets the number of bytes per pixel.
    #[inline]
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgr24 => 3,
            Self::Bgra32 => 4,
        }
    }

    /// Gets the number of bits per pixel.
    #[inline]
    #[must_use]
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Bgr24 => 24,
            Self::Bgra32 => 32,
        }
    }
}

/// Describes the capture region and the pixel format of delivered frames.
///
/// `height` carries the row orientation in its sign: a negative height means
/// the destination expects bottom-up rows (the last image row first), the way
/// bottom-up device-independent bitmaps are laid out.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct CaptureProperties {
    /// Capture-region top-left, in desktop coordinates.
    pub origin_x: i32,
    /// Capture-region top-left, in desktop coordinates.
    pub origin_y: i32,
    /// Capture width in pixels. Must be greater than zero.
    pub width: u32,
    /// Capture height in pixels. Must be nonzero; negative means bottom-up
    /// row order in the destination buffer.
    pub height: i32,
    /// Pixel format of the delivered frame.
    pub format: PixelFormat,
}

impl CaptureProperties {
    /// Creates a new set of capture properties.
    #[inline]
    #[must_use]
    pub const fn new(origin_x: i32, origin_y: i32, width: u32, height: i32, format: PixelFormat) -> Self {
        Self { origin_x, origin_y, width, height, format }
    }

    /// Gets the capture height with the orientation sign stripped.
    #[inline]
    #[must_use]
    pub const fn pixel_height(&self) -> u32 {
        self.height.unsigned_abs()
    }

    /// Whether destination rows run bottom-up.
    #[inline]
    #[must_use]
    pub const fn is_bottom_up(&self) -> bool {
        self.height < 0
    }

    /// Row stride of the destination buffer in bytes.
    ///
    /// The width is padded to [`DIMENSION_ALIGNMENT`] pixels, which keeps the
    /// stride 4-byte aligned for both supported formats.
    #[inline]
    #[must_use]
    pub const fn dest_stride(&self) -> usize {
        align_dimension(self.width) as usize * self.format.bytes_per_pixel()
    }

    /// Total delivery buffer size in bytes, with both dimensions padded to
    /// [`DIMENSION_ALIGNMENT`].
    #[inline]
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        align_dimension(self.width) as usize
            * align_dimension(self.pixel_height()) as usize
            * self.format.bytes_per_pixel()
    }
}
