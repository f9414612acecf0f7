//! Caller-owned destination buffer and the timestamp stamp applied to it.

use crate::clock::ClockTime;
use crate::properties::CaptureProperties;

/// Timestamps and delivery metadata stamped on a successfully captured frame.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct FrameStamp {
    /// Frame start time, read from the reference clock.
    pub start_time: ClockTime,
    /// Frame end time. Exclusive: the frame covers `[start_time, end_time)`.
    pub end_time: ClockTime,
    /// Number of valid bytes in the destination buffer.
    pub actual_length: usize,
    /// Every frame from this source is independently displayable, so this is
    /// always `true`; kept explicit for the downstream media-type contract.
    pub sync_point: bool,
}

/// A destination buffer handed in by the host pipeline for one frame pull.
///
/// The engine writes pixel rows at `stride` byte offsets into `data` and, on
/// success, fills in `stamp`. A failed pull leaves `stamp` untouched so a
/// partially written buffer is never mistaken for a delivered frame.
pub struct DeliveryBuffer<'a> {
    /// Destination pixel storage.
    pub data: &'a mut [u8],
    /// Row stride in bytes, as negotiated with the host pipeline.
    pub stride: usize,
    /// Set by the engine when the frame was captured and timestamped.
    pub stamp: Option<FrameStamp>,
}

impl<'a> DeliveryBuffer<'a> {
    /// Wraps a destination slice with an explicit row stride.
    #[inline]
    #[must_use]
    pub const fn new(data: &'a mut [u8], stride: usize) -> Self {
        Self { data, stride, stamp: None }
    }

    /// Wraps a destination slice using the stride derived from `props`.
    #[inline]
    #[must_use]
    pub const fn for_properties(data: &'a mut [u8], props: &CaptureProperties) -> Self {
        Self::new(data, props.dest_stride())
    }
}
