//! # Paced Capture
//!
//! **Paced Capture** is a synchronized screen frame-capture engine: it paces
//! frame production against an external reference clock and fills
//! caller-owned buffers from one of two capture backends, a legacy raster
//! path that block-copies the desktop and composites the pointer, and a GPU
//! desktop-duplication path that recovers transparently from lost sessions.
//!
//! ## Features
//!
//! - Clock-Driven Pacing With Back-To-Back Frame Timestamps.
//! - Drift Clamping So One Slow Frame Cannot Skew Playback Timing.
//! - Legacy Raster Capture With Pointer Glyph And Click-Ripple Overlay.
//! - GPU Desktop Duplication With Transparent Access-Lost Recovery.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use paced_capture::{
//!     CaptureEngine, CaptureProperties, DeliveryBuffer, PixelFormat, ReferenceClock, SystemClock,
//! };
//! # fn provider() -> Box<dyn paced_capture::FrameProvider> { unimplemented!() }
//!
//! let clock: Arc<dyn ReferenceClock> = Arc::new(SystemClock::new());
//! let engine = CaptureEngine::new(&clock, provider());
//!
//! engine.set_latency(Duration::from_millis(33)).unwrap();
//! engine.activate().unwrap();
//!
//! let props = engine.capture_properties();
//! let mut data = vec![0u8; props.buffer_size()];
//! let mut buffer = DeliveryBuffer::for_properties(&mut data, &props);
//!
//! // One pull per frame: waits for the frame start, captures, stamps.
//! engine.fill_next_frame(&mut buffer).unwrap();
//! let stamp = buffer.stamp.unwrap();
//! println!("frame [{:?}, {:?})", stamp.start_time, stamp.end_time);
//!
//! engine.deactivate();
//! ```
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::inconsistent_struct_constructor)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::ptr_as_ptr)]
#![warn(clippy::borrow_as_ptr)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]

pub mod buffer;
pub mod clock;
pub mod cursor;
pub mod duplication;
pub mod engine;
pub mod pacer;
pub mod platform;
pub mod properties;
pub mod provider;
pub mod raster;
#[cfg(test)]
pub(crate) mod testkit;

pub use buffer::{DeliveryBuffer, FrameStamp};
pub use clock::{ClockTime, PeriodicSignal, ReferenceClock, SystemClock};
pub use engine::{Capabilities, CaptureEngine, EngineError};
pub use pacer::FramePacer;
pub use properties::{CaptureProperties, PixelFormat};
pub use provider::{CaptureError, FrameProvider};
