//! Windows backends: a GDI block-copy surface and pointer source for the
//! legacy raster provider, and a DXGI desktop-duplication session for the
//! duplication provider.

mod d3d11;
pub mod dxgi;
pub mod gdi;

pub use dxgi::DxgiDuplicationBackend;
pub use gdi::{GdiPointerSource, GdiSurface};
