//! Native capture backends, compiled per target.

#[cfg(windows)]
pub mod windows;
