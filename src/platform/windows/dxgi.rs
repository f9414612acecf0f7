//! DXGI desktop-duplication backend.
//!
//! Owns the full native resource chain for one duplicated output: Direct3D
//! device and context, DXGI output, the duplication session, and a
//! desktop-sized CPU staging texture. Resources are acquired in that order
//! and released in reverse.

use std::error::Error;
use std::slice;
use std::time::Duration;

use windows::Win32::Graphics::Direct3D11::{
    D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, IDXGIDevice,
    IDXGIOutput1, IDXGIOutputDuplication,
};
use windows::core::Interface;

use super::d3d11::{create_d3d_device, create_staging_texture};
use crate::duplication::{AcquireError, DuplicationBackend, FrameInfo, MappedStaging};
use crate::provider::CaptureError;

struct Session {
    /// Kept alive for the duplication and staging texture created from it.
    _device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    staging: ID3D11Texture2D,
}

/// A [`DuplicationBackend`] over `IDXGIOutputDuplication`.
pub struct DxgiDuplicationBackend {
    output_index: u32,
    desktop: (u32, u32),
    session: Option<Session>,
    frame_texture: Option<ID3D11Texture2D>,
    holding_frame: bool,
}

// SAFETY: the COM pointers are only touched through `&mut self`, and the
// engine serializes every backend call under its coarse lock.
unsafe impl Send for DxgiDuplicationBackend {}

impl DxgiDuplicationBackend {
    /// Creates a backend for the adapter's output at `output_index` and
    /// resolves its desktop bounds. The duplication session itself is built
    /// by the first [`DuplicationBackend::reinitialize`].
    pub fn new(output_index: u32) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let (device, _context) = create_d3d_device()?;
        let output = find_output(&device, output_index)?;
        let desc = unsafe { output.GetDesc()? };

        let rect = desc.DesktopCoordinates;
        let width = u32::try_from(rect.right - rect.left).map_err(|_| "output has empty bounds")?;
        let height = u32::try_from(rect.bottom - rect.top).map_err(|_| "output has empty bounds")?;
        if width == 0 || height == 0 {
            return Err("output has empty bounds".into());
        }

        Ok(Self {
            output_index,
            desktop: (width, height),
            session: None,
            frame_texture: None,
            holding_frame: false,
        })
    }

    fn session(&self) -> Result<&Session, Box<dyn Error + Send + Sync>> {
        self.session.as_ref().ok_or_else(|| "duplication session is not initialized".into())
    }

    /// Releases a held frame back to the duplication. Errors are ignored; an
    /// access-lost release is reported by the next acquire anyway.
    fn release_frame(&mut self) {
        self.frame_texture = None;
        if self.holding_frame {
            if let Some(session) = &self.session {
                let _ = unsafe { session.duplication.ReleaseFrame() };
            }
            self.holding_frame = false;
        }
    }
}

impl DuplicationBackend for DxgiDuplicationBackend {
    fn desktop_bounds(&self) -> (u32, u32) {
        self.desktop
    }

    fn reinitialize(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.release();

        let (device, context) = create_d3d_device()?;
        let output = find_output(&device, self.output_index)?;
        let duplication = unsafe { output.DuplicateOutput(&device)? };

        let desc = unsafe { duplication.GetDesc() };
        self.desktop = (desc.ModeDesc.Width, desc.ModeDesc.Height);

        let staging = create_staging_texture(&device, self.desktop.0, self.desktop.1)?;

        self.session = Some(Session { _device: device, context, duplication, staging });
        Ok(())
    }

    fn acquire_frame(&mut self, timeout: Duration) -> Result<FrameInfo, AcquireError> {
        // A frame left over from a previous attempt must go back first.
        self.release_frame();

        let session = self.session().map_err(AcquireError::Backend)?;

        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource = None;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        if let Err(e) =
            unsafe { session.duplication.AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource) }
        {
            return Err(if e.code() == DXGI_ERROR_WAIT_TIMEOUT {
                AcquireError::Timeout
            } else if e.code() == DXGI_ERROR_ACCESS_LOST {
                AcquireError::AccessLost
            } else {
                AcquireError::Backend(Box::new(e))
            });
        }
        self.holding_frame = true;

        let resource = resource.ok_or_else(|| {
            AcquireError::Backend("AcquireNextFrame returned no resource".into())
        })?;
        let texture = resource.cast::<ID3D11Texture2D>().map_err(|e| AcquireError::Backend(Box::new(e)))?;
        self.frame_texture = Some(texture);

        Ok(FrameInfo {
            accumulated_frames: frame_info.AccumulatedFrames,
            present_updated: frame_info.LastPresentTime != 0,
        })
    }

    fn discard_frame(&mut self) {
        self.release_frame();
    }

    fn stage_frame(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let texture = self.frame_texture.as_ref().ok_or("no frame is held")?;
        let session = self.session.as_ref().ok_or("duplication session is not initialized")?;

        unsafe {
            session.context.CopyResource(&session.staging, texture);
        };

        self.release_frame();
        Ok(())
    }

    fn with_mapped(
        &mut self,
        read: &mut dyn FnMut(MappedStaging<'_>) -> Result<(), CaptureError>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (width, height) = self.desktop;
        let session = self.session()?;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            session.context.Map(&session.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;
        };

        // SAFETY: the staging texture stays mapped until the Unmap below.
        let data = unsafe {
            slice::from_raw_parts(mapped.pData.cast::<u8>(), height as usize * mapped.RowPitch as usize)
        };

        let result = read(MappedStaging { data, row_pitch: mapped.RowPitch as usize, width, height });

        unsafe {
            session.context.Unmap(&session.staging, 0);
        };

        result.map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
    }

    fn release(&mut self) {
        self.release_frame();
        // Dropping the session releases staging, duplication, context and
        // device in reverse-acquisition order.
        self.session = None;
    }
}

impl Drop for DxgiDuplicationBackend {
    fn drop(&mut self) {
        self.release();
    }
}

fn find_output(
    device: &ID3D11Device,
    output_index: u32,
) -> Result<IDXGIOutput1, Box<dyn Error + Send + Sync>> {
    let dxgi_device = device.cast::<IDXGIDevice>()?;
    let adapter = unsafe { dxgi_device.GetAdapter()? };
    let output = unsafe { adapter.EnumOutputs(output_index)? };
    Ok(output.cast::<IDXGIOutput1>()?)
}
