//! GDI backends for the legacy raster provider: a block-copy surface over a
//! DIB section and a pointer source over the cursor APIs.

use std::error::Error;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::null_mut;
use std::slice;

use windows::Win32::Graphics::Gdi::{
    BI_RGB, BITMAP, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CreateCompatibleDC, CreateDIBSection,
    DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, GetObjectW, HBITMAP, HDC, HGDIOBJ,
    ReleaseDC, SRCCOPY, SelectObject,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_LBUTTON, VK_RBUTTON};
use windows::Win32::UI::WindowsAndMessaging::{
    CURSOR_SHOWING, CURSORINFO, GetCursorInfo, GetIconInfo, GetSystemMetrics, HCURSOR, ICONINFO,
    SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN,
};

use crate::cursor::{PointerButtons, PointerGlyph, PointerSource, PointerState};
use crate::raster::RasterSurface;

/// A [`RasterSurface`] over a memory DC with a top-down 32-bit DIB section.
pub struct GdiSurface {
    screen_dc: HDC,
    mem_dc: HDC,
    bitmap: Option<HBITMAP>,
    old_bitmap: Option<HGDIOBJ>,
    bits: *mut u8,
    size: (u32, u32),
    released: bool,
}

// SAFETY: the raw DC and bitmap handles are only touched through `&mut self`,
// and the engine serializes every surface call under its coarse lock.
unsafe impl Send for GdiSurface {}

impl GdiSurface {
    /// Opens the desktop DC and a compatible memory DC. The DIB section is
    /// created lazily on the first blit.
    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut surface = Self {
            screen_dc: HDC::default(),
            mem_dc: HDC::default(),
            bitmap: None,
            old_bitmap: None,
            bits: null_mut(),
            size: (0, 0),
            released: true,
        };
        surface.reacquire()?;
        Ok(surface)
    }

    fn ensure_surface(&mut self, size: (u32, u32)) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.bitmap.is_some() && self.size == size {
            return Ok(());
        }
        self.release_bitmap();

        let mut info = BITMAPINFO::default();
        info.bmiHeader.biSize = size_of::<BITMAPINFOHEADER>() as u32;
        info.bmiHeader.biWidth = i32::try_from(size.0).map_err(|_| "surface too wide")?;
        // Negative height selects a top-down DIB.
        info.bmiHeader.biHeight = -i32::try_from(size.1).map_err(|_| "surface too tall")?;
        info.bmiHeader.biPlanes = 1;
        info.bmiHeader.biBitCount = 32;
        info.bmiHeader.biCompression = BI_RGB.0;

        let mut bits: *mut c_void = null_mut();
        let bitmap =
            unsafe { CreateDIBSection(Some(self.mem_dc), &info, DIB_RGB_COLORS, &mut bits, None, 0)? };

        let selected = unsafe { SelectObject(self.mem_dc, bitmap.into()) };
        if selected.is_invalid() {
            unsafe {
                let _ = DeleteObject(bitmap.into());
            }
            return Err("SelectObject failed for the capture bitmap".into());
        }

        self.bitmap = Some(bitmap);
        self.old_bitmap = Some(selected);
        self.bits = bits.cast();
        self.size = size;
        Ok(())
    }

    fn release_bitmap(&mut self) {
        if let Some(old_bitmap) = self.old_bitmap.take() {
            unsafe {
                let _ = SelectObject(self.mem_dc, old_bitmap);
            }
        }
        if let Some(bitmap) = self.bitmap.take() {
            unsafe {
                let _ = DeleteObject(bitmap.into());
            }
        }
        self.bits = null_mut();
        self.size = (0, 0);
    }
}

impl RasterSurface for GdiSurface {
    fn desktop_bounds(&self) -> (u32, u32) {
        let width = unsafe { GetSystemMetrics(SM_CXVIRTUALSCREEN) };
        let height = unsafe { GetSystemMetrics(SM_CYVIRTUALSCREEN) };
        (width.max(0) as u32, height.max(0) as u32)
    }

    fn blit_desktop(&mut self, origin: (i32, i32), size: (u32, u32)) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.released {
            return Err("surface has been released".into());
        }
        self.ensure_surface(size)?;

        unsafe {
            BitBlt(
                self.mem_dc,
                0,
                0,
                size.0 as i32,
                size.1 as i32,
                Some(self.screen_dc),
                origin.0,
                origin.1,
                SRCCOPY,
            )?;
        };
        Ok(())
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        if self.bits.is_null() {
            return &mut [];
        }
        let len = self.size.0 as usize * self.size.1 as usize * 4;
        // SAFETY: bits points at the selected DIB section, which stays alive
        // until release_bitmap and holds exactly width * height BGRA pixels.
        unsafe { slice::from_raw_parts_mut(self.bits, len) }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.release_bitmap();
        unsafe {
            let _ = DeleteDC(self.mem_dc);
            let _ = ReleaseDC(None, self.screen_dc);
        }
        self.released = true;
    }

    fn reacquire(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.released {
            return Ok(());
        }

        let screen_dc = unsafe { GetDC(None) };
        if screen_dc.is_invalid() {
            return Err("GetDC(NULL) returned null".into());
        }

        let mem_dc = unsafe { CreateCompatibleDC(Some(screen_dc)) };
        if mem_dc.is_invalid() {
            unsafe {
                let _ = ReleaseDC(None, screen_dc);
            }
            return Err("CreateCompatibleDC failed".into());
        }

        self.screen_dc = screen_dc;
        self.mem_dc = mem_dc;
        self.released = false;
        Ok(())
    }
}

impl Drop for GdiSurface {
    fn drop(&mut self) {
        self.release();
    }
}

/// A [`PointerSource`] over `GetCursorInfo` and `GetAsyncKeyState`, with the
/// glyph bitmap cached per cursor shape.
#[derive(Default)]
pub struct GdiPointerSource {
    glyph: Option<PointerGlyph>,
    glyph_for: Option<HCURSOR>,
}

impl GdiPointerSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key_held(key: i32) -> bool {
    (unsafe { GetAsyncKeyState(key) } as u16) & 0x8000 != 0
}

fn cursor_info() -> Option<CURSORINFO> {
    let mut info = CURSORINFO { cbSize: size_of::<CURSORINFO>() as u32, ..Default::default() };
    unsafe { GetCursorInfo(&mut info) }.ok()?;
    Some(info)
}

impl PointerSource for GdiPointerSource {
    fn state(&mut self) -> PointerState {
        let buttons = PointerButtons {
            left: key_held(i32::from(VK_LBUTTON.0)),
            right: key_held(i32::from(VK_RBUTTON.0)),
        };

        cursor_info().map_or(
            PointerState { position: (0, 0), visible: false, buttons },
            |info| PointerState {
                position: (info.ptScreenPos.x, info.ptScreenPos.y),
                visible: (info.flags.0 & CURSOR_SHOWING.0) != 0,
                buttons,
            },
        )
    }

    fn glyph(&mut self) -> Option<&PointerGlyph> {
        let info = cursor_info()?;
        if info.hCursor.is_invalid() {
            return None;
        }

        if self.glyph_for != Some(info.hCursor) {
            self.glyph = extract_glyph(info.hCursor);
            self.glyph_for = Some(info.hCursor);
        }
        self.glyph.as_ref()
    }
}

/// Reads the cursor's color bitmap into a straight-alpha BGRA glyph. Returns
/// `None` for cursors with no color plane (monochrome shapes); those frames
/// are delivered without an overlay.
fn extract_glyph(cursor: HCURSOR) -> Option<PointerGlyph> {
    let mut icon_info = ICONINFO::default();
    unsafe { GetIconInfo(cursor.into(), &mut icon_info) }.ok()?;

    let glyph = read_color_bitmap(&icon_info);

    if !icon_info.hbmMask.is_invalid() {
        unsafe {
            let _ = DeleteObject(icon_info.hbmMask.into());
        }
    }
    if !icon_info.hbmColor.is_invalid() {
        unsafe {
            let _ = DeleteObject(icon_info.hbmColor.into());
        }
    }
    glyph
}

fn read_color_bitmap(icon_info: &ICONINFO) -> Option<PointerGlyph> {
    if icon_info.hbmColor.is_invalid() {
        return None;
    }

    let mut bitmap = BITMAP::default();
    let copied = unsafe {
        GetObjectW(
            icon_info.hbmColor.into(),
            size_of::<BITMAP>() as i32,
            Some((&raw mut bitmap).cast()),
        )
    };
    if copied == 0 || bitmap.bmWidth <= 0 || bitmap.bmHeight <= 0 {
        return None;
    }

    let width = bitmap.bmWidth as u32;
    let height = bitmap.bmHeight as u32;
    let mut pixels = vec![0u8; width as usize * height as usize * 4];

    let mut info = BITMAPINFO::default();
    info.bmiHeader.biSize = size_of::<BITMAPINFOHEADER>() as u32;
    info.bmiHeader.biWidth = bitmap.bmWidth;
    info.bmiHeader.biHeight = -bitmap.bmHeight;
    info.bmiHeader.biPlanes = 1;
    info.bmiHeader.biBitCount = 32;
    info.bmiHeader.biCompression = BI_RGB.0;

    let dc = unsafe { GetDC(None) };
    if dc.is_invalid() {
        return None;
    }
    let rows = unsafe {
        GetDIBits(
            dc,
            icon_info.hbmColor,
            0,
            height,
            Some(pixels.as_mut_ptr().cast()),
            &mut info,
            DIB_RGB_COLORS,
        )
    };
    unsafe {
        let _ = ReleaseDC(None, dc);
    }
    if rows == 0 {
        return None;
    }

    // Cursors drawn without an alpha channel come back fully transparent;
    // treat them as opaque so the glyph is still visible.
    if pixels.chunks_exact(4).all(|px| px[3] == 0) {
        for px in pixels.chunks_exact_mut(4) {
            px[3] = 0xFF;
        }
    }

    Some(PointerGlyph {
        width,
        height,
        hotspot: (icon_info.xHotspot as i32, icon_info.yHotspot as i32),
        pixels,
    })
}
