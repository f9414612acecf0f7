//! Pointer-glyph and click-ripple compositing for the legacy raster provider.
//!
//! The duplication provider delivers raw pixels only; this module is what
//! makes the legacy path draw the pointer and a short ripple animation after
//! a mouse click. All click state is scoped to the compositor instance, which
//! lives and dies with its provider.

use std::time::{Duration, Instant};

/// Which pointer buttons are currently held.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub struct PointerButtons {
    pub left: bool,
    pub right: bool,
}

impl PointerButtons {
    /// Whether any button went down between `previous` and `self`.
    #[inline]
    #[must_use]
    pub const fn pressed_since(self, previous: Self) -> bool {
        (self.left && !previous.left) || (self.right && !previous.right)
    }
}

/// A snapshot of the pointer, in desktop coordinates.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct PointerState {
    /// Pointer position in desktop coordinates.
    pub position: (i32, i32),
    /// Whether the pointer is currently shown.
    pub visible: bool,
    /// Held buttons.
    pub buttons: PointerButtons,
}

/// A pointer glyph as a straight-alpha BGRA bitmap.
#[derive(Clone, Debug)]
pub struct PointerGlyph {
    pub width: u32,
    pub height: u32,
    /// Offset of the pointer hot spot from the glyph's top-left.
    pub hotspot: (i32, i32),
    /// `width * height * 4` bytes, row-major, top-down.
    pub pixels: Vec<u8>,
}

/// Supplies pointer snapshots and the current glyph.
pub trait PointerSource: Send {
    /// Reads the current pointer state.
    fn state(&mut self) -> PointerState;

    /// Gets the current glyph, or `None` when the shape cannot be resolved
    /// (the frame is then delivered without a pointer overlay).
    fn glyph(&mut self) -> Option<&PointerGlyph>;
}

/// Tuning for the click-ripple animation.
///
/// The source material disagrees with itself on the exact duration, so both
/// knobs are configuration rather than hard-coded.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct RippleStyle {
    /// How long the ripple stays visible after a button-down transition.
    pub duration: Duration,
    /// Radius the ripple grows to over `duration`, in pixels.
    pub max_radius: i32,
}

impl Default for RippleStyle {
    fn default() -> Self {
        Self { duration: Duration::from_millis(450), max_radius: 25 }
    }
}

// Ripple tint, BGR.
const RIPPLE_COLOR: [u8; 3] = [0, 0, 255];

struct ClickMark {
    position: (i32, i32),
    at: Instant,
}

/// Overlays the pointer glyph and a fading click ripple onto a captured
/// surface.
pub struct CursorCompositor<P: PointerSource> {
    pointer: P,
    style: RippleStyle,
    held: PointerButtons,
    last_click: Option<ClickMark>,
}

impl<P: PointerSource> CursorCompositor<P> {
    /// Creates a compositor with the default [`RippleStyle`].
    #[must_use]
    pub fn new(pointer: P) -> Self {
        Self::with_style(pointer, RippleStyle::default())
    }

    /// Creates a compositor with a custom ripple style.
    #[must_use]
    pub fn with_style(pointer: P, style: RippleStyle) -> Self {
        Self { pointer, style, held: PointerButtons::default(), last_click: None }
    }

    /// Draws the pointer glyph and any active click ripple onto `pixels`, a
    /// packed top-down BGRA surface of `width * height` covering the desktop
    /// region starting at `origin`.
    ///
    /// The ripple is anchored at the position captured at click time, not the
    /// current pointer position. Drawing is skipped entirely for a pointer
    /// outside the capture bounds; the ripple is clipped like any overlay.
    pub fn composite(&mut self, pixels: &mut [u8], width: u32, height: u32, origin: (i32, i32), now: Instant) {
        let state = self.pointer.state();

        if state.buttons.pressed_since(self.held) {
            self.last_click = Some(ClickMark { position: state.position, at: now });
        }
        self.held = state.buttons;

        let mut surface = SurfaceView { pixels, width: width as i32, height: height as i32 };

        if state.visible {
            let local = (state.position.0 - origin.0, state.position.1 - origin.1);
            if local.0 >= 0 && local.0 < surface.width && local.1 >= 0 && local.1 < surface.height {
                if let Some(glyph) = self.pointer.glyph() {
                    draw_glyph(&mut surface, glyph, local);
                }
            }
        }

        if let Some(click) = &self.last_click {
            let age = now.saturating_duration_since(click.at);
            if age >= self.style.duration {
                self.last_click = None;
            } else {
                let progress = age.as_secs_f32() / self.style.duration.as_secs_f32();
                let radius = (self.style.max_radius as f32 * progress) as i32;
                let alpha = (255.0 * (1.0 - progress)) as u8;
                let center = (click.position.0 - origin.0, click.position.1 - origin.1);
                draw_ripple(&mut surface, center, radius, alpha);
            }
        }
    }
}

struct SurfaceView<'a> {
    pixels: &'a mut [u8],
    width: i32,
    height: i32,
}

impl SurfaceView<'_> {
    fn blend(&mut self, x: i32, y: i32, bgr: [u8; 3], alpha: u8) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let index = (y as usize * self.width as usize + x as usize) * 4;
        let Some(px) = self.pixels.get_mut(index..index + 3) else {
            return;
        };
        let a = u16::from(alpha);
        for (dst, src) in px.iter_mut().zip(bgr) {
            *dst = ((u16::from(src) * a + u16::from(*dst) * (255 - a)) / 255) as u8;
        }
    }
}

fn draw_glyph(surface: &mut SurfaceView<'_>, glyph: &PointerGlyph, position: (i32, i32)) {
    let left = position.0 - glyph.hotspot.0;
    let top = position.1 - glyph.hotspot.1;
    for gy in 0..glyph.height as i32 {
        for gx in 0..glyph.width as i32 {
            let index = (gy as usize * glyph.width as usize + gx as usize) * 4;
            let Some(px) = glyph.pixels.get(index..index + 4) else {
                return;
            };
            surface.blend(left + gx, top + gy, [px[0], px[1], px[2]], px[3]);
        }
    }
}

fn draw_ripple(surface: &mut SurfaceView<'_>, center: (i32, i32), radius: i32, alpha: u8) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                surface.blend(center.0 + dx, center.1 + dy, RIPPLE_COLOR, alpha);
            }
        }
    }
}
