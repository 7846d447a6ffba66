use crate::error::{MaskflowError, MaskflowResult};

pub use kurbo::{Affine, BezPath, Circle, Point, Rect, Vec2};

/// Target raster extent in pixels. Particles wrap and bounce against this
/// extent, and the render pass reads it back as the output frame size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> MaskflowResult<Self> {
        if width == 0 || height == 0 {
            return Err(MaskflowError::validation("canvas width/height must be > 0"));
        }
        Ok(Self { width, height })
    }

    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }
}

/// Straight (non-premultiplied) RGBA8 color.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Mix toward white by `t` in 0..1, alpha unchanged.
    pub fn lighten(self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |c: u8| -> u8 { (f64::from(c) + (255.0 - f64::from(c)) * t).round() as u8 };
        Self {
            r: mix(self.r),
            g: mix(self.g),
            b: mix(self.b),
            a: self.a,
        }
    }
}

/// Cosmetic palette masks pick their display color from at creation.
pub const MASK_PALETTE: [Rgba8; 8] = [
    Rgba8::opaque(0xFF, 0x6B, 0x6B),
    Rgba8::opaque(0x4E, 0xCD, 0xC4),
    Rgba8::opaque(0x45, 0xB7, 0xD1),
    Rgba8::opaque(0xFF, 0xA0, 0x7A),
    Rgba8::opaque(0x98, 0xD8, 0xC8),
    Rgba8::opaque(0xF7, 0xDC, 0x6F),
    Rgba8::opaque(0xBB, 0x8F, 0xCE),
    Rgba8::opaque(0xF8, 0xB5, 0x00),
];
