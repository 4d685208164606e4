/// Straight-alpha RGBA color with `f32` channels in `[0, 1]`.
///
/// Colors travel through the engine unpremultiplied; blending policy is chosen
/// per draw by the active blend mode. The packed form used by manifests and the
/// Direct3D9 vertex format is 32-bit ARGB.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    #[inline]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Channel order matches the packed layout: alpha first.
    #[inline]
    pub const fn argb(a: f32, r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn black() -> Self {
        Self::rgba(0.0, 0.0, 0.0, 1.0)
    }

    #[inline]
    pub const fn white() -> Self {
        Self::rgba(1.0, 1.0, 1.0, 1.0)
    }

    #[inline]
    pub const fn transparent() -> Self {
        Self::rgba(0.0, 0.0, 0.0, 0.0)
    }

    /// Unpacks a 32-bit `0xAARRGGBB` value.
    pub fn from_argb_u32(argb: u32) -> Self {
        let channel = |shift: u32| ((argb >> shift) & 0xFF) as f32 / 255.0;
        Self {
            a: channel(24),
            r: channel(16),
            g: channel(8),
            b: channel(0),
        }
    }

    /// Packs into `0xAARRGGBB`, rounding each channel to the nearest 1/255.
    pub fn to_argb_u32(self) -> u32 {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (q(self.a) << 24) | (q(self.r) << 16) | (q(self.g) << 8) | q(self.b)
    }

    /// Returns the color quantized to 8 bits per channel.
    #[inline]
    pub fn quantized(self) -> Self {
        Self::from_argb_u32(self.to_argb_u32())
    }

    /// Linear interpolation toward `other`; `t` is clamped to `[0, 1]`.
    pub fn interpolate_to(self, t: f32, other: Color) -> Self {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: f32, b: f32| a + (b - a) * t;
        Self {
            r: lerp(self.r, other.r),
            g: lerp(self.g, other.g),
            b: lerp(self.b, other.b),
            a: lerp(self.a, other.a),
        }
    }

    #[inline]
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }
}
