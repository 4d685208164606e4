use glam::{IVec2, Vec2};

/// Axis-aligned rectangle in virtual (resolution-independent) coordinates.
///
/// `min` is the top-left corner and `max` the bottom-right corner of a 2D view:
/// +X right, +Y down.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    #[inline]
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub const fn from_size(width: f32, height: f32) -> Self {
        Self::new(Vec2::ZERO, Vec2::new(width, height))
    }

    #[inline]
    pub fn width(self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(self) -> f32 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn size(self) -> Vec2 {
        self.max - self.min
    }

    /// Width over height; `None` for degenerate rectangles.
    #[inline]
    pub fn aspect_ratio(self) -> Option<f32> {
        let (w, h) = (self.width(), self.height());
        (w.is_finite() && h.is_finite() && w != 0.0 && h != 0.0).then(|| w / h)
    }
}

/// Integer pixel rectangle in window space (top-left origin, half-open).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl PixelRect {
    #[inline]
    pub const fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(IVec2::ZERO, IVec2::new(width, height))
    }

    #[inline]
    pub fn width(self) -> i32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(self) -> i32 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    #[inline]
    pub fn aspect_ratio(self) -> Option<f32> {
        (!self.is_empty()).then(|| self.width() as f32 / self.height() as f32)
    }

    /// Half-open containment: [min, max).
    #[inline]
    pub fn contains(self, p: IVec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }
}
