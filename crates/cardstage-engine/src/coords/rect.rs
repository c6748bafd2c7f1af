use super::Vec2;

/// Axis-aligned rectangle in pixels (top-left origin).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rect {
    pub origin: Vec2,
    pub size: Vec2,
}

impl Rect {
    #[inline]
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            origin: Vec2::new(x, y),
            size: Vec2::new(w, h),
        }
    }

    /// Rectangle anchored at the origin.
    #[inline]
    pub const fn from_size(w: f32, h: f32) -> Self {
        Self::new(0.0, 0.0, w, h)
    }

    #[inline]
    pub fn min(self) -> Vec2 {
        self.origin
    }

    #[inline]
    pub fn max(self) -> Vec2 {
        Vec2::new(self.origin.x + self.size.x, self.origin.y + self.size.y)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size.x <= 0.0 || self.size.y <= 0.0
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.origin.is_finite() && self.size.is_finite()
    }

    /// Normalizes the rectangle so width/height are non-negative.
    #[inline]
    pub fn normalized(self) -> Self {
        let mut x = self.origin.x;
        let mut y = self.origin.y;
        let mut w = self.size.x;
        let mut h = self.size.y;

        if w < 0.0 {
            x += w;
            w = -w;
        }
        if h < 0.0 {
            y += h;
            h = -h;
        }

        Rect::new(x, y, w, h)
    }

    /// Grows the rectangle by `pad` on every side.
    #[inline]
    pub fn padded(self, pad: f32) -> Self {
        let r = self.normalized();
        Rect::new(
            r.origin.x - pad,
            r.origin.y - pad,
            r.size.x + pad * 2.0,
            r.size.y + pad * 2.0,
        )
    }

    /// Maps this rectangle (in texels of an image of `image_w` x `image_h`)
    /// to normalized texture coordinates.
    ///
    /// Returns `None` for zero-sized images.
    #[inline]
    pub fn to_uv(self, image_w: f32, image_h: f32) -> Option<UvRect> {
        if image_w <= 0.0 || image_h <= 0.0 {
            return None;
        }
        let r = self.normalized();
        Some(UvRect {
            left: r.origin.x / image_w,
            top: r.origin.y / image_h,
            right: (r.origin.x + r.size.x) / image_w,
            bottom: (r.origin.y + r.size.y) / image_h,
        })
    }
}

/// Normalized texture-space rectangle (`0..1` on both axes).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UvRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl UvRect {
    /// Full coverage of the source image.
    pub const FULL: UvRect = UvRect { left: 0.0, top: 0.0, right: 1.0, bottom: 1.0 };
}

impl Default for UvRect {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: f32, y: f32, w: f32, h: f32) -> Rect { Rect::new(x, y, w, h) }

    // ── normalized ────────────────────────────────────────────────────────

    #[test]
    fn normalized_negative_extent_flips_origin() {
        let n = r(10.0, 10.0, -4.0, -3.0).normalized();
        assert_eq!(n, r(6.0, 7.0, 4.0, 3.0));
    }

    // ── padded ────────────────────────────────────────────────────────────

    #[test]
    fn padded_grows_every_side() {
        assert_eq!(r(5.0, 5.0, 10.0, 10.0).padded(2.0), r(3.0, 3.0, 14.0, 14.0));
    }

    // ── uv mapping ────────────────────────────────────────────────────────

    #[test]
    fn to_uv_maps_sub_rect() {
        let uv = r(16.0, 8.0, 16.0, 8.0).to_uv(64.0, 32.0).unwrap();
        assert_eq!(uv, UvRect { left: 0.25, top: 0.25, right: 0.5, bottom: 0.5 });
    }

    #[test]
    fn to_uv_rejects_empty_image() {
        assert!(r(0.0, 0.0, 1.0, 1.0).to_uv(0.0, 10.0).is_none());
    }
}
