use super::Vec2;

const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;

/// 2D affine transform.
///
/// Maps a point as:
///
/// ```text
/// x' = a * x + c * y + tx
/// y' = b * x + d * y + ty
/// ```
///
/// `append` concatenates a child transform onto a parent (`self * m`), which is
/// how the compositor accumulates transforms while descending the scene tree.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Matrix2D {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Matrix2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix2D {
    pub const IDENTITY: Matrix2D = Matrix2D { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    #[inline]
    pub const fn new(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    #[inline]
    pub const fn translation(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    #[inline]
    pub const fn scaling(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.a.is_finite()
            && self.b.is_finite()
            && self.c.is_finite()
            && self.d.is_finite()
            && self.tx.is_finite()
            && self.ty.is_finite()
    }

    /// Post-multiplies `m` onto this matrix (`self = self * m`).
    ///
    /// The result first applies `m`, then the previous `self`.
    pub fn append(&mut self, m: &Matrix2D) -> &mut Self {
        let (a1, b1, c1, d1) = (self.a, self.b, self.c, self.d);
        if m.a != 1.0 || m.b != 0.0 || m.c != 0.0 || m.d != 1.0 {
            self.a = a1 * m.a + c1 * m.b;
            self.b = b1 * m.a + d1 * m.b;
            self.c = a1 * m.c + c1 * m.d;
            self.d = b1 * m.c + d1 * m.d;
        }
        self.tx += a1 * m.tx + c1 * m.ty;
        self.ty += b1 * m.tx + d1 * m.ty;
        self
    }

    /// Pre-multiplies `m` onto this matrix (`self = m * self`).
    pub fn prepend(&mut self, m: &Matrix2D) -> &mut Self {
        let (a1, c1, tx1) = (self.a, self.c, self.tx);
        self.a = m.a * a1 + m.c * self.b;
        self.b = m.b * a1 + m.d * self.b;
        self.c = m.a * c1 + m.c * self.d;
        self.d = m.b * c1 + m.d * self.d;
        self.tx = m.a * tx1 + m.c * self.ty + m.tx;
        self.ty = m.b * tx1 + m.d * self.ty + m.ty;
        self
    }

    /// Appends a display-object style transform.
    ///
    /// Rotation and skew are in degrees. The registration point is subtracted
    /// after scaling/rotation so the node pivots around `(reg_x, reg_y)`.
    #[allow(clippy::too_many_arguments)]
    pub fn append_transform(
        &mut self,
        x: f32,
        y: f32,
        scale_x: f32,
        scale_y: f32,
        rotation: f32,
        skew_x: f32,
        skew_y: f32,
        reg_x: f32,
        reg_y: f32,
    ) -> &mut Self {
        let (cos, sin) = if rotation % 360.0 != 0.0 {
            let r = rotation * DEG_TO_RAD;
            (r.cos(), r.sin())
        } else {
            (1.0, 0.0)
        };

        if skew_x != 0.0 || skew_y != 0.0 {
            let sx = skew_x * DEG_TO_RAD;
            let sy = skew_y * DEG_TO_RAD;
            self.append(&Matrix2D::new(sy.cos(), sy.sin(), -sx.sin(), sx.cos(), x, y));
            self.append(&Matrix2D::new(
                cos * scale_x,
                sin * scale_x,
                -sin * scale_y,
                cos * scale_y,
                0.0,
                0.0,
            ));
        } else {
            self.append(&Matrix2D::new(
                cos * scale_x,
                sin * scale_x,
                -sin * scale_y,
                cos * scale_y,
                x,
                y,
            ));
        }

        if reg_x != 0.0 || reg_y != 0.0 {
            self.tx -= reg_x * self.a + reg_y * self.c;
            self.ty -= reg_x * self.b + reg_y * self.d;
        }
        self
    }

    /// Scales the local axes (applied before the existing transform).
    #[inline]
    pub fn scale(&mut self, sx: f32, sy: f32) -> &mut Self {
        self.a *= sx;
        self.b *= sx;
        self.c *= sy;
        self.d *= sy;
        self
    }

    /// Translates in local space (applied before the existing transform).
    #[inline]
    pub fn translate(&mut self, x: f32, y: f32) -> &mut Self {
        self.tx += self.a * x + self.c * y;
        self.ty += self.b * x + self.d * y;
        self
    }

    /// Returns the inverse, or `None` when the matrix is singular.
    pub fn inverted(&self) -> Option<Matrix2D> {
        let n = self.a * self.d - self.b * self.c;
        if n == 0.0 || !n.is_finite() {
            return None;
        }
        Some(Matrix2D {
            a: self.d / n,
            b: -self.b / n,
            c: -self.c / n,
            d: self.a / n,
            tx: (self.c * self.ty - self.d * self.tx) / n,
            ty: -(self.a * self.ty - self.b * self.tx) / n,
        })
    }

    #[inline]
    pub fn transform_point(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            p.x * self.a + p.y * self.c + self.tx,
            p.x * self.b + p.y * self.d + self.ty,
        )
    }
}
