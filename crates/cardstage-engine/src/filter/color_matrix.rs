use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};

use super::{premultiply, unpremultiply, Filter, FilterUniforms, PixelBuffer, MAX_UNIFORM_BYTES};

const FRAGMENT: &str = r#"
struct FilterParams {
    r: vec4<f32>,
    g: vec4<f32>,
    b: vec4<f32>,
    a: vec4<f32>,
    offset: vec4<f32>,
}

fn filter_main(uv: vec2<f32>) -> vec4<f32> {
    let src = sample_src(uv);
    var c = vec4<f32>(0.0);
    if (src.a > 0.0) {
        c = vec4<f32>(src.rgb / src.a, src.a);
    }
    let out = clamp(
        vec4<f32>(dot(c, params.r), dot(c, params.g), dot(c, params.b), dot(c, params.a)) + params.offset,
        vec4<f32>(0.0),
        vec4<f32>(1.0),
    );
    return vec4<f32>(out.rgb * out.a, out.a);
}
"#;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct Params {
    r: [f32; 4],
    g: [f32; 4],
    b: [f32; 4],
    a: [f32; 4],
    offset: [f32; 4],
}

const _: () = assert!(size_of::<Params>() <= MAX_UNIFORM_BYTES);

/// 4x5 color matrix, row-major.
///
/// Row `i` computes channel `i` (r, g, b, a) from the straight-alpha source
/// channels in `0..=1`; the fifth column is an offset in `0..=255`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMatrixFilter {
    pub matrix: [f32; 20],
}

impl Default for ColorMatrixFilter {
    fn default() -> Self {
        Self::identity()
    }
}

impl ColorMatrixFilter {
    #[rustfmt::skip]
    pub const IDENTITY: [f32; 20] = [
        1.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 1.0, 0.0,
    ];

    pub fn new(matrix: [f32; 20]) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::new(Self::IDENTITY)
    }

    /// Adds `value` (`-255..=255`) to r, g and b.
    pub fn brightness(value: f32) -> Self {
        let v = value.clamp(-255.0, 255.0);
        let mut m = Self::IDENTITY;
        m[4] = v;
        m[9] = v;
        m[14] = v;
        Self::new(m)
    }

    /// Saturation change in `-100..=100` (`-100` is grayscale).
    #[rustfmt::skip]
    pub fn saturation(value: f32) -> Self {
        let v = value.clamp(-100.0, 100.0);
        let x = 1.0 + if v > 0.0 { 3.0 * v / 100.0 } else { v / 100.0 };
        let (lr, lg, lb) = (0.3086, 0.6094, 0.0820);
        Self::new([
            lr * (1.0 - x) + x, lg * (1.0 - x),     lb * (1.0 - x),     0.0, 0.0,
            lr * (1.0 - x),     lg * (1.0 - x) + x, lb * (1.0 - x),     0.0, 0.0,
            lr * (1.0 - x),     lg * (1.0 - x),     lb * (1.0 - x) + x, 0.0, 0.0,
            0.0,                0.0,                0.0,                1.0, 0.0,
        ])
    }

    /// Inverts r, g and b.
    #[rustfmt::skip]
    pub fn invert() -> Self {
        Self::new([
            -1.0, 0.0, 0.0, 0.0, 255.0,
            0.0, -1.0, 0.0, 0.0, 255.0,
            0.0, 0.0, -1.0, 0.0, 255.0,
            0.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    fn row(&self, i: usize) -> [f32; 4] {
        let m = &self.matrix;
        [m[i * 5], m[i * 5 + 1], m[i * 5 + 2], m[i * 5 + 3]]
    }

    fn offsets(&self) -> [f32; 4] {
        let m = &self.matrix;
        [m[4], m[9], m[14], m[19]].map(|o| o / 255.0)
    }

    /// Applies the matrix to one straight-alpha color.
    fn transform(&self, c: [f32; 4]) -> [f32; 4] {
        let off = self.offsets();
        let mut out = [0.0; 4];
        for (i, o) in out.iter_mut().enumerate() {
            let row = self.row(i);
            *o = row[0] * c[0] + row[1] * c[1] + row[2] * c[2] + row[3] * c[3] + off[i];
        }
        out
    }
}

impl Filter for ColorMatrixFilter {
    fn name(&self) -> &'static str {
        "color_matrix"
    }

    fn fragment_source(&self, _pass: usize) -> Cow<'static, str> {
        Cow::Borrowed(FRAGMENT)
    }

    fn uniforms(&self, _pass: usize, _width: u32, _height: u32) -> FilterUniforms {
        FilterUniforms::from_pod(&Params {
            r: self.row(0),
            g: self.row(1),
            b: self.row(2),
            a: self.row(3),
            offset: self.offsets(),
        })
    }

    fn apply_cpu(&self, _pass: usize, pixels: &mut PixelBuffer) {
        for px in pixels.pixels_mut() {
            *px = premultiply(self.transform(unpremultiply(*px)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn identity_leaves_pixels_unchanged() {
        let mut buf = PixelBuffer::new(1, 1);
        buf.set(0, 0, [0.25, 0.1, 0.0, 0.5]);
        ColorMatrixFilter::identity().apply_cpu(0, &mut buf);
        assert!(approx(buf.pixels()[0], [0.25, 0.1, 0.0, 0.5]));
    }

    #[test]
    fn invert_flips_straight_color() {
        let mut buf = PixelBuffer::new(1, 1);
        buf.set(0, 0, [0.5, 0.0, 0.25, 0.5]); // straight (1, 0, 0.5, 0.5)
        ColorMatrixFilter::invert().apply_cpu(0, &mut buf);
        assert!(approx(buf.pixels()[0], [0.0, 0.5, 0.25, 0.5]));
    }

    #[test]
    fn full_desaturation_is_gray() {
        let f = ColorMatrixFilter::saturation(-100.0);
        let out = f.transform([1.0, 0.0, 0.0, 1.0]);
        assert!((out[0] - out[1]).abs() < 1e-6 && (out[1] - out[2]).abs() < 1e-6);
    }

    #[test]
    fn uniforms_hold_rows_and_scaled_offsets() {
        let u = ColorMatrixFilter::brightness(255.0).uniforms(0, 4, 4);
        let floats: Vec<f32> = u
            .as_bytes()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats.len(), 20);
        assert_eq!(&floats[16..], &[1.0, 1.0, 1.0, 0.0]);
    }
}
