use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};

use super::{premultiply, unpremultiply, Filter, FilterUniforms, PixelBuffer, MAX_UNIFORM_BYTES};

const FRAGMENT: &str = r#"
struct FilterParams {
    multiplier: vec4<f32>,
    offset: vec4<f32>,
}

fn filter_main(uv: vec2<f32>) -> vec4<f32> {
    let src = sample_src(uv);
    var c = vec4<f32>(0.0);
    if (src.a > 0.0) {
        c = vec4<f32>(src.rgb / src.a, src.a);
    }
    let out = clamp(c * params.multiplier + params.offset, vec4<f32>(0.0), vec4<f32>(1.0));
    return vec4<f32>(out.rgb * out.a, out.a);
}
"#;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct Params {
    multiplier: [f32; 4],
    offset: [f32; 4],
}

const _: () = assert!(size_of::<Params>() <= MAX_UNIFORM_BYTES);

/// Per-channel multiply then add. Offsets are in `0..=255`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFilter {
    pub red_multiplier: f32,
    pub green_multiplier: f32,
    pub blue_multiplier: f32,
    pub alpha_multiplier: f32,
    pub red_offset: f32,
    pub green_offset: f32,
    pub blue_offset: f32,
    pub alpha_offset: f32,
}

impl Default for ColorFilter {
    fn default() -> Self {
        Self::multiply(1.0, 1.0, 1.0, 1.0)
    }
}

impl ColorFilter {
    pub fn multiply(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            red_multiplier: r,
            green_multiplier: g,
            blue_multiplier: b,
            alpha_multiplier: a,
            red_offset: 0.0,
            green_offset: 0.0,
            blue_offset: 0.0,
            alpha_offset: 0.0,
        }
    }

    pub fn with_offsets(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.red_offset = r;
        self.green_offset = g;
        self.blue_offset = b;
        self.alpha_offset = a;
        self
    }

    fn multipliers(&self) -> [f32; 4] {
        [self.red_multiplier, self.green_multiplier, self.blue_multiplier, self.alpha_multiplier]
    }

    fn offsets(&self) -> [f32; 4] {
        [self.red_offset, self.green_offset, self.blue_offset, self.alpha_offset].map(|o| o / 255.0)
    }
}

impl Filter for ColorFilter {
    fn name(&self) -> &'static str {
        "color"
    }

    fn fragment_source(&self, _pass: usize) -> Cow<'static, str> {
        Cow::Borrowed(FRAGMENT)
    }

    fn uniforms(&self, _pass: usize, _width: u32, _height: u32) -> FilterUniforms {
        FilterUniforms::from_pod(&Params {
            multiplier: self.multipliers(),
            offset: self.offsets(),
        })
    }

    fn apply_cpu(&self, _pass: usize, pixels: &mut PixelBuffer) {
        let mul = self.multipliers();
        let off = self.offsets();
        for px in pixels.pixels_mut() {
            let c = unpremultiply(*px);
            *px = premultiply([0, 1, 2, 3].map(|i| c[i] * mul[i] + off[i]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tints_straight_color() {
        let mut buf = PixelBuffer::new(1, 1);
        buf.set(0, 0, [1.0, 1.0, 1.0, 1.0]);
        ColorFilter::multiply(1.0, 0.5, 0.0, 1.0).apply_cpu(0, &mut buf);
        assert_eq!(buf.pixels()[0], [1.0, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn alpha_multiplier_keeps_premultiplication() {
        let mut buf = PixelBuffer::new(1, 1);
        buf.set(0, 0, [1.0, 0.0, 0.0, 1.0]);
        ColorFilter::multiply(1.0, 1.0, 1.0, 0.5).apply_cpu(0, &mut buf);
        assert_eq!(buf.pixels()[0], [0.5, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn offsets_are_scaled() {
        let mut buf = PixelBuffer::new(1, 1);
        buf.set(0, 0, [0.0, 0.0, 0.0, 1.0]);
        ColorFilter::multiply(1.0, 1.0, 1.0, 1.0)
            .with_offsets(255.0, 0.0, 0.0, 0.0)
            .apply_cpu(0, &mut buf);
        assert_eq!(buf.pixels()[0], [1.0, 0.0, 0.0, 1.0]);
    }
}
