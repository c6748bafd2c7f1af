use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};

use super::{Filter, FilterUniforms, PixelBuffer, MAX_UNIFORM_BYTES};

const FRAGMENT: &str = r#"
struct FilterParams {
    dir: vec2<f32>,
    radius: f32,
    _pad: f32,
}

fn filter_main(uv: vec2<f32>) -> vec4<f32> {
    let r = i32(params.radius);
    let stride = params.dir * texel_size();
    var sum = vec4<f32>(0.0);
    for (var i = -r; i <= r; i = i + 1) {
        sum = sum + sample_src(uv + stride * f32(i));
    }
    return sum / f32(2 * r + 1);
}
"#;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct Params {
    dir: [f32; 2],
    radius: f32,
    _pad: f32,
}

const _: () = assert!(size_of::<Params>() <= MAX_UNIFORM_BYTES);

const MAX_QUALITY: u32 = 3;

/// Largest radius in texels of a single pass.
pub const MAX_BLUR_RADIUS: usize = 512;

/// Separable box blur.
///
/// Each quality iteration is one horizontal and one vertical pass, so the
/// filter runs `2 * quality` passes. Edges are clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxBlurFilter {
    pub blur_x: f32,
    pub blur_y: f32,
    pub quality: u32,
}

impl BoxBlurFilter {
    pub fn new(blur_x: f32, blur_y: f32, quality: u32) -> Self {
        Self { blur_x, blur_y, quality }
    }

    #[inline]
    fn iterations(&self) -> u32 {
        self.quality.clamp(1, MAX_QUALITY)
    }

    #[inline]
    fn radius(v: f32) -> usize {
        if v.is_finite() { v.max(0.0).round().min(MAX_BLUR_RADIUS as f32) as usize } else { 0 }
    }

    /// `(horizontal, radius)` for `pass`.
    fn pass_axis(&self, pass: usize) -> (bool, usize) {
        if pass % 2 == 0 {
            (true, Self::radius(self.blur_x))
        } else {
            (false, Self::radius(self.blur_y))
        }
    }
}

impl Filter for BoxBlurFilter {
    fn name(&self) -> &'static str {
        "box_blur"
    }

    fn pass_count(&self) -> usize {
        self.iterations() as usize * 2
    }

    fn fragment_source(&self, _pass: usize) -> Cow<'static, str> {
        Cow::Borrowed(FRAGMENT)
    }

    fn uniforms(&self, pass: usize, _width: u32, _height: u32) -> FilterUniforms {
        let (horizontal, radius) = self.pass_axis(pass);
        FilterUniforms::from_pod(&Params {
            dir: if horizontal { [1.0, 0.0] } else { [0.0, 1.0] },
            radius: radius as f32,
            _pad: 0.0,
        })
    }

    fn apply_cpu(&self, pass: usize, pixels: &mut PixelBuffer) {
        let (horizontal, radius) = self.pass_axis(pass);
        if radius == 0 {
            return;
        }
        let (w, h) = (pixels.width() as usize, pixels.height() as usize);
        let mut line = Vec::new();
        let mut ring = BoxWindow::new(radius);

        if horizontal {
            for y in 0..h {
                line.clear();
                line.extend_from_slice(&pixels.pixels()[y * w..(y + 1) * w]);
                ring.blur_line(&line, &mut pixels.pixels_mut()[y * w..(y + 1) * w]);
            }
        } else {
            let mut out = vec![[0.0; 4]; h];
            for x in 0..w {
                line.clear();
                line.extend((0..h).map(|y| pixels.pixels()[y * w + x]));
                ring.blur_line(&line, &mut out);
                for (y, px) in out.iter().enumerate() {
                    pixels.pixels_mut()[y * w + x] = *px;
                }
            }
        }
    }

    fn padding(&self) -> f32 {
        let r = Self::radius(self.blur_x).max(Self::radius(self.blur_y));
        (r * self.iterations() as usize) as f32
    }
}

/// Sliding box window over one line, backed by a fixed ring buffer.
struct BoxWindow {
    radius: usize,
    ring: Vec<[f32; 4]>,
}

impl BoxWindow {
    fn new(radius: usize) -> Self {
        Self { radius, ring: vec![[0.0; 4]; 2 * radius + 1] }
    }

    fn blur_line(&mut self, src: &[[f32; 4]], dst: &mut [[f32; 4]]) {
        let len = src.len();
        if len == 0 {
            return;
        }
        let r = self.radius as i64;
        let n = self.ring.len();
        let at = |i: i64| src[i.clamp(0, len as i64 - 1) as usize];

        // Prime with positions -r..=r; `head` points at the oldest entry.
        let mut sum = [0.0f32; 4];
        for (k, slot) in self.ring.iter_mut().enumerate() {
            let px = at(k as i64 - r);
            *slot = px;
            for c in 0..4 {
                sum[c] += px[c];
            }
        }
        let mut head = 0;
        let inv = 1.0 / n as f32;

        for (x, out) in dst.iter_mut().enumerate().take(len) {
            *out = sum.map(|s| s * inv);

            let incoming = at(x as i64 + r + 1);
            let outgoing = self.ring[head];
            for c in 0..4 {
                sum[c] += incoming[c] - outgoing[c];
            }
            self.ring[head] = incoming;
            head = (head + 1) % n;
        }
    }
}
