//! Image filters applied through render-target passes.
//!
//! Each filter contributes one WGSL fragment per pass. The fragment is spliced
//! into a fixed cover-pass header (see `render::shaders`) which provides:
//!
//! ```text
//! fn sample_src(uv: vec2<f32>) -> vec4<f32>   // premultiplied source texel
//! fn texel_size() -> vec2<f32>                // 1 / source size
//! var<uniform> params: FilterParams           // bytes from `Filter::uniforms`
//! ```
//!
//! and must define `struct FilterParams` and
//! `fn filter_main(uv: vec2<f32>) -> vec4<f32>` returning premultiplied color.
//!
//! `apply_cpu` is the reference implementation used by the software backend.

mod blur;
mod color;
mod color_matrix;

use std::borrow::Cow;
use std::fmt;

pub use blur::{BoxBlurFilter, MAX_BLUR_RADIUS};
pub use color::ColorFilter;
pub use color_matrix::ColorMatrixFilter;

/// Upper bound of one pass's uniform block.
pub const MAX_UNIFORM_BYTES: usize = 256;

/// A multi-pass image filter.
pub trait Filter: fmt::Debug + Send + Sync {
    /// Stable name; together with the pass index it keys the compiled program.
    fn name(&self) -> &'static str;

    fn pass_count(&self) -> usize {
        1
    }

    /// WGSL defining `FilterParams` and `filter_main` for `pass`.
    fn fragment_source(&self, pass: usize) -> Cow<'static, str>;

    /// Parameter block for `pass` when the source is `width` x `height`.
    fn uniforms(&self, pass: usize, width: u32, height: u32) -> FilterUniforms;

    /// CPU equivalent of `pass`, in place.
    fn apply_cpu(&self, pass: usize, pixels: &mut PixelBuffer);

    /// How far the output can extend beyond the input bounds, in pixels.
    fn padding(&self) -> f32 {
        0.0
    }
}

// ── uniforms ──────────────────────────────────────────────────────────────

/// Fixed-capacity parameter block handed to the backend for one pass.
#[derive(Clone, PartialEq, Eq)]
pub struct FilterUniforms {
    bytes: [u8; MAX_UNIFORM_BYTES],
    len: usize,
}

impl FilterUniforms {
    /// Empty block (for programs whose `FilterParams` is unused).
    pub const fn empty() -> Self {
        Self { bytes: [0; MAX_UNIFORM_BYTES], len: 0 }
    }

    /// Copies a `Pod` value. Values larger than [`MAX_UNIFORM_BYTES`] are rejected
    /// at compile time by the filters through a const assertion; oversized input
    /// here is truncated and logged.
    pub fn from_pod<T: bytemuck::Pod>(value: &T) -> Self {
        let src = bytemuck::bytes_of(value);
        if src.len() > MAX_UNIFORM_BYTES {
            log::error!(
                "filter uniform block of {} bytes exceeds {MAX_UNIFORM_BYTES}; truncated",
                src.len()
            );
        }
        let len = src.len().min(MAX_UNIFORM_BYTES);
        let mut bytes = [0; MAX_UNIFORM_BYTES];
        bytes[..len].copy_from_slice(&src[..len]);
        Self { bytes, len }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Zero-padded block of the full capacity; what gets bound on the GPU.
    #[inline]
    pub fn padded(&self) -> &[u8; MAX_UNIFORM_BYTES] {
        &self.bytes
    }
}

impl Default for FilterUniforms {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for FilterUniforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterUniforms").field("len", &self.len).finish()
    }
}

// ── pixel buffer ──────────────────────────────────────────────────────────

/// Premultiplied RGBA in `f32`, row-major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<[f32; 4]>,
}

impl PixelBuffer {
    /// Transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    /// Converts premultiplied RGBA8 bytes. Missing bytes read as transparent.
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> Self {
        let mut buf = Self::new(width, height);
        for (dst, src) in buf.data.iter_mut().zip(bytes.chunks_exact(4)) {
            *dst = [src[0], src[1], src[2], src[3]].map(|c| c as f32 / 255.0);
        }
        buf
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.data
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[(y * self.width + x) as usize])
    }

    /// Texel with clamp-to-edge addressing.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> [f32; 4] {
        if self.data.is_empty() {
            return [0.0; 4];
        }
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, px: [f32; 4]) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize] = px;
        }
    }

    pub fn fill(&mut self, px: [f32; 4]) {
        self.data.fill(px);
    }
}

/// Straight-alpha view of a premultiplied texel.
#[inline]
pub(crate) fn unpremultiply(px: [f32; 4]) -> [f32; 4] {
    let a = px[3];
    if a <= 0.0 {
        return [0.0; 4];
    }
    [px[0] / a, px[1] / a, px[2] / a, a]
}

/// Clamps to `0..=1` and premultiplies.
#[inline]
pub(crate) fn premultiply(c: [f32; 4]) -> [f32; 4] {
    let [r, g, b, a] = c.map(|v| v.clamp(0.0, 1.0));
    [r * a, g * a, b * a, a]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_keep_byte_length() {
        let u = FilterUniforms::from_pod(&[1.0f32, 2.0, 3.0]);
        assert_eq!(u.as_bytes().len(), 12);
        assert_eq!(u.padded().len(), MAX_UNIFORM_BYTES);
        assert!(FilterUniforms::empty().as_bytes().is_empty());
    }

    #[test]
    fn clamped_reads_replicate_edges() {
        let mut b = PixelBuffer::new(2, 1);
        b.set(0, 0, [1.0; 4]);
        assert_eq!(b.get_clamped(-5, 0), [1.0; 4]);
        assert_eq!(b.get_clamped(9, 3), [0.0; 4]);
        assert_eq!(b.get(2, 0), None);
    }

    #[test]
    fn premultiply_round_trip() {
        let p = premultiply([1.0, 0.5, 0.0, 0.5]);
        assert_eq!(p, [0.5, 0.25, 0.0, 0.5]);
        assert_eq!(unpremultiply(p), [1.0, 0.5, 0.0, 0.5]);
        assert_eq!(unpremultiply([0.2, 0.2, 0.2, 0.0]), [0.0; 4]);
    }
}
