//! GPU abstraction used by the stage.
//!
//! The stage never talks to wgpu directly; everything it needs from a GPU is
//! expressed by [`GpuBackend`]. Two implementations exist:
//! - [`WgpuBackend`]: real GPU through wgpu
//! - [`SoftBackend`]: CPU rasteriser with the same contract, used by tests and
//!   headless tooling

mod gpu;
mod soft;

pub use gpu::{WgpuBackend, WgpuBackendOptions};
pub use soft::{SoftBackend, SoftLimits, SoftStats};

use crate::filter::{Filter, FilterUniforms};
use crate::scene::PixelData;

use super::error::BackendError;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub(crate) const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle_type!(
    /// Backend texture object.
    TextureHandle
);
handle_type!(
    /// Render attachment wrapping one texture.
    FramebufferHandle
);
handle_type!(
    /// Compiled shader program (pipeline family).
    ProgramHandle
);

/// Monotonic handle source shared by both backends.
#[derive(Debug, Default)]
pub(crate) struct HandleCounter(u64);

impl HandleCounter {
    #[inline]
    pub(crate) fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// Hardware limits relevant to batching.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BackendCaps {
    /// Textures one draw call can sample.
    pub max_texture_units: u32,
    /// Largest width/height of a texture.
    pub max_texture_size: u32,
}

/// Program to compile.
#[derive(Debug, Clone, Copy)]
pub enum ProgramDesc<'a> {
    /// Card batch program sampling `texture_units` slots.
    Batch { texture_units: u32 },
    /// Full-surface pass running `fragment` against the cover header.
    Cover { label: &'a str, fragment: &'a str },
}

/// Blending of a cover draw into the bound target.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CoverBlend {
    /// Overwrite the target.
    Replace,
    /// Premultiplied source-over.
    Over,
}

/// One batch draw call.
///
/// Per-vertex arrays are parallel: 2 floats of position (target pixels),
/// 2 floats of UV, 1 float slot index, 1 float alpha.
#[derive(Debug, Clone, Copy)]
pub struct BatchDraw<'a> {
    pub program: ProgramHandle,
    /// `(scale_x, scale_y, offset_x, offset_y)` mapping target pixels to clip space.
    pub projection: [f32; 4],
    /// Texture per slot; always one entry per slot.
    pub textures: &'a [TextureHandle],
    pub positions: &'a [f32],
    pub uvs: &'a [f32],
    pub indices: &'a [f32],
    pub alphas: &'a [f32],
    pub vertex_count: u32,
}

/// One full-surface draw sampling `source`.
#[derive(Debug, Clone, Copy)]
pub struct CoverDraw<'a> {
    pub program: ProgramHandle,
    pub source: TextureHandle,
    /// Filter pass the program was built from; CPU backends run it directly.
    pub filter: Option<(&'a dyn Filter, usize)>,
    pub uniforms: &'a FilterUniforms,
    pub blend: CoverBlend,
    /// Output multiplier (premultiplied).
    pub alpha: f32,
}

/// Projection for a `width` x `height` target with a top-left origin.
#[inline]
pub fn target_projection(width: u32, height: u32) -> [f32; 4] {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    [2.0 / w, -2.0 / h, -1.0, 1.0]
}

/// GPU operations needed by the stage.
///
/// Calls are strictly ordered: a draw observes every upload, clear and draw
/// issued before it.
pub trait GpuBackend {
    fn caps(&self) -> BackendCaps;

    fn begin_frame(&mut self) -> Result<(), BackendError>;
    fn end_frame(&mut self) -> Result<(), BackendError>;

    /// Called when the visible surface changes size.
    fn resize_surface(&mut self, width: u32, height: u32) {
        let _ = (width, height);
    }

    /// Blank (transparent) texture.
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, BackendError>;
    /// Reallocates storage; contents become transparent.
    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<(), BackendError>;
    fn upload_pixels(&mut self, texture: TextureHandle, pixels: &PixelData) -> Result<(), BackendError>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_framebuffer(&mut self, texture: TextureHandle) -> Result<FramebufferHandle, BackendError>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Directs subsequent draws to `framebuffer`, or to the visible surface for `None`.
    fn bind_target(&mut self, framebuffer: Option<FramebufferHandle>, width: u32, height: u32) -> Result<(), BackendError>;
    /// Fills the bound target with a premultiplied color.
    fn clear(&mut self, color: [f32; 4]) -> Result<(), BackendError>;

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramHandle, BackendError>;
    fn destroy_program(&mut self, program: ProgramHandle);

    fn draw_batch(&mut self, draw: &BatchDraw<'_>) -> Result<(), BackendError>;
    fn draw_cover(&mut self, draw: &CoverDraw<'_>) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_maps_corners_to_clip_space() {
        let p = target_projection(200, 100);
        let clip = |x: f32, y: f32| (x * p[0] + p[2], y * p[1] + p[3]);
        assert_eq!(clip(0.0, 0.0), (-1.0, 1.0));
        assert_eq!(clip(200.0, 100.0), (1.0, -1.0));
    }
}
