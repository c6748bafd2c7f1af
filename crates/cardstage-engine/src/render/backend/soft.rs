//! CPU implementation of [`GpuBackend`].
//!
//! Storage is `f32` premultiplied RGBA. Triangles are rasterised with edge
//! functions at pixel centres using a top-left fill rule, so two triangles
//! sharing an edge never both cover a pixel. Sampling is nearest-texel.

use std::collections::HashMap;

use crate::filter::PixelBuffer;
use crate::render::error::BackendError;
use crate::scene::PixelData;

use super::{
    BackendCaps, BatchDraw, CoverBlend, CoverDraw, FramebufferHandle, GpuBackend, HandleCounter, ProgramDesc,
    ProgramHandle, TextureHandle,
};

/// Limits the software backend enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftLimits {
    pub max_texture_units: u32,
    pub max_texture_size: u32,
    /// Batch programs with more units than this fail to compile.
    pub max_compilable_units: Option<u32>,
    /// Total texture bytes before allocations report out-of-memory.
    pub memory_budget: Option<u64>,
    /// Every framebuffer creation fails.
    pub fail_render_targets: bool,
    /// Batch draws into texture targets fail; screen draws still succeed.
    pub fail_target_draws: bool,
}

impl Default for SoftLimits {
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_texture_size: 4096,
            max_compilable_units: None,
            memory_budget: None,
            fail_render_targets: false,
            fail_target_draws: false,
        }
    }
}

/// Counters of backend calls, cumulative until [`SoftBackend::reset_stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftStats {
    pub frames: u64,
    pub draw_calls: u64,
    pub cover_draws: u64,
    pub vertices: u64,
    pub uploads: u64,
    pub clears: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub programs_compiled: u64,
    pub compile_failures: u64,
    /// Texture-unit count of every batch program compile attempt, in order.
    pub batch_compile_attempts: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SoftProgram {
    Batch { units: u32 },
    Cover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Screen,
    Texture(TextureHandle),
}

/// Software rasteriser with a [`GpuBackend`] contract.
#[derive(Debug)]
pub struct SoftBackend {
    limits: SoftLimits,
    ids: HandleCounter,
    screen: PixelBuffer,
    textures: HashMap<TextureHandle, PixelBuffer>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    programs: HashMap<ProgramHandle, SoftProgram>,
    target: Target,
    memory_used: u64,
    stats: SoftStats,
}

impl SoftBackend {
    /// Backend with a `width` x `height` visible surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, SoftLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: SoftLimits) -> Self {
        Self {
            limits,
            ids: HandleCounter::default(),
            screen: PixelBuffer::new(width.max(1), height.max(1)),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            target: Target::Screen,
            memory_used: 0,
            stats: SoftStats::default(),
        }
    }

    #[inline]
    pub fn limits(&self) -> &SoftLimits {
        &self.limits
    }

    /// Changes limits for subsequent calls.
    #[inline]
    pub fn limits_mut(&mut self) -> &mut SoftLimits {
        &mut self.limits
    }

    #[inline]
    pub fn stats(&self) -> &SoftStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SoftStats::default();
    }

    #[inline]
    pub fn screen(&self) -> &PixelBuffer {
        &self.screen
    }

    /// Visible surface as premultiplied RGBA8.
    pub fn screen_rgba8(&self) -> Vec<u8> {
        to_rgba8(&self.screen)
    }

    pub fn texture_pixels(&self, texture: TextureHandle) -> Option<&PixelBuffer> {
        self.textures.get(&texture)
    }

    #[inline]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    fn check_allocation(&self, width: u32, height: u32, released: u64) -> Result<u64, BackendError> {
        let max = self.limits.max_texture_size;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError::TextureTooLarge { width, height, max });
        }
        let bytes = texture_bytes(width, height);
        if let Some(budget) = self.limits.memory_budget {
            if self.memory_used - released + bytes > budget {
                return Err(BackendError::OutOfMemory);
            }
        }
        Ok(bytes)
    }

    /// Takes the bound target's buffer out of storage for writing.
    fn take_target(&mut self) -> Result<PixelBuffer, BackendError> {
        match self.target {
            Target::Screen => Ok(std::mem::replace(&mut self.screen, PixelBuffer::new(0, 0))),
            Target::Texture(t) => self.textures.remove(&t).ok_or(BackendError::UnknownHandle),
        }
    }

    fn put_target(&mut self, buffer: PixelBuffer) {
        match self.target {
            Target::Screen => self.screen = buffer,
            Target::Texture(t) => {
                self.textures.insert(t, buffer);
            }
        }
    }
}

#[inline]
fn texture_bytes(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * 4
}

fn to_rgba8(buffer: &PixelBuffer) -> Vec<u8> {
    buffer
        .pixels()
        .iter()
        .flat_map(|px| px.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect()
}

#[inline]
fn blend_over(dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    let inv = 1.0 - src[3];
    [
        src[0] + dst[0] * inv,
        src[1] + dst[1] * inv,
        src[2] + dst[2] * inv,
        src[3] + dst[3] * inv,
    ]
}

#[inline]
fn sample_nearest(tex: &PixelBuffer, u: f32, v: f32) -> [f32; 4] {
    let x = (u * tex.width() as f32).floor() as i64;
    let y = (v * tex.height() as f32).floor() as i64;
    tex.get_clamped(x, y)
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Top-left rule for a zero edge value.
#[inline]
fn owns_edge(a: [f32; 2], b: [f32; 2]) -> bool {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    dy > 0.0 || (dy == 0.0 && dx < 0.0)
}

#[derive(Clone, Copy)]
struct Vertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

fn raster_triangle(
    target: &mut PixelBuffer,
    mut v: [Vertex; 3],
    texture: Option<&PixelBuffer>,
    alpha: f32,
) {
    let mut area = edge(v[0].pos, v[1].pos, v[2].pos);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        v.swap(1, 2);
        area = -area;
    }
    let Some(texture) = texture else { return };

    let (tw, th) = (target.width() as f32, target.height() as f32);
    let min_x = v.iter().map(|p| p.pos[0]).fold(f32::INFINITY, f32::min).floor().max(0.0);
    let min_y = v.iter().map(|p| p.pos[1]).fold(f32::INFINITY, f32::min).floor().max(0.0);
    let max_x = v.iter().map(|p| p.pos[0]).fold(f32::NEG_INFINITY, f32::max).ceil().min(tw);
    let max_y = v.iter().map(|p| p.pos[1]).fold(f32::NEG_INFINITY, f32::max).ceil().min(th);
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    let edges = [(1, 2), (2, 0), (0, 1)];
    let owned = edges.map(|(i, j)| owns_edge(v[i].pos, v[j].pos));

    for y in min_y as u32..max_y as u32 {
        for x in min_x as u32..max_x as u32 {
            let p = [x as f32 + 0.5, y as f32 + 0.5];
            let mut w = [0.0f32; 3];
            let mut inside = true;
            for (k, &(i, j)) in edges.iter().enumerate() {
                w[k] = edge(v[i].pos, v[j].pos, p);
                if w[k] < 0.0 || (w[k] == 0.0 && !owned[k]) {
                    inside = false;
                    break;
                }
            }
            if !inside {
                continue;
            }
            let l = w.map(|e| e / area);
            let u = l[0] * v[0].uv[0] + l[1] * v[1].uv[0] + l[2] * v[2].uv[0];
            let t = l[0] * v[0].uv[1] + l[1] * v[1].uv[1] + l[2] * v[2].uv[1];
            let texel = sample_nearest(texture, u, t);
            let src = texel.map(|c| c * alpha);
            if let Some(dst) = target.get(x, y) {
                target.set(x, y, blend_over(dst, src));
            }
        }
    }
}

impl GpuBackend for SoftBackend {
    fn caps(&self) -> BackendCaps {
        BackendCaps {
            max_texture_units: self.limits.max_texture_units,
            max_texture_size: self.limits.max_texture_size,
        }
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.stats.frames += 1;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if (self.screen.width(), self.screen.height()) != (width.max(1), height.max(1)) {
            self.screen = PixelBuffer::new(width.max(1), height.max(1));
        }
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, BackendError> {
        let bytes = self.check_allocation(width, height, 0)?;
        let handle = TextureHandle::from_raw(self.ids.next());
        self.textures.insert(handle, PixelBuffer::new(width, height));
        self.memory_used += bytes;
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<(), BackendError> {
        let Some(current) = self.textures.get(&texture) else {
            return Err(BackendError::UnknownHandle);
        };
        let released = texture_bytes(current.width(), current.height());
        let bytes = self.check_allocation(width, height, released)?;
        self.textures.insert(texture, PixelBuffer::new(width, height));
        self.memory_used = self.memory_used - released + bytes;
        Ok(())
    }

    fn upload_pixels(&mut self, texture: TextureHandle, pixels: &PixelData) -> Result<(), BackendError> {
        let Some(current) = self.textures.get(&texture) else {
            return Err(BackendError::UnknownHandle);
        };
        if (current.width(), current.height()) != (pixels.width(), pixels.height()) {
            self.resize_texture(texture, pixels.width(), pixels.height())?;
        }
        self.textures
            .insert(texture, PixelBuffer::from_rgba8(pixels.width(), pixels.height(), pixels.bytes()));
        self.stats.uploads += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(buf) = self.textures.remove(&texture) {
            self.memory_used -= texture_bytes(buf.width(), buf.height());
            self.stats.textures_destroyed += 1;
        }
        if self.target == Target::Texture(texture) {
            self.target = Target::Screen;
        }
    }

    fn create_framebuffer(&mut self, texture: TextureHandle) -> Result<FramebufferHandle, BackendError> {
        if self.limits.fail_render_targets {
            return Err(BackendError::OutOfMemory);
        }
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::UnknownHandle);
        }
        let handle = FramebufferHandle::from_raw(self.ids.next());
        self.framebuffers.insert(handle, texture);
        Ok(handle)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
    }

    fn bind_target(&mut self, framebuffer: Option<FramebufferHandle>, _width: u32, _height: u32) -> Result<(), BackendError> {
        self.target = match framebuffer {
            None => Target::Screen,
            Some(fb) => Target::Texture(*self.framebuffers.get(&fb).ok_or(BackendError::UnknownHandle)?),
        };
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> Result<(), BackendError> {
        let mut target = self.take_target()?;
        target.fill(color);
        self.put_target(target);
        self.stats.clears += 1;
        Ok(())
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramHandle, BackendError> {
        let program = match *desc {
            ProgramDesc::Batch { texture_units } => {
                self.stats.batch_compile_attempts.push(texture_units);
                let hw = self.limits.max_texture_units;
                let compilable = self.limits.max_compilable_units.unwrap_or(hw).min(hw);
                if texture_units == 0 || texture_units > compilable {
                    self.stats.compile_failures += 1;
                    return Err(BackendError::ShaderCompile(format!(
                        "batch program with {texture_units} samplers exceeds the supported {compilable}"
                    )));
                }
                SoftProgram::Batch { units: texture_units }
            }
            ProgramDesc::Cover { .. } => SoftProgram::Cover,
        };
        let handle = ProgramHandle::from_raw(self.ids.next());
        self.programs.insert(handle, program);
        self.stats.programs_compiled += 1;
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn draw_batch(&mut self, draw: &BatchDraw<'_>) -> Result<(), BackendError> {
        let Some(&SoftProgram::Batch { units }) = self.programs.get(&draw.program) else {
            return Err(BackendError::UnknownHandle);
        };
        if self.limits.fail_target_draws && matches!(self.target, Target::Texture(_)) {
            return Err(BackendError::OutOfMemory);
        }
        let count = (draw.vertex_count as usize)
            .min(draw.positions.len() / 2)
            .min(draw.uvs.len() / 2)
            .min(draw.indices.len())
            .min(draw.alphas.len());

        let mut target = self.take_target()?;
        // Positions arrive in target pixels; the projection only matters on real GPUs.
        for tri in 0..count / 3 {
            let base = tri * 3;
            let vert = |i: usize| Vertex {
                pos: [draw.positions[i * 2], draw.positions[i * 2 + 1]],
                uv: [draw.uvs[i * 2], draw.uvs[i * 2 + 1]],
            };
            let slot = draw.indices[base].max(0.0) as usize;
            let texture = (slot < units as usize)
                .then(|| draw.textures.get(slot))
                .flatten()
                .and_then(|h| self.textures.get(h));
            raster_triangle(
                &mut target,
                [vert(base), vert(base + 1), vert(base + 2)],
                texture,
                draw.alphas[base],
            );
        }
        self.put_target(target);

        self.stats.draw_calls += 1;
        self.stats.vertices += count as u64;
        Ok(())
    }

    fn draw_cover(&mut self, draw: &CoverDraw<'_>) -> Result<(), BackendError> {
        if self.programs.get(&draw.program) != Some(&SoftProgram::Cover) {
            return Err(BackendError::UnknownHandle);
        }
        let mut source = self
            .textures
            .get(&draw.source)
            .cloned()
            .ok_or(BackendError::UnknownHandle)?;
        if let Some((filter, pass)) = draw.filter {
            filter.apply_cpu(pass, &mut source);
        }

        let mut target = self.take_target()?;
        let (tw, th) = (target.width(), target.height());
        for y in 0..th {
            for x in 0..tw {
                let u = (x as f32 + 0.5) / tw as f32;
                let v = (y as f32 + 0.5) / th as f32;
                let src = sample_nearest(&source, u, v).map(|c| c * draw.alpha);
                let out = match draw.blend {
                    CoverBlend::Replace => src,
                    CoverBlend::Over => match target.get(x, y) {
                        Some(dst) => blend_over(dst, src),
                        None => src,
                    },
                };
                target.set(x, y, out);
            }
        }
        self.put_target(target);
        self.stats.cover_draws += 1;
        Ok(())
    }
}
