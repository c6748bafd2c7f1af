//! wgpu implementation of [`GpuBackend`].
//!
//! All draws go into one command encoder that is submitted at `end_frame`.
//! `queue.write_*` calls are staged ahead of the next submission, so the
//! backend submits early whenever a staged write could otherwise be observed
//! by a draw recorded before it:
//! - before replacing texture contents that pending draws may sample
//! - when the vertex streams or the uniform ring wrap

use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;

use crate::filter::MAX_UNIFORM_BYTES;
use crate::render::config::{MAX_CARDS_PER_BATCH, VERTICES_PER_CARD};
use crate::render::error::BackendError;
use crate::render::shaders::{
    batch_program_source, cover_program_source, validate_wgsl, BATCH_FIRST_TEXTURE_BINDING, COVER_GLOBALS_SIZE,
};
use crate::scene::PixelData;

use super::{
    BackendCaps, BatchDraw, CoverBlend, CoverDraw, FramebufferHandle, GpuBackend, HandleCounter, ProgramDesc,
    ProgramHandle, TextureHandle,
};

/// Format of every texture the backend allocates.
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const STREAM_VERTICES: u64 = (MAX_CARDS_PER_BATCH * VERTICES_PER_CARD) as u64;
const UNIFORM_RING_SLOTS: u64 = 2048;

/// Construction options for [`WgpuBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgpuBackendOptions {
    /// Linear sampling; nearest otherwise.
    pub linear_filtering: bool,
    /// Caps the texture units reported by `caps`, below the device limit.
    pub max_texture_units: Option<u32>,
    /// Bytes of texture storage before allocations report out-of-memory.
    pub memory_budget: Option<u64>,
}

// ── helpers ───────────────────────────────────────────────────────────────

fn premul_alpha_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

#[inline]
fn texture_bytes(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * 4
}

const POSITION_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
const UV_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];
const INDEX_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32];
const ALPHA_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Float32];

/// Floats per vertex of each stream: position, uv, index, alpha.
const STREAM_COMPONENTS: [u64; 4] = [2, 2, 1, 1];

fn stream_layouts() -> [wgpu::VertexBufferLayout<'static>; 4] {
    let layout = |components: u64, attributes: &'static [wgpu::VertexAttribute]| wgpu::VertexBufferLayout {
        array_stride: components * 4,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    };
    [
        layout(2, &POSITION_ATTRS),
        layout(2, &UV_ATTRS),
        layout(1, &INDEX_ATTRS),
        layout(1, &ALPHA_ATTRS),
    ]
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CoverGlobals {
    texel: [f32; 2],
    alpha: f32,
    _pad: f32,
}

const _: () = assert!(size_of::<CoverGlobals>() as u64 == COVER_GLOBALS_SIZE);

// ── resources ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

#[derive(Debug)]
enum Program {
    Batch {
        units: u32,
        module: wgpu::ShaderModule,
        layout: wgpu::BindGroupLayout,
        pipeline_layout: wgpu::PipelineLayout,
    },
    Cover {
        module: wgpu::ShaderModule,
    },
}

#[derive(Debug)]
struct CoverLayouts {
    source: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    /// Group 1 never changes: the ring buffer with a dynamic offset.
    params_group: wgpu::BindGroup,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct PipelineKey {
    program: ProgramHandle,
    format: wgpu::TextureFormat,
    blend: CoverBlend,
}

#[derive(Debug)]
struct SurfaceTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Target {
    Screen,
    Texture(TextureHandle),
}

/// Fixed uniform buffer handed out in aligned slots, bound with dynamic offsets.
#[derive(Debug)]
struct UniformRing {
    buffer: wgpu::Buffer,
    stride: u64,
    cursor: u64,
}

impl UniformRing {
    fn new(device: &wgpu::Device) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = (MAX_UNIFORM_BYTES as u64).max(align).next_multiple_of(align.max(1));
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cardstage uniform ring"),
            size: stride * UNIFORM_RING_SLOTS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, stride, cursor: 0 }
    }

    /// Writes `bytes` into the next slot; `None` when the ring is exhausted.
    fn push(&mut self, queue: &wgpu::Queue, bytes: &[u8]) -> Option<u32> {
        if self.cursor >= UNIFORM_RING_SLOTS {
            return None;
        }
        let offset = self.cursor * self.stride;
        queue.write_buffer(&self.buffer, offset, bytes);
        self.cursor += 1;
        Some(offset as u32)
    }

    fn binding(&self, size: u64) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(size),
        })
    }
}

/// Batched draws through wgpu.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    options: WgpuBackendOptions,
    ids: HandleCounter,

    surface: Option<SurfaceTarget>,
    target: Target,
    encoder: Option<wgpu::CommandEncoder>,

    textures: HashMap<TextureHandle, GpuImage>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    programs: HashMap<ProgramHandle, Program>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    batch_groups: HashMap<ProgramHandle, HashMap<Vec<TextureHandle>, wgpu::BindGroup>>,
    source_groups: HashMap<TextureHandle, wgpu::BindGroup>,
    cover_layouts: Option<CoverLayouts>,

    sampler: wgpu::Sampler,
    streams: [wgpu::Buffer; 4],
    stream_cursor: u64,
    uniforms: UniformRing,
    memory_used: u64,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, options: WgpuBackendOptions) -> Self {
        let filter = if options.linear_filtering { wgpu::FilterMode::Linear } else { wgpu::FilterMode::Nearest };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("cardstage sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let streams = STREAM_COMPONENTS.map(|components| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("cardstage vertex stream"),
                size: STREAM_VERTICES * components * 4,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let uniforms = UniformRing::new(&device);

        Self {
            device,
            queue,
            options,
            ids: HandleCounter::default(),
            surface: None,
            target: Target::Screen,
            encoder: None,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            batch_groups: HashMap::new(),
            source_groups: HashMap::new(),
            cover_layouts: None,
            sampler,
            streams,
            stream_cursor: 0,
            uniforms,
            memory_used: 0,
        }
    }

    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Sets the view the screen target renders into for the coming frame.
    pub fn set_surface(&mut self, view: wgpu::TextureView, format: wgpu::TextureFormat) {
        self.surface = Some(SurfaceTarget { view, format });
    }

    /// Drops the screen view (after the frame was submitted).
    pub fn clear_surface(&mut self) {
        self.surface = None;
    }

    #[inline]
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    /// Submits recorded work and rewinds the per-submission buffers.
    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.stream_cursor = 0;
        self.uniforms.cursor = 0;
    }

    fn ensure_encoder(&mut self) {
        if self.encoder.is_none() {
            self.encoder = Some(self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("cardstage encoder"),
            }));
        }
    }

    fn push_uniform(&mut self, bytes: &[u8]) -> u32 {
        if let Some(offset) = self.uniforms.push(&self.queue, bytes) {
            return offset;
        }
        self.submit();
        // A rewound ring always has room.
        self.uniforms.push(&self.queue, bytes).unwrap_or(0)
    }

    fn target_format(&self) -> Result<wgpu::TextureFormat, BackendError> {
        match self.target {
            Target::Screen => self.surface.as_ref().map(|s| s.format).ok_or(BackendError::UnknownHandle),
            Target::Texture(_) => Ok(TEXTURE_FORMAT),
        }
    }

    fn check_allocation(&self, width: u32, height: u32, released: u64) -> Result<u64, BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError::TextureTooLarge { width, height, max });
        }
        let bytes = texture_bytes(width, height);
        if let Some(budget) = self.options.memory_budget {
            if self.memory_used - released + bytes > budget {
                return Err(BackendError::OutOfMemory);
            }
        }
        Ok(bytes)
    }

    fn allocate_image(&self, width: u32, height: u32) -> GpuImage {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cardstage texture"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuImage { texture, view, width, height }
    }

    /// Bind groups may reference a replaced or destroyed texture view.
    fn forget_bind_groups(&mut self, texture: TextureHandle) {
        self.source_groups.remove(&texture);
        for groups in self.batch_groups.values_mut() {
            groups.retain(|key, _| !key.contains(&texture));
        }
    }

    fn ensure_cover_layouts(&mut self) {
        if self.cover_layouts.is_some() {
            return;
        }
        let source = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cardstage cover source bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(COVER_GLOBALS_SIZE),
                    },
                    count: None,
                },
            ],
        });
        let params = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cardstage cover params bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(MAX_UNIFORM_BYTES as u64),
                },
                count: None,
            }],
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cardstage cover pipeline layout"),
            bind_group_layouts: &[&source, &params],
            immediate_size: 0,
        });
        let params_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cardstage cover params"),
            layout: &params,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniforms.binding(MAX_UNIFORM_BYTES as u64),
            }],
        });
        self.cover_layouts = Some(CoverLayouts { source, pipeline_layout, params_group });
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> Result<(), BackendError> {
        if self.pipelines.contains_key(&key) {
            return Ok(());
        }
        let program = self.programs.get(&key.program).ok_or(BackendError::UnknownHandle)?;
        let blend = match key.blend {
            CoverBlend::Over => Some(premul_alpha_blend()),
            CoverBlend::Replace => Some(wgpu::BlendState::REPLACE),
        };
        let targets = [Some(wgpu::ColorTargetState {
            format: key.format,
            blend,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        };

        let pipeline = match program {
            Program::Batch { module, pipeline_layout, .. } => {
                let buffers = stream_layouts();
                self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("cardstage batch pipeline"),
                    layout: Some(pipeline_layout),
                    vertex: wgpu::VertexState {
                        module,
                        entry_point: Some("vs_main"),
                        compilation_options: Default::default(),
                        buffers: &buffers,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module,
                        entry_point: Some("fs_main"),
                        compilation_options: Default::default(),
                        targets: &targets,
                    }),
                    primitive,
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
            }
            Program::Cover { module } => {
                let Some(layouts) = self.cover_layouts.as_ref() else {
                    return Err(BackendError::UnknownHandle);
                };
                self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("cardstage cover pipeline"),
                    layout: Some(&layouts.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module,
                        entry_point: Some("vs_cover"),
                        compilation_options: Default::default(),
                        buffers: &[],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module,
                        entry_point: Some("fs_cover"),
                        compilation_options: Default::default(),
                        targets: &targets,
                    }),
                    primitive,
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
            }
        };
        self.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn ensure_batch_group(&mut self, program: ProgramHandle, textures: &[TextureHandle]) -> Result<(), BackendError> {
        if self.batch_groups.get(&program).is_some_and(|g| g.contains_key(textures)) {
            return Ok(());
        }
        let Some(Program::Batch { units, layout, .. }) = self.programs.get(&program) else {
            return Err(BackendError::UnknownHandle);
        };
        if textures.len() != *units as usize {
            return Err(BackendError::UnknownHandle);
        }
        let mut entries = Vec::with_capacity(textures.len() + 2);
        entries.push(wgpu::BindGroupEntry { binding: 0, resource: self.uniforms.binding(16) });
        entries.push(wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) });
        for (i, handle) in textures.iter().enumerate() {
            let image = self.textures.get(handle).ok_or(BackendError::UnknownHandle)?;
            entries.push(wgpu::BindGroupEntry {
                binding: BATCH_FIRST_TEXTURE_BINDING + i as u32,
                resource: wgpu::BindingResource::TextureView(&image.view),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cardstage batch textures"),
            layout,
            entries: &entries,
        });
        self.batch_groups.entry(program).or_default().insert(textures.to_vec(), group);
        Ok(())
    }

    fn ensure_source_group(&mut self, source: TextureHandle) -> Result<(), BackendError> {
        if self.source_groups.contains_key(&source) {
            return Ok(());
        }
        let Some(layouts) = self.cover_layouts.as_ref() else {
            return Err(BackendError::UnknownHandle);
        };
        let image = self.textures.get(&source).ok_or(BackendError::UnknownHandle)?;
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cardstage cover source"),
            layout: &layouts.source,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&image.view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: self.uniforms.binding(COVER_GLOBALS_SIZE) },
            ],
        });
        self.source_groups.insert(source, group);
        Ok(())
    }

}

fn target_view<'a>(
    target: Target,
    surface: &'a Option<SurfaceTarget>,
    textures: &'a HashMap<TextureHandle, GpuImage>,
) -> Result<&'a wgpu::TextureView, BackendError> {
    match target {
        Target::Screen => surface.as_ref().map(|s| &s.view).ok_or(BackendError::UnknownHandle),
        Target::Texture(t) => textures.get(&t).map(|i| &i.view).ok_or(BackendError::UnknownHandle),
    }
}

fn color_attachment(view: &wgpu::TextureView, load: wgpu::LoadOp<wgpu::Color>) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
        depth_slice: None,
    }
}

impl GpuBackend for WgpuBackend {
    fn caps(&self) -> BackendCaps {
        let limits = self.device.limits();
        let units = limits.max_sampled_textures_per_shader_stage;
        BackendCaps {
            max_texture_units: self.options.max_texture_units.map_or(units, |n| n.min(units)).max(1),
            max_texture_size: limits.max_texture_dimension_2d,
        }
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.target = Target::Screen;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.submit();
        Ok(())
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, BackendError> {
        let bytes = self.check_allocation(width, height, 0)?;
        let image = self.allocate_image(width, height);
        let handle = TextureHandle::from_raw(self.ids.next());
        self.textures.insert(handle, image);
        self.memory_used += bytes;
        Ok(handle)
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<(), BackendError> {
        let Some(current) = self.textures.get(&texture) else {
            return Err(BackendError::UnknownHandle);
        };
        let released = texture_bytes(current.width, current.height);
        let bytes = self.check_allocation(width, height, released)?;
        let image = self.allocate_image(width, height);
        self.forget_bind_groups(texture);
        self.textures.insert(texture, image);
        self.memory_used = self.memory_used - released + bytes;
        Ok(())
    }

    fn upload_pixels(&mut self, texture: TextureHandle, pixels: &PixelData) -> Result<(), BackendError> {
        let Some(current) = self.textures.get(&texture) else {
            return Err(BackendError::UnknownHandle);
        };
        let (width, height) = (pixels.width(), pixels.height());
        if (current.width, current.height) != (width, height) {
            self.resize_texture(texture, width, height)?;
        }
        // Recorded draws may still sample the previous contents.
        if self.encoder.is_some() {
            self.submit();
        }
        let Some(image) = self.textures.get(&texture) else {
            return Err(BackendError::UnknownHandle);
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(image) = self.textures.remove(&texture) {
            self.memory_used -= texture_bytes(image.width, image.height);
        }
        self.forget_bind_groups(texture);
        if self.target == Target::Texture(texture) {
            self.target = Target::Screen;
        }
    }

    fn create_framebuffer(&mut self, texture: TextureHandle) -> Result<FramebufferHandle, BackendError> {
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
        self.ensure_encoder();
        let view = target_view(self.target, &self.surface, &self.textures)?;
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(BackendError::DeviceLost);
        };
        let [r, g, b, a] = color.map(f64::from);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("cardstage clear pass"),
            color_attachments: &[Some(color_attachment(view, wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a })))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramHandle, BackendError> {
        let program = match *desc {
            ProgramDesc::Batch { texture_units } => {
                let limit = self.device.limits().max_sampled_textures_per_shader_stage;
                if texture_units == 0 || texture_units > limit {
                    return Err(BackendError::ShaderCompile(format!(
                        "{texture_units} sampled textures exceed the device limit of {limit}"
                    )));
                }
                let source = batch_program_source(texture_units);
                validate_wgsl(&source)?;
                let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("cardstage batch shader"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
                });

                let mut entries = vec![
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: NonZeroU64::new(16),
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ];
                entries.extend((0..texture_units).map(|i| wgpu::BindGroupLayoutEntry {
                    binding: BATCH_FIRST_TEXTURE_BINDING + i,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                }));
                let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("cardstage batch bgl"),
                    entries: &entries,
                });
                let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("cardstage batch pipeline layout"),
                    bind_group_layouts: &[&layout],
                    immediate_size: 0,
                });
                Program::Batch { units: texture_units, module, layout, pipeline_layout }
            }
            ProgramDesc::Cover { label, fragment } => {
                let source = cover_program_source(fragment);
                validate_wgsl(&source).map_err(|e| match e {
                    BackendError::ShaderCompile(msg) => BackendError::ShaderCompile(format!("{label}: {msg}")),
                    other => other,
                })?;
                self.ensure_cover_layouts();
                let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
                });
                Program::Cover { module }
            }
        };
        let handle = ProgramHandle::from_raw(self.ids.next());
        self.programs.insert(handle, program);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.batch_groups.remove(&program);
        self.pipelines.retain(|key, _| key.program != program);
    }

    fn draw_batch(&mut self, draw: &BatchDraw<'_>) -> Result<(), BackendError> {
        let count = (draw.vertex_count as u64)
            .min(draw.positions.len() as u64 / 2)
            .min(draw.uvs.len() as u64 / 2)
            .min(draw.indices.len() as u64)
            .min(draw.alphas.len() as u64)
            .min(STREAM_VERTICES);
        if count == 0 {
            return Ok(());
        }

        let format = self.target_format()?;
        let key = PipelineKey { program: draw.program, format, blend: CoverBlend::Over };
        self.ensure_pipeline(key)?;
        self.ensure_batch_group(draw.program, draw.textures)?;

        if self.stream_cursor + count > STREAM_VERTICES {
            self.submit();
        }
        let first = self.stream_cursor;
        let data: [&[f32]; 4] = [draw.positions, draw.uvs, draw.indices, draw.alphas];
        for ((buffer, src), components) in self.streams.iter().zip(data).zip(STREAM_COMPONENTS) {
            let len = (count * components) as usize;
            self.queue
                .write_buffer(buffer, first * components * 4, bytemuck::cast_slice(&src[..len]));
        }
        self.stream_cursor += count;
        let offset = self.push_uniform(bytemuck::cast_slice(&draw.projection));

        self.ensure_encoder();
        let view = target_view(self.target, &self.surface, &self.textures)?;
        let (Some(pipeline), Some(group)) = (
            self.pipelines.get(&key),
            self.batch_groups.get(&draw.program).and_then(|g| g.get(draw.textures)),
        ) else {
            return Err(BackendError::UnknownHandle);
        };
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(BackendError::DeviceLost);
        };

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("cardstage batch pass"),
            color_attachments: &[Some(color_attachment(view, wgpu::LoadOp::Load))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, group, &[offset]);
        for (slot, (buffer, components)) in self.streams.iter().zip(STREAM_COMPONENTS).enumerate() {
            let start = first * components * 4;
            let end = (first + count) * components * 4;
            rpass.set_vertex_buffer(slot as u32, buffer.slice(start..end));
        }
        rpass.draw(0..count as u32, 0..1);
        Ok(())
    }

    fn draw_cover(&mut self, draw: &CoverDraw<'_>) -> Result<(), BackendError> {
        let format = self.target_format()?;
        let key = PipelineKey { program: draw.program, format, blend: draw.blend };
        self.ensure_pipeline(key)?;
        self.ensure_source_group(draw.source)?;

        let (sw, sh) = self
            .textures
            .get(&draw.source)
            .map(|i| (i.width, i.height))
            .ok_or(BackendError::UnknownHandle)?;
        let globals = CoverGlobals {
            texel: [1.0 / sw.max(1) as f32, 1.0 / sh.max(1) as f32],
            alpha: draw.alpha,
            _pad: 0.0,
        };
        let globals_offset = self.push_uniform(bytemuck::bytes_of(&globals));
        let params_offset = self.push_uniform(draw.uniforms.padded());

        self.ensure_encoder();
        let view = target_view(self.target, &self.surface, &self.textures)?;
        let (Some(pipeline), Some(source_group), Some(layouts)) = (
            self.pipelines.get(&key),
            self.source_groups.get(&draw.source),
            self.cover_layouts.as_ref(),
        ) else {
            return Err(BackendError::UnknownHandle);
        };
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(BackendError::DeviceLost);
        };

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("cardstage cover pass"),
            color_attachments: &[Some(color_attachment(view, wgpu::LoadOp::Load))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, source_group, &[globals_offset]);
        rpass.set_bind_group(1, &layouts.params_group, &[params_offset]);
        rpass.draw(0..6, 0..1);
        Ok(())
    }
}
