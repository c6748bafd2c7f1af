//! Render-target passes: node caches and filter chains.
//!
//! A cached node renders its content once into a render target (in node-local
//! space, without its own transform and alpha) and is then drawn as a single
//! card. Filters run as ping-pong cover draws between two targets of equal
//! size: A -> B -> A ...; the side written last holds the result.
//!
//! Every nested pass flushes the parent batch first, saves the slot table and
//! the bound target, and restores both afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::coords::{Matrix2D, Rect};
use crate::filter::{Filter, FilterUniforms};
use crate::scene::{CacheState, NodeId, PingPong, PingPongSide, Scene};

use super::backend::{CoverBlend, CoverDraw, FramebufferHandle, GpuBackend, ProgramDesc, ProgramHandle};
use super::error::{BackendError, RenderError};
use super::registry::TextureRegistry;
use super::shaders::COPY_FRAGMENT;
use super::slots::SlotTable;
use super::stage::{Stage, TargetState};
use super::stats::BatchReason;
use super::texture::TextureId;

// ── programs ──────────────────────────────────────────────────────────────

/// Compiled programs: the batch program, the copy program and one program
/// per (filter name, pass).
#[derive(Debug)]
pub(super) struct ProgramCache {
    batch: ProgramHandle,
    batch_units: u32,
    copy: ProgramHandle,
    filters: HashMap<(&'static str, usize), ProgramHandle>,
}

impl ProgramCache {
    pub(super) fn new<B: GpuBackend>(backend: &mut B, requested_units: u32) -> Result<Self, RenderError> {
        let (batch, batch_units) = compile_batch_program(backend, requested_units)?;
        let copy = backend.compile_program(&ProgramDesc::Cover { label: "cardstage copy", fragment: COPY_FRAGMENT })?;
        Ok(Self { batch, batch_units, copy, filters: HashMap::new() })
    }

    #[inline]
    pub(super) fn batch(&self) -> ProgramHandle {
        self.batch
    }

    #[inline]
    pub(super) fn batch_units(&self) -> u32 {
        self.batch_units
    }

    #[inline]
    pub(super) fn copy(&self) -> ProgramHandle {
        self.copy
    }

    /// Swaps in a batch program for a new unit count; the old one is destroyed.
    pub(super) fn rebuild_batch<B: GpuBackend>(&mut self, backend: &mut B, requested_units: u32) -> Result<u32, RenderError> {
        let (batch, units) = compile_batch_program(backend, requested_units)?;
        backend.destroy_program(self.batch);
        self.batch = batch;
        self.batch_units = units;
        Ok(units)
    }

    pub(super) fn filter_program<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        filter: &dyn Filter,
        pass: usize,
    ) -> Result<ProgramHandle, RenderError> {
        let key = (filter.name(), pass);
        if let Some(&program) = self.filters.get(&key) {
            return Ok(program);
        }
        let fragment = filter.fragment_source(pass);
        let program = backend.compile_program(&ProgramDesc::Cover { label: filter.name(), fragment: &fragment })?;
        log::debug!("compiled filter program {}#{pass}", filter.name());
        self.filters.insert(key, program);
        Ok(program)
    }
}

/// Compiles the batch program, dropping 4 units per failed attempt down to 1.
fn compile_batch_program<B: GpuBackend>(backend: &mut B, requested: u32) -> Result<(ProgramHandle, u32), RenderError> {
    let mut units = requested.max(1);
    loop {
        match backend.compile_program(&ProgramDesc::Batch { texture_units: units }) {
            Ok(program) => {
                log::info!("batch program uses {units} texture units");
                return Ok((program, units));
            }
            Err(BackendError::ShaderCompile(msg)) if units > 1 => {
                let next = units.saturating_sub(4).max(1);
                log::warn!("batch program with {units} texture units failed ({msg}); retrying with {next}");
                units = next;
            }
            Err(BackendError::ShaderCompile(msg)) => {
                log::error!("batch program failed with a single texture unit: {msg}");
                return Err(RenderError::ShaderUnavailable);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ── target pool ───────────────────────────────────────────────────────────

/// Idle render targets of filter passes on uncached nodes, keyed by size.
#[derive(Debug, Default)]
pub(super) struct RenderTargetPool {
    free: HashMap<(u32, u32), Vec<TextureId>>,
}

impl RenderTargetPool {
    fn take(&mut self, registry: &TextureRegistry, width: u32, height: u32) -> Option<TextureId> {
        let list = self.free.get_mut(&(width, height))?;
        // Purged entries are skipped.
        while let Some(id) = list.pop() {
            if registry.contains(id) {
                return Some(id);
            }
        }
        None
    }

    fn give_back(&mut self, id: TextureId, width: u32, height: u32) {
        self.free.entry((width, height)).or_default().push(id);
    }

    pub(super) fn forget(&mut self, id: TextureId) {
        for list in self.free.values_mut() {
            list.retain(|&t| t != id);
        }
    }

    pub(super) fn idle(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

/// Slot table and target of the enclosing pass.
pub(super) struct SavedPass {
    slots: SlotTable,
    target: TargetState,
    pinned_scratch: bool,
}

impl<B: GpuBackend> Stage<B> {
    // ── nested passes ─────────────────────────────────────────────────────

    /// Scratch slot for render-target sources; `None` with a single slot.
    #[inline]
    fn scratch_slot(&self) -> Option<usize> {
        let n = self.state.slots.len();
        (n > 1).then(|| n - 1)
    }

    /// Flushes the enclosing batch and remembers its slots and target.
    fn begin_pass(&mut self) -> Result<SavedPass, RenderError> {
        self.flush(BatchReason::CachePass)?;
        let saved_slots = self.state.slots.clone();
        let mut pinned_scratch = false;
        // Content needs at least one slot besides the scratch one.
        if let Some(scratch) = self.scratch_slot() {
            if !self.state.slots.is_pinned(scratch) && self.state.slots.unpinned_count() > 1 {
                self.state.slots.pin(scratch, true)?;
                pinned_scratch = true;
            }
        }
        Ok(SavedPass { slots: saved_slots, target: self.state.target, pinned_scratch })
    }

    /// Flushes the nested batch and rebinds the enclosing target and slots.
    fn end_pass(&mut self, saved: SavedPass) -> Result<(), RenderError> {
        let flushed = self.flush(BatchReason::CachePass);
        if saved.pinned_scratch {
            if let Some(scratch) = self.scratch_slot() {
                self.state.slots.pin(scratch, false)?;
            }
        }
        self.state.slots = saved.slots;
        self.registry.sync_active_slots(self.state.slots.textures());
        self.state.target = saved.target;
        self.backend.bind_target(saved.target.framebuffer, saved.target.width, saved.target.height)?;
        flushed
    }

    /// Binds render target `id` for drawing.
    fn bind_render_target(&mut self, id: TextureId) -> Result<(), RenderError> {
        let texture = self.registry.get(id).ok_or(RenderError::StaleTexture(id))?;
        let (width, height) = (texture.width, texture.height);
        let framebuffer: FramebufferHandle = texture.framebuffer.ok_or(RenderError::StaleTexture(id))?;
        self.backend.bind_target(Some(framebuffer), width, height)?;
        self.state.target = TargetState { framebuffer: Some(framebuffer), texture: Some(id), width, height };
        self.registry.touch(id, self.state.draw_id);
        Ok(())
    }

    /// Records `source` in the scratch slot, protecting it while sampled.
    fn occupy_scratch(&mut self, source: TextureId) -> Result<(), RenderError> {
        let Some(scratch) = self.scratch_slot() else { return Ok(()) };
        if let Some(evicted) = self.state.slots.assign(scratch, source, self.state.batch_id)? {
            self.registry.set_active_slot(evicted, None);
        }
        self.registry.set_active_slot(source, Some(scratch));
        Ok(())
    }

    pub(super) fn release_id(&mut self, id: TextureId) {
        if self.registry.release(&mut self.backend, id) {
            self.state.slots.forget(id);
            self.pool.forget(id);
        }
    }

    // ── filters ───────────────────────────────────────────────────────────

    /// Runs every filter pass over `pair`, starting from the content in A.
    ///
    /// Returns the side holding the final image.
    fn run_filters(&mut self, filters: &[Arc<dyn Filter>], pair: &PingPong) -> Result<PingPongSide, RenderError> {
        let mut src = PingPongSide::A;
        for filter in filters {
            for pass in 0..filter.pass_count() {
                let dst = src.other();
                let (Some(src_id), Some(dst_id)) = (pair.get(src), pair.get(dst)) else {
                    return Err(RenderError::InvalidCache);
                };
                let program = self.programs.filter_program(&mut self.backend, filter.as_ref(), pass)?;
                let source = self.registry.get(src_id).ok_or(RenderError::StaleTexture(src_id))?;
                let (handle, width, height) = (source.handle, source.width, source.height);

                self.occupy_scratch(src_id)?;
                self.bind_render_target(dst_id)?;
                let uniforms = filter.uniforms(pass, width, height);
                self.backend.draw_cover(&CoverDraw {
                    program,
                    source: handle,
                    filter: Some((filter.as_ref(), pass)),
                    uniforms: &uniforms,
                    blend: CoverBlend::Replace,
                    alpha: 1.0,
                })?;
                self.stats.filter_passes += 1;
                src = dst;
            }
        }
        Ok(src)
    }

    // ── cache ─────────────────────────────────────────────────────────────

    /// Draws a cached node, re-rendering the cache first when it is stale.
    pub(super) fn draw_cached(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        matrix: &Matrix2D,
        alpha: f32,
    ) -> Result<(), RenderError> {
        let Some(cache) = scene.node(id).and_then(|n| n.cache.as_ref()) else {
            return Ok(());
        };
        let current = cache.state == CacheState::Cached
            && !cache.pending_allocation
            && cache.output().is_some_and(|t| self.registry.contains(t));
        if !current {
            self.render_cache(scene, id)?;
        }

        let Some(cache) = scene.node(id).and_then(|n| n.cache.as_ref()) else {
            return Ok(());
        };
        let Some(output) = cache.output() else { return Ok(()) };
        let Some(texture) = self.registry.get(output) else { return Ok(()) };
        let scaled = Rect::from_size(cache.rect.size.x * cache.scale, cache.rect.size.y * cache.scale);
        let Some(uv) = scaled.to_uv(texture.width as f32, texture.height as f32) else {
            return Ok(());
        };
        let rect = cache.rect;
        self.append_card(output, rect, uv, matrix, alpha)
    }

    /// Renders the node's content (and filters) into its cache targets.
    ///
    /// On allocation failure the cache stays in `Caching` with no output.
    fn render_cache(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        let Some(node) = scene.node(id) else { return Ok(()) };
        let Some(cache) = node.cache.as_ref() else { return Ok(()) };
        let filters = node.filters.clone();
        let (width, height) = cache.target_size();
        let rect = cache.rect;
        let scale = cache.scale;
        let mut pair = cache.targets.clone();

        let needs_b = !filters.is_empty();
        let usable = |id: Option<TextureId>, registry: &TextureRegistry| {
            id.and_then(|t| registry.get(t)).is_some_and(|t| t.width == width && t.height == height)
        };
        if !usable(pair.a, &self.registry) || (needs_b && !usable(pair.b, &self.registry)) {
            for old in pair.take() {
                self.release_id(old);
            }
            let allocated = self.allocate_pair(width, height, needs_b);
            let node_cache = scene.node_mut(id).and_then(|n| n.cache.as_mut());
            match allocated {
                Ok(new_pair) => {
                    pair = new_pair;
                    if let Some(c) = node_cache {
                        c.targets = pair.clone();
                        c.pending_allocation = false;
                    }
                }
                Err(e) => {
                    if let Some(c) = node_cache {
                        c.targets = PingPong::default();
                        c.pending_allocation = true;
                        c.state = CacheState::Caching;
                    }
                    return Err(e);
                }
            }
        }
        let Some(target_a) = pair.a else { return Err(RenderError::InvalidCache) };

        let skipped_before = self.stats.skipped_nodes;
        let saved = self.begin_pass()?;
        let result = self.render_into(scene, id, target_a, &filters, &pair, |m| {
            m.scale(scale, scale).translate(-rect.origin.x, -rect.origin.y);
        });
        let restored = self.end_pass(saved);
        let last = result?;
        restored?;

        // Output with skipped content is shown but rendered again next frame.
        let complete = self.stats.skipped_nodes == skipped_before;
        if let Some(c) = scene.node_mut(id).and_then(|n| n.cache.as_mut()) {
            c.targets = pair;
            c.targets.last_written = Some(last);
            c.pending_allocation = false;
            c.state = if complete { CacheState::Cached } else { CacheState::Caching };
            c.render_count += 1;
        }
        self.stats.cache_renders += 1;
        if complete {
            log::log!(self.config.diag_level(), "cached node {id:?} at {width}x{height}");
        } else {
            log::debug!("cache of {id:?} is incomplete; retrying next frame");
        }
        Ok(())
    }

    fn allocate_pair(&mut self, width: u32, height: u32, needs_b: bool) -> Result<PingPong, RenderError> {
        let draw_id = self.state.draw_id;
        let a = self.registry.create_render_target(&mut self.backend, width, height, draw_id)?;
        let b = if needs_b {
            match self.registry.create_render_target(&mut self.backend, width, height, draw_id) {
                Ok(b) => Some(b),
                Err(e) => {
                    self.release_id(a);
                    return Err(e);
                }
            }
        } else {
            None
        };
        Ok(PingPong { a: Some(a), b, last_written: None })
    }

    /// Clears `target`, draws the node content with `content_matrix`, then runs filters.
    fn render_into(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        target: TextureId,
        filters: &[Arc<dyn Filter>],
        pair: &PingPong,
        content_matrix: impl FnOnce(&mut Matrix2D),
    ) -> Result<PingPongSide, RenderError> {
        self.bind_render_target(target)?;
        self.backend.clear([0.0; 4])?;
        let mut matrix = Matrix2D::IDENTITY;
        content_matrix(&mut matrix);
        self.append_content(scene, id, &matrix, 1.0)?;
        self.flush(BatchReason::CachePass)?;
        if filters.is_empty() {
            return Ok(PingPongSide::A);
        }
        self.run_filters(filters, pair)
    }

    // ── uncached filters ──────────────────────────────────────────────────

    /// Draws a filtered node without a cache: content goes through pooled
    /// targets the size of the current destination, then is composited over it.
    pub(super) fn draw_filtered(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        matrix: &Matrix2D,
        alpha: f32,
    ) -> Result<(), RenderError> {
        let Some(node) = scene.node(id) else { return Ok(()) };
        let filters = node.filters.clone();
        let (width, height) = (self.state.target.width.max(1), self.state.target.height.max(1));

        let pair = self.acquire_pooled(width, height)?;
        let full = *matrix;

        let saved = match self.begin_pass() {
            Ok(saved) => saved,
            Err(e) => {
                self.return_pooled(&pair, width, height);
                return Err(e);
            }
        };
        let result = match pair.a {
            Some(a) => self.render_into(scene, id, a, &filters, &pair, |m| *m = full),
            None => Err(RenderError::InvalidCache),
        };
        let restored = self.end_pass(saved);

        let composite = match (result, restored) {
            (Ok(last), Ok(())) => self.composite(pair.get(last), alpha),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        self.return_pooled(&pair, width, height);
        composite
    }

    fn acquire_pooled(&mut self, width: u32, height: u32) -> Result<PingPong, RenderError> {
        let mut pair = PingPong::default();
        for side in [PingPongSide::A, PingPongSide::B] {
            let id = match self.pool.take(&self.registry, width, height) {
                Some(id) => Ok(id),
                None => self.registry.create_render_target(&mut self.backend, width, height, self.state.draw_id),
            };
            match id {
                Ok(id) => pair.set(side, Some(id)),
                Err(e) => {
                    self.return_pooled(&pair, width, height);
                    return Err(e);
                }
            }
        }
        Ok(pair)
    }

    fn return_pooled(&mut self, pair: &PingPong, width: u32, height: u32) {
        for id in [pair.a, pair.b].into_iter().flatten() {
            self.pool.give_back(id, width, height);
        }
    }

    /// Draws `source` over the bound target with `alpha`.
    fn composite(&mut self, source: Option<TextureId>, alpha: f32) -> Result<(), RenderError> {
        let Some(source) = source else { return Ok(()) };
        let handle = self.registry.get(source).map(|t| t.handle).ok_or(RenderError::StaleTexture(source))?;
        self.registry.touch(source, self.state.draw_id);
        self.backend.draw_cover(&CoverDraw {
            program: self.programs.copy(),
            source: handle,
            filter: None,
            uniforms: &FilterUniforms::empty(),
            blend: CoverBlend::Over,
            alpha,
        })?;
        Ok(())
    }
}
