//! The stage: one renderer instance drawing a [`Scene`] through a [`GpuBackend`].
//!
//! Everything mutable during a frame lives in [`RendererState`], owned by the
//! stage and threaded through the traversal by `&mut self`, so several stages
//! can coexist without sharing slot tables or vertex arrays.

use crate::coords::{Color, Matrix2D, Rect, Viewport};
use crate::scene::{CacheState, ImageSource, NodeCache, NodeId, NodeKind, Scene, SceneError};

use super::backend::{BackendCaps, FramebufferHandle, GpuBackend, TextureHandle};
use super::batch::VertexBatch;
use super::config::RendererConfig;
use super::error::RenderError;
use super::pipeline::{ProgramCache, RenderTargetPool};
use super::registry::TextureRegistry;
use super::slots::SlotTable;
use super::stats::{BatchReason, FrameStats};
use super::texture::TextureId;

/// Destination of the draws being issued.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct TargetState {
    /// `None` is the visible surface.
    pub framebuffer: Option<FramebufferHandle>,
    /// Registry texture behind `framebuffer`; never sampled while bound.
    pub texture: Option<TextureId>,
    pub width: u32,
    pub height: u32,
}

impl TargetState {
    fn screen(viewport: Viewport) -> Self {
        Self { framebuffer: None, texture: None, width: viewport.width, height: viewport.height }
    }
}

/// Per-instance mutable render state.
#[derive(Debug)]
pub(crate) struct RendererState {
    pub slots: SlotTable,
    pub batch: VertexBatch,
    pub draw_id: u64,
    /// Id of the batch being built; advances on every flush.
    pub batch_id: u64,
    pub target: TargetState,
    /// Scratch list of per-slot handles handed to the backend.
    pub bound: Vec<TextureHandle>,
}

/// Batching compositor.
///
/// ```no_run
/// # use cardstage_engine::render::{Stage, RendererConfig, SoftBackend};
/// # use cardstage_engine::scene::Scene;
/// let mut stage = Stage::new(SoftBackend::new(320, 240), RendererConfig::default())?;
/// stage.update_viewport(320, 240);
/// let mut scene = Scene::new();
/// stage.render_frame(&mut scene)?;
/// println!("{} batches", stage.stats().batches);
/// # Ok::<(), cardstage_engine::render::RenderError>(())
/// ```
pub struct Stage<B: GpuBackend> {
    pub(super) backend: B,
    pub(super) config: RendererConfig,
    pub(super) caps: BackendCaps,
    pub(super) registry: TextureRegistry,
    pub(super) state: RendererState,
    pub(super) programs: ProgramCache,
    pub(super) pool: RenderTargetPool,
    pub(super) stats: FrameStats,
    viewport: Viewport,
}

impl<B: GpuBackend> Stage<B> {
    /// Compiles the batch program (reducing texture units on failure),
    /// creates the filler texture and allocates the vertex arrays.
    pub fn new(mut backend: B, config: RendererConfig) -> Result<Self, RenderError> {
        let config = config.normalized();
        let caps = backend.caps();
        let registry = TextureRegistry::new(&mut backend)?;

        let hw_units = caps.max_texture_units.max(1);
        let requested = config.batch_texture_count.unwrap_or(hw_units).min(hw_units);
        let programs = ProgramCache::new(&mut backend, requested)?;
        let units = programs.batch_units();
        if units < requested {
            log::warn!("batch texture count reduced from {requested} to {units}");
        }

        let viewport = Viewport::new(1, 1);
        let state = RendererState {
            slots: SlotTable::new(units as usize, registry.filler()),
            batch: VertexBatch::new(config.max_cards_per_batch),
            draw_id: 0,
            batch_id: 1,
            target: TargetState::screen(viewport),
            bound: Vec::with_capacity(units as usize),
        };
        log::debug!(
            "stage ready: {units} texture units, {} cards per batch, max texture {}",
            config.max_cards_per_batch,
            caps.max_texture_size
        );

        Ok(Self {
            backend,
            config,
            caps,
            registry,
            state,
            programs,
            pool: RenderTargetPool::default(),
            stats: FrameStats::default(),
            viewport,
        })
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Draws `scene` to the visible surface: one traversal plus its flushes.
    ///
    /// Returns only frame-fatal errors (device loss, no batch program);
    /// per-node failures are logged and counted in [`FrameStats::skipped_nodes`].
    pub fn render_frame(&mut self, scene: &mut Scene) -> Result<(), RenderError> {
        self.state.draw_id += 1;
        self.stats.begin(self.state.draw_id, self.state.batch_id);

        self.backend.begin_frame()?;
        let drawn = self.draw_scene(scene);
        let finished = self.backend.end_frame();
        drawn?;
        finished?;
        Ok(())
    }

    fn draw_scene(&mut self, scene: &mut Scene) -> Result<(), RenderError> {
        let poll = self.registry.poll_uploads(&mut self.backend);
        self.stats.uploads += poll.uploaded;
        self.stats.stale_uploads_skipped += poll.stale;

        if let Some(interval) = self.config.auto_purge_interval {
            if self.state.draw_id % u64::from((interval / 2).max(1)) == 0 {
                self.purge_unused(u64::from(interval));
            }
        }

        self.bind_screen()?;
        if self.config.auto_clear {
            self.backend.clear(self.config.clear_color.premultiplied())?;
        }

        let root = scene.root();
        self.append_node(scene, root, &Matrix2D::IDENTITY, 1.0)?;
        self.flush(BatchReason::DrawFinish)?;

        log::log!(
            self.config.diag_level(),
            "draw {} done: {} batches, {} cards",
            self.state.draw_id,
            self.stats.batches,
            self.stats.cards
        );
        Ok(())
    }

    fn bind_screen(&mut self) -> Result<(), RenderError> {
        self.state.target = TargetState::screen(self.viewport);
        self.backend.bind_target(None, self.viewport.width, self.viewport.height)?;
        Ok(())
    }

    /// Clears the visible surface with the clear colour, outside of a frame.
    pub fn clear(&mut self) -> Result<(), RenderError> {
        self.flush(BatchReason::DrawFinish)?;
        self.bind_screen()?;
        self.backend.clear(self.config.clear_color.premultiplied())?;
        Ok(())
    }

    // ── caching ───────────────────────────────────────────────────────────

    /// Renders `id` into a texture covering `rect` (node-local) at `scale`
    /// on the next frame, and reuses it until invalidated.
    ///
    /// The rectangle grows by the padding of the node's filters. Requesting
    /// again replaces the previous cache.
    pub fn request_cache(&mut self, scene: &mut Scene, id: NodeId, rect: Rect, scale: f32) -> Result<(), RenderError> {
        if !rect.is_finite() || rect.is_empty() || !scale.is_finite() || scale <= 0.0 {
            return Err(RenderError::InvalidCache);
        }
        let node = scene.node_mut(id).ok_or(SceneError::UnknownNode(id))?;
        let rect = rect.normalized().padded(node.filter_padding());
        let old = node.cache.replace(NodeCache::new(rect, scale));

        let (w, h) = node.cache.as_ref().map_or((0, 0), NodeCache::target_size);
        let max = self.caps.max_texture_size;
        if w > max || h > max {
            node.cache = None;
            if let Some(mut old) = old {
                self.release_targets(&mut old);
            }
            log::error!("cache of {id:?} needs {w}x{h}, above the maximum texture size {max}");
            return Err(RenderError::OversizedTexture { width: w, height: h, max });
        }

        if let Some(mut old) = old {
            self.release_targets(&mut old);
        }
        log::debug!("cache requested for {id:?}: {w}x{h}");
        Ok(())
    }

    /// Forces the cache of `id` to re-render on the next frame.
    ///
    /// Returns `false` when the node has no cache.
    pub fn invalidate_cache(&mut self, scene: &mut Scene, id: NodeId) -> Result<bool, RenderError> {
        let node = scene.node_mut(id).ok_or(SceneError::UnknownNode(id))?;
        Ok(match node.cache.as_mut() {
            Some(cache) => {
                cache.state = CacheState::Caching;
                true
            }
            None => false,
        })
    }

    /// Drops the cache of `id` and frees its render targets.
    pub fn uncache(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        let node = scene.node_mut(id).ok_or(SceneError::UnknownNode(id))?;
        if let Some(mut cache) = node.cache.take() {
            self.release_targets(&mut cache);
        }
        Ok(())
    }

    fn release_targets(&mut self, cache: &mut NodeCache) {
        for id in cache.targets.take() {
            self.release_id(id);
        }
    }

    // ── release ───────────────────────────────────────────────────────────

    /// Frees every GPU texture used by `id` and its descendants.
    ///
    /// Images are re-uploaded and caches re-rendered if the nodes are drawn again.
    pub fn release_texture(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        if !scene.contains(id) {
            return Err(SceneError::UnknownNode(id).into());
        }
        for n in scene.descendants(id) {
            let Some(node) = scene.node_mut(n) else { continue };
            match &node.kind {
                NodeKind::Bitmap(bitmap) => {
                    let source = bitmap.image.id();
                    self.release_source_id(source);
                }
                NodeKind::Sprite(sprite) => {
                    let sources: Vec<_> = sprite.sheet.images().iter().map(ImageSource::id).collect();
                    for source in sources {
                        self.release_source_id(source);
                    }
                }
                NodeKind::Container(_) | NodeKind::Empty => {}
            }
            if let Some(cache) = node.cache.as_mut() {
                for target in cache.targets.take() {
                    self.release_id(target);
                }
                cache.state = CacheState::Caching;
                cache.pending_allocation = true;
            }
        }
        Ok(())
    }

    /// Detaches `id` from the scene and frees its GPU textures.
    pub fn remove_node(&mut self, scene: &mut Scene, id: NodeId) -> Result<Vec<NodeId>, RenderError> {
        self.release_texture(scene, id)?;
        Ok(scene.remove(id)?)
    }

    /// Frees the texture of one image source. Returns whether one existed.
    pub fn release_source(&mut self, source: &ImageSource) -> bool {
        self.release_source_id(source.id())
    }

    fn release_source_id(&mut self, source: crate::scene::SourceId) -> bool {
        match self.registry.release_source(&mut self.backend, source) {
            Some(id) => {
                self.state.slots.forget(id);
                true
            }
            None => false,
        }
    }

    /// Releases textures unused for `threshold` draws, except those sitting
    /// in a pinned slot. Returns how many were released.
    pub fn purge_unused(&mut self, threshold: u64) -> usize {
        let slots = &self.state.slots;
        let stale = self.registry.unused_since(threshold, self.state.draw_id, |t| {
            t.active_slot.is_some_and(|s| slots.is_pinned(s))
        });
        let mut purged = 0;
        for id in stale {
            if self.registry.release(&mut self.backend, id) {
                self.state.slots.forget(id);
                self.pool.forget(id);
                purged += 1;
            }
        }
        if purged > 0 {
            log::debug!("purged {purged} textures unused for {threshold} draws");
        }
        self.stats.purged += purged as u32;
        purged
    }

    // ── settings ──────────────────────────────────────────────────────────

    /// Resizes the visible surface.
    pub fn update_viewport(&mut self, width: u32, height: u32) {
        self.viewport = Viewport::new(width, height).at_least_one();
        self.backend.resize_surface(self.viewport.width, self.viewport.height);
        if self.state.target.framebuffer.is_none() {
            self.state.target = TargetState::screen(self.viewport);
        }
    }

    pub fn set_clear_color(&mut self, color: Color) {
        self.config.clear_color = color;
    }

    /// Pins (or unpins) `index` so batch content never evicts its texture.
    pub fn protect_texture_slot(&mut self, index: usize, lock: bool) -> Result<(), RenderError> {
        self.state.slots.pin(index, lock)
    }

    /// Rebuilds the batch program for `count` texture units (clamped to the
    /// hardware maximum, reduced on compile failure). Returns the units in use.
    pub fn update_simultaneous_texture_count(&mut self, count: u32) -> Result<u32, RenderError> {
        self.flush(BatchReason::DrawFinish)?;
        let requested = count.max(1).min(self.caps.max_texture_units.max(1));
        let units = self.programs.rebuild_batch(&mut self.backend, requested)?;
        self.config.batch_texture_count = Some(units);
        self.state.slots.reset(units as usize);
        self.registry.sync_active_slots(self.state.slots.textures());
        log::debug!("batch texture count is now {units}");
        Ok(units)
    }

    // ── accessors ─────────────────────────────────────────────────────────

    /// Counters of the most recent frame.
    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn registry(&self) -> &TextureRegistry {
        &self.registry
    }

    #[inline]
    pub fn slot_table(&self) -> &SlotTable {
        &self.state.slots
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Frames rendered so far.
    #[inline]
    pub fn draw_id(&self) -> u64 {
        self.state.draw_id
    }

    /// Id of the next batch; starts at 1.
    #[inline]
    pub fn batch_id(&self) -> u64 {
        self.state.batch_id
    }

    /// Texture units sampled per batch.
    #[inline]
    pub fn batch_texture_count(&self) -> u32 {
        self.programs.batch_units()
    }

    /// Filter targets waiting in the pool.
    #[inline]
    pub fn pooled_targets(&self) -> usize {
        self.pool.idle()
    }
}
