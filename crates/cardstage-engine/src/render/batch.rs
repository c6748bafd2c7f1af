//! Batch accumulation.
//!
//! The traversal walks the scene depth-first, back to front, and turns every
//! visible leaf into a card: 6 vertices written straight into the
//! preallocated [`VertexBatch`] arrays. A batch is flushed lazily, right
//! before the card that would not fit (by vertex capacity or texture slots).

use std::sync::Arc;

use crate::coords::{Matrix2D, Rect, UvRect, Vec2};
use crate::scene::{ImageSource, NodeId, NodeKind, Scene};

use super::backend::GpuBackend;
use super::config::VERTICES_PER_CARD;
use super::error::RenderError;
use super::slots::SlotInsert;
use super::stage::Stage;
use super::stats::BatchReason;
use super::texture::TextureId;

/// Parallel vertex arrays for one batch, allocated once.
#[derive(Debug, Clone)]
pub struct VertexBatch {
    positions: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<f32>,
    alphas: Vec<f32>,
    cards: usize,
    capacity: usize,
}

impl VertexBatch {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let vertices = capacity * VERTICES_PER_CARD;
        Self {
            positions: vec![0.0; vertices * 2],
            uvs: vec![0.0; vertices * 2],
            indices: vec![0.0; vertices],
            alphas: vec![0.0; vertices],
            cards: 0,
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn cards(&self) -> usize {
        self.cards
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cards == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.cards >= self.capacity
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.cards * VERTICES_PER_CARD
    }

    /// Appends a card from its transformed corners `[top-left, top-right, bottom-left, bottom-right]`.
    ///
    /// Vertex order is TL, BL, TR, BL, TR, BR. Returns `false` when full.
    pub fn push_card(&mut self, corners: [Vec2; 4], uv: UvRect, slot: usize, alpha: f32) -> bool {
        if self.is_full() {
            return false;
        }
        let [tl, tr, bl, br] = corners;
        let verts = [
            (tl, uv.left, uv.top),
            (bl, uv.left, uv.bottom),
            (tr, uv.right, uv.top),
            (bl, uv.left, uv.bottom),
            (tr, uv.right, uv.top),
            (br, uv.right, uv.bottom),
        ];
        let base = self.vertex_count();
        for (k, (p, u, v)) in verts.into_iter().enumerate() {
            let i = base + k;
            self.positions[i * 2] = p.x;
            self.positions[i * 2 + 1] = p.y;
            self.uvs[i * 2] = u;
            self.uvs[i * 2 + 1] = v;
            self.indices[i] = slot as f32;
            self.alphas[i] = alpha;
        }
        self.cards += 1;
        true
    }

    #[inline]
    pub fn reset(&mut self) {
        self.cards = 0;
    }

    #[inline]
    pub fn positions(&self) -> &[f32] {
        &self.positions[..self.vertex_count() * 2]
    }

    #[inline]
    pub fn uvs(&self) -> &[f32] {
        &self.uvs[..self.vertex_count() * 2]
    }

    #[inline]
    pub fn indices(&self) -> &[f32] {
        &self.indices[..self.vertex_count()]
    }

    #[inline]
    pub fn alphas(&self) -> &[f32] {
        &self.alphas[..self.vertex_count()]
    }
}

// ── traversal ─────────────────────────────────────────────────────────────

impl<B: GpuBackend> Stage<B> {
    /// Draws `id` under the parent's concatenated matrix and alpha.
    ///
    /// Node-local failures are logged and the node is skipped.
    pub(super) fn append_node(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        parent: &Matrix2D,
        parent_alpha: f32,
    ) -> Result<(), RenderError> {
        let Some(node) = scene.node(id) else { return Ok(()) };
        if !node.is_drawable() {
            return Ok(());
        }
        let mut matrix = *parent;
        matrix.append(&node.local_matrix());
        let alpha = parent_alpha * node.alpha;
        if alpha <= 0.0 || !matrix.is_finite() {
            return Ok(());
        }

        let result = if node.cache.is_some() {
            self.draw_cached(scene, id, &matrix, alpha)
        } else if !node.filters.is_empty() {
            self.draw_filtered(scene, id, &matrix, alpha)
        } else {
            self.append_content(scene, id, &matrix, alpha)
        };

        match result {
            Err(e) if e.is_node_local() => {
                log::warn!("skipping node {id:?}: {e}");
                self.stats.skipped_nodes += 1;
                Ok(())
            }
            other => other,
        }
    }

    /// Draws what the node itself holds, ignoring its cache and filters.
    pub(super) fn append_content(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        matrix: &Matrix2D,
        alpha: f32,
    ) -> Result<(), RenderError> {
        let Some(node) = scene.node(id) else { return Ok(()) };
        match &node.kind {
            NodeKind::Bitmap(bitmap) => {
                let image = bitmap.image.clone();
                let (w, h) = image.size();
                let uv = match bitmap.source_rect {
                    Some(r) => r.to_uv(w as f32, h as f32),
                    None => Some(UvRect::FULL),
                };
                let Some(uv) = uv else { return Ok(()) };
                let rect = bitmap.local_rect();
                self.append_image(&image, rect, uv, matrix, alpha)
            }
            NodeKind::Sprite(sprite) => {
                let sheet = Arc::clone(&sprite.sheet);
                let Some((image, uv, rect)) = sheet.resolve(sprite.frame) else {
                    log::trace!("sprite frame {} out of range", sprite.frame);
                    return Ok(());
                };
                self.append_image(image, rect, uv, matrix, alpha)
            }
            NodeKind::Container(_) => {
                let mut i = 0;
                while let Some(&child) = scene.children(id).get(i) {
                    self.append_node(scene, child, matrix, alpha)?;
                    i += 1;
                }
                Ok(())
            }
            NodeKind::Empty => Ok(()),
        }
    }

    fn append_image(
        &mut self,
        image: &ImageSource,
        rect: Rect,
        uv: UvRect,
        matrix: &Matrix2D,
        alpha: f32,
    ) -> Result<(), RenderError> {
        let (width, height) = image.size();
        if width == 0 || height == 0 || rect.is_empty() {
            return Ok(());
        }
        let max = self.caps.max_texture_size;
        if width > max || height > max {
            return Err(RenderError::OversizedTexture { width, height, max });
        }

        let texture = self.registry.get_or_create(&mut self.backend, image, self.state.draw_id);
        if texture != self.registry.filler() {
            match self.registry.sync_source(&mut self.backend, texture, image) {
                Ok(true) => self.stats.uploads += 1,
                Ok(false) => {}
                Err(e) if e.is_node_local() => log::warn!("upload for {:?} failed: {e}", image.id()),
                Err(e) => return Err(e),
            }
        }
        self.append_card(texture, rect, uv, matrix, alpha)
    }

    /// Writes one card sampling `texture`, flushing first when it does not fit.
    pub(super) fn append_card(
        &mut self,
        texture: TextureId,
        rect: Rect,
        uv: UvRect,
        matrix: &Matrix2D,
        alpha: f32,
    ) -> Result<(), RenderError> {
        if self.state.batch.is_full() {
            self.flush(BatchReason::VertexOverflow)?;
        }
        let slot = self.bind_slot(texture)?;
        self.registry.touch(texture, self.state.draw_id);

        let (min, max) = (rect.min(), rect.max());
        let corners = [
            min,
            Vec2::new(max.x, min.y),
            Vec2::new(min.x, max.y),
            max,
        ]
        .map(|p| matrix.transform_point(p));
        self.state.batch.push_card(corners, uv, slot, alpha);
        Ok(())
    }

    /// Slot for `texture` in the pending batch.
    fn bind_slot(&mut self, texture: TextureId) -> Result<usize, RenderError> {
        let mut flushed = false;
        loop {
            let hint = self.registry.get(texture).and_then(|t| t.active_slot);
            match self.state.slots.insert(texture, hint, self.state.batch_id) {
                SlotInsert::Resident(slot) | SlotInsert::Restamped(slot) => return Ok(slot),
                SlotInsert::Bound { slot, evicted } => {
                    if let Some(evicted) = evicted {
                        self.registry.set_active_slot(evicted, None);
                    }
                    self.registry.set_active_slot(texture, Some(slot));
                    self.stats.slot_binds += 1;
                    return Ok(slot);
                }
                SlotInsert::Full if !flushed && !self.state.batch.is_empty() => {
                    self.flush(BatchReason::TextureOverflow)?;
                    flushed = true;
                }
                SlotInsert::Full => return Err(RenderError::SlotsExhausted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_vertices_follow_strip_order() {
        let mut b = VertexBatch::new(2);
        let corners = [
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(0.0, 2.0),
            Vec2::new(4.0, 2.0),
        ];
        assert!(b.push_card(corners, UvRect::FULL, 3, 0.5));
        assert_eq!(b.positions(), &[0.0, 0.0, 0.0, 2.0, 4.0, 0.0, 0.0, 2.0, 4.0, 0.0, 4.0, 2.0]);
        assert_eq!(b.uvs(), &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
        assert_eq!(b.indices(), &[3.0; 6]);
        assert_eq!(b.alphas(), &[0.5; 6]);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut b = VertexBatch::new(1);
        let c = [Vec2::zero(); 4];
        assert!(b.push_card(c, UvRect::FULL, 0, 1.0));
        assert!(b.is_full());
        assert!(!b.push_card(c, UvRect::FULL, 0, 1.0));
        b.reset();
        assert!(b.is_empty());
        assert_eq!(b.positions().len(), 0);
    }
}
