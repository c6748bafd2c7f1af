//! Batch execution: turns the pending [`VertexBatch`](super::batch::VertexBatch)
//! into one backend draw call.

use super::backend::{target_projection, BatchDraw, GpuBackend};
use super::error::RenderError;
use super::stage::Stage;
use super::stats::BatchReason;

impl<B: GpuBackend> Stage<B> {
    /// Draws the pending cards and starts a new batch. No-op when empty.
    pub(super) fn flush(&mut self, reason: BatchReason) -> Result<(), RenderError> {
        let cards = self.state.batch.cards();
        if cards == 0 {
            return Ok(());
        }

        let drawn = self.submit_batch();
        // A failed batch is dropped so its cards never reach another target.
        self.state.batch.reset();
        let batch_id = self.state.batch_id;
        self.state.batch_id += 1;
        if let Err(e) = drawn {
            log::warn!("batch {batch_id} dropped ({reason:?}): {cards} cards: {e}");
            return Err(e);
        }

        log::log!(
            self.config.diag_level(),
            "batch {batch_id} flushed ({reason:?}): {cards} cards, {} slots",
            self.state.bound.len()
        );
        self.stats.record_flush(reason, cards, self.state.batch_id);
        Ok(())
    }

    fn submit_batch(&mut self) -> Result<(), RenderError> {
        let Self { backend, registry, state, programs, .. } = self;
        let filler = registry.filler();
        let filler_handle = registry.get(filler).map(|t| t.handle).ok_or(RenderError::StaleTexture(filler))?;

        // The texture being rendered into must not be sampled.
        state.bound.clear();
        for occupant in state.slots.textures() {
            let handle = if Some(occupant) == state.target.texture {
                filler_handle
            } else {
                registry.get(occupant).map_or(filler_handle, |t| t.handle)
            };
            state.bound.push(handle);
        }

        let batch = &state.batch;
        backend.draw_batch(&BatchDraw {
            program: programs.batch(),
            projection: target_projection(state.target.width, state.target.height),
            textures: &state.bound,
            positions: batch.positions(),
            uvs: batch.uvs(),
            indices: batch.indices(),
            alphas: batch.alphas(),
            vertex_count: batch.vertex_count() as u32,
        })?;
        Ok(())
    }
}
