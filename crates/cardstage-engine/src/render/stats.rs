/// Why a batch was flushed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BatchReason {
    /// The card capacity was reached.
    VertexOverflow,
    /// No free texture slot for the next card.
    TextureOverflow,
    /// End of the frame.
    DrawFinish,
    /// A cache or filter pass switched render targets.
    CachePass,
}

/// Flush counts per [`BatchReason`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct FlushCounts {
    pub vertex_overflow: u32,
    pub texture_overflow: u32,
    pub draw_finish: u32,
    pub cache_pass: u32,
}

impl FlushCounts {
    #[inline]
    pub fn total(&self) -> u32 {
        self.vertex_overflow + self.texture_overflow + self.draw_finish + self.cache_pass
    }

    #[inline]
    pub fn get(&self, reason: BatchReason) -> u32 {
        match reason {
            BatchReason::VertexOverflow => self.vertex_overflow,
            BatchReason::TextureOverflow => self.texture_overflow,
            BatchReason::DrawFinish => self.draw_finish,
            BatchReason::CachePass => self.cache_pass,
        }
    }

    fn bump(&mut self, reason: BatchReason) {
        match reason {
            BatchReason::VertexOverflow => self.vertex_overflow += 1,
            BatchReason::TextureOverflow => self.texture_overflow += 1,
            BatchReason::DrawFinish => self.draw_finish += 1,
            BatchReason::CachePass => self.cache_pass += 1,
        }
    }
}

/// Counters for the most recent frame.
///
/// `draw_id` and `batch_id` are the running totals; everything else is reset
/// at the start of each `render_frame`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_id: u64,
    pub batch_id: u64,
    /// Draw calls issued by the batch executor.
    pub batches: u32,
    pub cards: u32,
    pub flushes: FlushCounts,
    /// Textures newly placed into a slot.
    pub slot_binds: u32,
    pub uploads: u32,
    pub cache_renders: u32,
    pub filter_passes: u32,
    pub purged: u32,
    pub stale_uploads_skipped: u32,
    /// Nodes dropped because of a node-local error.
    pub skipped_nodes: u32,
}

impl FrameStats {
    pub(crate) fn begin(&mut self, draw_id: u64, batch_id: u64) {
        *self = Self { draw_id, batch_id, ..Self::default() };
    }

    pub(crate) fn record_flush(&mut self, reason: BatchReason, cards: usize, batch_id: u64) {
        self.batches += 1;
        self.cards += cards as u32;
        self.flushes.bump(reason);
        self.batch_id = batch_id;
    }

    /// Cards per draw call; 0 when nothing was drawn.
    pub fn cards_per_batch(&self) -> f32 {
        if self.batches == 0 { 0.0 } else { self.cards as f32 / self.batches as f32 }
    }
}
