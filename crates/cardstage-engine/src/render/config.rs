use crate::coords::Color;

/// Vertices emitted per card (two triangles).
pub const VERTICES_PER_CARD: usize = 6;

/// 16-bit index range bounds the cards a single batch can address.
pub const MAX_CARDS_PER_BATCH: usize = 65536 / VERTICES_PER_CARD;

pub const DEFAULT_CARDS_PER_BATCH: usize = 10_000;
pub const DEFAULT_AUTO_PURGE_INTERVAL: u32 = 1200;
pub const MIN_AUTO_PURGE_INTERVAL: u32 = 10;

/// Stage configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Cards per draw call before a forced flush.
    pub max_cards_per_batch: usize,

    /// Texture units per batch. `None` uses the backend maximum.
    ///
    /// Reduced automatically (by 4, down to 1) while the batch program fails to compile.
    pub batch_texture_count: Option<u32>,

    /// Draws between purge sweeps threshold. `None` disables auto purge.
    pub auto_purge_interval: Option<u32>,

    pub clear_color: Color,

    /// Clear the destination at the start of each `render_frame`.
    pub auto_clear: bool,

    /// Linear texture filtering (the wgpu backend); nearest otherwise.
    pub antialias: bool,

    /// Log batch/flush diagnostics at `debug` instead of `trace`.
    pub vocal_debug: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_cards_per_batch: DEFAULT_CARDS_PER_BATCH,
            batch_texture_count: None,
            auto_purge_interval: Some(DEFAULT_AUTO_PURGE_INTERVAL),
            clear_color: Color::transparent(),
            auto_clear: true,
            antialias: false,
            vocal_debug: false,
        }
    }
}

impl RendererConfig {
    pub fn with_max_cards_per_batch(mut self, cards: usize) -> Self {
        self.max_cards_per_batch = cards;
        self
    }

    pub fn with_batch_texture_count(mut self, count: u32) -> Self {
        self.batch_texture_count = Some(count);
        self
    }

    /// `-1` (or any negative value) disables auto purge; other values are
    /// clamped to at least 10 draws.
    pub fn with_auto_purge(mut self, interval: i64) -> Self {
        self.auto_purge_interval = if interval < 0 {
            None
        } else {
            Some(interval.clamp(MIN_AUTO_PURGE_INTERVAL as i64, u32::MAX as i64) as u32)
        };
        self
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_auto_clear(mut self, auto_clear: bool) -> Self {
        self.auto_clear = auto_clear;
        self
    }

    pub fn with_antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn with_vocal_debug(mut self, vocal: bool) -> Self {
        self.vocal_debug = vocal;
        self
    }

    /// Clamps every field into its supported range.
    pub fn normalized(mut self) -> Self {
        self.max_cards_per_batch = self.max_cards_per_batch.clamp(1, MAX_CARDS_PER_BATCH);
        self.batch_texture_count = self.batch_texture_count.map(|n| n.max(1));
        self.auto_purge_interval = self.auto_purge_interval.map(|n| n.max(MIN_AUTO_PURGE_INTERVAL));
        self
    }

    /// Level used for per-batch diagnostics.
    #[inline]
    pub(crate) fn diag_level(&self) -> log::Level {
        if self.vocal_debug { log::Level::Debug } else { log::Level::Trace }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cards_are_clamped_to_index_range() {
        let c = RendererConfig::default().with_max_cards_per_batch(1_000_000).normalized();
        assert_eq!(c.max_cards_per_batch, 10_922);
        let c = RendererConfig::default().with_max_cards_per_batch(0).normalized();
        assert_eq!(c.max_cards_per_batch, 1);
    }

    #[test]
    fn auto_purge_setting() {
        assert_eq!(RendererConfig::default().auto_purge_interval, Some(1200));
        assert_eq!(RendererConfig::default().with_auto_purge(-1).auto_purge_interval, None);
        assert_eq!(RendererConfig::default().with_auto_purge(3).auto_purge_interval, Some(10));
        assert_eq!(RendererConfig::default().with_auto_purge(500).auto_purge_interval, Some(500));
    }

    #[test]
    fn vocal_debug_raises_level() {
        assert_eq!(RendererConfig::default().diag_level(), log::Level::Trace);
        assert_eq!(RendererConfig::default().with_vocal_debug(true).diag_level(), log::Level::Debug);
    }
}
