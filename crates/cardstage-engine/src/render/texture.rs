use crate::scene::{CancelToken, SourceId};

use super::backend::{FramebufferHandle, TextureHandle};

/// Generational handle into the texture registry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TextureId {
    index: u32,
    generation: u32,
}

impl TextureId {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// What a registered texture holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureKind {
    /// Pixels of an [`ImageSource`](crate::scene::ImageSource).
    Image(SourceId),
    /// Offscreen target (node caches, filter scratch).
    RenderTarget,
    /// 1x1 transparent placeholder bound to unused slots.
    Filler,
}

/// GPU-resident image plus bookkeeping.
#[derive(Debug)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
    /// `draw_id` of the last frame that sampled or wrote this texture.
    pub last_used: u64,
    /// Slot occupied in the current slot table, if any.
    pub active_slot: Option<usize>,
    /// Present iff `kind == RenderTarget`.
    pub framebuffer: Option<FramebufferHandle>,
    /// Source version of the uploaded pixels; `None` while blank.
    pub uploaded_version: Option<u64>,
    /// Cancels a pending deferred upload when the texture is released.
    pub cancel: Option<CancelToken>,
}

impl GpuTexture {
    #[inline]
    pub fn is_power_of_two(&self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }

    #[inline]
    pub fn is_render_target(&self) -> bool {
        self.kind == TextureKind::RenderTarget
    }
}
