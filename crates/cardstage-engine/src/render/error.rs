use super::texture::TextureId;

/// Failure reported by a [`GpuBackend`](super::GpuBackend) call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("texture {width}x{height} exceeds the maximum dimension {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),
    #[error("unknown backend handle")]
    UnknownHandle,
    #[error("GPU device lost")]
    DeviceLost,
}

/// Errors surfaced by the stage.
///
/// Only `Backend(DeviceLost)` and `ShaderUnavailable` abort a frame; the
/// per-node variants are logged by the traversal and the node is skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("texture {width}x{height} exceeds the maximum texture size {max}")]
    OversizedTexture { width: u32, height: u32, max: u32 },

    #[error("texture slot {index} is out of range (0..{count})")]
    SlotOutOfRange { index: usize, count: usize },

    #[error("every texture slot is pinned")]
    SlotsExhausted,

    #[error("no batch program could be compiled, even with a single texture unit")]
    ShaderUnavailable,

    #[error("render target {width}x{height} could not be allocated")]
    RenderTargetUnavailable { width: u32, height: u32 },

    #[error("stale texture handle {0:?}")]
    StaleTexture(TextureId),

    #[error("invalid cache rectangle or scale")]
    InvalidCache,

    #[error(transparent)]
    Scene(#[from] crate::scene::SceneError),
}

impl RenderError {
    /// Whether the error only concerns the current node.
    pub fn is_node_local(&self) -> bool {
        !matches!(
            self,
            RenderError::Backend(BackendError::DeviceLost) | RenderError::ShaderUnavailable
        )
    }
}
