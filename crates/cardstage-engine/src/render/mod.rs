//! Batching compositor.
//!
//! A [`Stage`] walks a [`Scene`](crate::scene::Scene) back to front and turns
//! every visible leaf into a card (one textured quad) in a shared vertex batch.
//! A batch is drawn with a single call to the [`GpuBackend`] when it runs out
//! of vertex capacity or texture slots, when a cache/filter pass needs another
//! target, or at the end of the frame.
//!
//! Convention:
//! - vertex positions are in target pixels (top-left origin, +Y down)
//! - colours are premultiplied RGBA
//! - texture origin is top-left on every backend

pub mod backend;
mod batch;
mod config;
mod error;
mod executor;
mod pipeline;
mod registry;
pub mod shaders;
mod slots;
mod stage;
mod stats;
mod texture;

pub use backend::{
    BackendCaps, BatchDraw, CoverBlend, CoverDraw, FramebufferHandle, GpuBackend, ProgramDesc, ProgramHandle,
    SoftBackend, SoftLimits, SoftStats, TextureHandle, WgpuBackend, WgpuBackendOptions,
};
pub use batch::VertexBatch;
pub use config::{
    RendererConfig, DEFAULT_AUTO_PURGE_INTERVAL, DEFAULT_CARDS_PER_BATCH, MAX_CARDS_PER_BATCH,
    MIN_AUTO_PURGE_INTERVAL, VERTICES_PER_CARD,
};
pub use error::{BackendError, RenderError};
pub use registry::{TextureRegistry, UploadPoll};
pub use slots::{SlotInsert, SlotTable};
pub use stage::Stage;
pub use stats::{BatchReason, FlushCounts, FrameStats};
pub use texture::{GpuTexture, TextureId, TextureKind};
