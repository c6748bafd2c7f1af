//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and windows, and wires each window to a GPU
//! surface and a [`Stage`](crate::render::Stage).

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
