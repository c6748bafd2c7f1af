//! Cardstage engine crate.
//!
//! A batching compositor for retained-mode 2D scene graphs: visible leaves
//! become textured cards that share draw calls across up to N texture slots,
//! with offscreen caching and ping-pong filter passes. The crate also owns the
//! wgpu device and winit runtime pieces used by the viewer.

pub mod core;
pub mod device;
pub mod time;
pub mod window;

pub mod coords;
pub mod filter;
pub mod logging;
pub mod render;
pub mod scene;
