//! Geometry types shared by the scene model and the compositor.
//!
//! Canonical CPU space:
//! - pixels, origin top-left
//! - +X right, +Y down
//!
//! Backends convert to clip space using the size of the bound render target.

mod color;
mod matrix;
mod rect;
mod vec2;
mod viewport;

pub use color::{Color, ParseColorError};
pub use matrix::Matrix2D;
pub use rect::{Rect, UvRect};
pub use vec2::Vec2;
pub use viewport::Viewport;
