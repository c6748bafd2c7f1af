//! Scene graph consumed by the stage.
//!
//! Responsibilities:
//! - own the node tree (arena + generational ids)
//! - describe what each node draws (`NodeKind`) and how it is placed (`Transform`)
//! - carry per-node cache state and filter chains
//! - deliver image pixels, possibly after the node is first drawn (`image`)

mod cache;
mod graph;
pub mod image;
mod node;
mod sprite;

pub use cache::{CacheState, NodeCache, PingPong, PingPongSide};
pub use graph::{Scene, SceneError};
pub use image::{CancelToken, ImageError, ImageSource, PixelData, SourceId, UploadEvent};
pub use node::{Bitmap, Node, NodeId, NodeKind, Sprite, Transform};
pub use sprite::{SpriteFrame, SpriteSheet};
