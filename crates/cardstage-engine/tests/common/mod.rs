#![allow(dead_code)]

use cardstage_engine::coords::Color;
use cardstage_engine::logging::{init_logging, LoggingConfig};
use cardstage_engine::render::{RendererConfig, SoftBackend, SoftLimits, Stage};
use cardstage_engine::scene::{ImageSource, Node, NodeId, PixelData, Scene, Transform};

pub const RED: u32 = 0xff0000ff;
pub const GREEN: u32 = 0x00ff00ff;
pub const BLUE: u32 = 0x0000ffff;

pub fn stage_with(width: u32, height: u32, limits: SoftLimits, config: RendererConfig) -> Stage<SoftBackend> {
    init_logging(LoggingConfig::for_tests());
    let mut stage = Stage::new(SoftBackend::with_limits(width, height, limits), config.with_auto_purge(-1))
        .unwrap_or_else(|e| panic!("stage creation failed: {e}"));
    stage.update_viewport(width, height);
    stage
}

pub fn stage(width: u32, height: u32, config: RendererConfig) -> Stage<SoftBackend> {
    stage_with(width, height, SoftLimits::default(), config)
}

pub fn solid(width: u32, height: u32, rgba: u32) -> ImageSource {
    ImageSource::from_pixels(PixelData::solid(width, height, Color::from_rgba_u32(rgba)).unwrap())
}

pub fn bitmap_at(scene: &mut Scene, parent: NodeId, image: &ImageSource, x: f32, y: f32) -> NodeId {
    scene
        .add_child(parent, Node::bitmap(image.clone()).with_transform(Transform::at(x, y)))
        .unwrap()
}

/// Premultiplied RGBA8 of the visible surface at `(x, y)`.
pub fn pixel(stage: &Stage<SoftBackend>, x: u32, y: u32) -> [u8; 4] {
    let px = stage.backend().screen().get(x, y).unwrap();
    px.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

pub fn assert_close(a: &[u8], b: &[u8], tolerance: u8) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!(x.abs_diff(*y) <= tolerance, "byte {i}: {x} vs {y}");
    }
}
