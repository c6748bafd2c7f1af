mod common;

use std::thread;

use cardstage_engine::coords::{Color, Rect};
use cardstage_engine::logging::{init_logging, LoggingConfig};
use cardstage_engine::render::{RendererConfig, SoftBackend, SoftLimits, Stage};
use cardstage_engine::scene::{ImageSource, Node, PixelData, Scene};

use common::*;

fn render_frames(stage: &mut Stage<SoftBackend>, scene: &mut Scene, frames: usize) {
    for _ in 0..frames {
        stage.render_frame(scene).unwrap();
    }
}

#[test]
fn purge_releases_textures_idle_past_the_threshold() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let x = solid(4, 4, RED);
    let y = solid(4, 4, GREEN);
    bitmap_at(&mut scene, root, &x, 0.0, 0.0);
    let y_node = bitmap_at(&mut scene, root, &y, 4.0, 0.0);

    stage.render_frame(&mut scene).unwrap();
    scene.node_mut(y_node).unwrap().visible = false;
    render_frames(&mut stage, &mut scene, 4);
    assert_eq!(stage.draw_id(), 5);
    assert_eq!(stage.backend().live_textures(), 3);

    assert_eq!(stage.purge_unused(3), 1);
    assert!(stage.registry().lookup(y.id()).is_none());
    assert!(stage.registry().lookup(x.id()).is_some());
    assert!(stage.registry().contains(stage.registry().filler()));
    assert_eq!(stage.backend().live_textures(), 2);
    assert_eq!(stage.stats().purged, 1);

    // Drawing it again re-uploads.
    scene.node_mut(y_node).unwrap().visible = true;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().uploads, 1);
    assert_eq!(pixel(&stage, 5, 1), [0, 255, 0, 255]);
}

#[test]
fn purge_keeps_textures_in_pinned_slots() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let x = solid(4, 4, RED);
    let y = solid(4, 4, GREEN);
    let x_node = bitmap_at(&mut scene, root, &x, 0.0, 0.0);
    let y_node = bitmap_at(&mut scene, root, &y, 4.0, 0.0);

    stage.render_frame(&mut scene).unwrap();
    scene.node_mut(x_node).unwrap().visible = false;
    scene.node_mut(y_node).unwrap().visible = false;
    render_frames(&mut stage, &mut scene, 4);

    let y_tex = stage.registry().lookup(y.id()).unwrap();
    let y_slot = stage.registry().get(y_tex).unwrap().active_slot.unwrap();
    stage.protect_texture_slot(y_slot, true).unwrap();

    assert_eq!(stage.purge_unused(3), 1);
    assert!(stage.registry().lookup(x.id()).is_none());
    assert_eq!(stage.registry().lookup(y.id()), Some(y_tex));

    stage.protect_texture_slot(y_slot, false).unwrap();
    assert_eq!(stage.purge_unused(3), 1);
    assert_eq!(stage.registry().len(), 1);
}

#[test]
fn purge_never_releases_the_filler() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    render_frames(&mut stage, &mut scene, 3);
    assert_eq!(stage.purge_unused(0), 0);
    assert_eq!(stage.registry().len(), 1);
    assert_eq!(stage.backend().live_textures(), 1);
}

#[test]
fn auto_purge_runs_every_half_interval() {
    init_logging(LoggingConfig::for_tests());
    let backend = SoftBackend::new(16, 16);
    let mut stage = Stage::new(backend, RendererConfig::default().with_auto_purge(10)).unwrap();
    stage.update_viewport(16, 16);
    let mut scene = Scene::new();
    let root = scene.root();
    let x = solid(4, 4, RED);
    let y = solid(4, 4, GREEN);
    bitmap_at(&mut scene, root, &x, 0.0, 0.0);
    let y_node = bitmap_at(&mut scene, root, &y, 4.0, 0.0);

    stage.render_frame(&mut scene).unwrap();
    scene.node_mut(y_node).unwrap().visible = false;
    render_frames(&mut stage, &mut scene, 13);
    assert_eq!(stage.draw_id(), 14);
    assert!(stage.registry().lookup(y.id()).is_some());

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().purged, 1);
    assert!(stage.registry().lookup(y.id()).is_none());
    assert!(stage.registry().lookup(x.id()).is_some());
}

#[test]
fn deferred_pixels_are_uploaded_by_the_next_frame() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let source = ImageSource::pending(4, 4);
    bitmap_at(&mut scene, root, &source, 0.0, 0.0);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().uploads, 0);
    assert_eq!(stage.stats().cards, 1);
    assert_eq!(pixel(&stage, 1, 1), [0, 0, 0, 0]);

    let loader = source.clone();
    thread::spawn(move || {
        loader.fulfil(PixelData::solid(4, 4, Color::from_rgba_u32(RED)).unwrap());
    })
    .join()
    .unwrap();

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().uploads, 1);
    assert_eq!(stage.stats().stale_uploads_skipped, 0);
    assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
}

#[test]
fn upload_for_a_released_texture_is_dropped() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let source = ImageSource::pending(4, 4);
    let node = bitmap_at(&mut scene, root, &source, 0.0, 0.0);
    stage.render_frame(&mut scene).unwrap();

    source.fulfil(PixelData::solid(4, 4, Color::from_rgba_u32(RED)).unwrap());
    assert!(stage.release_source(&source));
    assert!(!stage.release_source(&source));
    scene.node_mut(node).unwrap().visible = false;

    let uploads = stage.backend().stats().uploads;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().stale_uploads_skipped, 1);
    assert_eq!(stage.stats().uploads, 0);
    assert_eq!(stage.backend().stats().uploads, uploads);
}

#[test]
fn release_texture_frees_images_and_cache_targets() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene.add_child(root, Node::container()).unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, RED), 0.0, 0.0);
    bitmap_at(&mut scene, group, &solid(4, 4, BLUE), 4.0, 0.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 8.0, 4.0), 1.0).unwrap();
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.backend().live_textures(), 4);
    assert_eq!(stage.backend().live_framebuffers(), 1);

    stage.release_texture(&mut scene, group).unwrap();
    assert_eq!(stage.registry().len(), 1);
    assert_eq!(stage.backend().live_textures(), 1);
    assert_eq!(stage.backend().live_framebuffers(), 0);
    let cache = scene.node(group).unwrap().cache.as_ref().unwrap();
    assert!(cache.pending_allocation);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().uploads, 2);
    assert_eq!(stage.stats().cache_renders, 1);
    assert_eq!(pixel(&stage, 5, 1), [0, 0, 255, 255]);
}

#[test]
fn remove_node_detaches_and_frees() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene.add_child(root, Node::container()).unwrap();
    let a = bitmap_at(&mut scene, group, &solid(4, 4, RED), 0.0, 0.0);
    let keep = solid(4, 4, GREEN);
    bitmap_at(&mut scene, root, &keep, 8.0, 0.0);
    stage.render_frame(&mut scene).unwrap();

    let removed = stage.remove_node(&mut scene, group).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&a));
    assert!(!scene.contains(group));
    assert_eq!(stage.registry().len(), 2);
    assert!(stage.registry().lookup(keep.id()).is_some());

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(pixel(&stage, 1, 1), [0, 0, 0, 0]);
    assert_eq!(pixel(&stage, 9, 1), [0, 255, 0, 255]);
}

#[test]
fn out_of_memory_falls_back_to_the_filler() {
    // Filler (4 bytes) plus one 4x4 image.
    let limits = SoftLimits { memory_budget: Some(4 + 64), ..SoftLimits::default() };
    let mut stage = stage_with(16, 16, limits, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let first = solid(4, 4, RED);
    let second = solid(4, 4, GREEN);
    let first_node = bitmap_at(&mut scene, root, &first, 0.0, 0.0);
    bitmap_at(&mut scene, root, &second, 4.0, 0.0);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().skipped_nodes, 0);
    assert_eq!(stage.stats().cards, 2);
    assert!(stage.registry().lookup(second.id()).is_none());
    assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(&stage, 5, 1), [0, 0, 0, 0]);

    // Freeing the first image makes room for the second.
    scene.node_mut(first_node).unwrap().visible = false;
    assert!(stage.release_source(&first));
    stage.render_frame(&mut scene).unwrap();
    assert!(stage.registry().lookup(second.id()).is_some());
    assert_eq!(pixel(&stage, 5, 1), [0, 255, 0, 255]);
}
