mod common;

use std::sync::Arc;

use cardstage_engine::coords::Rect;
use cardstage_engine::filter::{BoxBlurFilter, ColorFilter, Filter};
use cardstage_engine::render::{RenderError, RendererConfig, SoftLimits};
use cardstage_engine::scene::{CacheState, Node, NodeCache, NodeId, PingPongSide, Scene, Transform};

use common::*;

const WHITE: u32 = 0xffffffff;

/// Container at (3, 2) holding a red card and a half-transparent blue one on top.
fn layered_group(scene: &mut Scene) -> NodeId {
    let root = scene.root();
    let group = scene
        .add_child(root, Node::container().with_transform(Transform::at(3.0, 2.0)))
        .unwrap();
    bitmap_at(scene, group, &solid(4, 4, RED), 0.0, 0.0);
    let blue = bitmap_at(scene, group, &solid(4, 4, BLUE), 2.0, 1.0);
    scene.node_mut(blue).unwrap().alpha = 0.5;
    group
}

#[test]
fn cached_group_matches_direct_rendering() {
    let mut direct = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    layered_group(&mut scene);
    direct.render_frame(&mut scene).unwrap();
    let expected = direct.backend().screen_rgba8();

    let mut cached = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let group = layered_group(&mut scene);
    cached
        .request_cache(&mut scene, group, Rect::new(-1.0, -1.0, 8.0, 8.0), 1.0)
        .unwrap();
    cached.render_frame(&mut scene).unwrap();

    assert_eq!(cached.stats().cache_renders, 1);
    assert_close(&cached.backend().screen_rgba8(), &expected, 1);
    assert_close(&pixel(&cached, 6, 4), &[128, 0, 128, 255], 1);
}

#[test]
fn cache_is_reused_until_invalidated() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let group = layered_group(&mut scene);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 6.0, 5.0), 1.0).unwrap();

    stage.render_frame(&mut scene).unwrap();
    let cache = scene.node(group).unwrap().cache.as_ref().unwrap();
    assert_eq!(cache.state, CacheState::Cached);
    assert_eq!(cache.render_count, 1);

    // Hiding a child does not show until the cache is refreshed.
    let red = scene.children(group)[0];
    scene.node_mut(red).unwrap().visible = false;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().cache_renders, 0);
    assert_eq!(stage.stats().batches, 1);
    assert_eq!(pixel(&stage, 4, 3), [255, 0, 0, 255]);

    assert!(stage.invalidate_cache(&mut scene, group).unwrap());
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().cache_renders, 1);
    assert_eq!(scene.node(group).unwrap().cache.as_ref().unwrap().render_count, 2);
    assert_eq!(pixel(&stage, 4, 3), [0, 0, 0, 0]);
}

#[test]
fn invalidating_an_uncached_node_reports_false() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let node = bitmap_at(&mut scene, root, &solid(2, 2, RED), 0.0, 0.0);
    assert!(!stage.invalidate_cache(&mut scene, node).unwrap());
}

#[test]
fn cache_rect_is_grown_by_filter_padding() {
    let mut stage = stage(32, 32, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let blur = BoxBlurFilter::new(2.0, 2.0, 1);
    let pad = blur.padding();
    assert!(pad > 0.0);
    let group = scene
        .add_child(root, Node::container().with_filter(Arc::new(blur)))
        .unwrap();

    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();
    let cache = scene.node(group).unwrap().cache.as_ref().unwrap();
    assert_eq!(cache.rect, Rect::new(0.0, 0.0, 4.0, 4.0).padded(pad));
}

#[test]
fn invalid_cache_requests_are_rejected() {
    let mut stage = stage_with(
        16,
        16,
        SoftLimits { max_texture_size: 32, ..SoftLimits::default() },
        RendererConfig::default(),
    );
    let mut scene = Scene::new();
    let group = layered_group(&mut scene);

    assert_eq!(
        stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 0.0, 4.0), 1.0),
        Err(RenderError::InvalidCache)
    );
    assert_eq!(
        stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), -1.0),
        Err(RenderError::InvalidCache)
    );
    assert!(matches!(
        stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 20.0, 20.0), 2.0),
        Err(RenderError::OversizedTexture { width: 40, height: 40, max: 32 })
    ));
    assert!(scene.node(group).unwrap().cache.is_none());
}

#[test]
fn cached_filter_runs_once_per_pass() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene
        .add_child(root, Node::container().with_filter(Arc::new(ColorFilter::multiply(0.0, 1.0, 1.0, 1.0))))
        .unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, WHITE), 0.0, 0.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 1);
    assert_eq!(pixel(&stage, 1, 1), [0, 255, 255, 255]);
    let targets = &scene.node(group).unwrap().cache.as_ref().unwrap().targets;
    assert!(targets.a.is_some() && targets.b.is_some());

    // Cached output is composited without running the filter again.
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 0);
    assert_eq!(pixel(&stage, 1, 1), [0, 255, 255, 255]);
}

#[test]
fn uncached_filter_reuses_pooled_targets() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene
        .add_child(root, Node::container().with_filter(Arc::new(ColorFilter::multiply(0.0, 1.0, 1.0, 1.0))))
        .unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, WHITE), 2.0, 2.0);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 1);
    assert_eq!(stage.pooled_targets(), 2);
    assert_eq!(pixel(&stage, 3, 3), [0, 255, 255, 255]);
    assert_eq!(pixel(&stage, 0, 0), [0, 0, 0, 0]);

    let created = stage.backend().stats().textures_created;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.backend().stats().textures_created, created);
    assert_eq!(stage.stats().filter_passes, 1);
    assert_eq!(pixel(&stage, 3, 3), [0, 255, 255, 255]);
}

#[test]
fn failed_render_target_skips_the_node_and_retries() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = layered_group(&mut scene);
    bitmap_at(&mut scene, root, &solid(2, 2, GREEN), 12.0, 12.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 6.0, 5.0), 1.0).unwrap();

    stage.backend_mut().limits_mut().fail_render_targets = true;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().skipped_nodes, 1);
    assert_eq!(stage.backend().live_framebuffers(), 0);
    assert_eq!(pixel(&stage, 13, 13), [0, 255, 0, 255]);
    assert_eq!(pixel(&stage, 4, 3), [0, 0, 0, 0]);
    let cache = scene.node(group).unwrap().cache.as_ref().unwrap();
    assert_eq!(cache.state, CacheState::Caching);
    assert!(cache.pending_allocation);

    stage.backend_mut().limits_mut().fail_render_targets = false;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().skipped_nodes, 0);
    assert_eq!(stage.stats().cache_renders, 1);
    let cache = scene.node(group).unwrap().cache.as_ref().unwrap();
    assert_eq!(cache.state, CacheState::Cached);
    assert!(!cache.pending_allocation);
    assert_eq!(pixel(&stage, 4, 3), [255, 0, 0, 255]);
}

#[test]
fn uncache_frees_render_targets() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let group = layered_group(&mut scene);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 6.0, 5.0), 1.0).unwrap();
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.backend().live_framebuffers(), 1);

    stage.uncache(&mut scene, group).unwrap();
    assert!(scene.node(group).unwrap().cache.is_none());
    assert_eq!(stage.backend().live_framebuffers(), 0);

    // Drawn directly again afterwards.
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().cache_renders, 0);
    assert_eq!(pixel(&stage, 4, 3), [255, 0, 0, 255]);
}

#[test]
fn cache_at_half_scale_uses_a_smaller_target() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let group = layered_group(&mut scene);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 8.0, 8.0), 0.5).unwrap();
    stage.render_frame(&mut scene).unwrap();

    let cache = scene.node(group).unwrap().cache.as_ref().unwrap();
    assert_eq!(cache.target_size(), (4, 4));
    let output = cache.output().unwrap();
    let texture = stage.registry().get(output).unwrap();
    assert_eq!((texture.width, texture.height), (4, 4));
}

fn cache_of(scene: &Scene, id: NodeId) -> &NodeCache {
    scene.node(id).unwrap().cache.as_ref().unwrap()
}

#[test]
fn chained_filters_on_a_cache_end_on_side_a() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene
        .add_child(
            root,
            Node::container()
                .with_filter(Arc::new(ColorFilter::multiply(0.0, 1.0, 1.0, 1.0)))
                .with_filter(Arc::new(ColorFilter::multiply(1.0, 0.0, 1.0, 1.0))),
        )
        .unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, WHITE), 0.0, 0.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 2);
    assert_eq!(cache_of(&scene, group).targets.last_written, Some(PingPongSide::A));
    assert_eq!(pixel(&stage, 1, 1), [0, 0, 255, 255]);
    assert_eq!(pixel(&stage, 5, 5), [0, 0, 0, 0]);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 0);
    assert_eq!(pixel(&stage, 1, 1), [0, 0, 255, 255]);
}

#[test]
fn chained_filters_without_a_cache() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene
        .add_child(
            root,
            Node::container()
                .with_filter(Arc::new(ColorFilter::multiply(0.0, 1.0, 1.0, 1.0)))
                .with_filter(Arc::new(ColorFilter::multiply(1.0, 0.0, 1.0, 1.0))),
        )
        .unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, WHITE), 2.0, 2.0);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 2);
    assert_eq!(stage.pooled_targets(), 2);
    assert_eq!(pixel(&stage, 3, 3), [0, 0, 255, 255]);
    assert_eq!(pixel(&stage, 0, 0), [0, 0, 0, 0]);
}

#[test]
fn cached_blur_runs_both_axes() {
    let mut stage = stage(12, 12, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene
        .add_child(
            root,
            Node::container()
                .with_transform(Transform::at(2.0, 2.0))
                .with_filter(Arc::new(BoxBlurFilter::new(1.0, 1.0, 1))),
        )
        .unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, WHITE), 0.0, 0.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().filter_passes, 2);
    assert_eq!(cache_of(&scene, group).targets.last_written, Some(PingPongSide::A));
    assert_eq!(pixel(&stage, 4, 4), [255, 255, 255, 255]);
    // One texel into the padding: a third covered on one axis, fully on the other.
    assert_close(&pixel(&stage, 1, 4), &[85, 85, 85, 85], 1);
}

#[test]
fn pinned_slots_leave_room_for_cached_content() {
    let mut stage = stage(8, 8, RendererConfig::default().with_batch_texture_count(2));
    stage.protect_texture_slot(0, true).unwrap();
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene
        .add_child(root, Node::container().with_transform(Transform::at(2.0, 2.0)))
        .unwrap();
    bitmap_at(&mut scene, group, &solid(4, 4, RED), 0.0, 0.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().skipped_nodes, 0);
    assert_eq!(cache_of(&scene, group).state, CacheState::Cached);
    assert_eq!(pixel(&stage, 3, 3), [255, 0, 0, 255]);
    assert!(stage.slot_table().is_pinned(0));

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().cache_renders, 0);
    assert_eq!(pixel(&stage, 3, 3), [255, 0, 0, 255]);
}

#[test]
fn cache_with_skipped_content_is_rendered_again() {
    // Filler, the outer 4x4 target and the red image; the inner 8x8 target never fits.
    let limits = SoftLimits { memory_budget: Some(4 + 64 + 64), ..SoftLimits::default() };
    let mut stage = stage_with(8, 8, limits, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let outer = scene.add_child(root, Node::container()).unwrap();
    bitmap_at(&mut scene, outer, &solid(4, 4, RED), 0.0, 0.0);
    let inner = scene.add_child(outer, Node::container()).unwrap();
    stage.request_cache(&mut scene, outer, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();
    stage.request_cache(&mut scene, inner, Rect::new(0.0, 0.0, 8.0, 8.0), 1.0).unwrap();

    for _ in 0..2 {
        stage.render_frame(&mut scene).unwrap();
        assert_eq!(stage.stats().skipped_nodes, 1);
        assert_eq!(stage.stats().cache_renders, 1);
        assert_eq!(cache_of(&scene, outer).state, CacheState::Caching);
        assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
    }
    assert_eq!(cache_of(&scene, outer).render_count, 2);

    scene.node_mut(inner).unwrap().visible = false;
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().skipped_nodes, 0);
    assert_eq!(cache_of(&scene, outer).state, CacheState::Cached);

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().cache_renders, 0);
    assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
}

#[test]
fn failed_nested_batch_does_not_reach_the_screen() {
    let limits = SoftLimits { fail_target_draws: true, ..SoftLimits::default() };
    let mut stage = stage_with(16, 16, limits, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let green = solid(4, 4, GREEN);
    let group = scene
        .add_child(root, Node::container().with_transform(Transform::at(0.0, 8.0)))
        .unwrap();
    bitmap_at(&mut scene, group, &green, 0.0, 0.0);
    bitmap_at(&mut scene, root, &green, 8.0, 0.0);
    stage.request_cache(&mut scene, group, Rect::new(0.0, 0.0, 4.0, 4.0), 1.0).unwrap();

    let batch_id = stage.batch_id();
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().skipped_nodes, 1);
    assert_eq!(stage.stats().cards, 1);
    assert_eq!(stage.batch_id(), batch_id + 2);
    assert_ne!(cache_of(&scene, group).state, CacheState::Cached);

    // Cache-space cards would land at the origin.
    assert_eq!(pixel(&stage, 1, 1), [0, 0, 0, 0]);
    assert_eq!(pixel(&stage, 1, 9), [0, 0, 0, 0]);
    assert_eq!(pixel(&stage, 9, 1), [0, 255, 0, 255]);
}
