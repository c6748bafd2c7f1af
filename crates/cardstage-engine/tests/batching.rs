mod common;

use cardstage_engine::render::{BatchReason, RenderError, RendererConfig, SoftBackend, SoftLimits, Stage};
use cardstage_engine::scene::{Node, Scene, Transform};
use proptest::prelude::*;

use common::*;

#[test]
fn repeated_texture_after_vertex_overflow_is_restamped() {
    let mut stage = stage(16, 16, RendererConfig::default().with_max_cards_per_batch(2));
    let mut scene = Scene::new();
    let root = scene.root();
    let x = solid(4, 4, RED);
    let y = solid(4, 4, GREEN);
    bitmap_at(&mut scene, root, &x, 0.0, 0.0);
    bitmap_at(&mut scene, root, &y, 4.0, 0.0);
    bitmap_at(&mut scene, root, &x, 8.0, 0.0);

    stage.render_frame(&mut scene).unwrap();

    let s = stage.stats();
    assert_eq!(s.batches, 2);
    assert_eq!(s.flushes.get(BatchReason::VertexOverflow), 1);
    assert_eq!(s.flushes.get(BatchReason::DrawFinish), 1);
    // X and Y bound once; C reuses X's slot from the previous batch.
    assert_eq!(s.slot_binds, 2);
    assert_eq!(s.uploads, 2);
    assert_eq!(stage.backend().stats().uploads, 2);
    assert_eq!(stage.batch_id(), 3);

    assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(&stage, 5, 1), [0, 255, 0, 255]);
    assert_eq!(pixel(&stage, 9, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(&stage, 13, 1), [0, 0, 0, 0]);
}

#[test]
fn second_frame_reuses_uploaded_textures() {
    let mut stage = stage(16, 16, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let x = solid(4, 4, RED);
    bitmap_at(&mut scene, root, &x, 0.0, 0.0);

    stage.render_frame(&mut scene).unwrap();
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().uploads, 0);
    assert_eq!(stage.stats().slot_binds, 0);
    assert_eq!(stage.stats().batches, 1);
    assert_eq!(stage.draw_id(), 2);

    x.invalidate();
    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().uploads, 1);
}

#[test]
fn batch_texture_count_drops_by_four_until_it_compiles() {
    let limits = SoftLimits { max_compilable_units: Some(8), ..SoftLimits::default() };
    let stage = stage_with(8, 8, limits, RendererConfig::default().with_batch_texture_count(16));
    assert_eq!(stage.backend().stats().batch_compile_attempts, vec![16, 12, 8]);
    assert_eq!(stage.batch_texture_count(), 8);
    assert_eq!(stage.slot_table().len(), 8);
}

#[test]
fn no_compilable_batch_program_is_fatal() {
    let limits = SoftLimits { max_compilable_units: Some(0), ..SoftLimits::default() };
    let backend = SoftBackend::with_limits(8, 8, limits);
    assert!(matches!(Stage::new(backend, RendererConfig::default()), Err(RenderError::ShaderUnavailable)));
}

#[test]
fn texture_count_can_be_changed_at_runtime() {
    let mut stage = stage(8, 8, RendererConfig::default());
    assert_eq!(stage.batch_texture_count(), 16);
    stage.backend_mut().limits_mut().max_compilable_units = Some(6);
    assert_eq!(stage.update_simultaneous_texture_count(10).unwrap(), 6);
    assert_eq!(stage.slot_table().len(), 6);
    assert_eq!(stage.config().batch_texture_count, Some(6));
}

#[test]
fn round_robin_thrash_flushes_once_per_slot_set() {
    let mut stage = stage(32, 8, RendererConfig::default().with_batch_texture_count(2));
    let mut scene = Scene::new();
    let root = scene.root();
    let images = [solid(2, 2, RED), solid(2, 2, GREEN), solid(2, 2, BLUE)];
    for i in 0..6 {
        bitmap_at(&mut scene, root, &images[i % 3], i as f32 * 4.0, 0.0);
    }

    stage.render_frame(&mut scene).unwrap();

    let s = stage.stats();
    assert_eq!(s.cards, 6);
    assert_eq!(s.batches, 3);
    assert_eq!(s.flushes.get(BatchReason::TextureOverflow), 2);
    assert_eq!(s.slot_binds, 6);
    // Painter order survives the flush boundaries.
    assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(&stage, 9, 1), [0, 0, 255, 255]);
    assert_eq!(pixel(&stage, 21, 1), [0, 0, 255, 255]);
}

#[test]
fn overlapping_cards_composite_back_to_front() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let red = solid(4, 4, RED);
    let blue = solid(4, 4, BLUE);
    scene
        .add_child(root, Node::bitmap(red).with_transform(Transform::at(0.0, 0.0)))
        .unwrap();
    scene
        .add_child(root, Node::bitmap(blue).with_transform(Transform::at(2.0, 0.0)).with_alpha(0.5))
        .unwrap();

    stage.render_frame(&mut scene).unwrap();

    let [r, g, b, a] = pixel(&stage, 3, 1);
    // Blue at half alpha over opaque red.
    assert_eq!(a, 255);
    assert_eq!(g, 0);
    assert!(r.abs_diff(128) <= 1, "r = {r}");
    assert!(b.abs_diff(128) <= 1, "b = {b}");
    assert_eq!(pixel(&stage, 1, 1), [255, 0, 0, 255]);
    let [r, _, b, a] = pixel(&stage, 5, 1);
    assert_eq!(r, 0);
    assert!(b.abs_diff(128) <= 1 && a.abs_diff(128) <= 1);
}

#[test]
fn invisible_subtrees_emit_nothing() {
    let mut stage = stage(8, 8, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    let group = scene.add_child(root, Node::container()).unwrap();
    let x = solid(2, 2, RED);
    for i in 0..5 {
        bitmap_at(&mut scene, group, &x, i as f32, 0.0);
    }
    scene.node_mut(group).unwrap().visible = false;

    stage.render_frame(&mut scene).unwrap();
    assert_eq!(stage.stats().cards, 0);
    assert_eq!(stage.stats().batches, 0);
    assert_eq!(stage.backend().stats().draw_calls, 0);
}

#[test]
fn oversized_texture_skips_only_that_node() {
    let limits = SoftLimits { max_texture_size: 64, ..SoftLimits::default() };
    let mut stage = stage_with(16, 16, limits, RendererConfig::default());
    let mut scene = Scene::new();
    let root = scene.root();
    bitmap_at(&mut scene, root, &solid(100, 4, GREEN), 0.0, 0.0);
    bitmap_at(&mut scene, root, &solid(4, 4, RED), 0.0, 8.0);

    stage.render_frame(&mut scene).unwrap();

    assert_eq!(stage.stats().skipped_nodes, 1);
    assert_eq!(stage.stats().cards, 1);
    assert_eq!(pixel(&stage, 1, 1), [0, 0, 0, 0]);
    assert_eq!(pixel(&stage, 1, 9), [255, 0, 0, 255]);
}

#[test]
fn slot_protection_is_range_checked() {
    let mut stage = stage(8, 8, RendererConfig::default().with_batch_texture_count(4));
    assert_eq!(
        stage.protect_texture_slot(4, true),
        Err(RenderError::SlotOutOfRange { index: 4, count: 4 })
    );
    stage.protect_texture_slot(3, true).unwrap();
    assert!(stage.slot_table().is_pinned(3));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_leaf_lands_in_a_batch_within_capacity(
        leaves in proptest::collection::vec(0usize..6, 0..60),
        capacity in 1usize..8,
        units in 1u32..5,
    ) {
        let config = RendererConfig::default()
            .with_max_cards_per_batch(capacity)
            .with_batch_texture_count(units);
        let mut stage = stage(16, 16, config);
        let images: Vec<_> = (0..6).map(|i| solid(2, 2, 0x102030ff + i * 0x10000)).collect();
        let mut scene = Scene::new();
        let root = scene.root();
        for (i, &img) in leaves.iter().enumerate() {
            bitmap_at(&mut scene, root, &images[img], (i % 8) as f32 * 2.0, (i / 8) as f32 * 2.0);
        }

        stage.render_frame(&mut scene).unwrap();

        let s = stage.stats();
        let cards = leaves.len();
        prop_assert_eq!(s.cards as usize, cards);
        prop_assert_eq!(u64::from(s.batches), stage.backend().stats().draw_calls);
        prop_assert_eq!(stage.backend().stats().vertices, cards as u64 * 6);
        prop_assert!(s.batches as usize >= cards.div_ceil(capacity));
        let mut distinct = leaves.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert!(s.batches as usize >= distinct.len().div_ceil(units as usize));
        prop_assert_eq!(s.flushes.total(), s.batches);
    }
}
