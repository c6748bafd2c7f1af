//! Procedural sprite field: bouncing cards plus one cached, filtered badge.

use std::sync::Arc;

use anyhow::Result;
use cardstage_engine::coords::{Color, Rect};
use cardstage_engine::filter::{BoxBlurFilter, ColorMatrixFilter};
use cardstage_engine::render::{GpuBackend, Stage};
use cardstage_engine::scene::{ImageSource, Node, NodeId, PixelData, Scene, SpriteSheet, Transform};

const SPRITE: u32 = 26;
const PALETTE: [u32; 6] = [0xf25f5cff, 0xffe066ff, 0x247ba0ff, 0x70c1b3ff, 0x9b5de5ff, 0xf15bb5ff];

/// Small xorshift generator; the field only needs repeatable scatter.
struct Rng(u64);

impl Rng {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }
}

struct Mover {
    id: NodeId,
    vx: f32,
    vy: f32,
}

pub struct Field {
    pub scene: Scene,
    movers: Vec<Mover>,
    badge: NodeId,
    spin: f32,
    bounds: (f32, f32),
}

/// Horizontal strip of coloured frames, one per palette entry.
fn palette_sheet() -> Result<Arc<SpriteSheet>> {
    let width = SPRITE * PALETTE.len() as u32;
    let mut bytes = Vec::with_capacity((width * SPRITE * 4) as usize);
    for y in 0..SPRITE {
        for x in 0..width {
            let c = Color::from_rgba_u32(PALETTE[(x / SPRITE) as usize]);
            // Rounded look: fade the corners out.
            let (lx, ly) = ((x % SPRITE) as f32 - 12.5, y as f32 - 12.5);
            let a = if lx * lx + ly * ly > 13.0 * 13.0 { 0.0 } else { c.a };
            bytes.extend([c.r, c.g, c.b, a].map(|v| (v * 255.0).round() as u8));
        }
    }
    let image = ImageSource::from_pixels(PixelData::from_straight_rgba8(width, SPRITE, bytes)?);
    Ok(Arc::new(SpriteSheet::from_grid(image, SPRITE, SPRITE)))
}

impl Field {
    pub fn new(count: usize, width: f32, height: f32) -> Result<Self> {
        let mut scene = Scene::new();
        let root = scene.root();
        let sheet = palette_sheet()?;
        let frames = sheet.frame_count().max(1);

        // A few standalone bitmaps so batches span several textures.
        let extra: Vec<ImageSource> = PALETTE
            .iter()
            .map(|&c| PixelData::solid(8, 8, Color::from_rgba_u32(c)).map(ImageSource::from_pixels))
            .collect::<Result<_, _>>()?;

        let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
        let mut movers = Vec::with_capacity(count);
        for i in 0..count {
            let node = if i % 7 == 0 {
                Node::bitmap(extra[i % extra.len()].clone())
            } else {
                Node::sprite(Arc::clone(&sheet), i % frames)
            };
            let t = Transform::at(rng.next_f32() * width, rng.next_f32() * height);
            let id = scene.add_child(root, node.with_transform(t).with_alpha(0.6 + 0.4 * rng.next_f32()))?;
            movers.push(Mover { id, vx: rng.next_f32() * 240.0 - 120.0, vy: rng.next_f32() * 240.0 - 120.0 });
        }

        let badge = scene.add_child(
            root,
            Node::container()
                .with_transform(Transform::at(width * 0.5, height * 0.5).with_registration(60.0, 60.0))
                .with_filter(Arc::new(ColorMatrixFilter::saturation(1.6)))
                .with_filter(Arc::new(BoxBlurFilter::new(2.0, 2.0, 1))),
        )?;
        for row in 0..4 {
            for col in 0..4 {
                let t = Transform::at(col as f32 * 30.0 + 2.0, row as f32 * 30.0 + 2.0);
                scene.add_child(badge, Node::sprite(Arc::clone(&sheet), (row + col) % frames).with_transform(t))?;
            }
        }

        Ok(Self { scene, movers, badge, spin: 0.0, bounds: (width, height) })
    }

    /// Caches the badge container at `scale`.
    pub fn cache_badge<B: GpuBackend>(&mut self, stage: &mut Stage<B>, scale: f32) -> Result<()> {
        stage.request_cache(&mut self.scene, self.badge, Rect::new(0.0, 0.0, 120.0, 120.0), scale)?;
        Ok(())
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.bounds = (width.max(1.0), height.max(1.0));
    }

    pub fn step(&mut self, dt: f32) {
        let (w, h) = self.bounds;
        for m in &mut self.movers {
            let Some(node) = self.scene.node_mut(m.id) else { continue };
            let t = &mut node.transform;
            t.x += m.vx * dt;
            t.y += m.vy * dt;
            if t.x < 0.0 || t.x > w - SPRITE as f32 {
                m.vx = -m.vx;
                t.x = t.x.clamp(0.0, (w - SPRITE as f32).max(0.0));
            }
            if t.y < 0.0 || t.y > h - SPRITE as f32 {
                m.vy = -m.vy;
                t.y = t.y.clamp(0.0, (h - SPRITE as f32).max(0.0));
            }
        }

        self.spin = (self.spin + dt * 45.0) % 360.0;
        if let Some(badge) = self.scene.node_mut(self.badge) {
            badge.transform.rotation = self.spin;
            badge.transform.x = w * 0.5;
            badge.transform.y = h * 0.5;
        }
    }
}
