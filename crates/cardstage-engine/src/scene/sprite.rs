use crate::coords::{Rect, UvRect, Vec2};

use super::image::ImageSource;

/// One frame of a [`SpriteSheet`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteFrame {
    /// Index into [`SpriteSheet::images`].
    pub image: usize,
    /// Crop in image pixels.
    pub rect: Rect,
    /// Registration point inside the frame.
    pub reg: Vec2,
}

/// Frames cut from one or more images.
///
/// UV rectangles are computed once per frame; call [`SpriteSheet::rebuild_uv_rects`]
/// after an image changes size.
#[derive(Debug, Clone)]
pub struct SpriteSheet {
    images: Vec<ImageSource>,
    frames: Vec<SpriteFrame>,
    uv_rects: Vec<Option<UvRect>>,
}

impl SpriteSheet {
    pub fn new(images: Vec<ImageSource>, frames: Vec<SpriteFrame>) -> Self {
        let mut sheet = Self { images, frames, uv_rects: Vec::new() };
        sheet.rebuild_uv_rects();
        sheet
    }

    /// Cuts a single image into a grid of `frame_w` x `frame_h` cells, row by row.
    pub fn from_grid(image: ImageSource, frame_w: u32, frame_h: u32) -> Self {
        let (w, h) = image.size();
        let cols = if frame_w == 0 { 0 } else { w / frame_w };
        let rows = if frame_h == 0 { 0 } else { h / frame_h };

        let mut frames = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                frames.push(SpriteFrame {
                    image: 0,
                    rect: Rect::new(
                        (col * frame_w) as f32,
                        (row * frame_h) as f32,
                        frame_w as f32,
                        frame_h as f32,
                    ),
                    reg: Vec2::zero(),
                });
            }
        }
        Self::new(vec![image], frames)
    }

    /// Recomputes every frame's UV rectangle from the current image sizes.
    ///
    /// Frames referring to a missing image get no UVs and are not drawn.
    pub fn rebuild_uv_rects(&mut self) {
        self.uv_rects = self
            .frames
            .iter()
            .map(|f| {
                let img = self.images.get(f.image)?;
                let (w, h) = img.size();
                f.rect.to_uv(w as f32, h as f32)
            })
            .collect();
    }

    #[inline]
    pub fn images(&self) -> &[ImageSource] {
        &self.images
    }

    #[inline]
    pub fn frames(&self) -> &[SpriteFrame] {
        &self.frames
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Image, UV rectangle and local rectangle for `frame`.
    pub fn resolve(&self, frame: usize) -> Option<(&ImageSource, UvRect, Rect)> {
        let f = self.frames.get(frame)?;
        let uv = (*self.uv_rects.get(frame)?)?;
        let img = self.images.get(f.image)?;
        let r = f.rect.normalized();
        Some((img, uv, Rect::new(-f.reg.x, -f.reg.y, r.size.x, r.size.y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Color;
    use crate::scene::image::PixelData;

    fn sheet_image(w: u32, h: u32) -> ImageSource {
        ImageSource::from_pixels(PixelData::solid(w, h, Color::white()).unwrap())
    }

    #[test]
    fn grid_frames_cover_image() {
        let sheet = SpriteSheet::from_grid(sheet_image(64, 32), 32, 16);
        assert_eq!(sheet.frame_count(), 4);
        let (_, uv, rect) = sheet.resolve(3).unwrap();
        assert_eq!(uv, UvRect { left: 0.5, top: 0.5, right: 1.0, bottom: 1.0 });
        assert_eq!(rect, Rect::new(0.0, 0.0, 32.0, 16.0));
    }

    #[test]
    fn registration_offsets_local_rect() {
        let sheet = SpriteSheet::new(
            vec![sheet_image(10, 10)],
            vec![SpriteFrame { image: 0, rect: Rect::new(0.0, 0.0, 10.0, 10.0), reg: Vec2::new(5.0, 5.0) }],
        );
        let (_, _, rect) = sheet.resolve(0).unwrap();
        assert_eq!(rect, Rect::new(-5.0, -5.0, 10.0, 10.0));
    }

    #[test]
    fn dangling_frames_do_not_resolve() {
        let sheet = SpriteSheet::new(
            vec![sheet_image(4, 4)],
            vec![SpriteFrame { image: 7, rect: Rect::from_size(1.0, 1.0), reg: Vec2::zero() }],
        );
        assert!(sheet.resolve(0).is_none());
        assert!(sheet.resolve(5).is_none());
    }
}
