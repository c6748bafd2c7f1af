use std::sync::Arc;

use crate::coords::{Matrix2D, Rect};
use crate::filter::Filter;

use super::cache::NodeCache;
use super::image::ImageSource;
use super::sprite::SpriteSheet;

/// Generational handle into a [`Scene`](super::Scene).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeId {
    pub(super) index: u32,
    pub(super) generation: u32,
}

/// Display-object style local transform.
///
/// Rotation and skew are in degrees. The registration point `(reg_x, reg_y)`
/// is the local point placed at `(x, y)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
    pub skew_x: f32,
    pub skew_y: f32,
    pub reg_x: f32,
    pub reg_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            skew_x: 0.0,
            skew_y: 0.0,
            reg_x: 0.0,
            reg_y: 0.0,
        }
    }
}

impl Transform {
    #[inline]
    pub fn at(x: f32, y: f32) -> Self {
        Self { x, y, ..Self::default() }
    }

    #[inline]
    pub fn with_scale(mut self, sx: f32, sy: f32) -> Self {
        self.scale_x = sx;
        self.scale_y = sy;
        self
    }

    #[inline]
    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }

    #[inline]
    pub fn with_registration(mut self, reg_x: f32, reg_y: f32) -> Self {
        self.reg_x = reg_x;
        self.reg_y = reg_y;
        self
    }

    /// Local matrix.
    pub fn to_matrix(&self) -> Matrix2D {
        let mut m = Matrix2D::IDENTITY;
        m.append_transform(
            self.x,
            self.y,
            self.scale_x,
            self.scale_y,
            self.rotation,
            self.skew_x,
            self.skew_y,
            self.reg_x,
            self.reg_y,
        );
        m
    }
}

/// A whole image or a crop of one.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub image: ImageSource,
    /// Crop in image pixels. `None` draws the full image.
    pub source_rect: Option<Rect>,
}

impl Bitmap {
    pub fn new(image: ImageSource) -> Self {
        Self { image, source_rect: None }
    }

    pub fn with_source_rect(mut self, rect: Rect) -> Self {
        self.source_rect = Some(rect);
        self
    }

    /// Local-space rectangle covered by the card.
    pub fn local_rect(&self) -> Rect {
        match self.source_rect {
            Some(r) => Rect::from_size(r.normalized().size.x, r.normalized().size.y),
            None => {
                let (w, h) = self.image.size();
                Rect::from_size(w as f32, h as f32)
            }
        }
    }
}

/// One frame of a sprite sheet.
#[derive(Debug, Clone)]
pub struct Sprite {
    pub sheet: Arc<SpriteSheet>,
    pub frame: usize,
}

impl Sprite {
    pub fn new(sheet: Arc<SpriteSheet>, frame: usize) -> Self {
        Self { sheet, frame }
    }
}

/// What a node draws.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Bitmap(Bitmap),
    Sprite(Sprite),
    /// Ordered children; index 0 is painted first (bottom).
    Container(Vec<NodeId>),
    /// Draws nothing. Useful as a placeholder or transform group without children.
    Empty,
}

/// A scene node.
#[derive(Debug, Clone)]
pub struct Node {
    pub visible: bool,
    pub alpha: f32,
    pub transform: Transform,
    /// Overrides `transform` when set.
    pub matrix: Option<Matrix2D>,
    pub kind: NodeKind,
    pub filters: Vec<Arc<dyn Filter>>,
    pub cache: Option<NodeCache>,
    pub(super) parent: Option<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            visible: true,
            alpha: 1.0,
            transform: Transform::default(),
            matrix: None,
            kind,
            filters: Vec::new(),
            cache: None,
            parent: None,
        }
    }

    pub fn bitmap(image: ImageSource) -> Self {
        Self::new(NodeKind::Bitmap(Bitmap::new(image)))
    }

    pub fn sprite(sheet: Arc<SpriteSheet>, frame: usize) -> Self {
        Self::new(NodeKind::Sprite(Sprite::new(sheet, frame)))
    }

    pub fn container() -> Self {
        Self::new(NodeKind::Container(Vec::new()))
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Local matrix: the explicit override, or the transform.
    #[inline]
    pub fn local_matrix(&self) -> Matrix2D {
        self.matrix.unwrap_or_else(|| self.transform.to_matrix())
    }

    /// `visible && alpha > 0`.
    #[inline]
    pub fn is_drawable(&self) -> bool {
        self.visible && self.alpha > 0.0
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Sum of the filters' bounds growth.
    pub fn filter_padding(&self) -> f32 {
        self.filters.iter().map(|f| f.padding()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Vec2;
    use crate::scene::image::PixelData;
    use crate::coords::Color;

    #[test]
    fn matrix_override_wins() {
        let mut n = Node::container().with_transform(Transform::at(5.0, 5.0));
        assert_eq!(n.local_matrix().transform_point(Vec2::zero()), Vec2::new(5.0, 5.0));
        n.matrix = Some(Matrix2D::translation(1.0, 2.0));
        assert_eq!(n.local_matrix().transform_point(Vec2::zero()), Vec2::new(1.0, 2.0));
    }

    #[test]
    fn bitmap_rect_uses_crop_size() {
        let img = ImageSource::from_pixels(PixelData::solid(8, 4, Color::white()).unwrap());
        let b = Bitmap::new(img.clone());
        assert_eq!(b.local_rect(), Rect::from_size(8.0, 4.0));
        let b = Bitmap::new(img).with_source_rect(Rect::new(2.0, 1.0, 3.0, 2.0));
        assert_eq!(b.local_rect(), Rect::from_size(3.0, 2.0));
    }

    #[test]
    fn zero_alpha_is_not_drawable() {
        assert!(!Node::container().with_alpha(0.0).is_drawable());
    }
}
