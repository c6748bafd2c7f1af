use crate::coords::Rect;
use crate::render::TextureId;

/// Lifecycle of a node cache. A node without a cache is simply `Node::cache == None`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CacheState {
    /// Content must be (re)rendered on the next frame.
    Caching,
    /// The output texture is current.
    Cached,
}

/// Which render target of the pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PingPongSide {
    A,
    B,
}

impl PingPongSide {
    #[inline]
    pub fn other(self) -> Self {
        match self {
            PingPongSide::A => PingPongSide::B,
            PingPongSide::B => PingPongSide::A,
        }
    }
}

/// Render-target pair owned by one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingPong {
    pub a: Option<TextureId>,
    pub b: Option<TextureId>,
    pub last_written: Option<PingPongSide>,
}

impl PingPong {
    #[inline]
    pub fn get(&self, side: PingPongSide) -> Option<TextureId> {
        match side {
            PingPongSide::A => self.a,
            PingPongSide::B => self.b,
        }
    }

    #[inline]
    pub fn set(&mut self, side: PingPongSide, id: Option<TextureId>) {
        match side {
            PingPongSide::A => self.a = id,
            PingPongSide::B => self.b = id,
        }
    }

    /// Target holding the final image.
    #[inline]
    pub fn output(&self) -> Option<TextureId> {
        self.last_written.and_then(|s| self.get(s))
    }

    /// Takes both targets, leaving the pair empty.
    pub fn take(&mut self) -> impl Iterator<Item = TextureId> + use<> {
        self.last_written = None;
        [self.a.take(), self.b.take()].into_iter().flatten()
    }
}

/// Cache attached to a node through `Stage::request_cache`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCache {
    /// Cached region in node-local coordinates, already grown by filter padding.
    pub rect: Rect,
    pub scale: f32,
    pub state: CacheState,
    /// Targets still need to be allocated (first render, or after a resize/purge).
    pub pending_allocation: bool,
    pub targets: PingPong,
    /// Number of times the content has been rendered into the cache.
    pub render_count: u64,
}

impl NodeCache {
    pub fn new(rect: Rect, scale: f32) -> Self {
        Self {
            rect,
            scale,
            state: CacheState::Caching,
            pending_allocation: true,
            targets: PingPong::default(),
            render_count: 0,
        }
    }

    /// Target size in pixels.
    pub fn target_size(&self) -> (u32, u32) {
        let w = (self.rect.size.x * self.scale).ceil().max(1.0) as u32;
        let h = (self.rect.size.y * self.scale).ceil().max(1.0) as u32;
        (w, h)
    }

    #[inline]
    pub fn output(&self) -> Option<TextureId> {
        self.targets.output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_follows_last_written() {
        let mut pp = PingPong {
            a: Some(TextureId::new(1, 0)),
            b: Some(TextureId::new(2, 0)),
            last_written: None,
        };
        assert_eq!(pp.output(), None);
        pp.last_written = Some(PingPongSide::B);
        assert_eq!(pp.output(), Some(TextureId::new(2, 0)));
        let taken: Vec<_> = pp.take().collect();
        assert_eq!(taken.len(), 2);
        assert_eq!(pp, PingPong::default());
    }

    #[test]
    fn target_size_rounds_up() {
        let c = NodeCache::new(Rect::new(-2.0, 0.0, 10.5, 3.0), 2.0);
        assert_eq!(c.target_size(), (21, 6));
    }
}
