//! Image sources and deferred pixel delivery.
//!
//! An [`ImageSource`] is what bitmap and sprite nodes point at. Its pixels may
//! arrive later (network fetch, background decode); the texture registry
//! subscribes to such sources and receives an [`UploadEvent`] over a channel
//! once [`ImageSource::fulfil`] is called.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;

use crate::coords::Color;
use crate::render::TextureId;

/// Errors produced while building pixel data.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("image has zero size")]
    ZeroSize,
}

// ── pixel data ────────────────────────────────────────────────────────────

/// Premultiplied RGBA8 pixels, row-major, top row first.
///
/// Cloning is cheap (shared buffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelData {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl PixelData {
    /// Wraps pixels that are already premultiplied.
    pub fn from_premultiplied_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::ZeroSize);
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ImageError::SizeMismatch { expected, actual: data.len() });
        }
        Ok(Self { width, height, data: data.into() })
    }

    /// Premultiplies straight-alpha RGBA8 pixels.
    pub fn from_straight_rgba8(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self, ImageError> {
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as u32;
            if a == 255 {
                continue;
            }
            for c in &mut px[..3] {
                *c = ((*c as u32 * a + 127) / 255) as u8;
            }
        }
        Self::from_premultiplied_rgba8(width, height, data)
    }

    pub fn from_rgba_image(img: &image::RgbaImage) -> Result<Self, ImageError> {
        Self::from_straight_rgba8(img.width(), img.height(), img.as_raw().clone())
    }

    /// Decodes an encoded image (PNG/JPEG).
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        let img = image::load_from_memory(bytes)?;
        Self::from_rgba_image(&img.to_rgba8())
    }

    /// A `width` x `height` image filled with `color`.
    pub fn solid(width: u32, height: u32, color: Color) -> Result<Self, ImageError> {
        let [r, g, b, a] = color.premultiplied();
        let texel = [r, g, b, a].map(|c| (c * 255.0).round() as u8);
        let data = texel.repeat(width as usize * height as usize);
        Self::from_premultiplied_rgba8(width, height, data)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Premultiplied texel at `(x, y)`. Out-of-range coordinates are clamped.
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let i = (y * self.width as usize + x) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

// ── cancellation ──────────────────────────────────────────────────────────

/// Shared flag flipped when the texture waiting on an upload is released.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── image source ──────────────────────────────────────────────────────────

/// Process-unique identity of an [`ImageSource`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Delivered to the registry when a pending source receives its pixels.
#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub source: SourceId,
    pub texture: TextureId,
    pub token: CancelToken,
    pub version: u64,
    pub pixels: PixelData,
}

#[derive(Debug)]
struct Subscriber {
    sender: Sender<UploadEvent>,
    texture: TextureId,
    token: CancelToken,
}

#[derive(Debug)]
struct SourceState {
    width: u32,
    height: u32,
    pixels: Option<PixelData>,
    /// Bumped on every content change; 0 means "no pixels yet".
    version: u64,
    subscribers: Vec<Subscriber>,
}

#[derive(Debug)]
struct SourceInner {
    id: SourceId,
    state: Mutex<SourceState>,
}

/// Shared handle to image content referenced by scene nodes.
#[derive(Debug, Clone)]
pub struct ImageSource {
    inner: Arc<SourceInner>,
}

impl PartialEq for ImageSource {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ImageSource {}

impl ImageSource {
    fn with_state(width: u32, height: u32, pixels: Option<PixelData>) -> Self {
        let version = u64::from(pixels.is_some());
        Self {
            inner: Arc::new(SourceInner {
                id: SourceId::next(),
                state: Mutex::new(SourceState {
                    width,
                    height,
                    pixels,
                    version,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    /// A ready source.
    pub fn from_pixels(pixels: PixelData) -> Self {
        Self::with_state(pixels.width(), pixels.height(), Some(pixels))
    }

    /// Decodes encoded bytes into a ready source.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        PixelData::decode(bytes).map(Self::from_pixels)
    }

    /// A source whose pixels are still loading. `width`/`height` size the texture.
    pub fn pending(width: u32, height: u32) -> Self {
        Self::with_state(width, height, None)
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn size(&self) -> (u32, u32) {
        let s = self.state();
        (s.width, s.height)
    }

    pub fn version(&self) -> u64 {
        self.state().version
    }

    pub fn is_ready(&self) -> bool {
        self.state().pixels.is_some()
    }

    /// Current pixels and their version, if loaded.
    pub fn pixels(&self) -> Option<(PixelData, u64)> {
        let s = self.state();
        s.pixels.clone().map(|p| (p, s.version))
    }

    /// Delivers the pixels of a pending source. Safe to call from any thread.
    ///
    /// Every live subscriber receives an [`UploadEvent`]; subscribers whose
    /// receiver is gone are dropped.
    pub fn fulfil(&self, pixels: PixelData) {
        let mut s = self.state();
        s.width = pixels.width();
        s.height = pixels.height();
        s.version += 1;
        s.pixels = Some(pixels.clone());

        let version = s.version;
        let source = self.inner.id;
        for sub in s.subscribers.drain(..) {
            if sub.token.is_cancelled() {
                continue;
            }
            let event = UploadEvent {
                source,
                texture: sub.texture,
                token: sub.token,
                version,
                pixels: pixels.clone(),
            };
            if sub.sender.send(event).is_err() {
                log::trace!("upload subscriber for {source:?} is gone");
            }
        }
    }

    /// Replaces the content; the next batch insertion re-uploads it.
    pub fn update(&self, pixels: PixelData) {
        let mut s = self.state();
        s.width = pixels.width();
        s.height = pixels.height();
        s.pixels = Some(pixels);
        s.version += 1;
    }

    /// Flags the content as changed without replacing it.
    pub fn invalidate(&self) {
        let mut s = self.state();
        if s.pixels.is_some() {
            s.version += 1;
        }
    }

    /// Registers interest in the pixels of a pending source.
    ///
    /// Returns `false` (and registers nothing) when the source is already ready.
    pub(crate) fn subscribe(&self, sender: Sender<UploadEvent>, texture: TextureId, token: CancelToken) -> bool {
        let mut s = self.state();
        if s.pixels.is_some() {
            return false;
        }
        s.subscribers.retain(|sub| !sub.token.is_cancelled());
        s.subscribers.push(Subscriber { sender, texture, token });
        true
    }
}
