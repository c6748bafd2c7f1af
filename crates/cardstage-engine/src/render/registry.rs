//! GPU texture registry.
//!
//! Owns every GPU texture the stage creates: one per image source, the render
//! targets of caches and filter passes, and the 1x1 filler. Entries live in a
//! generational slab so a released id can never alias a newer texture.
//!
//! Deferred uploads arrive over a channel: a pending source is subscribed with
//! a [`CancelToken`] and later delivers an [`UploadEvent`], drained by
//! [`TextureRegistry::poll_uploads`] at the start of a frame.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};

use crate::scene::{CancelToken, ImageSource, PixelData, SourceId, UploadEvent};

use super::backend::GpuBackend;
use super::error::RenderError;
use super::texture::{GpuTexture, TextureId, TextureKind};

#[derive(Debug)]
struct Entry {
    generation: u32,
    texture: Option<GpuTexture>,
}

/// Outcome of one [`TextureRegistry::poll_uploads`] call.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct UploadPoll {
    pub uploaded: u32,
    /// Events for released textures or cancelled requests.
    pub stale: u32,
}

#[derive(Debug)]
pub struct TextureRegistry {
    entries: Vec<Entry>,
    free: Vec<u32>,
    by_source: HashMap<SourceId, TextureId>,
    uploads_tx: Sender<UploadEvent>,
    uploads_rx: Receiver<UploadEvent>,
    filler: TextureId,
}

impl TextureRegistry {
    /// Registry holding only the transparent 1x1 filler.
    pub fn new<B: GpuBackend>(backend: &mut B) -> Result<Self, RenderError> {
        let (uploads_tx, uploads_rx) = crossbeam_channel::unbounded();
        // New textures start transparent on every backend.
        let handle = backend.create_texture(1, 1)?;
        let mut registry = Self {
            entries: Vec::new(),
            free: Vec::new(),
            by_source: HashMap::new(),
            uploads_tx,
            uploads_rx,
            filler: TextureId::new(0, 0),
        };
        registry.filler = registry.insert(GpuTexture {
            handle,
            width: 1,
            height: 1,
            kind: TextureKind::Filler,
            last_used: 0,
            active_slot: None,
            framebuffer: None,
            uploaded_version: Some(0),
            cancel: None,
        });
        Ok(registry)
    }

    // ── slab ──────────────────────────────────────────────────────────────

    fn insert(&mut self, texture: GpuTexture) -> TextureId {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.texture = Some(texture);
            return TextureId::new(index, entry.generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry { generation: 0, texture: Some(texture) });
        TextureId::new(index, 0)
    }

    fn remove(&mut self, id: TextureId) -> Option<GpuTexture> {
        let entry = self.entries.get_mut(id.index())?;
        if entry.generation != id.generation() {
            return None;
        }
        let texture = entry.texture.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        Some(texture)
    }

    #[inline]
    pub fn get(&self, id: TextureId) -> Option<&GpuTexture> {
        self.entries
            .get(id.index())
            .filter(|e| e.generation == id.generation())
            .and_then(|e| e.texture.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut GpuTexture> {
        self.entries
            .get_mut(id.index())
            .filter(|e| e.generation == id.generation())
            .and_then(|e| e.texture.as_mut())
    }

    #[inline]
    pub fn contains(&self, id: TextureId) -> bool {
        self.get(id).is_some()
    }

    /// Live textures, filler included.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.texture.is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &GpuTexture)> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.texture.as_ref().map(|t| (TextureId::new(i as u32, e.generation), t))
        })
    }

    /// Transparent texture bound to unused slots.
    #[inline]
    pub fn filler(&self) -> TextureId {
        self.filler
    }

    // ── image textures ────────────────────────────────────────────────────

    #[inline]
    pub fn lookup(&self, source: SourceId) -> Option<TextureId> {
        self.by_source.get(&source).copied()
    }

    /// Texture for `source`, creating it on first use.
    ///
    /// A pending source gets a blank texture and an upload subscription.
    /// When the texture cannot be created the filler is returned and the node
    /// draws transparent.
    pub fn get_or_create<B: GpuBackend>(&mut self, backend: &mut B, source: &ImageSource, draw_id: u64) -> TextureId {
        if let Some(id) = self.lookup(source.id()) {
            if let Some(t) = self.get_mut(id) {
                t.last_used = draw_id;
                return id;
            }
            self.by_source.remove(&source.id());
        }

        let (width, height) = source.size();
        let handle = match backend.create_texture(width.max(1), height.max(1)) {
            Ok(h) => h,
            Err(e) => {
                log::error!("failed to create texture for {:?} ({width}x{height}): {e}", source.id());
                return self.filler;
            }
        };

        let id = self.insert(GpuTexture {
            handle,
            width: width.max(1),
            height: height.max(1),
            kind: TextureKind::Image(source.id()),
            last_used: draw_id,
            active_slot: None,
            framebuffer: None,
            uploaded_version: None,
            cancel: None,
        });
        self.by_source.insert(source.id(), id);

        if !source.is_ready() {
            let token = CancelToken::new();
            if source.subscribe(self.uploads_tx.clone(), id, token.clone()) {
                if let Some(t) = self.get_mut(id) {
                    t.cancel = Some(token);
                }
                log::debug!("texture {id:?} waits for pixels of {:?}", source.id());
            }
        }
        id
    }

    /// Uploads the source's current pixels if the texture holds an older version.
    ///
    /// Returns whether an upload happened.
    pub fn sync_source<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        id: TextureId,
        source: &ImageSource,
    ) -> Result<bool, RenderError> {
        let Some(texture) = self.get(id) else {
            return Err(RenderError::StaleTexture(id));
        };
        if texture.kind == TextureKind::Filler || texture.uploaded_version == Some(source.version()) {
            return Ok(false);
        }
        let Some((pixels, version)) = source.pixels() else {
            return Ok(false);
        };
        self.upload_pixels(backend, id, &pixels, version)?;
        Ok(true)
    }

    /// Replaces the contents of `id`, resizing it when the pixel size changed.
    pub fn upload_pixels<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        id: TextureId,
        pixels: &PixelData,
        version: u64,
    ) -> Result<(), RenderError> {
        let Some(texture) = self.get_mut(id) else {
            return Err(RenderError::StaleTexture(id));
        };
        backend.upload_pixels(texture.handle, pixels)?;
        texture.width = pixels.width();
        texture.height = pixels.height();
        texture.uploaded_version = Some(version);
        if let Some(token) = texture.cancel.take() {
            // Request satisfied; a late event for it is dropped as stale.
            token.cancel();
        }
        Ok(())
    }

    /// Applies deferred uploads delivered since the last poll.
    ///
    /// Events for released textures or cancelled requests are counted and dropped.
    pub fn poll_uploads<B: GpuBackend>(&mut self, backend: &mut B) -> UploadPoll {
        let mut poll = UploadPoll::default();
        while let Ok(event) = self.uploads_rx.try_recv() {
            let live = self
                .get(event.texture)
                .is_some_and(|t| t.kind == TextureKind::Image(event.source));
            if event.token.is_cancelled() || !live {
                log::trace!("dropping stale upload for {:?}", event.texture);
                poll.stale += 1;
                continue;
            }
            if self.get(event.texture).and_then(|t| t.uploaded_version) >= Some(event.version) {
                continue;
            }
            match self.upload_pixels(backend, event.texture, &event.pixels, event.version) {
                Ok(()) => poll.uploaded += 1,
                Err(e) => log::error!("deferred upload for {:?} failed: {e}", event.texture),
            }
        }
        poll
    }

    // ── render targets ────────────────────────────────────────────────────

    /// Texture plus framebuffer of `width` x `height`.
    pub fn create_render_target<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
        draw_id: u64,
    ) -> Result<TextureId, RenderError> {
        let unavailable = RenderError::RenderTargetUnavailable { width, height };
        let handle = backend.create_texture(width, height).map_err(|e| {
            log::warn!("render target {width}x{height}: {e}");
            unavailable.clone()
        })?;
        let framebuffer = match backend.create_framebuffer(handle) {
            Ok(fb) => fb,
            Err(e) => {
                log::warn!("render target {width}x{height}: {e}");
                backend.destroy_texture(handle);
                return Err(unavailable);
            }
        };
        Ok(self.insert(GpuTexture {
            handle,
            width,
            height,
            kind: TextureKind::RenderTarget,
            last_used: draw_id,
            active_slot: None,
            framebuffer: Some(framebuffer),
            uploaded_version: None,
            cancel: None,
        }))
    }

    // ── release ───────────────────────────────────────────────────────────

    /// Frees `id` on the backend. Stale ids and the filler are ignored.
    pub fn release<B: GpuBackend>(&mut self, backend: &mut B, id: TextureId) -> bool {
        if id == self.filler {
            log::warn!("refusing to release the filler texture");
            return false;
        }
        let Some(texture) = self.remove(id) else {
            log::debug!("release of unknown texture {id:?}");
            return false;
        };
        if let Some(token) = &texture.cancel {
            token.cancel();
        }
        if let TextureKind::Image(source) = texture.kind {
            if self.by_source.get(&source) == Some(&id) {
                self.by_source.remove(&source);
            }
        }
        if let Some(fb) = texture.framebuffer {
            backend.destroy_framebuffer(fb);
        }
        backend.destroy_texture(texture.handle);
        true
    }

    /// Frees the texture of `source`, if any.
    pub fn release_source<B: GpuBackend>(&mut self, backend: &mut B, source: SourceId) -> Option<TextureId> {
        let id = self.lookup(source)?;
        self.release(backend, id).then_some(id)
    }

    /// Ids unused for `threshold` draws: `last_used + threshold <= draw_id`.
    ///
    /// The filler and textures for which `keep` returns true are excluded.
    pub fn unused_since(&self, threshold: u64, draw_id: u64, keep: impl Fn(&GpuTexture) -> bool) -> Vec<TextureId> {
        self.iter()
            .filter(|(_, t)| t.kind != TextureKind::Filler)
            .filter(|(_, t)| t.last_used.saturating_add(threshold) <= draw_id)
            .filter(|(_, t)| !keep(t))
            .map(|(id, _)| id)
            .collect()
    }

    #[inline]
    pub fn touch(&mut self, id: TextureId, draw_id: u64) {
        if let Some(t) = self.get_mut(id) {
            t.last_used = draw_id;
        }
    }

    #[inline]
    pub fn set_active_slot(&mut self, id: TextureId, slot: Option<usize>) {
        if let Some(t) = self.get_mut(id) {
            t.active_slot = slot;
        }
    }

    /// Rewrites every `active_slot` from the slot occupants.
    pub fn sync_active_slots(&mut self, occupants: impl Iterator<Item = TextureId>) {
        for entry in &mut self.entries {
            if let Some(t) = entry.texture.as_mut() {
                t.active_slot = None;
            }
        }
        for (slot, id) in occupants.enumerate() {
            if id != self.filler {
                self.set_active_slot(id, Some(slot));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Color;
    use crate::render::backend::SoftBackend;

    fn registry(backend: &mut SoftBackend) -> TextureRegistry {
        TextureRegistry::new(backend).unwrap()
    }

    #[test]
    fn one_texture_per_source() {
        let mut b = SoftBackend::new(4, 4);
        let mut r = registry(&mut b);
        let src = ImageSource::from_pixels(PixelData::solid(2, 2, Color::white()).unwrap());
        let a = r.get_or_create(&mut b, &src, 1);
        let c = r.get_or_create(&mut b, &src, 2);
        assert_eq!(a, c);
        assert_eq!(r.get(a).unwrap().last_used, 2);
        assert!(r.sync_source(&mut b, a, &src).unwrap());
        assert!(!r.sync_source(&mut b, a, &src).unwrap());
    }

    #[test]
    fn released_ids_are_stale() {
        let mut b = SoftBackend::new(4, 4);
        let mut r = registry(&mut b);
        let src = ImageSource::from_pixels(PixelData::solid(1, 1, Color::white()).unwrap());
        let a = r.get_or_create(&mut b, &src, 1);
        assert!(r.release(&mut b, a));
        assert!(!r.release(&mut b, a));
        let again = r.get_or_create(&mut b, &src, 2);
        assert_eq!(again.index(), a.index());
        assert_ne!(again, a);
        assert!(!r.contains(a));
    }

    #[test]
    fn upload_for_released_texture_is_dropped() {
        let mut b = SoftBackend::new(4, 4);
        let mut r = registry(&mut b);
        let src = ImageSource::pending(2, 2);
        let id = r.get_or_create(&mut b, &src, 1);
        r.release(&mut b, id);
        src.fulfil(PixelData::solid(2, 2, Color::white()).unwrap());
        let uploads_before = b.stats().uploads;
        assert_eq!(r.poll_uploads(&mut b), UploadPoll { uploaded: 0, stale: 0 });
        assert_eq!(b.stats().uploads, uploads_before);
    }

    #[test]
    fn deferred_upload_arrives_through_poll() {
        let mut b = SoftBackend::new(4, 4);
        let mut r = registry(&mut b);
        let src = ImageSource::pending(2, 2);
        let id = r.get_or_create(&mut b, &src, 1);
        assert_eq!(r.get(id).unwrap().uploaded_version, None);
        src.fulfil(PixelData::solid(2, 2, Color::white()).unwrap());
        assert_eq!(r.poll_uploads(&mut b).uploaded, 1);
        assert_eq!(r.get(id).unwrap().uploaded_version, Some(1));
    }

    #[test]
    fn filler_is_never_released_or_purged() {
        let mut b = SoftBackend::new(4, 4);
        let mut r = registry(&mut b);
        let filler = r.filler();
        assert!(!r.release(&mut b, filler));
        assert!(r.unused_since(1, 1000, |_| false).is_empty());
    }
}
