//! Texture slot table.
//!
//! A batch samples at most `N` textures, one per slot. Each slot remembers
//! which texture it holds and the batch that last used it ("stamp"). A slot
//! can be given to a new texture only when its stamp is older than the batch
//! being built and it is not pinned, so a texture is never evicted while the
//! pending batch still samples it.

use super::error::RenderError;
use super::texture::TextureId;

/// Result of [`SlotTable::insert`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotInsert {
    /// Already stamped for this batch.
    Resident(usize),
    /// Still bound from an earlier batch; stamp refreshed without a rebind.
    Restamped(usize),
    /// Bound into `slot`, replacing `evicted` (never the filler).
    Bound { slot: usize, evicted: Option<TextureId> },
    /// Every slot is in use by the current batch or pinned.
    Full,
}

impl SlotInsert {
    #[inline]
    pub fn slot(self) -> Option<usize> {
        match self {
            SlotInsert::Resident(s) | SlotInsert::Restamped(s) => Some(s),
            SlotInsert::Bound { slot, .. } => Some(slot),
            SlotInsert::Full => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Slot {
    texture: TextureId,
    /// Batch that last sampled the slot; `None` while unused.
    stamp: Option<u64>,
    pinned: bool,
}

/// Round-robin slot allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<Slot>,
    last_inserted: usize,
    filler: TextureId,
}

impl SlotTable {
    /// `count` slots, all holding `filler`.
    pub fn new(count: usize, filler: TextureId) -> Self {
        let count = count.max(1);
        Self {
            slots: vec![Slot { texture: filler, stamp: None, pinned: false }; count],
            last_inserted: count - 1,
            filler,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn filler(&self) -> TextureId {
        self.filler
    }

    #[inline]
    pub fn texture_at(&self, slot: usize) -> Option<TextureId> {
        self.slots.get(slot).map(|s| s.texture)
    }

    #[inline]
    pub fn stamp_at(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).and_then(|s| s.stamp)
    }

    /// Occupants in slot order.
    pub fn textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.slots.iter().map(|s| s.texture)
    }

    /// Slot holding `texture`, if any.
    pub fn find(&self, texture: TextureId) -> Option<usize> {
        if texture == self.filler {
            return None;
        }
        self.slots.iter().position(|s| s.texture == texture)
    }

    /// Places `texture` for `batch_id`.
    ///
    /// `hint` is the slot the texture believes it occupies; when it still
    /// holds the texture no rebind happens.
    pub fn insert(&mut self, texture: TextureId, hint: Option<usize>, batch_id: u64) -> SlotInsert {
        if let Some(slot) = hint.filter(|&s| self.slots.get(s).is_some_and(|s| s.texture == texture)) {
            let entry = &mut self.slots[slot];
            if entry.stamp == Some(batch_id) {
                return SlotInsert::Resident(slot);
            }
            entry.stamp = Some(batch_id);
            return SlotInsert::Restamped(slot);
        }

        let n = self.slots.len();
        for k in 1..=n {
            let i = (self.last_inserted + k) % n;
            let entry = &mut self.slots[i];
            if entry.pinned || entry.stamp.is_some_and(|stamp| stamp >= batch_id) {
                continue;
            }
            let previous = entry.texture;
            *entry = Slot { texture, stamp: Some(batch_id), pinned: false };
            self.last_inserted = i;
            let evicted = (previous != self.filler && previous != texture).then_some(previous);
            return SlotInsert::Bound { slot: i, evicted };
        }
        SlotInsert::Full
    }

    /// Forces `texture` into `slot` (used for the scratch slot of nested passes).
    pub fn assign(&mut self, slot: usize, texture: TextureId, batch_id: u64) -> Result<Option<TextureId>, RenderError> {
        let count = self.slots.len();
        let entry = self.slots.get_mut(slot).ok_or(RenderError::SlotOutOfRange { index: slot, count })?;
        let previous = entry.texture;
        entry.texture = texture;
        entry.stamp = Some(batch_id);
        Ok((previous != self.filler && previous != texture).then_some(previous))
    }

    pub fn pin(&mut self, slot: usize, pinned: bool) -> Result<(), RenderError> {
        let count = self.slots.len();
        let entry = self.slots.get_mut(slot).ok_or(RenderError::SlotOutOfRange { index: slot, count })?;
        entry.pinned = pinned;
        Ok(())
    }

    #[inline]
    pub fn is_pinned(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.pinned)
    }

    /// Slots `insert` may still hand out.
    pub fn unpinned_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.pinned).count()
    }

    /// Replaces `texture` with the filler wherever it sits.
    pub fn forget(&mut self, texture: TextureId) -> Option<usize> {
        let slot = self.find(texture)?;
        let entry = &mut self.slots[slot];
        entry.texture = self.filler;
        entry.stamp = None;
        Some(slot)
    }

    /// Fresh table with `count` slots, keeping the filler.
    pub fn reset(&mut self, count: usize) {
        *self = Self::new(count, self.filler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FILLER: TextureId = TextureId::new(0, 0);

    fn tex(i: u32) -> TextureId {
        TextureId::new(i, 0)
    }

    #[test]
    fn fills_round_robin_from_zero() {
        let mut t = SlotTable::new(3, FILLER);
        assert_eq!(t.insert(tex(1), None, 1), SlotInsert::Bound { slot: 0, evicted: None });
        assert_eq!(t.insert(tex(2), None, 1), SlotInsert::Bound { slot: 1, evicted: None });
        assert_eq!(t.insert(tex(3), None, 1), SlotInsert::Bound { slot: 2, evicted: None });
        assert_eq!(t.insert(tex(4), None, 1), SlotInsert::Full);
    }

    #[test]
    fn repeated_insert_is_idempotent() {
        let mut t = SlotTable::new(2, FILLER);
        assert_eq!(t.insert(tex(1), None, 1).slot(), Some(0));
        assert_eq!(t.insert(tex(1), Some(0), 1), SlotInsert::Resident(0));
        assert_eq!(t.insert(tex(1), Some(0), 2), SlotInsert::Restamped(0));
    }

    #[test]
    fn stale_slots_are_reused_and_report_eviction() {
        let mut t = SlotTable::new(2, FILLER);
        t.insert(tex(1), None, 1);
        t.insert(tex(2), None, 1);
        assert_eq!(t.insert(tex(3), None, 2), SlotInsert::Bound { slot: 0, evicted: Some(tex(1)) });
    }

    #[test]
    fn pinned_slot_is_skipped() {
        let mut t = SlotTable::new(2, FILLER);
        t.pin(0, true).unwrap();
        assert_eq!(t.insert(tex(1), None, 1).slot(), Some(1));
        assert_eq!(t.insert(tex(2), None, 1), SlotInsert::Full);
        assert_eq!(t.pin(5, true), Err(RenderError::SlotOutOfRange { index: 5, count: 2 }));
    }

    #[test]
    fn unpinned_count_tracks_pins() {
        let mut t = SlotTable::new(3, FILLER);
        assert_eq!(t.unpinned_count(), 3);
        t.pin(0, true).unwrap();
        t.pin(2, true).unwrap();
        assert_eq!(t.unpinned_count(), 1);
        t.pin(0, false).unwrap();
        assert_eq!(t.unpinned_count(), 2);
    }

    #[test]
    fn forget_restores_filler() {
        let mut t = SlotTable::new(2, FILLER);
        t.insert(tex(7), None, 1);
        assert_eq!(t.forget(tex(7)), Some(0));
        assert_eq!(t.texture_at(0), Some(FILLER));
        assert_eq!(t.forget(tex(7)), None);
    }

    proptest! {
        #[test]
        fn current_batch_textures_are_never_evicted(
            ops in proptest::collection::vec((0u32..12, any::<bool>()), 1..200),
            count in 1usize..6,
        ) {
            let mut t = SlotTable::new(count, FILLER);
            let mut batch = 1u64;
            let mut in_batch: Vec<TextureId> = Vec::new();
            let mut hints = std::collections::HashMap::new();

            for (id, end_batch) in ops {
                if end_batch {
                    batch += 1;
                    in_batch.clear();
                    continue;
                }
                let id = tex(id + 1);
                match t.insert(id, hints.get(&id).copied(), batch) {
                    SlotInsert::Full => {
                        prop_assert_eq!(in_batch.len(), count);
                        batch += 1;
                        in_batch.clear();
                    }
                    res => {
                        let slot = res.slot().unwrap();
                        if let SlotInsert::Bound { evicted: Some(e), .. } = res {
                            prop_assert!(!in_batch.contains(&e));
                            hints.remove(&e);
                        }
                        hints.insert(id, slot);
                        if !in_batch.contains(&id) {
                            in_batch.push(id);
                        }
                    }
                }
                // Every texture of the pending batch is still bound.
                for b in &in_batch {
                    prop_assert!(t.find(*b).is_some());
                }
                prop_assert!(in_batch.len() <= count);
            }
        }
    }
}
