//! Fixed-size tuple block.
//!
//! A block is one contiguous buffer divided into equal-sized tuple slots.
//! Each slot is a [`TupleFlags`] byte followed by a fixed-width row image.
//! The block tracks its active and pending-delete counts, keeps a LIFO free
//! list so recently freed slots are reused first, and carries the
//! pending-snapshot classifier consulted by the copy-on-write protocol.

use super::flags::TupleFlags;

/// Slot index within a block.
pub type SlotId = u16;

/// Identifier for a block. Allocated monotonically by the heap, so block-id
/// order is also block-allocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

/// A fixed-size slab of tuple slots.
#[derive(Debug)]
pub struct TupleBlock {
    data: Vec<u8>,
    slot_size: usize,
    slot_count: SlotId,
    active_count: usize,
    pending_delete_count: usize,
    free_slots: Vec<SlotId>,
    pending_snapshot: bool,
}

impl TupleBlock {
    /// Creates an empty block of `slot_count` slots for rows of `row_width`
    /// bytes.
    ///
    /// The free list is seeded in reverse so slots are first handed out in
    /// ascending order, which keeps insertion order and slot order aligned
    /// until churn sets in.
    pub fn new(slot_count: SlotId, row_width: usize) -> Self {
        let slot_size = 1 + row_width;
        Self {
            data: vec![0; slot_count as usize * slot_size],
            slot_size,
            slot_count,
            active_count: 0,
            pending_delete_count: 0,
            free_slots: (0..slot_count).rev().collect(),
            pending_snapshot: false,
        }
    }

    /// Returns the total number of slots.
    pub fn slot_count(&self) -> SlotId {
        self.slot_count
    }

    /// Returns the number of live rows.
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Returns the number of slots awaiting delete finalization.
    pub fn pending_delete_count(&self) -> usize {
        self.pending_delete_count
    }

    /// Returns the number of free slots.
    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Returns true if no slot holds row data (live or retained).
    pub fn is_unused(&self) -> bool {
        self.active_count == 0 && self.pending_delete_count == 0
    }

    /// Returns the live-row fill ratio.
    pub fn fill_ratio(&self) -> f64 {
        self.active_count as f64 / self.slot_count as f64
    }

    /// Returns the pending-snapshot classifier.
    pub fn is_pending_snapshot(&self) -> bool {
        self.pending_snapshot
    }

    /// Sets the pending-snapshot classifier.
    pub fn set_pending_snapshot(&mut self, pending: bool) {
        self.pending_snapshot = pending;
    }

    fn offset(&self, slot: SlotId) -> usize {
        debug_assert!(slot < self.slot_count);
        slot as usize * self.slot_size
    }

    /// Reads the flag byte of a slot.
    pub fn flags(&self, slot: SlotId) -> TupleFlags {
        TupleFlags::from_raw(self.data[self.offset(slot)])
    }

    fn set_flags(&mut self, slot: SlotId, flags: TupleFlags) {
        let offset = self.offset(slot);
        self.data[offset] = flags.as_u8();
    }

    /// Updates the flag byte of a slot in place.
    pub fn update_flags(&mut self, slot: SlotId, f: impl FnOnce(&mut TupleFlags)) {
        let mut flags = self.flags(slot);
        f(&mut flags);
        self.set_flags(slot, flags);
    }

    /// Returns the row image stored in a slot.
    pub fn row(&self, slot: SlotId) -> &[u8] {
        let start = self.offset(slot) + 1;
        &self.data[start..start + self.slot_size - 1]
    }

    /// Overwrites the row image of a slot.
    pub fn write_row(&mut self, slot: SlotId, image: &[u8]) {
        let start = self.offset(slot) + 1;
        self.data[start..start + self.slot_size - 1].copy_from_slice(image);
    }

    /// Allocates a slot, writes the row image, and marks it active.
    ///
    /// Returns `None` when the block is full. The caller is responsible for
    /// setting the dirty bit when the block is pending-snapshot.
    pub fn insert(&mut self, image: &[u8]) -> Option<SlotId> {
        let slot = self.free_slots.pop()?;
        self.write_row(slot, image);
        let mut flags = TupleFlags::empty();
        flags.set_active(true);
        self.set_flags(slot, flags);
        self.active_count += 1;
        Some(slot)
    }

    /// Deactivates a live slot and retains it as pending-delete.
    ///
    /// The row image stays in place so the slot can be reactivated by undo.
    pub fn mark_deleted(&mut self, slot: SlotId) {
        debug_assert!(self.flags(slot).is_active());
        self.update_flags(slot, |f| {
            f.set_active(false);
            f.set_pending_delete(true);
        });
        self.active_count -= 1;
        self.pending_delete_count += 1;
    }

    /// Reverses [`mark_deleted`](Self::mark_deleted): the slot becomes live
    /// again with its row image intact.
    pub fn reactivate(&mut self, slot: SlotId) {
        debug_assert!(self.flags(slot).is_pending_delete());
        self.update_flags(slot, |f| {
            f.set_active(true);
            f.set_pending_delete(false);
        });
        self.active_count += 1;
        self.pending_delete_count -= 1;
    }

    /// Reclaims a pending-delete slot after its undo quantum is released.
    pub fn finalize_delete(&mut self, slot: SlotId) {
        debug_assert!(self.flags(slot).is_pending_delete());
        self.set_flags(slot, TupleFlags::empty());
        self.free_slots.push(slot);
        self.pending_delete_count -= 1;
    }

    /// Frees a live slot directly, bypassing the pending-delete state.
    ///
    /// Used for undo of inserts, delete-as-we-go streaming, and compaction
    /// source slots, none of which need the slot retained.
    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(self.flags(slot).is_active());
        self.set_flags(slot, TupleFlags::empty());
        self.free_slots.push(slot);
        self.active_count -= 1;
    }

    /// Clears the dirty bit on every slot. Invoked when the copy-on-write
    /// iterator drains the block and when blocks are classified at snapshot
    /// activation.
    pub fn clear_dirty_bits(&mut self) {
        for slot in 0..self.slot_count {
            let flags = self.flags(slot);
            if flags.is_dirty() {
                self.update_flags(slot, |f| f.set_dirty(false));
            }
        }
    }

    /// Clears the relocated bit on every slot. Invoked when an elastic scan
    /// ends before its cursor reached every marker.
    pub fn clear_relocated_bits(&mut self) {
        for slot in 0..self.slot_count {
            let flags = self.flags(slot);
            if flags.is_relocated() {
                self.update_flags(slot, |f| f.set_relocated(false));
            }
        }
    }

    /// Iterates all slot ids with their current flags.
    pub fn slots(&self) -> impl Iterator<Item = (SlotId, TupleFlags)> + '_ {
        (0..self.slot_count).map(move |slot| (slot, self.flags(slot)))
    }
}
