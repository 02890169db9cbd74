//! Block arena and pending-snapshot classification.
//!
//! [`TupleHeap`] owns every block of a table and hands out [`TupleId`]
//! handles. Blocks are partitioned into two sets:
//!
//! - *not-pending-snapshot*: open for in-place mutation, slot reuse, and
//!   compaction. All blocks are here when no snapshot is active.
//! - *pending-snapshot*: must be drained by the copy-on-write iterator
//!   before their slots may be reused or compacted. The allocator never
//!   draws from this set.
//!
//! [`swap_classification`](TupleHeap::swap_classification) flips the two
//! sets in O(set size) at snapshot activation; the copy-on-write iterator
//! demotes blocks back one at a time as it drains them.

use std::collections::{BTreeMap, BTreeSet};

use super::block::{BlockId, SlotId, TupleBlock};
use super::error::HeapError;
use super::flags::TupleFlags;
use super::TupleId;

/// Arena of tuple blocks with pending/not-pending classification.
#[derive(Debug)]
pub struct TupleHeap {
    blocks: BTreeMap<BlockId, TupleBlock>,
    next_block_id: u64,
    slots_per_block: SlotId,
    row_width: usize,
    pending: BTreeSet<BlockId>,
    not_pending: BTreeSet<BlockId>,
    /// Not-pending blocks with at least one free slot.
    spare: BTreeSet<BlockId>,
    active_tuples: usize,
}

impl TupleHeap {
    /// Creates an empty heap for rows of `row_width` bytes, with blocks of
    /// `block_size` bytes.
    pub fn new(row_width: usize, block_size: usize) -> Self {
        let slot_size = 1 + row_width;
        let slots = (block_size / slot_size).clamp(1, SlotId::MAX as usize);
        Self {
            blocks: BTreeMap::new(),
            next_block_id: 0,
            slots_per_block: slots as SlotId,
            row_width,
            pending: BTreeSet::new(),
            not_pending: BTreeSet::new(),
            spare: BTreeSet::new(),
            active_tuples: 0,
        }
    }

    /// Returns the number of live tuples across all blocks.
    pub fn active_tuple_count(&self) -> usize {
        self.active_tuples
    }

    /// Returns the number of blocks in the pending-snapshot set.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of blocks in the not-pending-snapshot set.
    pub fn not_pending_count(&self) -> usize {
        self.not_pending.len()
    }

    /// Returns the number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if the block is classified pending-snapshot.
    ///
    /// Unknown blocks answer false; the caller may hold an id for a block
    /// that a finished snapshot already released.
    pub fn is_pending(&self, block: BlockId) -> bool {
        self.pending.contains(&block)
    }

    /// Returns a block by id.
    pub fn block(&self, id: BlockId) -> Option<&TupleBlock> {
        self.blocks.get(&id)
    }

    /// Returns a block by id, mutably.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut TupleBlock> {
        self.blocks.get_mut(&id)
    }

    /// Returns all block ids in ascending order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    /// Returns the ids of the pending-snapshot set in ascending order.
    pub fn pending_block_ids(&self) -> Vec<BlockId> {
        self.pending.iter().copied().collect()
    }

    /// Returns the first block id at or after `from`, in id order.
    ///
    /// Cursor-based scans use this to survive block removal: a cursor that
    /// points at a released block simply resumes at the next surviving one.
    pub fn next_block_at_or_after(&self, from: BlockId) -> Option<BlockId> {
        self.blocks.range(from..).next().map(|(&id, _)| id)
    }

    /// Allocates a slot, writes the row image, and marks it active.
    ///
    /// Draws from the not-pending-snapshot set only, preferring blocks that
    /// already have free slots; allocates a fresh block when none do. Fresh
    /// blocks always enter the not-pending set, so tuples inserted during a
    /// snapshot are invisible to it.
    pub fn allocate_slot(&mut self, image: &[u8]) -> TupleId {
        debug_assert_eq!(image.len(), self.row_width);

        let block_id = match self.spare.iter().next().copied() {
            Some(id) => id,
            None => self.new_block(),
        };

        let block = self.blocks.get_mut(&block_id).expect("spare block exists");
        let slot = block.insert(image).expect("spare block has a free slot");
        if block.free_count() == 0 {
            self.spare.remove(&block_id);
        }
        self.active_tuples += 1;
        TupleId::new(block_id, slot)
    }

    /// Allocates a slot in a specific block. Used by compaction, which picks
    /// its own destination blocks.
    ///
    /// Returns `None` if the block is missing or full.
    pub fn allocate_slot_in(&mut self, block_id: BlockId, image: &[u8]) -> Option<SlotId> {
        let block = self.blocks.get_mut(&block_id)?;
        let slot = block.insert(image)?;
        if block.free_count() == 0 {
            self.spare.remove(&block_id);
        }
        self.active_tuples += 1;
        Some(slot)
    }

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks
            .insert(id, TupleBlock::new(self.slots_per_block, self.row_width));
        self.not_pending.insert(id);
        self.spare.insert(id);
        id
    }

    /// Frees a live slot directly (no pending-delete retention).
    pub fn free_slot(&mut self, id: TupleId) -> Result<(), HeapError> {
        self.ensure_active(id)?;
        let block = self.blocks.get_mut(&id.block).expect("checked above");
        block.release(id.slot);
        self.active_tuples -= 1;
        self.reconcile_block(id.block);
        Ok(())
    }

    /// Deactivates a live slot, retaining it as pending-delete.
    pub fn mark_deleted(&mut self, id: TupleId) -> Result<(), HeapError> {
        self.ensure_active(id)?;
        let block = self.blocks.get_mut(&id.block).expect("checked above");
        block.mark_deleted(id.slot);
        self.active_tuples -= 1;
        Ok(())
    }

    /// Reactivates a pending-delete slot in place.
    pub fn reactivate(&mut self, id: TupleId) -> Result<(), HeapError> {
        let block = self
            .blocks
            .get_mut(&id.block)
            .ok_or(HeapError::BlockNotFound(id.block.0))?;
        if !block.flags(id.slot).is_pending_delete() {
            return Err(HeapError::NotPendingDelete(id));
        }
        block.reactivate(id.slot);
        self.active_tuples += 1;
        Ok(())
    }

    /// Reclaims a pending-delete slot.
    pub fn finalize_delete(&mut self, id: TupleId) -> Result<(), HeapError> {
        let block = self
            .blocks
            .get_mut(&id.block)
            .ok_or(HeapError::BlockNotFound(id.block.0))?;
        if !block.flags(id.slot).is_pending_delete() {
            return Err(HeapError::NotPendingDelete(id));
        }
        block.finalize_delete(id.slot);
        self.reconcile_block(id.block);
        Ok(())
    }

    /// Re-derives a block's membership in the spare set and releases it when
    /// it holds no rows at all. Pending-snapshot blocks are left untouched;
    /// the copy-on-write iterator owns their lifecycle until demotion.
    fn reconcile_block(&mut self, id: BlockId) {
        if self.pending.contains(&id) {
            return;
        }
        let block = match self.blocks.get(&id) {
            Some(b) => b,
            None => return,
        };
        if block.is_unused() {
            self.blocks.remove(&id);
            self.not_pending.remove(&id);
            self.spare.remove(&id);
        } else if block.free_count() > 0 {
            self.spare.insert(id);
        }
    }

    /// Reads the row image of a live or retained slot.
    pub fn row(&self, id: TupleId) -> Result<&[u8], HeapError> {
        let block = self
            .blocks
            .get(&id.block)
            .ok_or(HeapError::BlockNotFound(id.block.0))?;
        let flags = block.flags(id.slot);
        if !flags.is_active() && !flags.is_pending_delete() {
            return Err(HeapError::TupleNotFound(id));
        }
        Ok(block.row(id.slot))
    }

    /// Overwrites the row image of a live slot.
    pub fn write_row(&mut self, id: TupleId, image: &[u8]) -> Result<(), HeapError> {
        self.ensure_active(id)?;
        let block = self.blocks.get_mut(&id.block).expect("checked above");
        block.write_row(id.slot, image);
        Ok(())
    }

    /// Reads the flags of a slot.
    pub fn flags(&self, id: TupleId) -> Result<TupleFlags, HeapError> {
        let block = self
            .blocks
            .get(&id.block)
            .ok_or(HeapError::BlockNotFound(id.block.0))?;
        Ok(block.flags(id.slot))
    }

    /// Updates the flags of a slot in place.
    pub fn update_flags(
        &mut self,
        id: TupleId,
        f: impl FnOnce(&mut TupleFlags),
    ) -> Result<(), HeapError> {
        let block = self
            .blocks
            .get_mut(&id.block)
            .ok_or(HeapError::BlockNotFound(id.block.0))?;
        block.update_flags(id.slot, f);
        Ok(())
    }

    fn ensure_active(&self, id: TupleId) -> Result<(), HeapError> {
        let block = self
            .blocks
            .get(&id.block)
            .ok_or(HeapError::BlockNotFound(id.block.0))?;
        if !block.flags(id.slot).is_active() {
            return Err(HeapError::TupleNotFound(id));
        }
        Ok(())
    }

    /// Swaps the pending and not-pending sets.
    ///
    /// Invoked at snapshot activation, when the pending set is empty: every
    /// existing block becomes pending-snapshot. Dirty bits are cleared at
    /// the moment of classification so the dirty protocol starts fresh.
    pub fn swap_classification(&mut self) {
        std::mem::swap(&mut self.pending, &mut self.not_pending);
        self.spare.clear();
        for id in self.pending.clone() {
            let block = self.blocks.get_mut(&id).expect("classified block exists");
            block.set_pending_snapshot(true);
            block.clear_dirty_bits();
        }
        for id in self.not_pending.clone() {
            let block = self.blocks.get_mut(&id).expect("classified block exists");
            block.set_pending_snapshot(false);
            if block.free_count() > 0 {
                self.spare.insert(id);
            }
        }
    }

    /// Demotes a drained block from pending to not-pending, clearing its
    /// dirty bits. Releases the block entirely if it no longer holds rows.
    pub fn demote(&mut self, id: BlockId) {
        let was_pending = self.pending.remove(&id);
        debug_assert!(was_pending, "demote of non-pending block");
        let block = self.blocks.get_mut(&id).expect("pending block exists");
        block.set_pending_snapshot(false);
        block.clear_dirty_bits();
        if block.is_unused() {
            self.blocks.remove(&id);
        } else {
            self.not_pending.insert(id);
            if self.blocks[&id].free_count() > 0 {
                self.spare.insert(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8-byte rows, 4 slots per block (4 * 9 = 36 bytes).
    fn heap() -> TupleHeap {
        TupleHeap::new(8, 36)
    }

    fn image(b: u8) -> [u8; 8] {
        [b; 8]
    }

    #[test]
    fn test_allocate_fills_block_then_grows() {
        let mut h = heap();
        let ids: Vec<_> = (0..5).map(|i| h.allocate_slot(&image(i))).collect();
        assert_eq!(h.block_count(), 2);
        assert_eq!(h.active_tuple_count(), 5);
        // First four share a block, fifth starts the next
        assert_eq!(ids[0].block, ids[3].block);
        assert_ne!(ids[0].block, ids[4].block);
        assert_eq!(h.row(ids[2]).unwrap(), &image(2));
    }

    #[test]
    fn test_free_slot_reuse_prefers_freed() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        let _b = h.allocate_slot(&image(2));
        h.free_slot(a).unwrap();
        let c = h.allocate_slot(&image(3));
        assert_eq!(c, a);
        assert_eq!(h.block_count(), 1);
    }

    #[test]
    fn test_empty_block_released() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        assert_eq!(h.block_count(), 1);
        h.free_slot(a).unwrap();
        assert_eq!(h.block_count(), 0);
        assert_eq!(h.not_pending_count(), 0);
    }

    #[test]
    fn test_free_slot_errors() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        h.free_slot(a).unwrap();
        assert!(matches!(
            h.free_slot(a),
            Err(HeapError::BlockNotFound(_)) | Err(HeapError::TupleNotFound(_))
        ));
    }

    #[test]
    fn test_swap_classification() {
        let mut h = heap();
        for i in 0..6 {
            h.allocate_slot(&image(i));
        }
        assert_eq!(h.not_pending_count(), 2);
        assert_eq!(h.pending_count(), 0);

        h.swap_classification();
        assert_eq!(h.pending_count(), 2);
        assert_eq!(h.not_pending_count(), 0);

        // New allocations go to fresh, not-pending blocks
        let id = h.allocate_slot(&image(9));
        assert!(!h.is_pending(id.block));
        assert_eq!(h.not_pending_count(), 1);
    }

    #[test]
    fn test_allocator_never_draws_from_pending() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        h.swap_classification();
        // The pending block has three free slots, but they must not be used
        let b = h.allocate_slot(&image(2));
        assert_ne!(a.block, b.block);
    }

    #[test]
    fn test_swap_clears_dirty_bits() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        h.update_flags(a, |f| f.set_dirty(true)).unwrap();
        h.swap_classification();
        assert!(!h.flags(a).unwrap().is_dirty());
    }

    #[test]
    fn test_demote_returns_block() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        h.swap_classification();
        assert_eq!(h.pending_count(), 1);

        h.demote(a.block);
        assert_eq!(h.pending_count(), 0);
        assert_eq!(h.not_pending_count(), 1);
        // Demoted block is usable by the allocator again
        let b = h.allocate_slot(&image(2));
        assert_eq!(b.block, a.block);
    }

    #[test]
    fn test_demote_releases_unused_block() {
        let mut h = heap();
        let a = h.allocate_slot(&image(1));
        h.swap_classification();
        h.free_slot(a).unwrap();
        // Still pending, so the block survives the free
        assert_eq!(h.block_count(), 1);
        h.demote(a.block);
        assert_eq!(h.block_count(), 0);
    }

    #[test]
    fn test_pending_delete_lifecycle() {
        let mut h = heap();
        let a = h.allocate_slot(&image(5));
        h.mark_deleted(a).unwrap();
        assert_eq!(h.active_tuple_count(), 0);
        // Retained image still readable
        assert_eq!(h.row(a).unwrap(), &image(5));

        h.reactivate(a).unwrap();
        assert_eq!(h.active_tuple_count(), 1);

        h.mark_deleted(a).unwrap();
        h.finalize_delete(a).unwrap();
        assert_eq!(h.block_count(), 0);
        assert!(matches!(
            h.reactivate(a),
            Err(HeapError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_next_block_at_or_after() {
        let mut h = heap();
        for i in 0..9 {
            h.allocate_slot(&image(i));
        }
        let ids = h.block_ids();
        assert_eq!(ids.len(), 3);
        assert_eq!(h.next_block_at_or_after(ids[0]), Some(ids[0]));
        assert_eq!(h.next_block_at_or_after(BlockId(ids[2].0 + 1)), None);
    }
}
