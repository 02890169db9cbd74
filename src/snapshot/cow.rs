//! Point-in-time iterator over the pending-snapshot block set.

use crate::heap::{BlockId, SlotId, TupleHeap, TupleId};

/// Block-ordered iterator over the blocks captured at snapshot activation.
///
/// Traversal is by block in activation order, then by slot ascending. A slot
/// is yielded when it is active and not dirty: dirty slots were mutated (or
/// inserted) after activation and their activation-time values, where
/// required, travel through the preserved pre-image queue instead. When a
/// block's last slot has been examined the block is demoted back to the
/// not-pending set and its dirty bits are cleared.
#[derive(Debug)]
pub struct CopyOnWriteIterator {
    blocks: Vec<BlockId>,
    block_pos: usize,
    next_slot: SlotId,
    finished: bool,
}

impl CopyOnWriteIterator {
    /// Creates an iterator over the pending block list captured at
    /// activation, in ascending block order.
    pub fn new(blocks: Vec<BlockId>) -> Self {
        debug_assert!(blocks.windows(2).all(|w| w[0] < w[1]));
        Self {
            blocks,
            block_pos: 0,
            next_slot: 0,
            finished: false,
        }
    }

    /// Returns true if every captured block has been drained.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns true if the iterator has already moved past the given slot.
    ///
    /// Writers consult this to decide whether a mutation needs the pre-image
    /// preserved: a passed tuple was already streamed (or handed to the
    /// pending-next-tuple stash, which holds an owned copy), so its slot is
    /// fair game.
    pub fn has_passed(&self, id: TupleId) -> bool {
        if self.finished {
            return true;
        }
        match self.blocks.binary_search(&id.block) {
            Ok(pos) => match pos.cmp(&self.block_pos) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => id.slot < self.next_slot,
                std::cmp::Ordering::Greater => false,
            },
            // Not part of the captured set; nothing to preserve for it.
            Err(_) => true,
        }
    }

    /// Advances to the next active, non-dirty slot.
    ///
    /// Fully-examined blocks are demoted through `heap` as a side effect.
    /// Returns `None` once the captured set is exhausted.
    pub fn next(&mut self, heap: &mut TupleHeap) -> Option<TupleId> {
        while !self.finished {
            let Some(&block_id) = self.blocks.get(self.block_pos) else {
                self.finished = true;
                break;
            };
            let block = heap
                .block(block_id)
                .expect("pending-snapshot block released before demotion");

            let mut found = None;
            for slot in self.next_slot..block.slot_count() {
                let flags = block.flags(slot);
                if flags.is_active() && !flags.is_dirty() {
                    found = Some(slot);
                    break;
                }
            }

            match found {
                Some(slot) => {
                    self.next_slot = slot + 1;
                    return Some(TupleId::new(block_id, slot));
                }
                None => {
                    heap.demote(block_id);
                    self.block_pos += 1;
                    self.next_slot = 0;
                }
            }
        }
        None
    }
}
