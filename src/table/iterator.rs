//! Live forward iterator over a table.

use crate::heap::{BlockId, SlotId, TupleId};
use crate::schema::Record;

use super::persistent::PersistentTable;

/// Forward iterator over live tuples in block-then-slot order.
///
/// The block list is captured at creation; blocks added afterwards are not
/// visited. The iterator borrows the table, so the table cannot be mutated
/// while an iteration is in progress.
pub struct TableIter<'a> {
    table: &'a PersistentTable,
    blocks: Vec<BlockId>,
    block_pos: usize,
    next_slot: SlotId,
}

impl<'a> TableIter<'a> {
    pub(super) fn new(table: &'a PersistentTable) -> Self {
        Self {
            table,
            blocks: table.heap.block_ids(),
            block_pos: 0,
            next_slot: 0,
        }
    }
}

impl Iterator for TableIter<'_> {
    type Item = (TupleId, Record);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &block_id = self.blocks.get(self.block_pos)?;
            let Some(block) = self.table.heap.block(block_id) else {
                // Block released since capture; move on
                self.block_pos += 1;
                self.next_slot = 0;
                continue;
            };

            for slot in self.next_slot..block.slot_count() {
                if block.flags(slot).is_active() {
                    self.next_slot = slot + 1;
                    let id = TupleId::new(block_id, slot);
                    let record = self
                        .table
                        .schema
                        .decode_row(block.row(slot))
                        .expect("stored row decodes");
                    return Some((id, record));
                }
            }

            self.block_pos += 1;
            self.next_slot = 0;
        }
    }
}
