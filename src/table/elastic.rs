//! Elastic scanner: a live iterator robust to concurrent compaction.
//!
//! Unlike the copy-on-write iterator, the elastic scanner observes the
//! *live* table: it reports every tuple that was present at scanner
//! creation exactly once, tolerating interleaved mutation and forced
//! compaction. Two mechanisms keep that promise:
//!
//! - When compaction would move a not-yet-scanned tuple behind the cursor,
//!   it hands the tuple to the caller's [`StrayTupleCatcher`] before moving
//!   it (the scanner would otherwise miss it).
//! - When compaction moves an already-reported tuple ahead of the cursor,
//!   the destination slot is marked relocated and the scanner skips it once
//!   (it would otherwise be reported twice).
//!
//! Scanner state lives inside the table so compaction can consult the
//! cursor; the [`ElasticScanner`] handle just drives it.

use crate::heap::{BlockId, SlotId, TupleId};
use crate::schema::Record;

use super::persistent::PersistentTable;

/// Caller-supplied sink for tuples the scanner would otherwise miss due to
/// compaction moving them behind its cursor.
pub trait StrayTupleCatcher {
    /// Receives one stray tuple, before the move happens.
    fn catch_tuple(&mut self, record: &Record);
}

/// Internal state of the active elastic scan.
pub(crate) struct ElasticScanState {
    cursor_block: BlockId,
    next_slot: SlotId,
    catcher: Box<dyn StrayTupleCatcher>,
}

impl ElasticScanState {
    fn new(catcher: Box<dyn StrayTupleCatcher>) -> Self {
        Self {
            cursor_block: BlockId(0),
            next_slot: 0,
            catcher,
        }
    }

    /// Returns true if the cursor has already moved past the given slot.
    pub(super) fn has_scanned(&self, id: TupleId) -> bool {
        id.block < self.cursor_block
            || (id.block == self.cursor_block && id.slot < self.next_slot)
    }

    /// Reports a stray tuple through the catcher.
    pub(super) fn catch(&mut self, record: &Record) {
        self.catcher.catch_tuple(record);
    }
}

/// Handle for driving the table's active elastic scan.
///
/// The scan's cursor and catcher live in the table (so compaction can reach
/// them); the handle only borrows the table per `next` call, which lets the
/// caller interleave mutations and compaction with scanning.
pub struct ElasticScanner {
    _private: (),
}

impl ElasticScanner {
    /// Returns the next live tuple in block-then-slot order, or `None` when
    /// every block has been visited and the scan is finished.
    pub fn next(&mut self, table: &mut PersistentTable) -> Option<Record> {
        table.elastic_next()
    }
}

impl PersistentTable {
    /// Begins an elastic scan, replacing any previous one.
    ///
    /// Tuples that would be missed because compaction moved them behind the
    /// scan cursor are reported through `catcher` instead.
    pub fn elastic_scanner(&mut self, catcher: Box<dyn StrayTupleCatcher>) -> ElasticScanner {
        self.elastic = Some(ElasticScanState::new(catcher));
        ElasticScanner { _private: () }
    }

    pub(crate) fn elastic_next(&mut self) -> Option<Record> {
        loop {
            let (cursor_block, next_slot) = {
                let state = self.elastic.as_ref()?;
                (state.cursor_block, state.next_slot)
            };

            let Some(block_id) = self.heap.next_block_at_or_after(cursor_block) else {
                self.finish_elastic_scan();
                return None;
            };
            // A released cursor block resumes at the next surviving one
            let start_slot = if block_id == cursor_block { next_slot } else { 0 };

            let block = self.heap.block(block_id).expect("id from range query");
            let slot_count = block.slot_count();

            let mut relocated = Vec::new();
            let mut found = None;
            for slot in start_slot..slot_count {
                let flags = block.flags(slot);
                if !flags.is_active() {
                    continue;
                }
                if flags.is_relocated() {
                    relocated.push(slot);
                    continue;
                }
                found = Some(slot);
                break;
            }

            // Consume relocation markers the cursor is passing: each skip
            // pays back exactly one pre-move report
            for slot in relocated {
                self.heap
                    .update_flags(TupleId::new(block_id, slot), |f| f.set_relocated(false))
                    .expect("slot observed above");
            }

            let state = self.elastic.as_mut().expect("scan active");
            match found {
                Some(slot) => {
                    state.cursor_block = block_id;
                    state.next_slot = slot + 1;
                    let id = TupleId::new(block_id, slot);
                    let image = self.heap.row(id).expect("active slot");
                    let record = self.schema.decode_row(image).expect("stored row decodes");
                    return Some(record);
                }
                None => {
                    state.cursor_block = BlockId(block_id.0 + 1);
                    state.next_slot = 0;
                }
            }
        }
    }

    /// Ends the scan: drops the state and sweeps any relocation markers the
    /// cursor never reached.
    fn finish_elastic_scan(&mut self) {
        self.elastic = None;
        for block_id in self.heap.block_ids() {
            let block = self.heap.block_mut(block_id).expect("listed block exists");
            block.clear_relocated_bits();
        }
    }
}
