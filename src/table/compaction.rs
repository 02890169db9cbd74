//! Forced compaction of underfilled blocks.
//!
//! Compaction relocates the live rows of sparsely filled blocks into the
//! free slots of better-filled ones, rehomes their index entries, and lets
//! the heap release the emptied blocks. It never touches pending-snapshot
//! blocks (their contents belong to the copy-on-write iterator until
//! demotion) and never empties a block with pending-delete slots (undo
//! quanta hold handles into those).
//!
//! An active elastic scan is consulted for every move so that tuples
//! crossing the scan cursor are reported exactly once (see
//! [`super::elastic`]).

use crate::heap::{BlockId, SlotId, TupleId};
use crate::index::IndexKey;

use super::elastic::ElasticScanState;
use super::persistent::PersistentTable;

/// Blocks below this live-row fill ratio are compaction sources.
const SOURCE_FILL_THRESHOLD: f64 = 0.95;

impl PersistentTable {
    /// Relocates tuples out of underfilled blocks until no further merge is
    /// possible.
    ///
    /// Callers must resolve (release or undo) outstanding undo quanta whose
    /// mutations touched this table before compacting: undo actions address
    /// tuples by slot handle, and compaction does not rewrite undo logs.
    pub fn do_forced_compaction(&mut self) {
        // The scan state steps aside so stray-catcher calls can borrow it
        // while the table moves rows.
        let mut scan = self.elastic.take();

        'merge: loop {
            let Some(source) = self.pick_source() else {
                break;
            };
            let slots = self.active_slots(source);
            debug_assert!(!slots.is_empty(), "source block has live rows");

            for slot in slots {
                let Some(destination) = self.pick_destination(source) else {
                    break 'merge;
                };
                self.relocate(TupleId::new(source, slot), destination, scan.as_mut());
            }
            // The emptied source was released by the heap when its last
            // slot was freed.
        }

        self.elastic = scan;
    }

    /// Picks the emptiest eligible source block.
    fn pick_source(&self) -> Option<BlockId> {
        self.heap
            .block_ids()
            .into_iter()
            .filter(|&id| !self.heap.is_pending(id))
            .filter_map(|id| self.heap.block(id).map(|b| (id, b)))
            .filter(|(_, b)| {
                b.active_count() > 0
                    && b.pending_delete_count() == 0
                    && b.fill_ratio() < SOURCE_FILL_THRESHOLD
            })
            .min_by(|(_, a), (_, b)| a.fill_ratio().total_cmp(&b.fill_ratio()))
            .map(|(id, _)| id)
    }

    /// Picks the fullest block with spare capacity, excluding the source.
    fn pick_destination(&self, source: BlockId) -> Option<BlockId> {
        self.heap
            .block_ids()
            .into_iter()
            .filter(|&id| id != source && !self.heap.is_pending(id))
            .filter_map(|id| self.heap.block(id).map(|b| (id, b)))
            .filter(|(_, b)| b.free_count() > 0)
            .max_by(|(_, a), (_, b)| a.fill_ratio().total_cmp(&b.fill_ratio()))
            .map(|(id, _)| id)
    }

    fn active_slots(&self, block_id: BlockId) -> Vec<SlotId> {
        self.heap
            .block(block_id)
            .map(|block| {
                block
                    .slots()
                    .filter(|(_, flags)| flags.is_active())
                    .map(|(slot, _)| slot)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Moves one live row between blocks, keeping the index and any active
    /// elastic scan consistent.
    fn relocate(
        &mut self,
        old: TupleId,
        destination: BlockId,
        scan: Option<&mut ElasticScanState>,
    ) {
        let image = self.heap.row(old).expect("live source slot").to_vec();
        let record = self.schema.decode_row(&image).expect("stored row decodes");
        let was_relocated = self.heap.flags(old).expect("live source slot").is_relocated();

        let new_slot = self
            .heap
            .allocate_slot_in(destination, &image)
            .expect("destination has a free slot");
        let new = TupleId::new(destination, new_slot);

        if let Some(scan) = scan {
            // Reported already = the cursor passed the old position, or the
            // row still carries a skip marker from an earlier move.
            let reported = scan.has_scanned(old) || was_relocated;
            let ahead_of_cursor = !scan.has_scanned(new);
            if !reported && !ahead_of_cursor {
                // Would vanish behind the cursor: report it now
                scan.catch(&record);
            } else if reported && ahead_of_cursor {
                // Would be reported twice: mark for one skip
                self.heap
                    .update_flags(new, |f| f.set_relocated(true))
                    .expect("freshly allocated slot");
            }
        }

        let key = IndexKey(self.schema.key_of(&record));
        self.index.rehome(&key, old, new);
        self.heap.free_slot(old).expect("live source slot");
    }
}
