//! The persistent table.
//!
//! A [`PersistentTable`] owns its block heap, its primary-key index, and the
//! state of at most one snapshot stream and one elastic scan. All mutations
//! log into the caller's current [`UndoQuantum`] and follow the
//! copy-on-write visibility protocol when a snapshot is active:
//!
//! - The first mutation of a not-yet-visited tuple in a pending-snapshot
//!   block copies its pre-image into the snapshot's preserved queue and sets
//!   the tuple's dirty bit; the copy-on-write iterator then skips the slot.
//! - Deleted rows keep their slot in the pending-delete state until the
//!   owning undo quantum resolves, so undo can reactivate them in place.
//! - Rows restored by undo are re-marked dirty when the snapshot has not yet
//!   passed them, keeping the activation-time view closed under undo.

use crate::datum::Value;
use crate::heap::{TupleHeap, TupleId};
use crate::index::{IndexKey, PrimaryKeyIndex};
use crate::schema::{Record, TableSchema};
use crate::snapshot::{
    ActivationRequest, SnapshotContext, StreamKind, StreamProgress, TupleOutputStreamProcessor,
    TupleSerializer,
};
use crate::undo::{UndoAction, UndoQuantum};

use super::elastic::ElasticScanState;
use super::error::TableError;
use super::iterator::TableIter;

/// Storage configuration for a table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Byte size of each tuple block. Power-of-two sizes keep blocks
    /// allocator-friendly; the default is 128 KiB.
    pub block_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            block_size: 128 * 1024,
        }
    }
}

/// A partitioned in-memory table with copy-on-write snapshot support.
pub struct PersistentTable {
    pub(super) name: String,
    pub(super) schema: TableSchema,
    pub(super) heap: TupleHeap,
    pub(super) index: PrimaryKeyIndex,
    pub(super) snapshot: Option<SnapshotContext>,
    pub(super) elastic: Option<ElasticScanState>,
}

impl PersistentTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>, schema: TableSchema, config: TableConfig) -> Self {
        let heap = TupleHeap::new(schema.row_width(), config.block_size);
        Self {
            name: name.into(),
            schema,
            heap,
            index: PrimaryKeyIndex::new(),
            snapshot: None,
            elastic: None,
        }
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Returns the number of live tuples.
    pub fn active_tuple_count(&self) -> usize {
        self.heap.active_tuple_count()
    }

    /// Returns the number of blocks awaiting the copy-on-write iterator.
    pub fn blocks_pending_snapshot_count(&self) -> usize {
        self.heap.pending_count()
    }

    /// Returns the number of blocks open for mutation and compaction.
    pub fn blocks_not_pending_snapshot_count(&self) -> usize {
        self.heap.not_pending_count()
    }

    /// Returns true if a snapshot stream is active.
    pub fn is_snapshotting(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Looks up a tuple by primary-key values.
    pub fn lookup_primary(&self, key: &[Value]) -> Option<TupleId> {
        self.index.lookup(&IndexKey(key.to_vec()))
    }

    /// Reads the flag header of a tuple slot. Diagnostic accessor; the
    /// dirty-bit invariants are part of the snapshot contract.
    pub fn tuple_flags(&self, id: TupleId) -> Option<crate::heap::TupleFlags> {
        self.heap.flags(id).ok()
    }

    /// Reads a live tuple.
    pub fn read(&self, id: TupleId) -> Option<Record> {
        let flags = self.heap.flags(id).ok()?;
        if !flags.is_active() {
            return None;
        }
        let image = self.heap.row(id).ok()?;
        self.schema.decode_row(image).ok()
    }

    /// Returns a forward iterator over live tuples in block-then-slot order.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter::new(self)
    }

    /// Inserts a tuple.
    ///
    /// Rejects schema violations and primary-key duplicates with no state
    /// change. The insert lands in a not-pending-snapshot block; if the
    /// allocator ever hands out a pending slot the tuple is marked dirty so
    /// an active snapshot cannot observe it.
    pub fn insert_tuple(
        &mut self,
        record: &Record,
        undo: &mut UndoQuantum,
    ) -> Result<TupleId, TableError> {
        self.schema.validate(record)?;
        let key = IndexKey(self.schema.key_of(record));
        if self.index.contains(&key) {
            return Err(TableError::UniqueConstraint {
                key: format_key(&key),
            });
        }

        let image = self.encode(record)?;
        let id = self.heap.allocate_slot(&image);
        if self.heap.is_pending(id.block) {
            self.heap
                .update_flags(id, |f| f.set_dirty(true))
                .expect("freshly allocated slot");
        }

        let inserted = self.index.insert(key, id);
        debug_assert!(inserted, "uniqueness checked before allocation");
        undo.log_insert(id);
        Ok(id)
    }

    /// Overwrites a live tuple with new values.
    ///
    /// Preserves the pre-image for an active snapshot that has not yet
    /// visited the tuple, then mutates the slot in place.
    pub fn update_tuple(
        &mut self,
        id: TupleId,
        new_values: &Record,
        undo: &mut UndoQuantum,
    ) -> Result<(), TableError> {
        self.schema.validate(new_values)?;
        let current = self.read_live(id)?;

        let old_key = IndexKey(self.schema.key_of(&current));
        let new_key = IndexKey(self.schema.key_of(new_values));
        if new_key != old_key && self.index.contains(&new_key) {
            return Err(TableError::UniqueConstraint {
                key: format_key(&new_key),
            });
        }

        self.preserve_for_snapshot(id, &current);
        undo.log_update(id, current);

        let image = self.encode(new_values)?;
        self.heap.write_row(id, &image)?;

        if new_key != old_key {
            self.index.remove(&old_key);
            let inserted = self.index.insert(new_key, id);
            debug_assert!(inserted, "uniqueness checked before write");
        }
        Ok(())
    }

    /// Deletes a live tuple.
    ///
    /// The slot is retained in the pending-delete state until the undo
    /// quantum resolves: release reclaims it, undo reactivates it in place.
    pub fn delete_tuple(&mut self, id: TupleId, undo: &mut UndoQuantum) -> Result<(), TableError> {
        let current = self.read_live(id)?;
        self.preserve_for_snapshot(id, &current);

        self.heap.mark_deleted(id)?;
        self.index.remove(&IndexKey(self.schema.key_of(&current)));
        undo.log_delete(id);
        Ok(())
    }

    /// Transitions the table into snapshot mode.
    ///
    /// Parses and compiles the activation payload first: a malformed request
    /// leaves the table unchanged. On success every existing block becomes
    /// pending-snapshot and the iterator captures the set.
    pub fn activate_stream(
        &mut self,
        serializer: Box<dyn TupleSerializer>,
        kind: StreamKind,
        partition_id: i32,
        input: &[u8],
    ) -> Result<(), TableError> {
        if self.snapshot.is_some() {
            return Err(TableError::SnapshotAlreadyActive);
        }
        let request = ActivationRequest::parse(input, &self.schema)?;

        self.heap.swap_classification();
        let blocks = self.heap.pending_block_ids();
        let remaining = self.heap.active_tuple_count() as i64;
        self.snapshot = Some(SnapshotContext::new(
            kind,
            partition_id,
            serializer,
            request.predicates,
            request.delete_as_we_go,
            blocks,
            remaining,
        ));
        Ok(())
    }

    /// Drives snapshot output until every stream buffer is full or the
    /// snapshot set is exhausted.
    ///
    /// Returns the remaining tuple count (zero exactly when the snapshot
    /// completed and the table returned to idle) and the final byte position
    /// of each stream.
    pub fn stream_more(
        &mut self,
        streams: &mut TupleOutputStreamProcessor,
    ) -> Result<StreamProgress, TableError> {
        let mut context = self.snapshot.take().ok_or(TableError::SnapshotNotActive)?;

        if context.predicate_count() != 0 && context.predicate_count() != streams.len() {
            let predicates = context.predicate_count();
            self.snapshot = Some(context);
            return Err(TableError::PredicateCountMismatch {
                predicates,
                streams: streams.len(),
            });
        }

        match context.stream_more(&mut self.heap, &mut self.index, &self.schema, streams) {
            Ok(progress) => {
                if progress.remaining > 0 {
                    self.snapshot = Some(context);
                } else {
                    debug_assert_eq!(
                        self.heap.pending_count(),
                        0,
                        "snapshot completed with undrained pending blocks"
                    );
                }
                Ok(progress)
            }
            Err(e) => {
                self.snapshot = Some(context);
                Err(e.into())
            }
        }
    }

    /// Reverses one logged mutation. Called by the executor context in LIFO
    /// order while undoing a quantum.
    pub(crate) fn apply_undo_action(&mut self, action: UndoAction) {
        match action {
            UndoAction::Insert { id } => {
                let record = self.slot_record(id);
                // An insert that predates the snapshot is part of its view.
                self.preserve_for_snapshot(id, &record);
                let key = IndexKey(self.schema.key_of(&record));
                let removed = self.index.remove(&key);
                debug_assert_eq!(removed, Some(id), "undone insert was reindexed");
                self.heap.free_slot(id).expect("undone insert is live");
            }
            UndoAction::Delete { id } => {
                self.heap.reactivate(id).expect("undone delete is retained");
                let record = self.slot_record(id);
                let key = IndexKey(self.schema.key_of(&record));
                let inserted = self.index.insert(key, id);
                assert!(inserted, "key collision while undoing delete");
                // The restored row must stay invisible to a snapshot that
                // has not passed it; its pre-image is already streamed or
                // queued.
                if self.snapshot_awaits(id) {
                    self.heap
                        .update_flags(id, |f| f.set_dirty(true))
                        .expect("reactivated slot");
                }
            }
            UndoAction::Update { id, pre_image } => {
                let current = self.slot_record(id);
                self.preserve_for_snapshot(id, &current);

                let current_key = IndexKey(self.schema.key_of(&current));
                let pre_key = IndexKey(self.schema.key_of(&pre_image));
                let image = self.encode(&pre_image).expect("pre-image encodes");
                self.heap.write_row(id, &image).expect("updated slot is live");

                if pre_key != current_key {
                    self.index.remove(&current_key);
                    let inserted = self.index.insert(pre_key, id);
                    assert!(inserted, "key collision while undoing update");
                }
            }
        }
    }

    /// Makes one logged mutation permanent. Called by the executor context
    /// in apply order while releasing a quantum.
    pub(crate) fn release_undo_action(&mut self, action: &UndoAction) {
        if let UndoAction::Delete { id } = action {
            self.heap
                .finalize_delete(*id)
                .expect("released delete is retained");
        }
    }

    /// Copies the pre-image into the snapshot's preserved queue and marks
    /// the slot dirty, when an active snapshot still needs the
    /// activation-time value of this tuple.
    fn preserve_for_snapshot(&mut self, id: TupleId, current: &Record) {
        let Some(context) = self.snapshot.as_mut() else {
            return;
        };
        if !self.heap.is_pending(id.block) {
            return;
        }
        let flags = self.heap.flags(id).expect("live tuple has flags");
        if flags.is_dirty() || context.iterator().has_passed(id) {
            return;
        }
        context.push_preserved(current.clone());
        self.heap
            .update_flags(id, |f| f.set_dirty(true))
            .expect("live tuple");
    }

    /// Returns true if the active snapshot has not yet passed this slot.
    fn snapshot_awaits(&self, id: TupleId) -> bool {
        match &self.snapshot {
            Some(context) => {
                self.heap.is_pending(id.block) && !context.iterator().has_passed(id)
            }
            None => false,
        }
    }

    /// Decodes the row image of a live or retained slot.
    ///
    /// # Panics
    ///
    /// Panics when the slot holds no row; undo actions reference slots whose
    /// retention the quantum lifecycle guarantees.
    fn slot_record(&self, id: TupleId) -> Record {
        let image = self.heap.row(id).expect("slot retains its row");
        self.schema.decode_row(image).expect("stored row decodes")
    }

    fn read_live(&self, id: TupleId) -> Result<Record, TableError> {
        let flags = self.heap.flags(id)?;
        if !flags.is_active() {
            return Err(TableError::Heap(crate::heap::HeapError::TupleNotFound(id)));
        }
        let image = self.heap.row(id)?;
        Ok(self.schema.decode_row(image)?)
    }

    pub(super) fn encode(&self, record: &Record) -> Result<Vec<u8>, TableError> {
        let mut image = vec![0u8; self.schema.row_width()];
        self.schema.encode_row(record, &mut image)?;
        Ok(image)
    }
}

fn format_key(key: &IndexKey) -> String {
    let parts: Vec<String> = key.0.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}
