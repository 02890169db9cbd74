//! Snapshot controller.
//!
//! [`SnapshotContext`] is the per-activation state machine payload: the
//! compiled predicates, the copy-on-write iterator over the captured block
//! set, the preserved pre-image queue fed by writers, and the
//! pending-next-tuple stash that carries a fetched-but-unwritten tuple
//! across a yield. The table holds `Option<SnapshotContext>`: `None` is
//! idle, `Some` is snapshotting.

use std::collections::VecDeque;
use std::fmt;

use bytes::BytesMut;

use crate::datum::SerializationError;
use crate::expr::ExprError;
use crate::heap::{TupleHeap, TupleId};
use crate::index::{IndexKey, PrimaryKeyIndex};
use crate::schema::{Record, TableSchema};

use super::cow::CopyOnWriteIterator;
use super::predicate::PredicateSet;
use super::serializer::TupleSerializer;
use super::stream::TupleOutputStreamProcessor;

/// The kind of table stream being activated.
///
/// Only snapshot streaming is implemented; recovery and rebalance streams
/// would slot in here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Point-in-time snapshot stream.
    Snapshot,
}

/// Result of one `stream_more` call.
#[derive(Debug)]
pub struct StreamProgress {
    /// Activation-time tuples not yet consumed. Zero means the snapshot
    /// completed in this call and the table has returned to idle.
    pub remaining: i64,
    /// Final byte position of each output stream.
    pub positions: Vec<usize>,
}

/// Errors surfaced while driving snapshot output.
#[derive(Debug)]
pub enum StreamError {
    /// A predicate failed to evaluate against a tuple.
    Predicate(ExprError),
    /// Tuple serialization failed.
    Serialization(SerializationError),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Predicate(e) => write!(f, "predicate evaluation failed: {}", e),
            StreamError::Serialization(e) => write!(f, "tuple serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StreamError {}

/// A tuple fetched from the snapshot but not yet written to the streams.
///
/// `source` is the live slot the tuple came from, when it came from the
/// block heap directly; preserved pre-images have no source slot. The
/// record is an owned copy, so a stashed tuple survives writer mutations
/// between `stream_more` calls.
#[derive(Debug)]
struct FetchedTuple {
    record: Record,
    source: Option<TupleId>,
}

/// State of one snapshot activation.
pub struct SnapshotContext {
    kind: StreamKind,
    partition_id: i32,
    serializer: Box<dyn TupleSerializer>,
    predicates: PredicateSet,
    delete_as_we_go: bool,
    iterator: CopyOnWriteIterator,
    preserved: VecDeque<Record>,
    stash: Option<FetchedTuple>,
    remaining: i64,
}

impl fmt::Debug for SnapshotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotContext")
            .field("kind", &self.kind)
            .field("partition_id", &self.partition_id)
            .field("delete_as_we_go", &self.delete_as_we_go)
            .field("remaining", &self.remaining)
            .field("preserved", &self.preserved.len())
            .finish_non_exhaustive()
    }
}

impl SnapshotContext {
    /// Creates the context for a fresh activation.
    ///
    /// `blocks` is the pending-snapshot set captured at activation and
    /// `remaining` the activation-time active tuple count.
    pub fn new(
        kind: StreamKind,
        partition_id: i32,
        serializer: Box<dyn TupleSerializer>,
        predicates: PredicateSet,
        delete_as_we_go: bool,
        blocks: Vec<crate::heap::BlockId>,
        remaining: i64,
    ) -> Self {
        Self {
            kind,
            partition_id,
            serializer,
            predicates,
            delete_as_we_go,
            iterator: CopyOnWriteIterator::new(blocks),
            preserved: VecDeque::new(),
            stash: None,
            remaining,
        }
    }

    /// Returns the number of compiled predicates (zero means accept-all).
    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    /// Returns the copy-on-write iterator, for pass-position queries.
    pub fn iterator(&self) -> &CopyOnWriteIterator {
        &self.iterator
    }

    /// Queues a preserved pre-image for streaming.
    ///
    /// Writers call this (through the table) before the first mutation of a
    /// not-yet-visited tuple in a pending-snapshot block.
    pub fn push_preserved(&mut self, pre_image: Record) {
        self.preserved.push_back(pre_image);
    }

    /// Drives output until every stream is full or the snapshot set is
    /// exhausted.
    ///
    /// Preserved pre-images are drained before the iterator advances. The
    /// final call writes a zero trailing sentinel and reports zero
    /// remaining; a yield stashes the unwritten tuple and reports its
    /// length as the trailing sentinel.
    pub fn stream_more(
        &mut self,
        heap: &mut TupleHeap,
        index: &mut PrimaryKeyIndex,
        schema: &TableSchema,
        streams: &mut TupleOutputStreamProcessor,
    ) -> Result<StreamProgress, StreamError> {
        streams.open_all(self.partition_id);
        let mut scratch = BytesMut::new();

        loop {
            let fetched = match self.stash.take() {
                Some(tuple) => Some(tuple),
                None => self.fetch(heap, schema)?,
            };
            let Some(tuple) = fetched else {
                let positions = streams.close_all(0);
                debug_assert_eq!(self.remaining, 0, "snapshot drained with tuples unaccounted");
                self.remaining = 0;
                return Ok(StreamProgress {
                    remaining: 0,
                    positions,
                });
            };

            let accepts = self
                .predicates
                .acceptance(&tuple.record, streams.len())
                .map_err(StreamError::Predicate)?;

            if accepts.iter().any(|&a| a) {
                scratch.clear();
                self.serializer
                    .serialize_to(&tuple.record, schema, &mut scratch)
                    .map_err(StreamError::Serialization)?;

                if !streams.write_row(&scratch, &accepts) {
                    // Buffer-full yield: keep the tuple for the next call so
                    // no iterator step is lost at the boundary.
                    let positions = streams.close_all(scratch.len() as i32);
                    self.stash = Some(tuple);
                    return Ok(StreamProgress {
                        remaining: self.remaining,
                        positions,
                    });
                }

                if self.delete_as_we_go {
                    Self::delete_streamed(heap, index, schema, &tuple);
                }
            }

            self.remaining -= 1;
        }
    }

    /// Fetches the next snapshot tuple: preserved pre-images first, then the
    /// copy-on-write iterator.
    fn fetch(
        &mut self,
        heap: &mut TupleHeap,
        schema: &TableSchema,
    ) -> Result<Option<FetchedTuple>, StreamError> {
        if let Some(record) = self.preserved.pop_front() {
            return Ok(Some(FetchedTuple {
                record,
                source: None,
            }));
        }
        match self.iterator.next(heap) {
            Some(id) => {
                let image = heap.row(id).expect("iterator yields live slots");
                let record = schema
                    .decode_row(image)
                    .map_err(StreamError::Serialization)?;
                Ok(Some(FetchedTuple {
                    record,
                    source: Some(id),
                }))
            }
            None => Ok(None),
        }
    }

    /// Removes a just-streamed tuple from the table (delete-as-we-go).
    ///
    /// Preserved pre-images have no live slot and are skipped. The slot is
    /// also left alone if a writer deleted or re-keyed the row between the
    /// fetch and the write (only possible across a yield boundary).
    fn delete_streamed(
        heap: &mut TupleHeap,
        index: &mut PrimaryKeyIndex,
        schema: &TableSchema,
        tuple: &FetchedTuple,
    ) {
        let Some(id) = tuple.source else {
            return;
        };
        let key = IndexKey(schema.key_of(&tuple.record));
        let live = heap.flags(id).map(|f| f.is_active()).unwrap_or(false);
        if live && index.lookup(&key) == Some(id) {
            index.remove(&key);
            heap.free_slot(id).expect("slot checked active");
        }
    }
}
