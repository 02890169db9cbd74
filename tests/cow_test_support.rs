//! Shared fixture for the snapshot and elastic-scan scenarios.
//!
//! Builds the canonical nine-column table (two INTEGER columns followed by
//! seven BIGINT fillers, 64-byte rows), drives randomized mutation mixes
//! with a seeded RNG, and keeps the undo-token bookkeeping the undo
//! scenarios assert against.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bytes::BufMut;
use strata::datum::{Type, Value};
use strata::schema::{ColumnSpec, Record, TableSchema};
use strata::table::{PersistentTable, TableConfig};
use strata::undo::{ExecutorContext, UndoToken};

/// Fixed row width of the test schema: 2 * 4 + 7 * 8 bytes.
pub const TUPLE_WIDTH: usize = 64;

/// Builds the test schema: `(id INTEGER PRIMARY KEY, part INTEGER, 7 x
/// BIGINT fillers)` partitioned on the second column.
pub fn test_schema() -> TableSchema {
    let mut columns = vec![
        ColumnSpec::new("1", Type::Int4),
        ColumnSpec::new("2", Type::Int4),
    ];
    for name in ["3", "4", "5", "6", "7", "8", "9"] {
        columns.push(ColumnSpec::new(name, Type::Int8));
    }
    TableSchema::new(columns, vec![0]).with_partition_column(1)
}

/// Combines the two leading INTEGER columns into the value identity the
/// scenarios compare on.
pub fn combine(key: i32, second: i32) -> i64 {
    ((key as i64) << 32) | (second as u32 as i64)
}

/// Builds a row for the test schema.
pub fn test_record(key: i32, second: i32) -> Record {
    let mut values = vec![Value::Int32(key), Value::Int32(second)];
    values.extend(std::iter::repeat(Value::Int64(0)).take(7));
    Record::new(values)
}

/// Encodes a snapshot activation payload.
pub fn encode_activation(delete_as_we_go: bool, predicates: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u8(delete_as_we_go as u8);
    out.put_i32(predicates.len() as i32);
    for p in predicates {
        out.put_i32(p.len() as i32);
        out.put_slice(p.as_bytes());
    }
    out
}

/// Builds the partition-routing predicate `part % nparts == part_id` as a
/// JSON expression tree. A `part_id` of -1 matches nothing: the modulus of
/// the non-negative partition column never equals it.
pub fn partition_predicate(nparts: i64, part_id: i64) -> String {
    serde_json::json!({
        "TYPE": "COMPARE_EQUAL",
        "LEFT": {
            "TYPE": "OPERATOR_MODULUS",
            "LEFT": { "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 1 },
            "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": nparts },
        },
        "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": part_id },
    })
    .to_string()
}

/// Parses one stream's framed output into `(key, second)` pairs.
pub fn parse_stream(bytes: &[u8]) -> Vec<(i32, i32)> {
    let read_i32 =
        |at: usize| i32::from_be_bytes(bytes[at..at + 4].try_into().expect("framed i32"));
    let row_count = read_i32(4);
    let mut rows = Vec::with_capacity(row_count as usize);
    let mut at = 8;
    for _ in 0..row_count {
        let len = read_i32(at) as usize;
        assert_eq!(len, TUPLE_WIDTH, "unexpected tuple length prefix");
        rows.push((read_i32(at + 4), read_i32(at + 8)));
        at += 4 + len;
    }
    rows
}

/// Table-plus-context fixture with the original test tool's counters.
pub struct TableFixture {
    pub table: PersistentTable,
    pub ctx: ExecutorContext,
    pub rng: StdRng,
    next_key: i32,
    pub undo_token: UndoToken,
    pub tuples_inserted: i64,
    pub tuples_deleted: i64,
    pub inserted_in_last_undo: i64,
    pub deleted_in_last_undo: i64,
}

impl TableFixture {
    /// Creates an empty fixture with its own key counter and RNG seed.
    pub fn new(seed: u64, block_size: usize) -> Self {
        let table = PersistentTable::new("Foo", test_schema(), TableConfig { block_size });
        Self {
            table,
            ctx: ExecutorContext::new(),
            rng: StdRng::seed_from_u64(seed),
            next_key: 0,
            undo_token: 0,
            tuples_inserted: 0,
            tuples_deleted: 0,
            inserted_in_last_undo: 0,
            deleted_in_last_undo: 0,
        }
    }

    /// Populates `n` unique tuples and seals them into a released quantum so
    /// later undo rounds cannot touch the base data.
    pub fn populate(&mut self, n: usize) {
        for _ in 0..n {
            self.insert_random();
        }
        self.tuples_inserted = 0;
        self.inserted_in_last_undo = 0;
        self.advance_token_after_release();
    }

    /// Inserts one tuple with a fresh key and random second column.
    pub fn insert_random(&mut self) -> (i32, i32) {
        let key = self.next_key;
        self.next_key += 1;
        let second = self.rng.gen_range(0..i32::MAX);
        let record = test_record(key, second);
        self.table
            .insert_tuple(&record, self.ctx.current_quantum())
            .expect("fresh key inserts");
        self.tuples_inserted += 1;
        self.inserted_in_last_undo += 1;
        (key, second)
    }

    /// Picks a uniformly random live tuple, as the original `getRandomTuple`
    /// does, by walking the live iterator.
    pub fn random_tuple(&mut self) -> Option<(strata::heap::TupleId, Record)> {
        let count = self.table.active_tuple_count();
        if count == 0 {
            return None;
        }
        let nth = self.rng.gen_range(0..count);
        self.table.iter().nth(nth)
    }

    /// Deletes one random live tuple, returning its `(key, second)` pair.
    pub fn delete_random(&mut self) -> Option<(i32, i32)> {
        let (id, record) = self.random_tuple()?;
        let pair = record_pair(&record);
        self.table
            .delete_tuple(id, self.ctx.current_quantum())
            .expect("picked tuple is live");
        self.tuples_deleted += 1;
        self.deleted_in_last_undo += 1;
        Some(pair)
    }

    /// Rewrites one random live tuple's second column, returning the
    /// `(from, to)` pairs.
    pub fn update_random(&mut self) -> Option<((i32, i32), (i32, i32))> {
        let (id, record) = self.random_tuple()?;
        let from = record_pair(&record);
        let second = self.rng.gen_range(0..i32::MAX);
        let new_record = test_record(from.0, second);
        self.table
            .update_tuple(id, &new_record, self.ctx.current_quantum())
            .expect("picked tuple is live");
        Some((from, (from.0, second)))
    }

    /// Performs one mutation chosen uniformly from insert/update/delete.
    pub fn random_mutation(&mut self) {
        match self.rng.gen_range(0..3) {
            0 => {
                self.delete_random();
            }
            1 => {
                self.insert_random();
            }
            _ => {
                self.update_random();
            }
        }
    }

    /// Randomly releases or undoes the current quantum, then begins the
    /// next one, mirroring the original `doRandomUndo`.
    pub fn random_undo(&mut self) {
        if self.rng.gen_bool(0.5) {
            self.undo_last();
        } else {
            self.advance_token_after_release();
        }
    }

    /// Undoes the current quantum and begins the next one.
    pub fn undo_last(&mut self) {
        self.ctx.undo_undo_token(self.undo_token, &mut self.table);
        self.tuples_deleted -= self.deleted_in_last_undo;
        self.tuples_inserted -= self.inserted_in_last_undo;
        self.begin_next_quantum();
    }

    /// Releases the current quantum and begins the next one.
    pub fn advance_token_after_release(&mut self) {
        self.ctx
            .release_undo_token(self.undo_token, &mut self.table);
        self.begin_next_quantum();
    }

    fn begin_next_quantum(&mut self) {
        self.undo_token += 1;
        self.ctx.set_undo_token(self.undo_token);
        self.deleted_in_last_undo = 0;
        self.inserted_in_last_undo = 0;
    }

    /// Collects the table's live `(key, second)` identities, asserting key
    /// uniqueness.
    pub fn table_value_set(&self) -> BTreeSet<i64> {
        let mut set = BTreeSet::new();
        for (_, record) in self.table.iter() {
            let (key, second) = record_pair(&record);
            let inserted = set.insert(combine(key, second));
            assert!(inserted, "duplicate live tuple for key {}", key);
        }
        set
    }

    /// Asserts that no live tuple carries a dirty bit (the post-snapshot
    /// invariant).
    pub fn assert_no_dirty_tuples(&self) {
        for (id, record) in self.table.iter() {
            let flags = self.table.tuple_flags(id).expect("live tuple");
            assert!(
                !flags.is_dirty(),
                "tuple {:?} is active and dirty after snapshot end",
                record_pair(&record)
            );
        }
    }
}

/// Extracts the `(key, second)` pair of a test-schema record.
pub fn record_pair(record: &Record) -> (i32, i32) {
    match (&record.values[0], &record.values[1]) {
        (Value::Int32(key), Value::Int32(second)) => (*key, *second),
        other => panic!("unexpected leading columns {:?}", other),
    }
}
