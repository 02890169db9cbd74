//! Primary-key index.
//!
//! A balanced-tree unique index mapping key column values to [`TupleId`]
//! handles. The table keeps it consistent with every insert, update, delete,
//! and compaction move; uniqueness violations surface before any table state
//! changes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::datum::Value;
use crate::heap::TupleId;

/// An index key: the values of the key columns, in key order.
///
/// Wraps `Vec<Value>` to supply the total ordering `BTreeMap` requires.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey(pub Vec<Value>);

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(self.0.len(), other.0.len());
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

/// Balanced-tree unique index over a table's key columns.
#[derive(Debug, Default)]
pub struct PrimaryKeyIndex {
    entries: BTreeMap<IndexKey, TupleId>,
}

impl PrimaryKeyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of indexed tuples.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up the tuple for a key.
    pub fn lookup(&self, key: &IndexKey) -> Option<TupleId> {
        self.entries.get(key).copied()
    }

    /// Inserts a key. Returns false (and leaves the index unchanged) if the
    /// key is already present.
    pub fn insert(&mut self, key: IndexKey, id: TupleId) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, id);
        true
    }

    /// Removes a key, returning the tuple it mapped to.
    pub fn remove(&mut self, key: &IndexKey) -> Option<TupleId> {
        self.entries.remove(key)
    }

    /// Rewrites the tuple handle for a key whose row was relocated by
    /// compaction.
    ///
    /// # Panics
    ///
    /// Panics if the key is absent or maps to a different slot than
    /// `old_id`; compaction moving an unindexed row is an internal
    /// invariant breach.
    pub fn rehome(&mut self, key: &IndexKey, old_id: TupleId, new_id: TupleId) {
        let entry = self
            .entries
            .get_mut(key)
            .expect("rehome of unindexed tuple");
        assert_eq!(*entry, old_id, "rehome with stale tuple id");
        *entry = new_id;
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, TupleId)> {
        self.entries.iter().map(|(k, &v)| (k, v))
    }
}
