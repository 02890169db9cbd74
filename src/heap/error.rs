//! Error types for the heap module.

use std::fmt;

use super::TupleId;

/// Errors from heap operations.
#[derive(Debug)]
pub enum HeapError {
    /// The referenced block does not exist.
    BlockNotFound(u64),
    /// The referenced slot does not hold a live row.
    TupleNotFound(TupleId),
    /// The referenced slot is not awaiting delete finalization.
    NotPendingDelete(TupleId),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::BlockNotFound(block) => write!(f, "block {} not found", block),
            HeapError::TupleNotFound(id) => {
                write!(f, "no live tuple at block {} slot {}", id.block.0, id.slot)
            }
            HeapError::NotPendingDelete(id) => {
                write!(
                    f,
                    "tuple at block {} slot {} is not pending delete",
                    id.block.0, id.slot
                )
            }
        }
    }
}

impl std::error::Error for HeapError {}
