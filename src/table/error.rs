//! Table-level errors.

use std::fmt;

use crate::datum::SerializationError;
use crate::heap::HeapError;
use crate::schema::SchemaViolation;
use crate::snapshot::{ActivationError, StreamError};

/// Errors from persistent table operations.
#[derive(Debug)]
pub enum TableError {
    /// Write rejected by schema validation; no state change.
    Schema(SchemaViolation),
    /// Insert or update would duplicate a primary key; no state change.
    UniqueConstraint { key: String },
    /// `activate_stream` on a table already in snapshot mode.
    SnapshotAlreadyActive,
    /// `stream_more` on a table with no active snapshot.
    SnapshotNotActive,
    /// The predicate count does not match the output stream count.
    PredicateCountMismatch { predicates: usize, streams: usize },
    /// Activation input rejected; the table is unchanged.
    Activation(ActivationError),
    /// Failure while driving snapshot output.
    Stream(StreamError),
    /// The referenced tuple does not exist or is not live.
    Heap(HeapError),
    /// Row encoding or decoding failed.
    Serialization(SerializationError),
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Schema(e) => write!(f, "schema violation: {}", e),
            TableError::UniqueConstraint { key } => {
                write!(f, "unique constraint violation on primary key {}", key)
            }
            TableError::SnapshotAlreadyActive => {
                write!(f, "a snapshot stream is already active on this table")
            }
            TableError::SnapshotNotActive => {
                write!(f, "no snapshot stream is active on this table")
            }
            TableError::PredicateCountMismatch {
                predicates,
                streams,
            } => {
                write!(
                    f,
                    "{} predicates cannot feed {} output streams",
                    predicates, streams
                )
            }
            TableError::Activation(e) => write!(f, "stream activation rejected: {}", e),
            TableError::Stream(e) => write!(f, "snapshot streaming failed: {}", e),
            TableError::Heap(e) => write!(f, "{}", e),
            TableError::Serialization(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TableError {}

impl From<SchemaViolation> for TableError {
    fn from(e: SchemaViolation) -> Self {
        TableError::Schema(e)
    }
}

impl From<HeapError> for TableError {
    fn from(e: HeapError) -> Self {
        TableError::Heap(e)
    }
}

impl From<ActivationError> for TableError {
    fn from(e: ActivationError) -> Self {
        TableError::Activation(e)
    }
}

impl From<StreamError> for TableError {
    fn from(e: StreamError) -> Self {
        TableError::Stream(e)
    }
}

impl From<SerializationError> for TableError {
    fn from(e: SerializationError) -> Self {
        TableError::Serialization(e)
    }
}
