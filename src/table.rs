//! Persistent table operations.
//!
//! [`PersistentTable`] is the public face of a partitioned in-memory table:
//! insert/update/delete with primary-key enforcement and undo logging, a
//! live forward iterator, copy-on-write snapshot streaming, a
//! compaction-tolerant elastic scanner, and forced compaction of underfilled
//! blocks.

pub mod compaction;
pub mod elastic;
pub mod error;
pub mod iterator;
pub mod persistent;

pub use elastic::{ElasticScanner, StrayTupleCatcher};
pub use error::TableError;
pub use iterator::TableIter;
pub use persistent::{PersistentTable, TableConfig};
