//! Copy-on-write snapshot streaming.
//!
//! A snapshot lets a reader drain a consistent point-in-time view of a table
//! while writers keep mutating it. Activation swaps every block into the
//! pending-snapshot set; [`CopyOnWriteIterator`](cow::CopyOnWriteIterator)
//! then drains that set in block order while the dirty-bit protocol preserves
//! pre-images of tuples the writers touch first.
//!
//! Output is streamed through a [`TupleOutputStreamProcessor`]: one
//! length-prefixed, big-endian [`TupleOutputStream`] per predicate, filled in
//! lock step until a buffer cannot take the next row, at which point the
//! whole processor yields and the caller drains the buffers and calls again.

pub mod context;
pub mod cow;
pub mod predicate;
pub mod serializer;
pub mod stream;

pub use context::{SnapshotContext, StreamError, StreamKind, StreamProgress};
pub use cow::CopyOnWriteIterator;
pub use predicate::{ActivationError, ActivationRequest, PredicateSet};
pub use serializer::{DefaultTupleSerializer, TupleSerializer};
pub use stream::{TupleOutputStream, TupleOutputStreamProcessor};
