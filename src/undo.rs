//! Token-scoped undo quanta.
//!
//! Every table mutation is logged into the current [`UndoQuantum`], a batch
//! of reversible operations identified by a monotonically increasing
//! [`UndoToken`]. The embedding engine advances the token between plan
//! fragments; a finished quantum is either *released* (its mutations become
//! permanent and retained delete slots are reclaimed) or *undone* (its
//! mutations are reversed in LIFO order).
//!
//! Undo honors snapshot visibility: reversing a mutation never retracts
//! snapshot output that was already emitted, and rows restored by undo are
//! re-marked dirty when the active snapshot has not yet passed them so they
//! do not leak into the activation-time view.

pub mod context;
pub mod quantum;

pub use context::ExecutorContext;
pub use quantum::{UndoAction, UndoQuantum};

/// Identifier for an undo quantum. Tokens strictly increase over the life
/// of an [`ExecutorContext`].
pub type UndoToken = i64;
