//! A single undo quantum: an append-only log of reversible operations.

use crate::heap::TupleId;
use crate::schema::Record;

use super::UndoToken;

/// One reversible table mutation.
///
/// Inserts and deletes log only the tuple handle: an inserted row is removed
/// by handle, and a deleted row's slot is retained in the pending-delete
/// state until its quantum resolves, so the pre-image stays addressable.
/// Updates overwrite the slot in place and therefore log the pre-image by
/// value.
#[derive(Debug, Clone)]
pub enum UndoAction {
    /// A row was inserted at `id`.
    Insert { id: TupleId },
    /// The row at `id` was deleted; its slot is retained pending-delete.
    Delete { id: TupleId },
    /// The row at `id` was overwritten; `pre_image` is the prior value.
    Update { id: TupleId, pre_image: Record },
}

/// An append-only log of the mutations performed under one undo token.
#[derive(Debug)]
pub struct UndoQuantum {
    token: UndoToken,
    actions: Vec<UndoAction>,
}

impl UndoQuantum {
    /// Creates an empty quantum for `token`.
    pub fn new(token: UndoToken) -> Self {
        Self {
            token,
            actions: Vec::new(),
        }
    }

    /// Returns the quantum's token.
    pub fn token(&self) -> UndoToken {
        self.token
    }

    /// Returns the number of logged actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Logs an insert.
    pub fn log_insert(&mut self, id: TupleId) {
        self.actions.push(UndoAction::Insert { id });
    }

    /// Logs a delete. The slot at `id` must be retained pending-delete.
    pub fn log_delete(&mut self, id: TupleId) {
        self.actions.push(UndoAction::Delete { id });
    }

    /// Logs an update with the overwritten pre-image.
    pub fn log_update(&mut self, id: TupleId, pre_image: Record) {
        self.actions.push(UndoAction::Update { id, pre_image });
    }

    /// Consumes the quantum, yielding its actions in apply (call) order.
    /// Reversal iterates the result back to front.
    pub fn into_actions(self) -> Vec<UndoAction> {
        self.actions
    }
}
