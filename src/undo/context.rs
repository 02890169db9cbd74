//! Executor context: owner of the undo quantum chain.
//!
//! The embedding engine drives one [`ExecutorContext`] per partition. It
//! supplies the current [`UndoQuantum`] to table mutations and resolves
//! finished quanta by token: release makes them permanent, undo reverses
//! them newest-first.

use crate::table::PersistentTable;

use super::quantum::UndoQuantum;
use super::UndoToken;

/// Per-partition execution context owning the undo log.
///
/// Quanta are kept in ascending token order; the last entry is the current
/// quantum that table mutations log into.
#[derive(Debug)]
pub struct ExecutorContext {
    quanta: Vec<UndoQuantum>,
}

impl ExecutorContext {
    /// Creates a context with an open quantum for token 0.
    pub fn new() -> Self {
        Self {
            quanta: vec![UndoQuantum::new(0)],
        }
    }

    /// Begins a new quantum, finalizing the current one without resolving it.
    ///
    /// # Panics
    ///
    /// Panics if `token` does not exceed every outstanding token; tokens are
    /// monotone by contract and a regression is a programmer error.
    pub fn set_undo_token(&mut self, token: UndoToken) {
        if let Some(last) = self.quanta.last() {
            assert!(
                token > last.token(),
                "undo token {} does not advance past {}",
                token,
                last.token()
            );
        }
        self.quanta.push(UndoQuantum::new(token));
    }

    /// Returns the current quantum for mutation logging.
    ///
    /// # Panics
    ///
    /// Panics if every quantum has been resolved and no new token was set;
    /// mutating without an open quantum is a programmer error.
    pub fn current_quantum(&mut self) -> &mut UndoQuantum {
        self.quanta
            .last_mut()
            .expect("no open undo quantum; call set_undo_token first")
    }

    /// Returns the number of unresolved quanta.
    pub fn outstanding_quanta(&self) -> usize {
        self.quanta.len()
    }

    /// Releases every quantum with a token at or below `token`, oldest
    /// first. Released mutations become permanent and retained delete slots
    /// are reclaimed.
    ///
    /// # Panics
    ///
    /// Panics if no such quantum exists (unknown or already-released token).
    pub fn release_undo_token(&mut self, token: UndoToken, table: &mut PersistentTable) {
        assert!(
            self.quanta.first().is_some_and(|q| q.token() <= token),
            "release of invalid undo token {}",
            token
        );
        while self.quanta.first().is_some_and(|q| q.token() <= token) {
            let quantum = self.quanta.remove(0);
            for action in quantum.into_actions() {
                table.release_undo_action(&action);
            }
        }
    }

    /// Undoes every quantum with a token at or above `token`, newest first;
    /// actions within a quantum are reversed in LIFO order.
    ///
    /// # Panics
    ///
    /// Panics if no such quantum exists (unknown or already-resolved token).
    pub fn undo_undo_token(&mut self, token: UndoToken, table: &mut PersistentTable) {
        assert!(
            self.quanta.last().is_some_and(|q| q.token() >= token),
            "undo of invalid undo token {}",
            token
        );
        while self.quanta.last().is_some_and(|q| q.token() >= token) {
            let quantum = self.quanta.pop().expect("checked above");
            for action in quantum.into_actions().into_iter().rev() {
                table.apply_undo_action(action);
            }
        }
    }
}

impl Default for ExecutorContext {
    fn default() -> Self {
        Self::new()
    }
}
