//! Per-tuple flag header.

use std::fmt;

/// The one-byte flag header at the start of every tuple slot.
///
/// Bit assignments:
/// - `ACTIVE`: the slot holds a live row reachable from the table iterator.
/// - `DIRTY`: the row was mutated (or inserted) during the current snapshot
///   window; the copy-on-write iterator skips dirty slots.
/// - `PENDING_DELETE`: the row was deleted but its slot is retained until
///   the owning undo quantum is released or undone.
/// - `RELOCATED`: the row was moved here by compaction after an elastic scan
///   already reported it; the scanner skips it once.
///
/// The remaining four bits are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TupleFlags(u8);

impl TupleFlags {
    const ACTIVE: u8 = 0b0000_0001;
    const DIRTY: u8 = 0b0000_0010;
    const PENDING_DELETE: u8 = 0b0000_0100;
    const RELOCATED: u8 = 0b0000_1000;

    /// An all-clear flag byte (free slot).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Reads a flag byte from its raw representation.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the raw byte representation.
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns true if the slot holds a live row.
    pub const fn is_active(self) -> bool {
        self.0 & Self::ACTIVE != 0
    }

    /// Returns true if the row was mutated during the current snapshot window.
    pub const fn is_dirty(self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    /// Returns true if the slot awaits delete finalization.
    pub const fn is_pending_delete(self) -> bool {
        self.0 & Self::PENDING_DELETE != 0
    }

    /// Returns true if compaction moved an already-scanned row here.
    pub const fn is_relocated(self) -> bool {
        self.0 & Self::RELOCATED != 0
    }

    /// Sets or clears the active bit.
    pub fn set_active(&mut self, active: bool) {
        self.set(Self::ACTIVE, active);
    }

    /// Sets or clears the dirty bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.set(Self::DIRTY, dirty);
    }

    /// Sets or clears the pending-delete bit.
    pub fn set_pending_delete(&mut self, pending: bool) {
        self.set(Self::PENDING_DELETE, pending);
    }

    /// Sets or clears the relocated bit.
    pub fn set_relocated(&mut self, relocated: bool) {
        self.set(Self::RELOCATED, relocated);
    }

    fn set(&mut self, mask: u8, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl fmt::Display for TupleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}{}{}{}]",
            if self.is_active() { 'a' } else { '-' },
            if self.is_dirty() { 'd' } else { '-' },
            if self.is_pending_delete() { 'p' } else { '-' },
            if self.is_relocated() { 'r' } else { '-' },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_independent() {
        let mut flags = TupleFlags::empty();

        flags.set_active(false);
        flags.set_dirty(true);
        assert!(!flags.is_active());
        assert!(flags.is_dirty());

        flags.set_active(true);
        assert!(flags.is_dirty());
        assert!(flags.is_active());

        flags.set_dirty(false);
        assert!(flags.is_active());
        assert!(!flags.is_dirty());
    }

    #[test]
    fn test_pending_delete_and_relocated() {
        let mut flags = TupleFlags::empty();
        flags.set_pending_delete(true);
        flags.set_relocated(true);
        assert!(flags.is_pending_delete());
        assert!(flags.is_relocated());
        flags.set_pending_delete(false);
        assert!(!flags.is_pending_delete());
        assert!(flags.is_relocated());
    }

    #[test]
    fn test_raw_roundtrip() {
        let mut flags = TupleFlags::empty();
        flags.set_active(true);
        flags.set_dirty(true);
        let raw = flags.as_u8();
        assert_eq!(TupleFlags::from_raw(raw), flags);
    }
}
