//! Validity-change listeners.

use std::fmt;

use crate::pointer::FilePointer;

/// Opaque handle naming a registered listener.
///
/// Pointers created with a listener id live in that listener's own trees,
/// and only that listener hears about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub(crate) u32);

impl ListenerId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Receives the two halves of every event batch that touches its pointers.
///
/// Callbacks run outside the index lock, so they may query the pointers they
/// are handed (or create new ones). The slices passed to
/// `before_validity_changed` and `validity_changed` of the same batch name
/// the same pointers in the same order.
pub trait PointerListener: Send + Sync {
    /// Called before the filesystem change is applied.
    fn before_validity_changed(&self, _pointers: &[FilePointer]) {}

    /// Called once the change is applied and pointers are re-resolved.
    fn validity_changed(&self, _pointers: &[FilePointer]) {}
}
