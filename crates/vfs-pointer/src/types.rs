//! Diagnostic snapshot types.

/// Point-in-time counters describing an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of `(listener, filesystem)` trees.
    pub trees: usize,
    /// Live tracked pointers.
    pub pointers: usize,
    /// Records kept only to redirect handles of merged-away pointers.
    pub forwarded: usize,
    /// Cached identity pointers.
    pub identity_pointers: usize,
    /// Containers not yet disposed.
    pub containers: usize,
    /// Registered per-pointer listeners.
    pub listeners: usize,
    pub modification_count: u64,
    /// A `before` has been seen without its `after`.
    pub batch_pending: bool,
}
