//! Slab index types for type-safe indexing.

use std::fmt;

/// A compact 32-bit index into a slab.
///
/// `u32::MAX` is reserved as the `OptionSlabIndex` none value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlabIndex(u32);

impl SlabIndex {
    /// Creates a new SlabIndex from a usize.
    ///
    /// # Panics
    /// Panics if `index >= u32::MAX` (reserved for None sentinel).
    #[inline]
    pub fn new(index: usize) -> Self {
        assert!(
            index < u32::MAX as usize,
            "slab index must be less than u32::MAX"
        );
        Self(index as u32)
    }

    /// Returns the index as a usize.
    #[inline]
    pub fn get(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlabIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An optional slab index using u32::MAX as the None sentinel.
///
/// Fits in 4 bytes instead of the 8 an `Option<SlabIndex>` would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct OptionSlabIndex(u32);

impl OptionSlabIndex {
    /// Creates a None value.
    #[inline]
    pub fn none() -> Self {
        Self(u32::MAX)
    }

    /// Creates a Some value from a SlabIndex.
    #[inline]
    pub fn some(index: SlabIndex) -> Self {
        Self(index.0)
    }

    /// Converts to an Option<SlabIndex>.
    #[inline]
    pub fn to_option(self) -> Option<SlabIndex> {
        if self.0 == u32::MAX {
            None
        } else {
            Some(SlabIndex(self.0))
        }
    }

    #[inline]
    pub fn is_some(self) -> bool {
        self.0 != u32::MAX
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for OptionSlabIndex {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_index_types() {
        let idx = SlabIndex::new(100);
        assert_eq!(idx.get(), 100);

        let opt_none = OptionSlabIndex::none();
        assert_eq!(opt_none.to_option(), None);
        assert!(opt_none.is_none());

        let opt_some = OptionSlabIndex::some(idx);
        assert_eq!(opt_some.to_option(), Some(idx));
        assert!(opt_some.is_some());

        assert_eq!(OptionSlabIndex::default(), OptionSlabIndex::none());
    }

    #[test]
    fn option_slab_index_is_four_bytes() {
        assert_eq!(std::mem::size_of::<OptionSlabIndex>(), 4);
        assert_eq!(std::mem::size_of::<Option<SlabIndex>>(), 8);
    }

    #[test]
    #[should_panic(expected = "slab index must be less than u32::MAX")]
    fn slab_index_rejects_sentinel() {
        SlabIndex::new(u32::MAX as usize);
    }
}
