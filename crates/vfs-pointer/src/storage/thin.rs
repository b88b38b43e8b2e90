//! ThinSlab - High-level wrapper with SlabIndex API.

use std::ops::{Index, IndexMut};

use super::index_types::SlabIndex;
use super::slab::{Slab, SlabIter};

/// A wrapper around `Slab<T>` that uses `SlabIndex` for type safety.
///
/// Indices are 32-bit so that node links stay compact.
#[derive(Debug)]
pub struct ThinSlab<T>(Slab<T>);

impl<T> Default for ThinSlab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ThinSlab<T> {
    pub fn new() -> Self {
        Self(Slab::new())
    }

    /// Inserts a value, returning its index.
    pub fn insert(&mut self, value: T) -> SlabIndex {
        SlabIndex::new(self.0.insert(value))
    }

    /// Gets a reference to the value at `index`.
    pub fn get(&self, index: SlabIndex) -> Option<&T> {
        self.0.get(index.get())
    }

    /// Gets a mutable reference to the value at `index`.
    pub fn get_mut(&mut self, index: SlabIndex) -> Option<&mut T> {
        self.0.get_mut(index.get())
    }

    /// Removes the value at `index`, returning it if present.
    pub fn try_remove(&mut self, index: SlabIndex) -> Option<T> {
        self.0.try_remove(index.get())
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the slab is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over occupied entries.
    pub fn iter(&self) -> ThinSlabIter<'_, T> {
        ThinSlabIter(self.0.iter())
    }
}

impl<T> Index<SlabIndex> for ThinSlab<T> {
    type Output = T;

    fn index(&self, index: SlabIndex) -> &Self::Output {
        &self.0[index.get()]
    }
}

impl<T> IndexMut<SlabIndex> for ThinSlab<T> {
    fn index_mut(&mut self, index: SlabIndex) -> &mut Self::Output {
        &mut self.0[index.get()]
    }
}

/// Iterator over entries in a ThinSlab.
pub struct ThinSlabIter<'a, T>(SlabIter<'a, T>);

impl<'a, T> Iterator for ThinSlabIter<'a, T> {
    type Item = (SlabIndex, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0
            .next()
            .map(|(idx, value)| (SlabIndex::new(idx), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thin_slab_basic_operations() {
        let mut slab = ThinSlab::<i32>::new();
        assert!(slab.is_empty());

        let idx = slab.insert(42);
        assert_eq!(slab.get(idx), Some(&42));
        assert_eq!(slab[idx], 42);
        assert_eq!(slab.len(), 1);

        let removed = slab.try_remove(idx);
        assert_eq!(removed, Some(42));
        assert!(slab.is_empty());
        assert_eq!(slab.get(idx), None);
    }

    #[test]
    fn thin_slab_iter_yields_slab_indices() {
        let mut slab = ThinSlab::<&str>::new();
        let a = slab.insert("a");
        let b = slab.insert("b");
        let collected: Vec<_> = slab.iter().collect();
        assert_eq!(collected, vec![(a, &"a"), (b, &"b")]);
    }
}
