//! Heap-backed slab allocator with an intrusive free list.
//!
//! Vacant slots form a singly linked list threaded through `Entry::Vacant`,
//! so removal is O(1) and the next insert reuses the most recently freed
//! slot. Indices of occupied slots never move.

use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};

use super::entry::Entry;

/// Initial number of slots to allocate.
const INITIAL_SLOTS: usize = 64;

pub struct Slab<T> {
    /// Slot storage; occupied and vacant entries interleave.
    entries: Vec<Entry<T>>,

    /// Logical element count (occupied slots only).
    len: usize,

    /// Head of the freelist (index of the next available slot).
    next: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Creates a new empty slab with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SLOTS)
    }

    /// Creates a new slab with the specified initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            len: 0,
            next: 0,
        }
    }

    /// Inserts a value, returning its stable index.
    pub fn insert(&mut self, value: T) -> usize {
        let key = self.next;
        if key == self.entries.len() {
            // Appending to end
            self.entries.push(Entry::Occupied(value));
            self.next = self.entries.len();
        } else {
            // Reusing a vacant slot from the freelist
            let next_free = match self.entries[key] {
                Entry::Vacant(next) => next,
                Entry::Occupied(_) => unreachable!("slot unexpectedly occupied"),
            };
            self.entries[key] = Entry::Occupied(value);
            self.next = next_free;
        }
        self.len += 1;
        key
    }

    /// Gets a reference to the value at `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        match self.entries.get(index) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Gets a mutable reference to the value at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.entries.get_mut(index) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Removes the value at `index` if it exists, returning it.
    pub fn try_remove(&mut self, index: usize) -> Option<T> {
        let next_free = self.next;
        let entry = self.entries.get_mut(index)?;
        if matches!(entry, Entry::Vacant(_)) {
            return None;
        }
        match mem::replace(entry, Entry::Vacant(next_free)) {
            Entry::Occupied(value) => {
                self.len -= 1;
                self.next = index;
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the slab is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns an iterator over occupied entries.
    pub fn iter(&self) -> SlabIter<'_, T> {
        SlabIter {
            slab: self,
            index: 0,
        }
    }
}

impl<T> Index<usize> for Slab<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.get(index).expect("invalid slab index")
    }
}

impl<T> IndexMut<usize> for Slab<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.get_mut(index).expect("invalid slab index")
    }
}

impl<T> fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("len", &self.len)
            .field("next", &self.next)
            .field("slots", &self.entries.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slab Iterator
// ---------------------------------------------------------------------------

/// Iterator over occupied entries in a Slab.
pub struct SlabIter<'a, T> {
    slab: &'a Slab<T>,
    index: usize,
}

impl<'a, T> Iterator for SlabIter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.slab.entries.len() {
            let idx = self.index;
            self.index += 1;
            if let Some(value) = self.slab.get(idx) {
                return Some((idx, value));
            }
        }
        None
    }
}

impl<'a, T> IntoIterator for &'a Slab<T> {
    type Item = (usize, &'a T);
    type IntoIter = SlabIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_basic_operations() {
        let mut slab = Slab::<i32>::new();
        assert!(slab.is_empty());
        assert_eq!(slab.len(), 0);

        let idx0 = slab.insert(10);
        let idx1 = slab.insert(20);
        let idx2 = slab.insert(30);

        assert_eq!(slab.len(), 3);
        assert_eq!(slab.get(idx0), Some(&10));
        assert_eq!(slab.get(idx1), Some(&20));
        assert_eq!(slab.get(idx2), Some(&30));

        // Remove middle element
        assert_eq!(slab.try_remove(idx1), Some(20));
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.get(idx1), None);
        assert_eq!(slab.try_remove(idx1), None);

        // Insert reuses freed slot
        let idx3 = slab.insert(40);
        assert_eq!(idx3, idx1);
        assert_eq!(slab.get(idx3), Some(&40));
    }

    #[test]
    fn slab_freelist_is_lifo() {
        let mut slab = Slab::<u8>::new();
        let a = slab.insert(1);
        let b = slab.insert(2);
        let _c = slab.insert(3);
        slab.try_remove(a);
        slab.try_remove(b);
        assert_eq!(slab.insert(4), b);
        assert_eq!(slab.insert(5), a);
        assert_eq!(slab.insert(6), 3);
    }

    #[test]
    fn slab_index_access() {
        let mut slab = Slab::<&str>::new();
        let idx = slab.insert("hello");

        assert_eq!(slab[idx], "hello");
        slab[idx] = "world";
        assert_eq!(slab[idx], "world");
    }

    #[test]
    fn slab_iteration_skips_vacant() {
        let mut slab = Slab::<i32>::new();
        slab.insert(1);
        let gap = slab.insert(2);
        slab.insert(3);
        slab.try_remove(gap);

        let items: Vec<_> = slab.iter().collect();
        assert_eq!(items, vec![(0, &1), (2, &3)]);
    }

    #[test]
    fn slab_out_of_range_lookups() {
        let mut slab = Slab::<i32>::new();
        assert_eq!(slab.get(7), None);
        assert_eq!(slab.try_remove(7), None);
        assert_eq!(slab.get_mut(0), None);
    }
}
