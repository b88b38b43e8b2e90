//! Tree node type.

use thin_vec::ThinVec;

use crate::storage::{OptionSlabIndex, SlabIndex};

/// A node of the compressed path tree.
///
/// `segment` is the edge label from the parent: the longest run of path
/// text shared by everything below this node. Siblings never share a
/// first character (after case folding), which is what keeps the tree free
/// of common prefixes between sibling edges.
#[derive(Debug, Clone)]
pub struct PathNode {
    pub(super) segment: String,
    /// Case-folded first character of `segment`; `'\0'` for the root.
    pub(super) first: char,
    pub(super) parent: OptionSlabIndex,
    /// Children ordered by `first`.
    pub(super) children: ThinVec<SlabIndex>,
    /// Pointer record whose path ends exactly at this node.
    pub(super) leaf: OptionSlabIndex,
}

impl PathNode {
    pub(super) fn root() -> Self {
        Self {
            segment: String::new(),
            first: '\0',
            parent: OptionSlabIndex::none(),
            children: ThinVec::new(),
            leaf: OptionSlabIndex::none(),
        }
    }

    pub(super) fn new(segment: String, first: char, parent: SlabIndex) -> Self {
        Self {
            segment,
            first,
            parent: OptionSlabIndex::some(parent),
            children: ThinVec::new(),
            leaf: OptionSlabIndex::none(),
        }
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn parent(&self) -> Option<SlabIndex> {
        self.parent.to_option()
    }

    pub fn leaf(&self) -> Option<SlabIndex> {
        self.leaf.to_option()
    }

    pub fn children(&self) -> &[SlabIndex] {
        &self.children
    }

    /// A node with no leaf and fewer than two children carries no
    /// information and should have been pruned or spliced.
    pub fn is_redundant(&self) -> bool {
        self.leaf.is_none() && self.children.len() < 2
    }
}
