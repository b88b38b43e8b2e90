//! Compressed prefix tree over normalized paths.
//!
//! One tree exists per `(listener, filesystem)` pair. Each node's key is the
//! longest un-branched run of path text below its parent, so lookups and
//! inserts cost O(depth) regardless of how many pointers are registered.
//! Nodes live in a `ThinSlab` owned by the tree; a node whose path equals a
//! registered pointer's path carries that pointer record as its leaf.
//!
//! Leaf nodes keep their slab index for as long as they carry a leaf:
//! splitting inserts a new intermediate node above the existing one, and
//! compaction folds a redundant parent down into its single child.

mod node;

use std::sync::Arc;

use thin_vec::thin_vec;

pub use node::PathNode;

use crate::error::{corrupted, Result};
use crate::storage::{OptionSlabIndex, SlabIndex, ThinSlab};
use crate::url::{fold_char, parent_path, paths_equal, strip_prefix_folded};

/// Where the text following a query path stands relative to a segment
/// boundary.
#[derive(Debug, Clone)]
enum Boundary {
    /// Everything below is a descendant of the query path.
    Inside,
    /// Not decided yet; holds the continuation text seen so far.
    Pending(String),
}

/// A registered pointer found above a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorLeaf {
    pub leaf: SlabIndex,
    /// The ancestor is the direct parent of the queried path.
    pub direct_parent: bool,
}

#[derive(Debug)]
pub struct PathTree {
    nodes: ThinSlab<PathNode>,
    root: SlabIndex,
    case_sensitive: bool,
    archive_separator: Arc<str>,
}

impl PathTree {
    pub fn new(case_sensitive: bool, archive_separator: Arc<str>) -> Self {
        let mut nodes = ThinSlab::new();
        let root = nodes.insert(PathNode::root());
        Self {
            nodes,
            root,
            case_sensitive,
            archive_separator,
        }
    }

    #[inline]
    pub fn root(&self) -> SlabIndex {
        self.root
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn get(&self, node: SlabIndex) -> Option<&PathNode> {
        self.nodes.get(node)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no pointer is registered in the tree.
    pub fn is_empty(&self) -> bool {
        let root = &self.nodes[self.root];
        root.children.is_empty() && root.leaf.is_none()
    }

    #[inline]
    fn fold(&self, c: char) -> char {
        fold_char(c, self.case_sensitive)
    }

    fn first_folded(&self, text: &str) -> Option<char> {
        text.chars().next().map(|c| self.fold(c))
    }

    /// Binary-searches `node`'s children for an edge starting with `first`.
    fn child_position(&self, node: SlabIndex, first: char) -> std::result::Result<usize, usize> {
        self.nodes[node]
            .children
            .binary_search_by(|child| self.nodes[*child].first.cmp(&first))
    }

    fn child_starting_with(&self, node: SlabIndex, text: &str) -> Option<SlabIndex> {
        let first = self.first_folded(text)?;
        let position = self.child_position(node, first).ok()?;
        Some(self.nodes[node].children[position])
    }

    /// Byte lengths of the common prefix of `a` and `b` under the case rule.
    fn common_prefix(&self, a: &str, b: &str) -> (usize, usize) {
        let mut a_chars = a.char_indices();
        let mut b_chars = b.char_indices();
        loop {
            match (a_chars.next(), b_chars.next()) {
                (Some((ai, ac)), Some((bi, bc))) => {
                    if self.fold(ac) != self.fold(bc) {
                        return (ai, bi);
                    }
                }
                (Some((ai, _)), None) => return (ai, b.len()),
                (None, Some((bi, _))) => return (a.len(), bi),
                (None, None) => return (a.len(), b.len()),
            }
        }
    }

    /// Finds the node whose path is exactly `path`.
    pub fn find(&self, path: &str) -> Option<SlabIndex> {
        let mut current = self.root;
        let mut rest = path;
        while !rest.is_empty() {
            let child = self.child_starting_with(current, rest)?;
            rest = strip_prefix_folded(rest, &self.nodes[child].segment, self.case_sensitive)?;
            current = child;
        }
        Some(current)
    }

    /// Finds the node for `path`, splitting edges and adding nodes as needed.
    pub fn find_or_create(&mut self, path: &str) -> SlabIndex {
        let mut current = self.root;
        let mut rest = path;
        loop {
            let Some(first) = self.first_folded(rest) else {
                return current;
            };
            match self.child_position(current, first) {
                Err(position) => {
                    let node = PathNode::new(rest.to_string(), first, current);
                    let child = self.nodes.insert(node);
                    self.nodes[current].children.insert(position, child);
                    return child;
                }
                Ok(position) => {
                    let child = self.nodes[current].children[position];
                    let (in_segment, in_rest) =
                        self.common_prefix(&self.nodes[child].segment, rest);
                    rest = &rest[in_rest..];
                    current = if in_segment == self.nodes[child].segment.len() {
                        child
                    } else {
                        self.split(current, position, child, in_segment)
                    };
                }
            }
        }
    }

    /// Splits the edge into `child` at byte offset `at`, returning the new
    /// intermediate node that now sits between `parent` and `child`.
    fn split(&mut self, parent: SlabIndex, position: usize, child: SlabIndex, at: usize) -> SlabIndex {
        let child_node = &mut self.nodes[child];
        let tail = child_node.segment.split_off(at);
        let head = std::mem::replace(&mut child_node.segment, tail);
        let head_first = child_node.first;
        let tail_first = self.first_folded(&self.nodes[child].segment).unwrap_or('\0');
        self.nodes[child].first = tail_first;

        let mid = self.nodes.insert(PathNode {
            segment: head,
            first: head_first,
            parent: OptionSlabIndex::some(parent),
            children: thin_vec![child],
            leaf: OptionSlabIndex::none(),
        });
        self.nodes[child].parent = OptionSlabIndex::some(mid);
        self.nodes[parent].children[position] = mid;
        mid
    }

    pub fn leaf(&self, node: SlabIndex) -> Option<SlabIndex> {
        self.nodes.get(node).and_then(PathNode::leaf)
    }

    pub fn set_leaf(&mut self, node: SlabIndex, leaf: SlabIndex) {
        if let Some(node) = self.nodes.get_mut(node) {
            node.leaf = OptionSlabIndex::some(leaf);
        }
    }

    /// Detaches the leaf of `node` and prunes what became redundant.
    ///
    /// Returns true if the whole tree is now empty.
    pub fn remove(&mut self, node: SlabIndex) -> bool {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.leaf = OptionSlabIndex::none();
            self.prune(node);
        }
        self.is_empty()
    }

    fn prune(&mut self, node: SlabIndex) {
        let mut current = node;
        while current != self.root {
            let Some(entry) = self.nodes.get(current) else {
                return;
            };
            if entry.leaf.is_some() {
                return;
            }
            match entry.children.len() {
                0 => {
                    let Some(parent) = entry.parent.to_option() else {
                        return;
                    };
                    self.nodes[parent].children.retain(|child| *child != current);
                    self.nodes.try_remove(current);
                    current = parent;
                }
                1 => {
                    self.splice(current);
                    return;
                }
                _ => return,
            }
        }
    }

    /// Folds a leafless node with a single child into that child.
    fn splice(&mut self, node: SlabIndex) {
        let Some(removed) = self.nodes.try_remove(node) else {
            return;
        };
        let child = removed.children[0];
        let child_node = &mut self.nodes[child];
        child_node.segment.insert_str(0, &removed.segment);
        child_node.first = removed.first;
        child_node.parent = removed.parent;
        if let Some(parent) = removed.parent.to_option() {
            for slot in self.nodes[parent].children.iter_mut() {
                if *slot == node {
                    *slot = child;
                }
            }
        }
    }

    /// Collects every leaf whose path is `path` or lies below it.
    ///
    /// Only the subtree sharing `path` as a text prefix is visited, and
    /// within it branches are dropped as soon as their continuation text
    /// shows they are siblings (`/a/bc`) rather than descendants (`/a/b/c`).
    pub fn collect_under(&self, path: &str, out: &mut Vec<SlabIndex>) {
        let open = path.ends_with('/') || path.ends_with(&*self.archive_separator);
        let mut current = self.root;
        let mut rest = path;
        while !rest.is_empty() {
            let Some(child) = self.child_starting_with(current, rest) else {
                return;
            };
            let segment = &self.nodes[child].segment;
            match strip_prefix_folded(rest, segment, self.case_sensitive) {
                Some(remaining) => {
                    current = child;
                    rest = remaining;
                }
                None => {
                    // The path ends inside this edge.
                    if let Some(tail) = strip_prefix_folded(segment, rest, self.case_sensitive) {
                        self.collect_from(child, tail, open, out);
                    }
                    return;
                }
            }
        }
        self.collect_from(current, "", open, out);
    }

    fn classify(&self, continuation: &str, open: bool) -> Option<Boundary> {
        let separator = &*self.archive_separator;
        if open || continuation.starts_with('/') || continuation.starts_with(separator) {
            Some(Boundary::Inside)
        } else if separator.starts_with(continuation) {
            Some(Boundary::Pending(continuation.to_string()))
        } else {
            None
        }
    }

    fn collect_from(&self, start: SlabIndex, continuation: &str, open: bool, out: &mut Vec<SlabIndex>) {
        let Some(boundary) = self.classify(continuation, open) else {
            return;
        };
        let mut stack = vec![(start, boundary)];
        while let Some((current, boundary)) = stack.pop() {
            let node = &self.nodes[current];
            match boundary {
                Boundary::Inside => {
                    if let Some(leaf) = node.leaf() {
                        out.push(leaf);
                    }
                    for &child in node.children.iter().rev() {
                        stack.push((child, Boundary::Inside));
                    }
                }
                Boundary::Pending(text) => {
                    if text.is_empty() {
                        if let Some(leaf) = node.leaf() {
                            out.push(leaf);
                        }
                    }
                    for &child in node.children.iter().rev() {
                        let extended = format!("{text}{}", self.nodes[child].segment);
                        if let Some(next) = self.classify(&extended, false) {
                            stack.push((child, next));
                        }
                    }
                }
            }
        }
    }

    /// Collects leaves registered at proper ancestors of `path`.
    pub fn collect_ancestors(&self, path: &str, out: &mut Vec<AncestorLeaf>) {
        let separator = &*self.archive_separator;
        let parent = parent_path(path, separator);
        let mut current = self.root;
        let mut rest = path;
        while !rest.is_empty() {
            if let Some(leaf) = self.nodes[current].leaf() {
                let prefix = &path[..path.len() - rest.len()];
                let at_boundary = rest.starts_with('/')
                    || rest.starts_with(separator)
                    || prefix.ends_with('/')
                    || prefix.ends_with(separator);
                if at_boundary {
                    out.push(AncestorLeaf {
                        leaf,
                        direct_parent: parent.is_some_and(|parent| {
                            paths_equal(parent, prefix, self.case_sensitive)
                                || parent.strip_suffix(separator).is_some_and(|archive| {
                                    paths_equal(archive, prefix, self.case_sensitive)
                                })
                        }),
                    });
                }
            }
            let Some(child) = self.child_starting_with(current, rest) else {
                return;
            };
            let Some(remaining) =
                strip_prefix_folded(rest, &self.nodes[child].segment, self.case_sensitive)
            else {
                return;
            };
            current = child;
            rest = remaining;
        }
    }

    /// Rebuilds the full path of a node by walking up the parent chain.
    pub fn node_path(&self, node: SlabIndex) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(node);
        while let Some(index) = current {
            let entry = self.nodes.get(index)?;
            segments.push(entry.segment.as_str());
            current = entry.parent();
        }
        Some(segments.into_iter().rev().collect())
    }

    /// Iterates `(node, leaf)` pairs.
    pub fn leaves(&self) -> impl Iterator<Item = (SlabIndex, SlabIndex)> + '_ {
        self.nodes
            .iter()
            .filter_map(|(index, node)| node.leaf().map(|leaf| (index, leaf)))
    }

    /// Validates parent links, child ordering, compaction and reachability.
    pub fn check_structure(&self) -> Result<()> {
        let mut reachable = 0usize;
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            reachable += 1;
            let node = self
                .nodes
                .get(current)
                .ok_or_else(|| corrupted(format!("dangling node {current}")))?;

            if current == self.root {
                if !node.segment.is_empty() || node.parent.is_some() {
                    return Err(corrupted("root node must have an empty segment and no parent"));
                }
            } else {
                if node.segment.is_empty() {
                    return Err(corrupted(format!("node {current} has an empty segment")));
                }
                if self.first_folded(&node.segment) != Some(node.first) {
                    return Err(corrupted(format!("node {current} has a stale first character")));
                }
                if node.is_redundant() {
                    return Err(corrupted(format!(
                        "node {current} ({:?}) is redundant",
                        self.node_path(current).unwrap_or_default()
                    )));
                }
            }

            let mut previous: Option<char> = None;
            for &child in node.children.iter() {
                let child_node = self
                    .nodes
                    .get(child)
                    .ok_or_else(|| corrupted(format!("node {current} links missing child {child}")))?;
                if child_node.parent() != Some(current) {
                    return Err(corrupted(format!("child {child} does not point back to {current}")));
                }
                if previous.is_some_and(|previous| previous >= child_node.first) {
                    return Err(corrupted(format!(
                        "children of {current} share a prefix or are out of order"
                    )));
                }
                previous = Some(child_node.first);
                stack.push(child);
            }
        }

        if reachable != self.nodes.len() {
            return Err(corrupted(format!(
                "{} node(s) unreachable from the root",
                self.nodes.len() - reachable
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PathTree {
        PathTree::new(true, Arc::from("!/"))
    }

    fn leaf(n: usize) -> SlabIndex {
        SlabIndex::new(n)
    }

    fn insert(tree: &mut PathTree, path: &str, n: usize) -> SlabIndex {
        let node = tree.find_or_create(path);
        tree.set_leaf(node, leaf(n));
        node
    }

    fn under(tree: &PathTree, path: &str) -> Vec<SlabIndex> {
        let mut out = Vec::new();
        tree.collect_under(path, &mut out);
        out.sort();
        out
    }

    #[test]
    fn insert_and_find() {
        let mut tree = tree();
        let ab = insert(&mut tree, "/a/b", 1);
        let ac = insert(&mut tree, "/a/c", 2);
        assert_eq!(tree.find("/a/b"), Some(ab));
        assert_eq!(tree.find("/a/c"), Some(ac));
        assert_eq!(tree.node_path(ab).as_deref(), Some("/a/b"));
        // "/a/" is an intermediate node without a leaf
        assert!(tree.find("/a/").is_some_and(|n| tree.leaf(n).is_none()));
        assert_eq!(tree.find("/a/d"), None);
        assert_eq!(tree.find("/a/bb"), None);
        tree.check_structure().unwrap();
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let mut tree = tree();
        let first = tree.find_or_create("/x/y");
        let nodes = tree.len();
        assert_eq!(tree.find_or_create("/x/y"), first);
        assert_eq!(tree.len(), nodes);
    }

    #[test]
    fn split_keeps_existing_leaf_node() {
        let mut tree = tree();
        let long = insert(&mut tree, "/abc/def", 1);
        let short = insert(&mut tree, "/abc", 2);
        assert_ne!(long, short);
        assert_eq!(tree.find("/abc/def"), Some(long));
        assert_eq!(tree.leaf(long), Some(leaf(1)));
        assert_eq!(tree.leaf(short), Some(leaf(2)));
        assert_eq!(tree.node_path(long).as_deref(), Some("/abc/def"));
        tree.check_structure().unwrap();
    }

    #[test]
    fn collect_under_respects_segment_boundaries() {
        let mut tree = tree();
        insert(&mut tree, "/a", 1);
        insert(&mut tree, "/a/b", 2);
        insert(&mut tree, "/a/b/c", 3);
        insert(&mut tree, "/a/bc", 4);
        insert(&mut tree, "/x", 5);

        assert_eq!(under(&tree, "/a/b"), vec![leaf(2), leaf(3)]);
        assert_eq!(under(&tree, "/a"), vec![leaf(1), leaf(2), leaf(3), leaf(4)]);
        assert_eq!(under(&tree, "/a/bc"), vec![leaf(4)]);
        assert_eq!(under(&tree, "/"), vec![leaf(1), leaf(2), leaf(3), leaf(4), leaf(5)]);
        assert!(under(&tree, "/q").is_empty());
    }

    #[test]
    fn collect_under_when_path_ends_inside_an_edge() {
        let mut tree = tree();
        insert(&mut tree, "/a/b/c/d", 1);
        insert(&mut tree, "/a/bxyz", 2);
        // "/a/b" ends in the middle of the "/a/b" + "/c/d" | "xyz" structure
        assert_eq!(under(&tree, "/a/b"), vec![leaf(1)]);
        assert_eq!(under(&tree, "/a/b/c"), vec![leaf(1)]);
        assert!(under(&tree, "/a/b/c/d/e").is_empty());
    }

    #[test]
    fn collect_under_crosses_archive_separator() {
        let mut tree = tree();
        insert(&mut tree, "/lib/a.jar", 1);
        insert(&mut tree, "/lib/a.jar!/", 2);
        insert(&mut tree, "/lib/a.jar!/x/Y", 3);
        insert(&mut tree, "/lib/a.jarx", 4);
        insert(&mut tree, "/lib/a.jar!", 5);
        assert_eq!(under(&tree, "/lib/a.jar"), vec![leaf(1), leaf(2), leaf(3)]);
        assert_eq!(under(&tree, "/lib/a.jar!/"), vec![leaf(2), leaf(3)]);
    }

    #[test]
    fn remove_prunes_and_compacts() {
        let mut tree = tree();
        let ab = insert(&mut tree, "/a/b", 1);
        let ac = insert(&mut tree, "/a/c", 2);
        let abd = insert(&mut tree, "/a/b/d", 3);

        assert!(!tree.remove(ab));
        tree.check_structure().unwrap();
        assert_eq!(tree.find("/a/b/d"), Some(abd));

        assert!(!tree.remove(ac));
        tree.check_structure().unwrap();
        // Only one chain left: root -> "/a/b/d"
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.node_path(abd).as_deref(), Some("/a/b/d"));

        assert!(tree.remove(abd));
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 1);
        tree.check_structure().unwrap();
    }

    #[test]
    fn case_insensitive_tree_folds_edges() {
        let mut tree = PathTree::new(false, Arc::from("!/"));
        let node = insert(&mut tree, "/Users/Me", 1);
        assert_eq!(tree.find("/users/me"), Some(node));
        assert_eq!(tree.find_or_create("/USERS/ME"), node);
        insert(&mut tree, "/users/you", 2);
        tree.check_structure().unwrap();
        assert_eq!(under(&tree, "/USERS"), vec![leaf(1), leaf(2)]);
    }

    #[test]
    fn ancestors_report_direct_parent() {
        let mut tree = tree();
        insert(&mut tree, "/", 1);
        insert(&mut tree, "/a", 2);
        insert(&mut tree, "/a/b", 3);
        insert(&mut tree, "/a/bc", 4);

        let mut out = Vec::new();
        tree.collect_ancestors("/a/b/c", &mut out);
        assert_eq!(
            out,
            vec![
                AncestorLeaf { leaf: leaf(1), direct_parent: false },
                AncestorLeaf { leaf: leaf(2), direct_parent: false },
                AncestorLeaf { leaf: leaf(3), direct_parent: true },
            ]
        );

        out.clear();
        tree.collect_ancestors("/a/b", &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|ancestor| ancestor.leaf != leaf(3)));
        assert!(out.contains(&AncestorLeaf { leaf: leaf(2), direct_parent: true }));
    }

    #[test]
    fn archive_entries_are_direct_children_of_the_archive() {
        let mut tree = tree();
        insert(&mut tree, "/lib/a.jar", 1);
        let mut out = Vec::new();
        tree.collect_ancestors("/lib/a.jar!/x", &mut out);
        assert_eq!(out, vec![AncestorLeaf { leaf: leaf(1), direct_parent: true }]);
    }

    #[test]
    fn check_structure_detects_redundant_node() {
        let mut tree = tree();
        let node = tree.find_or_create("/dangling");
        // A leafless, childless node left in place is a structural defect.
        let err = tree.check_structure().unwrap_err();
        assert!(err.to_string().contains("redundant"));
        tree.set_leaf(node, leaf(1));
        tree.check_structure().unwrap();
    }
}
