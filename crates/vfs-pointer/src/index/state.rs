//! Index state guarded by the index lock.

use std::fmt;
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::error::{corrupted, PointerError, Result};
use crate::fs::{FileId, FileSystem, FileSystemRegistry};
use crate::identity::{IdentityEntry, IdentityPointer};
use crate::listener::{ListenerId, PointerListener};
use crate::pointer::{PointerFlags, PointerId, Resolution};
use crate::storage::{SlabIndex, ThinSlab};
use crate::tree::PathTree;
use crate::url::{paths_equal, to_url};

use super::batch::PendingBatch;

/// Trees are kept per listener (or none) and per filesystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TreeKey {
    pub listener: Option<ListenerId>,
    pub protocol: Arc<str>,
}

impl fmt::Display for TreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.listener {
            Some(listener) => write!(f, "{}@{}", self.protocol, listener),
            None => write!(f, "{}", self.protocol),
        }
    }
}

#[derive(Debug)]
pub(crate) struct PointerRecord {
    pub seq: u64,
    pub url: String,
    pub path: String,
    pub tree: TreeKey,
    pub node: SlabIndex,
    pub resolution: Resolution,
    pub usage: u32,
    pub flags: PointerFlags,
    /// Scope name the record was first created in.
    pub origin: Arc<str>,
}

#[derive(Debug)]
pub(crate) enum PointerSlot {
    Live(PointerRecord),
    /// Left behind by a merge. Handles of the merged-away record reach the
    /// survivor through here until all of their leases are given back.
    Forwarded {
        seq: u64,
        target: PointerId,
        remaining: u32,
    },
}

impl PointerSlot {
    fn seq(&self) -> u64 {
        match self {
            PointerSlot::Live(record) => record.seq,
            PointerSlot::Forwarded { seq, .. } => *seq,
        }
    }
}

/// A request for a tracked pointer.
pub(crate) struct Acquire<'a> {
    pub protocol: &'a str,
    pub path: &'a str,
    pub listener: Option<ListenerId>,
    pub flags: PointerFlags,
    /// Known file at the path, if the caller already has it.
    pub file: Option<FileId>,
    pub origin: &'a Arc<str>,
}

pub(crate) struct IndexState {
    pub trees: FnvHashMap<TreeKey, PathTree>,
    pub pointers: ThinSlab<PointerSlot>,
    pub identities: FnvHashMap<String, IdentityEntry>,
    /// Origin of every container not yet disposed.
    pub containers: ThinSlab<Arc<str>>,
    pub listeners: FnvHashMap<ListenerId, Arc<dyn PointerListener>>,
    pub pending: Option<PendingBatch>,
    next_listener: u32,
    next_seq: u64,
}

impl IndexState {
    pub fn new() -> Self {
        Self {
            trees: FnvHashMap::default(),
            pointers: ThinSlab::new(),
            identities: FnvHashMap::default(),
            containers: ThinSlab::new(),
            listeners: FnvHashMap::default(),
            pending: None,
            next_listener: 0,
            next_seq: 0,
        }
    }

    pub fn register_listener(&mut self, listener: Arc<dyn PointerListener>) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.insert(id, listener);
        id
    }

    pub fn unregister_listener(&mut self, id: ListenerId) -> Result<()> {
        self.listeners
            .remove(&id)
            .map(|_| ())
            .ok_or(PointerError::UnknownListener(id.0))
    }

    pub fn check_listener(&self, listener: Option<ListenerId>) -> Result<()> {
        match listener {
            Some(id) if !self.listeners.contains_key(&id) => Err(PointerError::UnknownListener(id.0)),
            _ => Ok(()),
        }
    }

    /// Returns the record at `path`, creating it if needed, and takes one
    /// usage count on it.
    pub fn acquire(
        &mut self,
        filesystem: &dyn FileSystem,
        archive_separator: &Arc<str>,
        request: Acquire<'_>,
    ) -> PointerId {
        let key = TreeKey {
            listener: request.listener,
            protocol: Arc::from(request.protocol),
        };
        let tree = self.trees.entry(key.clone()).or_insert_with(|| {
            PathTree::new(filesystem.is_case_sensitive(), archive_separator.clone())
        });
        let node = tree.find_or_create(request.path);

        if let Some(slot) = tree.leaf(node) {
            if let Some(PointerSlot::Live(record)) = self.pointers.get_mut(slot) {
                record.usage += 1;
                record.flags |= request.flags;
                if let (Some(file), Resolution::Unresolved | Resolution::Absent) =
                    (request.file, record.resolution)
                {
                    record.resolution = Resolution::Resolved(file);
                }
                return PointerId {
                    slot,
                    seq: record.seq,
                };
            }
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let slot = self.pointers.insert(PointerSlot::Live(PointerRecord {
            seq,
            url: to_url(request.protocol, request.path),
            path: request.path.to_string(),
            tree: key,
            node,
            resolution: request
                .file
                .map_or(Resolution::Unresolved, Resolution::Resolved),
            usage: 1,
            flags: request.flags,
            origin: request.origin.clone(),
        }));
        tree.set_leaf(node, slot);
        PointerId { slot, seq }
    }

    /// Follows forwarding until a live record, or `None` if the id is stale.
    pub fn live_id(&self, id: PointerId) -> Option<PointerId> {
        let mut current = id;
        loop {
            let slot = self.pointers.get(current.slot)?;
            if slot.seq() != current.seq {
                return None;
            }
            match slot {
                PointerSlot::Live(_) => return Some(current),
                PointerSlot::Forwarded { target, .. } => current = *target,
            }
        }
    }

    pub fn record(&self, id: PointerId) -> Option<&PointerRecord> {
        let live = self.live_id(id)?;
        self.record_at(live.slot)
    }

    pub fn record_mut(&mut self, id: PointerId) -> Option<&mut PointerRecord> {
        let live = self.live_id(id)?;
        match self.pointers.get_mut(live.slot)? {
            PointerSlot::Live(record) => Some(record),
            PointerSlot::Forwarded { .. } => None,
        }
    }

    pub fn record_at(&self, slot: SlabIndex) -> Option<&PointerRecord> {
        match self.pointers.get(slot)? {
            PointerSlot::Live(record) => Some(record),
            PointerSlot::Forwarded { .. } => None,
        }
    }

    /// Id of the live record registered at a tree leaf.
    pub fn id_at(&self, slot: SlabIndex) -> Option<PointerId> {
        self.record_at(slot).map(|record| PointerId {
            slot,
            seq: record.seq,
        })
    }

    /// Outer `None` means the id is stale.
    pub fn resolve_file(
        &mut self,
        id: PointerId,
        filesystems: &FileSystemRegistry,
    ) -> Option<Option<FileId>> {
        let record = self.record_mut(id)?;
        Some(resolve_record(record, filesystems))
    }

    /// Gives back one usage count, walking forwarded records on the way.
    pub fn release_tracked(&mut self, id: PointerId) -> Result<()> {
        let mut current = id;
        loop {
            let slot = self
                .pointers
                .get_mut(current.slot)
                .filter(|slot| slot.seq() == current.seq)
                .ok_or_else(|| PointerError::Disposed(format!("pointer {}", current.slot)))?;
            match slot {
                PointerSlot::Forwarded {
                    target, remaining, ..
                } => {
                    let next = *target;
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        self.pointers.try_remove(current.slot);
                    }
                    current = next;
                }
                PointerSlot::Live(record) => {
                    record.usage = record.usage.saturating_sub(1);
                    if record.usage > 0 {
                        return Ok(());
                    }
                    let key = record.tree.clone();
                    let node = record.node;
                    self.pointers.try_remove(current.slot);
                    if let Some(tree) = self.trees.get_mut(&key) {
                        if tree.remove(node) {
                            self.trees.remove(&key);
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    pub fn acquire_identity(
        &mut self,
        url: String,
        protocol: String,
        path: String,
        filesystem: Option<&dyn FileSystem>,
        file: Option<FileId>,
        origin: &Arc<str>,
    ) -> Arc<IdentityPointer> {
        if let Some(entry) = self.identities.get_mut(&url) {
            entry.usage += 1;
            return entry.pointer.clone();
        }
        let file = file.or_else(|| filesystem.and_then(|filesystem| filesystem.find_file(&path)));
        let pointer = Arc::new(IdentityPointer {
            url: url.clone(),
            protocol,
            path,
            file,
        });
        self.next_seq += 1;
        self.identities.insert(
            url,
            IdentityEntry {
                pointer: pointer.clone(),
                usage: 1,
                origin: origin.clone(),
                seq: self.next_seq,
            },
        );
        pointer
    }

    pub fn identity_usage(&self, pointer: &Arc<IdentityPointer>) -> Option<u32> {
        self.identities
            .get(&pointer.url)
            .filter(|entry| Arc::ptr_eq(&entry.pointer, pointer))
            .map(|entry| entry.usage)
    }

    pub fn release_identity(&mut self, pointer: &Arc<IdentityPointer>) -> Result<()> {
        let entry = self
            .identities
            .get_mut(&pointer.url)
            .filter(|entry| Arc::ptr_eq(&entry.pointer, pointer))
            .ok_or_else(|| PointerError::Disposed(pointer.url.clone()))?;
        entry.usage = entry.usage.saturating_sub(1);
        if entry.usage == 0 {
            self.identities.remove(&pointer.url);
        }
        Ok(())
    }

    pub fn forwarded_count(&self) -> usize {
        self.pointers
            .iter()
            .filter(|(_, slot)| matches!(slot, PointerSlot::Forwarded { .. }))
            .count()
    }

    /// Verifies every tree and the links between trees and records.
    pub fn check_structure(&self) -> Result<()> {
        for (key, tree) in &self.trees {
            tree.check_structure()?;
            if tree.is_empty() {
                return Err(corrupted(format!("empty tree kept for {key}")));
            }
            for (node, leaf) in tree.leaves() {
                match self.record_at(leaf) {
                    Some(record) if record.node == node && record.tree == *key => {}
                    _ => {
                        return Err(corrupted(format!(
                            "tree {key} node {node} holds stale record {leaf}"
                        )))
                    }
                }
            }
        }

        for (slot, entry) in self.pointers.iter() {
            match entry {
                PointerSlot::Live(record) => {
                    let tree = self.trees.get(&record.tree).ok_or_else(|| {
                        corrupted(format!("record {} has no tree {}", record.url, record.tree))
                    })?;
                    if tree.leaf(record.node) != Some(slot) {
                        return Err(corrupted(format!(
                            "record {} is not the leaf of its node",
                            record.url
                        )));
                    }
                    let node_path = tree.node_path(record.node).unwrap_or_default();
                    if !paths_equal(&node_path, &record.path, tree.is_case_sensitive()) {
                        return Err(corrupted(format!(
                            "record {} sits at {node_path:?} in the tree",
                            record.url
                        )));
                    }
                    if record.usage == 0 {
                        return Err(corrupted(format!("record {} has no users", record.url)));
                    }
                }
                PointerSlot::Forwarded {
                    target, remaining, ..
                } => {
                    if *remaining == 0 || self.live_id(*target).is_none() {
                        return Err(corrupted(format!("forwarded record {slot} leads nowhere")));
                    }
                }
            }
        }
        Ok(())
    }

    /// Fails if any pointer or container is still alive.
    pub fn check_all_disposed(&self) -> Result<()> {
        if let Some((_, origin)) = self.containers.iter().next() {
            return Err(PointerError::LeakedContainers {
                count: self.containers.len(),
                origin: origin.to_string(),
            });
        }

        let tracked = self.pointers.iter().filter_map(|(_, slot)| match slot {
            PointerSlot::Live(record) => Some((record.seq, &record.url, &record.origin)),
            PointerSlot::Forwarded { .. } => None,
        });
        let identities = self
            .identities
            .values()
            .map(|entry| (entry.seq, &entry.pointer.url, &entry.origin));

        let mut count = 0;
        let mut oldest: Option<(u64, &String, &Arc<str>)> = None;
        for leaked in tracked.chain(identities) {
            count += 1;
            if oldest.map_or(true, |(seq, _, _)| leaked.0 < seq) {
                oldest = Some(leaked);
            }
        }
        match oldest {
            Some((_, url, origin)) => Err(PointerError::Leaked {
                count,
                url: url.clone(),
                origin: origin.to_string(),
            }),
            None => Ok(()),
        }
    }
}

pub(crate) fn resolve_record(record: &mut PointerRecord, filesystems: &FileSystemRegistry) -> Option<FileId> {
    match record.resolution {
        Resolution::Resolved(file) => Some(file),
        Resolution::Absent => None,
        Resolution::Unresolved => {
            let found = filesystems
                .get(&record.tree.protocol)
                .and_then(|filesystem| filesystem.find_file(&record.path));
            record.resolution = found.map_or(Resolution::Absent, Resolution::Resolved);
            found
        }
    }
}
