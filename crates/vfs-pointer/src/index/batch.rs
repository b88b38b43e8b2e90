//! Two-phase event batches.
//!
//! `begin_batch` runs while the filesystem still shows the old state: it
//! decides which pointers will be notified and which will follow their file
//! to a new path. `finish_batch` runs once the change is visible: it moves
//! the followers (merging on collision) and re-resolves everything notified.

use fnv::{FnvHashMap, FnvHashSet};

use crate::error::{PointerError, Result};
use crate::events::{BatchChanges, FileEvent};
use crate::fs::FileSystemRegistry;
use crate::listener::ListenerId;
use crate::pointer::{PointerFlags, PointerId, Resolution};
use crate::storage::SlabIndex;
use crate::tree::{AncestorLeaf, PathTree};
use crate::url::{normalize_path, paths_equal, to_url};

use super::state::{resolve_record, IndexState, PointerSlot, TreeKey};

#[derive(Debug)]
pub(crate) struct PendingBatch {
    pub event_count: usize,
    /// Pointers whose validity may change, in notification order.
    pub to_fire: Vec<PointerId>,
    /// Resolved pointers below a moved path.
    pub to_update_url: Vec<PointerId>,
    /// `to_fire` split by owning listener.
    pub groups: Vec<(ListenerId, Vec<PointerId>)>,
}

/// Insertion-ordered set of ids.
#[derive(Default)]
struct OrderedIds {
    ids: Vec<PointerId>,
    seen: FnvHashSet<PointerId>,
}

impl OrderedIds {
    fn push(&mut self, id: PointerId) {
        if self.seen.insert(id) {
            self.ids.push(id);
        }
    }
}

impl IndexState {
    pub fn begin_batch(
        &mut self,
        events: &[FileEvent],
        filesystems: &FileSystemRegistry,
        archive_separator: &str,
    ) -> Result<()> {
        if self.pending.is_some() {
            return Err(PointerError::BatchInProgress);
        }
        let changes = BatchChanges::from_events(events, archive_separator)?;

        let mut to_fire = OrderedIds::default();
        let mut moving = OrderedIds::default();
        let mut under = Vec::new();
        let mut above = Vec::new();

        let mut keys: Vec<TreeKey> = if changes.is_empty() {
            Vec::new()
        } else {
            self.trees.keys().cloned().collect()
        };
        keys.sort();
        for key in &keys {
            let Some(tree) = self.trees.get(key) else {
                continue;
            };
            for relocation in changes
                .relocations
                .iter()
                .filter(|relocation| *relocation.protocol == *key.protocol)
            {
                under.clear();
                tree.collect_under(&relocation.from, &mut under);
                for id in under.iter().filter_map(|slot| self.id_at(*slot)) {
                    moving.push(id);
                }
            }
            for flip in changes
                .flips
                .iter()
                .filter(|flip| *flip.protocol == *key.protocol)
            {
                under.clear();
                tree.collect_under(&flip.path, &mut under);
                for id in under.iter().filter_map(|slot| self.id_at(*slot)) {
                    to_fire.push(id);
                }
                self.collect_watchers(tree, &flip.path, &mut above, &mut to_fire);
            }
            for departure in changes
                .departures
                .iter()
                .filter(|departure| *departure.protocol == *key.protocol)
            {
                self.collect_watchers(tree, &departure.path, &mut above, &mut to_fire);
            }
        }

        // Only pointers that know their file can follow it.
        let mut to_update_url = Vec::with_capacity(moving.ids.len());
        for id in moving.ids {
            let resolved = self
                .record_mut(id)
                .and_then(|record| resolve_record(record, filesystems))
                .is_some();
            if resolved {
                to_update_url.push(id);
            }
        }

        let groups = self.group_by_listener(&to_fire.ids);
        log::debug!(
            "pointer batch begin events={} to_fire={} to_update_url={} listeners={}",
            events.len(),
            to_fire.ids.len(),
            to_update_url.len(),
            groups.len(),
        );
        self.pending = Some(PendingBatch {
            event_count: events.len(),
            to_fire: to_fire.ids,
            to_update_url,
            groups,
        });
        Ok(())
    }

    /// Directory pointers above `path` that care about a change there.
    fn collect_watchers(
        &self,
        tree: &PathTree,
        path: &str,
        scratch: &mut Vec<AncestorLeaf>,
        out: &mut OrderedIds,
    ) {
        scratch.clear();
        tree.collect_ancestors(path, scratch);
        for ancestor in scratch.iter() {
            let Some(record) = self.record_at(ancestor.leaf) else {
                continue;
            };
            let watches = record.flags.contains(PointerFlags::RECURSIVE)
                || (ancestor.direct_parent && record.flags.contains(PointerFlags::DIRECTORY));
            if watches {
                out.push(PointerId {
                    slot: ancestor.leaf,
                    seq: record.seq,
                });
            }
        }
    }

    fn group_by_listener(&self, ids: &[PointerId]) -> Vec<(ListenerId, Vec<PointerId>)> {
        let mut groups: Vec<(ListenerId, Vec<PointerId>)> = Vec::new();
        let mut positions: FnvHashMap<ListenerId, usize> = FnvHashMap::default();
        for &id in ids {
            let Some(listener) = self.record(id).and_then(|record| record.tree.listener) else {
                continue;
            };
            let position = *positions.entry(listener).or_insert_with(|| {
                groups.push((listener, Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(id);
        }
        groups
    }

    pub fn finish_batch(
        &mut self,
        events: &[FileEvent],
        filesystems: &FileSystemRegistry,
        archive_separator: &str,
    ) -> Result<PendingBatch> {
        let mut batch = self.pending.take().ok_or(PointerError::NoPendingBatch)?;
        if batch.event_count != events.len() {
            let before = batch.event_count;
            self.pending = Some(batch);
            return Err(PointerError::BatchMismatch {
                before,
                after: events.len(),
            });
        }

        let moved = self.relocate(&batch.to_update_url, filesystems, archive_separator);
        if moved > 0 {
            // Merges may have folded several fired ids into one record.
            batch.to_fire = self.settle(&batch.to_fire);
            for (_, ids) in batch.groups.iter_mut() {
                *ids = self.settle(ids);
            }
        }

        let mut valid = 0usize;
        for &id in &batch.to_fire {
            if let Some(record) = self.record_mut(id) {
                record.resolution = Resolution::Unresolved;
                if resolve_record(record, filesystems).is_some() {
                    valid += 1;
                }
            }
        }

        log::debug!(
            "pointer batch end events={} fired={} valid={} moved={}",
            events.len(),
            batch.to_fire.len(),
            valid,
            moved,
        );
        Ok(batch)
    }

    /// Maps ids through merge forwarding, keeping the first of each live
    /// record and dropping stale ids.
    fn settle(&self, ids: &[PointerId]) -> Vec<PointerId> {
        let mut live = OrderedIds::default();
        for id in ids.iter().filter_map(|id| self.live_id(*id)) {
            live.push(id);
        }
        live.ids
    }

    /// Moves resolved pointers to wherever their file lives now.
    ///
    /// Every mover is detached before any is re-inserted, so a subtree can
    /// move onto paths its own members used to occupy.
    fn relocate(
        &mut self,
        ids: &[PointerId],
        filesystems: &FileSystemRegistry,
        archive_separator: &str,
    ) -> usize {
        let mut detached: Vec<(PointerId, String)> = Vec::new();
        for &id in ids {
            let Some(live) = self.live_id(id) else {
                continue;
            };
            let Some(PointerSlot::Live(record)) = self.pointers.get_mut(live.slot) else {
                continue;
            };
            let Resolution::Resolved(file) = record.resolution else {
                continue;
            };
            let Some(tree) = self.trees.get_mut(&record.tree) else {
                continue;
            };
            let new_path = filesystems
                .get(&record.tree.protocol)
                .and_then(|filesystem| filesystem.path_of(file))
                .and_then(|raw| normalize_path(&raw, archive_separator).ok());
            let Some(new_path) = new_path else {
                record.resolution = Resolution::Absent;
                continue;
            };
            if new_path == record.path {
                continue;
            }
            if paths_equal(&new_path, &record.path, tree.is_case_sensitive()) {
                // Case-only rename on a case-insensitive filesystem.
                record.url = to_url(&record.tree.protocol, &new_path);
                record.path = new_path;
                continue;
            }
            tree.remove(record.node);
            detached.push((live, new_path));
        }

        let moved = detached.len();
        for (id, new_path) in detached {
            let Some(key) = self.record_at(id.slot).map(|record| record.tree.clone()) else {
                continue;
            };
            let Some(tree) = self.trees.get_mut(&key) else {
                continue;
            };
            let node = tree.find_or_create(&new_path);
            match tree.leaf(node) {
                None => {
                    tree.set_leaf(node, id.slot);
                    if let Some(PointerSlot::Live(record)) = self.pointers.get_mut(id.slot) {
                        record.url = to_url(&key.protocol, &new_path);
                        record.path = new_path;
                        record.node = node;
                    }
                }
                Some(existing) => self.merge(id, existing, node, new_path),
            }
        }
        self.trees.retain(|_, tree| !tree.is_empty());
        moved
    }

    /// Folds a moved pointer and the one already at its destination into a
    /// single record.
    ///
    /// The record with more users survives (the older one on a tie) and
    /// takes over the other's users and flags. The other becomes a
    /// forwarding record so outstanding handles keep working.
    fn merge(&mut self, moving: PointerId, existing: SlabIndex, node: SlabIndex, new_path: String) {
        let (Some(mover), Some(resident)) = (self.record_at(moving.slot), self.record_at(existing))
        else {
            return;
        };
        let existing = PointerId {
            slot: existing,
            seq: resident.seq,
        };
        let moving_wins = mover.usage > resident.usage
            || (mover.usage == resident.usage && mover.seq < resident.seq);
        let moved_resolution = mover.resolution;
        let (survivor, loser) = if moving_wins {
            (moving, existing)
        } else {
            (existing, moving)
        };

        let Some(slot) = self.pointers.get_mut(loser.slot) else {
            return;
        };
        let remaining = match slot {
            PointerSlot::Live(record) => record.usage,
            PointerSlot::Forwarded { .. } => return,
        };
        let PointerSlot::Live(lost) = std::mem::replace(
            slot,
            PointerSlot::Forwarded {
                seq: loser.seq,
                target: survivor,
                remaining,
            },
        ) else {
            return;
        };

        let Some(PointerSlot::Live(kept)) = self.pointers.get_mut(survivor.slot) else {
            return;
        };
        kept.usage += lost.usage;
        kept.flags |= lost.flags;
        if moving_wins {
            kept.url = to_url(&kept.tree.protocol, &new_path);
            kept.path = new_path;
            kept.node = node;
            if let Some(tree) = self.trees.get_mut(&kept.tree) {
                tree.set_leaf(node, survivor.slot);
            }
        } else {
            kept.resolution = moved_resolution;
        }
        log::debug!(
            "pointer merge url={} usage={} absorbed_seq={}",
            kept.url,
            kept.usage,
            lost.seq,
        );
    }
}
