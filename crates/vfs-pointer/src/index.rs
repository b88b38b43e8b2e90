//! The pointer index.
//!
//! `PointerIndex` owns every path tree, pointer record, identity pointer and
//! container registration behind a single lock. Listener callbacks always
//! run after that lock is released, so they are free to query or create
//! pointers.
//!
//! ## Module Structure
//!
//! - `state` - Lock-guarded records, trees and lifecycle bookkeeping
//! - `batch` - The before/after event protocol, relocation and merging

mod batch;
mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::IndexConfig;
use crate::container::PointerContainer;
use crate::error::{PointerError, Result};
use crate::events::FileEvent;
use crate::fs::{FileId, FileSystemRegistry};
use crate::listener::{ListenerId, PointerListener};
use crate::pointer::{FilePointer, PointerFlags, PointerId, PointerTarget};
use crate::scope::Scope;
use crate::storage::SlabIndex;
use crate::types::IndexStats;
use crate::url::{normalize_path, parse_url, to_url};

use batch::PendingBatch;
use state::{Acquire, IndexState, TreeKey};

/// State shared by the index and every handle it gives out.
pub(crate) struct Shared {
    pub(crate) state: Mutex<IndexState>,
    /// Bumped by both halves of every batch.
    modification_count: AtomicU64,
    config: IndexConfig,
    archive_separator: Arc<str>,
    pub(crate) filesystems: FileSystemRegistry,
    global_listeners: RwLock<Vec<Arc<dyn PointerListener>>>,
}

impl Shared {
    pub(crate) fn release(&self, target: &PointerTarget) -> Result<()> {
        let mut state = self.state.lock();
        match target {
            PointerTarget::Tracked(id) => state.release_tracked(*id),
            PointerTarget::Identity(pointer) => state.release_identity(pointer),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Before,
    After,
}

/// Listener views built under the lock and fired after it is released.
struct Dispatch {
    per_listener: Vec<(Arc<dyn PointerListener>, Vec<FilePointer>)>,
    all: Vec<FilePointer>,
}

impl Dispatch {
    fn fire(&self, globals: &[Arc<dyn PointerListener>], phase: Phase) {
        let notify = |listener: &dyn PointerListener, pointers: &[FilePointer]| match phase {
            Phase::Before => listener.before_validity_changed(pointers),
            Phase::After => listener.validity_changed(pointers),
        };
        for (listener, pointers) in &self.per_listener {
            if !pointers.is_empty() {
                notify(listener.as_ref(), pointers);
            }
        }
        if self.all.is_empty() {
            return;
        }
        for listener in globals {
            notify(listener.as_ref(), &self.all);
        }
    }
}

#[derive(Clone)]
pub struct PointerIndex {
    shared: Arc<Shared>,
}

impl fmt::Debug for PointerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerIndex")
            .field("filesystems", &self.shared.filesystems)
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PointerIndex {
    /// Creates an index over `filesystems`, rejecting an unusable config.
    pub fn new(filesystems: FileSystemRegistry, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "pointer index init filesystems={} archive_separator={:?} debug_checks={}",
            filesystems.len(),
            config.archive_separator,
            config.debug_checks,
        );
        let archive_separator = Arc::from(config.archive_separator.as_str());
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(IndexState::new()),
                modification_count: AtomicU64::new(0),
                config,
                archive_separator,
                filesystems,
                global_listeners: RwLock::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.shared.config
    }

    pub fn filesystems(&self) -> &FileSystemRegistry {
        &self.shared.filesystems
    }

    /// Registers a listener that pointers can be created for.
    pub fn register_listener(&self, listener: Arc<dyn PointerListener>) -> ListenerId {
        self.shared.state.lock().register_listener(listener)
    }

    /// Stops delivering callbacks to a listener. Its pointers stay tracked.
    pub fn unregister_listener(&self, listener: ListenerId) -> Result<()> {
        self.shared.state.lock().unregister_listener(listener)
    }

    /// Adds a listener that hears about every fired pointer, after the
    /// per-listener callbacks of the same phase.
    pub fn add_global_listener(&self, listener: Arc<dyn PointerListener>) {
        self.shared.global_listeners.write().push(listener);
    }

    /// Creates (or reuses) the pointer for `url`, owned by `scope`.
    ///
    /// Two calls with the same normalized URL and listener share one
    /// record until every caller has released it.
    pub fn create(
        &self,
        url: &str,
        scope: &Scope,
        listener: Option<ListenerId>,
    ) -> Result<FilePointer> {
        ensure_open(scope)?;
        let pointer = self.acquire(url, listener, PointerFlags::empty(), &scope.origin())?;
        attach(pointer, scope)
    }

    /// Creates a pointer that also fires for changes to direct children,
    /// or to anything below it when `recursive` is set.
    pub fn create_directory(
        &self,
        url: &str,
        recursive: bool,
        scope: &Scope,
        listener: Option<ListenerId>,
    ) -> Result<FilePointer> {
        ensure_open(scope)?;
        let flags = if recursive {
            PointerFlags::DIRECTORY | PointerFlags::RECURSIVE
        } else {
            PointerFlags::DIRECTORY
        };
        let pointer = self.acquire(url, listener, flags, &scope.origin())?;
        attach(pointer, scope)
    }

    /// Creates a pointer from a file object the filesystem already knows.
    pub fn create_for_file(
        &self,
        protocol: &str,
        file: FileId,
        scope: &Scope,
        listener: Option<ListenerId>,
    ) -> Result<FilePointer> {
        ensure_open(scope)?;
        let pointer =
            self.acquire_file(protocol, file, listener, PointerFlags::empty(), &scope.origin())?;
        attach(pointer, scope)
    }

    /// Gives `scope` its own lease on the pointer `pointer` refers to (or
    /// on the pointer for its current file, when that is resolved).
    pub fn duplicate(
        &self,
        pointer: &FilePointer,
        scope: &Scope,
        listener: Option<ListenerId>,
    ) -> Result<FilePointer> {
        ensure_open(scope)?;
        let copy = self.acquire_duplicate(pointer, listener, &scope.origin())?;
        attach(copy, scope)
    }

    pub fn create_container(
        &self,
        scope: &Scope,
        listener: Option<ListenerId>,
    ) -> Result<PointerContainer> {
        ensure_open(scope)?;
        self.shared.state.lock().check_listener(listener)?;
        let container = PointerContainer::new(self.clone(), listener, scope.origin());
        let registered = container.clone();
        if let Err(error) = scope.on_dispose(move || registered.dispose_quietly()) {
            container.dispose_quietly();
            return Err(error);
        }
        Ok(container)
    }

    pub(crate) fn acquire(
        &self,
        url: &str,
        listener: Option<ListenerId>,
        flags: PointerFlags,
        origin: &Arc<str>,
    ) -> Result<FilePointer> {
        let (protocol, path) = parse_url(url, &self.shared.archive_separator)?;
        self.acquire_path(protocol, path, listener, flags, None, origin)
    }

    pub(crate) fn acquire_file(
        &self,
        protocol: &str,
        file: FileId,
        listener: Option<ListenerId>,
        flags: PointerFlags,
        origin: &Arc<str>,
    ) -> Result<FilePointer> {
        let protocol = protocol.to_ascii_lowercase();
        let unknown = || PointerError::UnknownFile {
            protocol: protocol.clone(),
            file: file.0,
        };
        let filesystem = self.shared.filesystems.get(&protocol).ok_or_else(unknown)?;
        let raw = filesystem.path_of(file).ok_or_else(unknown)?;
        let path = normalize_path(&raw, &self.shared.archive_separator)?;
        self.acquire_path(protocol, path, listener, flags, Some(file), origin)
    }

    pub(crate) fn acquire_duplicate(
        &self,
        pointer: &FilePointer,
        listener: Option<ListenerId>,
        origin: &Arc<str>,
    ) -> Result<FilePointer> {
        let flags = pointer.flags()?;
        if !pointer.is_identity() {
            if let Some(file) = pointer.file()? {
                match self.acquire_file(&pointer.protocol()?, file, listener, flags, origin) {
                    // The file went away since it was resolved; fall back to the URL.
                    Err(PointerError::UnknownFile { .. }) => {}
                    result => return result,
                }
            }
        }
        self.acquire(&pointer.url()?, listener, flags, origin)
    }

    fn acquire_path(
        &self,
        protocol: String,
        path: String,
        listener: Option<ListenerId>,
        flags: PointerFlags,
        file: Option<FileId>,
        origin: &Arc<str>,
    ) -> Result<FilePointer> {
        let filesystem = self.shared.filesystems.get(&protocol);
        let url = to_url(&protocol, &path);
        let mut state = self.shared.state.lock();
        state.check_listener(listener)?;
        let target = match filesystem {
            Some(filesystem) if filesystem.is_trackable() => {
                PointerTarget::Tracked(state.acquire(
                    &**filesystem,
                    &self.shared.archive_separator,
                    Acquire {
                        protocol: &protocol,
                        path: &path,
                        listener,
                        flags,
                        file,
                        origin,
                    },
                ))
            }
            _ => {
                log::debug!(
                    "identity pointer url={} known_protocol={}",
                    url,
                    filesystem.is_some()
                );
                PointerTarget::Identity(state.acquire_identity(
                    url.clone(),
                    protocol,
                    path,
                    filesystem.map(|filesystem| &**filesystem),
                    file,
                    origin,
                ))
            }
        };
        drop(state);
        Ok(FilePointer::leased(self.shared.clone(), target, Arc::from(url)))
    }

    pub(crate) fn register_container(&self, origin: Arc<str>) -> SlabIndex {
        self.shared.state.lock().containers.insert(origin)
    }

    pub(crate) fn forget_container(&self, slot: SlabIndex) {
        self.shared.state.lock().containers.try_remove(slot);
    }

    /// First half of a batch: called while the filesystem still shows the
    /// state before `events`.
    pub fn before(&self, events: &[FileEvent]) -> Result<()> {
        self.shared.modification_count.fetch_add(1, Ordering::SeqCst);
        let dispatch = {
            let mut state = self.shared.state.lock();
            state.begin_batch(
                events,
                &self.shared.filesystems,
                &self.shared.archive_separator,
            )?;
            let batch = state.pending.as_ref().ok_or(PointerError::NoPendingBatch)?;
            self.dispatch(&state, batch)
        };
        let globals = self.shared.global_listeners.read().clone();
        dispatch.fire(&globals, Phase::Before);
        Ok(())
    }

    /// Second half of a batch: called with the same events once they are
    /// visible in the filesystem.
    pub fn after(&self, events: &[FileEvent]) -> Result<()> {
        self.shared.modification_count.fetch_add(1, Ordering::SeqCst);
        let (dispatch, check) = {
            let mut state = self.shared.state.lock();
            let batch = state.finish_batch(
                events,
                &self.shared.filesystems,
                &self.shared.archive_separator,
            )?;
            let dispatch = self.dispatch(&state, &batch);
            let check = if self.shared.config.debug_checks {
                state.check_structure()
            } else {
                Ok(())
            };
            (dispatch, check)
        };
        let globals = self.shared.global_listeners.read().clone();
        dispatch.fire(&globals, Phase::After);
        if let Err(error) = &check {
            log::warn!("pointer index structure check failed after batch: {error}");
        }
        check
    }

    fn dispatch(&self, state: &IndexState, batch: &PendingBatch) -> Dispatch {
        let per_listener = batch
            .groups
            .iter()
            .filter_map(|(listener, ids)| {
                let callback = state.listeners.get(listener)?.clone();
                Some((callback, self.views(state, ids)))
            })
            .collect();
        Dispatch {
            per_listener,
            all: self.views(state, &batch.to_fire),
        }
    }

    fn views(&self, state: &IndexState, ids: &[PointerId]) -> Vec<FilePointer> {
        ids.iter()
            .map(|&id| {
                let label: Arc<str> = state
                    .record(id)
                    .map_or_else(|| Arc::from(""), |record| Arc::from(record.url.as_str()));
                FilePointer::view_of(self.shared.clone(), PointerTarget::Tracked(id), label)
            })
            .collect()
    }

    /// Views of every tracked pointer at or below `url` in one listener's
    /// tree.
    pub fn collect_under(&self, url: &str, listener: Option<ListenerId>) -> Result<Vec<FilePointer>> {
        let (protocol, path) = parse_url(url, &self.shared.archive_separator)?;
        let state = self.shared.state.lock();
        let key = TreeKey {
            listener,
            protocol: Arc::from(protocol),
        };
        let Some(tree) = state.trees.get(&key) else {
            return Ok(Vec::new());
        };
        let mut slots = Vec::new();
        tree.collect_under(&path, &mut slots);
        let ids: Vec<PointerId> = slots.iter().filter_map(|slot| state.id_at(*slot)).collect();
        Ok(self.views(&state, &ids))
    }

    pub fn modification_count(&self) -> u64 {
        self.shared.modification_count.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.shared.state.lock();
        let forwarded = state.forwarded_count();
        IndexStats {
            trees: state.trees.len(),
            pointers: state.pointers.len() - forwarded,
            forwarded,
            identity_pointers: state.identities.len(),
            containers: state.containers.len(),
            listeners: state.listeners.len(),
            modification_count: self.modification_count(),
            batch_pending: state.pending.is_some(),
        }
    }

    /// Validates every tree and the links between trees and records.
    pub fn check_structure(&self) -> Result<()> {
        self.shared.state.lock().check_structure()
    }

    /// Fails with the oldest leaked pointer (or the first live container)
    /// if anything has not been disposed.
    pub fn assert_all_disposed(&self) -> Result<()> {
        let result = self.shared.state.lock().check_all_disposed();
        if let Err(error) = &result {
            log::warn!("pointer leak check failed: {error}");
        }
        result
    }
}

fn ensure_open(scope: &Scope) -> Result<()> {
    if scope.is_disposed() {
        return Err(PointerError::ScopeDisposed(scope.name().to_string()));
    }
    Ok(())
}

/// Hands the pointer's lease to `scope`, giving it back at once if the
/// scope is already gone.
fn attach(pointer: FilePointer, scope: &Scope) -> Result<FilePointer> {
    let owned = pointer.clone();
    if let Err(error) = scope.on_dispose(move || owned.release_quietly()) {
        pointer.release_quietly();
        return Err(error);
    }
    Ok(pointer)
}
