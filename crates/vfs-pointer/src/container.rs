//! Ordered pointer collections sharing one lifetime.
//!
//! A container owns one lease per entry it holds, so the same URL can be
//! added twice and will be released twice. Callers only ever receive views;
//! entries are released through the container.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PointerError, Result};
use crate::fs::FileId;
use crate::index::PointerIndex;
use crate::listener::ListenerId;
use crate::pointer::{FilePointer, PointerFlags};
use crate::scope::Scope;
use crate::storage::SlabIndex;
use crate::url::{parse_url, to_url};

#[derive(Default)]
struct ContainerState {
    pointers: Vec<FilePointer>,
    disposed: bool,
}

struct ContainerInner {
    index: PointerIndex,
    /// Registration used by the leak check.
    slot: SlabIndex,
    listener: Option<ListenerId>,
    origin: Arc<str>,
    state: Mutex<ContainerState>,
}

#[derive(Clone)]
pub struct PointerContainer {
    inner: Arc<ContainerInner>,
}

impl fmt::Debug for PointerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PointerContainer")
            .field("origin", &self.inner.origin)
            .field("listener", &self.inner.listener)
            .field("len", &state.pointers.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl PointerContainer {
    pub(crate) fn new(index: PointerIndex, listener: Option<ListenerId>, origin: Arc<str>) -> Self {
        let slot = index.register_container(origin.clone());
        Self {
            inner: Arc::new(ContainerInner {
                index,
                slot,
                listener,
                origin,
                state: Mutex::new(ContainerState::default()),
            }),
        }
    }

    fn with_open<T>(&self, f: impl FnOnce(&mut Vec<FilePointer>) -> Result<T>) -> Result<T> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(PointerError::ContainerDisposed(self.inner.origin.to_string()));
        }
        f(&mut state.pointers)
    }

    fn normalize(&self, url: &str) -> Result<String> {
        let (protocol, path) = parse_url(url, &self.inner.index.config().archive_separator)?;
        Ok(to_url(&protocol, &path))
    }

    pub fn listener(&self) -> Option<ListenerId> {
        self.inner.listener
    }

    /// Appends a pointer for `url`.
    pub fn add(&self, url: &str) -> Result<FilePointer> {
        self.insert(usize::MAX, url)
    }

    /// Inserts a pointer for `url` at `position`; positions past the end
    /// append.
    pub fn insert(&self, position: usize, url: &str) -> Result<FilePointer> {
        self.with_open(|pointers| {
            let pointer = self.inner.index.acquire(
                url,
                self.inner.listener,
                PointerFlags::empty(),
                &self.inner.origin,
            )?;
            let view = pointer.view();
            pointers.insert(position.min(pointers.len()), pointer);
            Ok(view)
        })
    }

    pub fn add_directory(&self, url: &str, recursive: bool) -> Result<FilePointer> {
        let flags = if recursive {
            PointerFlags::DIRECTORY | PointerFlags::RECURSIVE
        } else {
            PointerFlags::DIRECTORY
        };
        self.with_open(|pointers| {
            let pointer =
                self.inner
                    .index
                    .acquire(url, self.inner.listener, flags, &self.inner.origin)?;
            let view = pointer.view();
            pointers.push(pointer);
            Ok(view)
        })
    }

    pub fn add_file(&self, protocol: &str, file: FileId) -> Result<FilePointer> {
        self.with_open(|pointers| {
            let pointer = self.inner.index.acquire_file(
                protocol,
                file,
                self.inner.listener,
                PointerFlags::empty(),
                &self.inner.origin,
            )?;
            let view = pointer.view();
            pointers.push(pointer);
            Ok(view)
        })
    }

    /// Removes the first entry that is the same pointer as `pointer`.
    pub fn remove(&self, pointer: &FilePointer) -> Result<bool> {
        self.with_open(|pointers| {
            let Some(position) = pointers.iter().position(|held| held.same_pointer(pointer)) else {
                return Ok(false);
            };
            pointers.remove(position).release_quietly();
            Ok(true)
        })
    }

    /// Removes the first entry whose current URL is `url`.
    pub fn remove_url(&self, url: &str) -> Result<bool> {
        let url = self.normalize(url)?;
        self.with_open(|pointers| {
            let Some(position) = position_of(pointers, &url) else {
                return Ok(false);
            };
            pointers.remove(position).release_quietly();
            Ok(true)
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.with_open(|pointers| {
            for pointer in pointers.drain(..) {
                pointer.release_quietly();
            }
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().pointers.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Views of the current entries, in order.
    pub fn pointers(&self) -> Vec<FilePointer> {
        self.inner
            .state
            .lock()
            .pointers
            .iter()
            .map(FilePointer::view)
            .collect()
    }

    pub fn urls(&self) -> Result<Vec<String>> {
        self.with_open(|pointers| pointers.iter().map(FilePointer::url).collect())
    }

    /// Files of the entries that currently resolve, in order.
    pub fn files(&self) -> Result<Vec<FileId>> {
        self.with_open(|pointers| {
            let mut files = Vec::with_capacity(pointers.len());
            for pointer in pointers.iter() {
                if let Some(file) = pointer.file()? {
                    files.push(file);
                }
            }
            Ok(files)
        })
    }

    pub fn find_by_url(&self, url: &str) -> Result<Option<FilePointer>> {
        let url = self.normalize(url)?;
        self.with_open(|pointers| {
            Ok(position_of(pointers, &url).map(|position| pointers[position].view()))
        })
    }

    pub fn index_of(&self, url: &str) -> Result<Option<usize>> {
        let url = self.normalize(url)?;
        self.with_open(|pointers| Ok(position_of(pointers, &url)))
    }

    /// Swaps the entry at `position` with the one before it.
    pub fn move_up(&self, position: usize) -> Result<bool> {
        self.with_open(|pointers| {
            if position == 0 || position >= pointers.len() {
                return Ok(false);
            }
            pointers.swap(position - 1, position);
            Ok(true)
        })
    }

    /// Swaps the entry at `position` with the one after it.
    pub fn move_down(&self, position: usize) -> Result<bool> {
        self.with_open(|pointers| {
            if position + 1 >= pointers.len() {
                return Ok(false);
            }
            pointers.swap(position, position + 1);
            Ok(true)
        })
    }

    /// Creates a container in `scope` holding its own lease on every entry
    /// of this one, in the same order.
    pub fn clone_into(&self, scope: &Scope, listener: Option<ListenerId>) -> Result<PointerContainer> {
        let sources = self.with_open(|pointers| Ok(pointers.iter().map(FilePointer::view).collect::<Vec<_>>()))?;
        let copy = self.inner.index.create_container(scope, listener)?;
        copy.with_open(|pointers| {
            for source in &sources {
                let pointer = copy.inner.index.acquire_duplicate(source, listener, &copy.inner.origin)?;
                pointers.push(pointer);
            }
            Ok(())
        })?;
        Ok(copy)
    }

    /// Releases every entry and unregisters the container.
    pub fn dispose(&self) -> Result<()> {
        let pointers = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(PointerError::ContainerDisposed(self.inner.origin.to_string()));
            }
            state.disposed = true;
            std::mem::take(&mut state.pointers)
        };
        log::debug!(
            "pointer container dispose origin={} pointers={}",
            self.inner.origin,
            pointers.len()
        );
        for pointer in &pointers {
            pointer.release_quietly();
        }
        self.inner.index.forget_container(self.inner.slot);
        Ok(())
    }

    /// Scope teardown form of [`dispose`](Self::dispose).
    pub(crate) fn dispose_quietly(&self) {
        if self.is_disposed() {
            return;
        }
        if let Err(error) = self.dispose() {
            log::warn!("pointer container dispose failed origin={} error={}", self.inner.origin, error);
        }
    }
}

fn position_of(pointers: &[FilePointer], url: &str) -> Option<usize> {
    pointers
        .iter()
        .position(|pointer| pointer.url().is_ok_and(|current| current == url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FileEvent;
    use crate::testing::memory_index;

    #[test]
    fn holds_one_lease_per_entry() {
        let (index, fs) = memory_index();
        fs.create_file("/a").unwrap();
        let scope = Scope::new("classpath");
        let container = index.create_container(&scope, None).unwrap();

        let first = container.add("file:///a").unwrap();
        container.add("file:///a").unwrap();
        assert_eq!(container.len(), 2);
        assert_eq!(first.usage_count().unwrap(), 2);
        assert!(!first.is_owned());
        assert!(matches!(first.dispose(), Err(PointerError::NotOwned(_))));

        container.dispose().unwrap();
        assert!(container.is_empty());
        index.assert_all_disposed().unwrap();
        scope.dispose();
    }

    #[test]
    fn ordering_operations() {
        let (index, _fs) = memory_index();
        let scope = Scope::new("test");
        let container = index.create_container(&scope, None).unwrap();
        container.add("file:///b").unwrap();
        container.add("file:///c").unwrap();
        container.insert(0, "file:///a").unwrap();
        assert_eq!(
            container.urls().unwrap(),
            vec!["file:///a", "file:///b", "file:///c"]
        );

        assert!(container.move_down(0).unwrap());
        assert!(container.move_up(2).unwrap());
        assert!(!container.move_up(0).unwrap());
        assert!(!container.move_down(2).unwrap());
        assert_eq!(
            container.urls().unwrap(),
            vec!["file:///b", "file:///c", "file:///a"]
        );
        assert_eq!(container.index_of("file:///c/").unwrap(), Some(1));
        assert_eq!(container.index_of("file:///zzz").unwrap(), None);

        let c = container.find_by_url("file:///c").unwrap().unwrap();
        assert!(container.remove(&c).unwrap());
        assert!(container.remove_url("file:///a").unwrap());
        assert!(!container.remove_url("file:///a").unwrap());
        assert_eq!(container.urls().unwrap(), vec!["file:///b"]);

        container.clear().unwrap();
        assert!(container.is_empty());
        assert_eq!(index.stats().pointers, 0);
        scope.dispose();
        index.assert_all_disposed().unwrap();
    }

    #[test]
    fn files_lists_resolved_entries_only() {
        let (index, fs) = memory_index();
        let a = fs.create_file("/a").unwrap();
        let c = fs.create_file("/c").unwrap();
        let scope = Scope::new("test");
        let container = index.create_container(&scope, None).unwrap();
        container.add("file:///c").unwrap();
        container.add("file:///missing").unwrap();
        container.add_file("file", a).unwrap();
        assert_eq!(container.files().unwrap(), vec![c, a]);
        scope.dispose();
    }

    #[test]
    fn entries_follow_moves() {
        let (index, fs) = memory_index();
        fs.create_file("/src/lib.rs").unwrap();
        let scope = Scope::new("test");
        let container = index.create_container(&scope, None).unwrap();
        let entry = container.add("file:///src/lib.rs").unwrap();
        entry.file().unwrap();

        let events = [FileEvent::moved("file:///src", "file:///crate/src")];
        index.before(&events).unwrap();
        fs.move_path("/src", "/crate/src").unwrap();
        index.after(&events).unwrap();

        assert_eq!(container.urls().unwrap(), vec!["file:///crate/src/lib.rs"]);
        assert_eq!(container.index_of("file:///crate/src/lib.rs").unwrap(), Some(0));
        scope.dispose();
    }

    #[test]
    fn clone_into_takes_own_leases() {
        let (index, fs) = memory_index();
        fs.create_file("/a").unwrap();
        let first_scope = Scope::new("first");
        let second_scope = Scope::new("second");
        let original = index.create_container(&first_scope, None).unwrap();
        original.add("file:///a").unwrap();
        original.add_directory("file:///dir", true).unwrap();

        let copy = original.clone_into(&second_scope, None).unwrap();
        first_scope.dispose();
        assert!(original.is_disposed());
        assert_eq!(copy.urls().unwrap(), vec!["file:///a", "file:///dir"]);
        assert_eq!(
            copy.pointers()[1].flags().unwrap(),
            PointerFlags::DIRECTORY | PointerFlags::RECURSIVE
        );
        second_scope.dispose();
        index.assert_all_disposed().unwrap();
    }

    #[test]
    fn disposed_container_rejects_use() {
        let (index, _fs) = memory_index();
        let scope = Scope::new("test");
        let container = index.create_container(&scope, None).unwrap();
        container.dispose().unwrap();
        assert!(matches!(container.dispose(), Err(PointerError::ContainerDisposed(_))));
        assert!(matches!(container.add("file:///a"), Err(PointerError::ContainerDisposed(_))));
        // Scope teardown skips the container it no longer owns.
        scope.dispose();
        index.assert_all_disposed().unwrap();
    }

    #[test]
    fn live_container_is_reported_as_leak() {
        let (index, _fs) = memory_index();
        let scope = Scope::new("project/libraries");
        let container = index.create_container(&scope, None).unwrap();
        container.add("file:///a").unwrap();
        match index.assert_all_disposed() {
            Err(PointerError::LeakedContainers { count, origin }) => {
                assert_eq!(count, 1);
                assert_eq!(origin, "project/libraries");
            }
            other => panic!("expected container leak, got {other:?}"),
        }
        assert_eq!(index.stats().containers, 1);
        scope.dispose();
        assert_eq!(index.stats().containers, 0);
        index.assert_all_disposed().unwrap();
    }
}
