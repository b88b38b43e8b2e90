//! Pointer handles.
//!
//! A [`FilePointer`] is a cheap handle onto a record owned by the index.
//! Handles returned by `create*` and `duplicate` own one usage count (a
//! lease); handles passed to listeners or returned by containers are views
//! that own nothing. Every accessor goes through the index, so a handle
//! whose record was merged into another keeps working and reports the
//! surviving record.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{PointerError, Result};
use crate::fs::FileId;
use crate::identity::IdentityPointer;
use crate::index::Shared;
use crate::listener::ListenerId;
use crate::storage::SlabIndex;

bitflags! {
    /// What a pointer wants to hear about besides its own path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PointerFlags: u8 {
        /// Also fire when a direct child is created, deleted, copied or moved.
        const DIRECTORY = 1 << 0;
        /// Also fire for any change below the pointer's path.
        const RECURSIVE = 1 << 1;
    }
}

/// Lazy resolution state of a tracked pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Not looked up since the last relevant change.
    Unresolved,
    Resolved(FileId),
    /// Looked up; nothing lives at the path.
    Absent,
}

/// Stable name of a tracked pointer record.
///
/// `seq` is never reused, so an id whose slot was freed and handed to a new
/// record is detected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct PointerId {
    pub slot: SlabIndex,
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum PointerTarget {
    Tracked(PointerId),
    Identity(Arc<IdentityPointer>),
}

#[derive(Debug, Default)]
pub(crate) struct Lease {
    released: AtomicBool,
}

#[derive(Clone)]
pub struct FilePointer {
    shared: Arc<Shared>,
    target: PointerTarget,
    /// `None` for views.
    lease: Option<Arc<Lease>>,
    /// URL at the time the handle was made, for error messages.
    label: Arc<str>,
}

impl fmt::Debug for FilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePointer")
            .field("url", &self.label)
            .field("identity", &self.is_identity())
            .field("owned", &self.lease.is_some())
            .finish()
    }
}

impl FilePointer {
    pub(crate) fn leased(shared: Arc<Shared>, target: PointerTarget, label: Arc<str>) -> Self {
        Self {
            shared,
            target,
            lease: Some(Arc::new(Lease::default())),
            label,
        }
    }

    pub(crate) fn view_of(shared: Arc<Shared>, target: PointerTarget, label: Arc<str>) -> Self {
        Self {
            shared,
            target,
            lease: None,
            label,
        }
    }

    /// A handle onto the same record that owns nothing.
    pub(crate) fn view(&self) -> Self {
        Self::view_of(self.shared.clone(), self.target.clone(), self.label.clone())
    }

    pub(crate) fn target(&self) -> &PointerTarget {
        &self.target
    }

    fn disposed(&self) -> PointerError {
        PointerError::Disposed(self.label.to_string())
    }

    fn check_lease(&self) -> Result<()> {
        match &self.lease {
            Some(lease) if lease.released.load(Ordering::Acquire) => Err(self.disposed()),
            _ => Ok(()),
        }
    }

    pub fn url(&self) -> Result<String> {
        self.check_lease()?;
        match &self.target {
            PointerTarget::Tracked(id) => self
                .shared
                .state
                .lock()
                .record(*id)
                .map(|record| record.url.clone())
                .ok_or_else(|| self.disposed()),
            PointerTarget::Identity(pointer) => Ok(pointer.url.clone()),
        }
    }

    /// Normalized path within the pointer's filesystem.
    pub fn path(&self) -> Result<String> {
        self.check_lease()?;
        match &self.target {
            PointerTarget::Tracked(id) => self
                .shared
                .state
                .lock()
                .record(*id)
                .map(|record| record.path.clone())
                .ok_or_else(|| self.disposed()),
            PointerTarget::Identity(pointer) => Ok(pointer.path.clone()),
        }
    }

    pub fn protocol(&self) -> Result<String> {
        self.check_lease()?;
        match &self.target {
            PointerTarget::Tracked(id) => self
                .shared
                .state
                .lock()
                .record(*id)
                .map(|record| record.tree.protocol.to_string())
                .ok_or_else(|| self.disposed()),
            PointerTarget::Identity(pointer) => Ok(pointer.protocol.clone()),
        }
    }

    /// The file the pointer currently refers to, resolving it on first use.
    pub fn file(&self) -> Result<Option<FileId>> {
        self.check_lease()?;
        match &self.target {
            PointerTarget::Tracked(id) => self
                .shared
                .state
                .lock()
                .resolve_file(*id, &self.shared.filesystems)
                .ok_or_else(|| self.disposed()),
            PointerTarget::Identity(pointer) => Ok(pointer.file),
        }
    }

    pub fn is_valid(&self) -> Result<bool> {
        self.file().map(|file| file.is_some())
    }

    pub fn flags(&self) -> Result<PointerFlags> {
        self.check_lease()?;
        match &self.target {
            PointerTarget::Tracked(id) => self
                .shared
                .state
                .lock()
                .record(*id)
                .map(|record| record.flags)
                .ok_or_else(|| self.disposed()),
            PointerTarget::Identity(_) => Ok(PointerFlags::empty()),
        }
    }

    /// Number of outstanding leases on the record behind this handle.
    pub fn usage_count(&self) -> Result<u32> {
        self.check_lease()?;
        let state = self.shared.state.lock();
        let usage = match &self.target {
            PointerTarget::Tracked(id) => state.record(*id).map(|record| record.usage),
            PointerTarget::Identity(pointer) => state.identity_usage(pointer),
        };
        usage.ok_or_else(|| self.disposed())
    }

    /// Listener whose trees hold this pointer, if any.
    pub fn listener(&self) -> Result<Option<ListenerId>> {
        self.check_lease()?;
        match &self.target {
            PointerTarget::Tracked(id) => self
                .shared
                .state
                .lock()
                .record(*id)
                .map(|record| record.tree.listener)
                .ok_or_else(|| self.disposed()),
            PointerTarget::Identity(_) => Ok(None),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.target, PointerTarget::Identity(_))
    }

    /// Whether this handle owns a lease (as opposed to being a view).
    pub fn is_owned(&self) -> bool {
        self.lease.is_some()
    }

    /// True if both handles reach the same live record.
    pub fn same_pointer(&self, other: &FilePointer) -> bool {
        if !Arc::ptr_eq(&self.shared, &other.shared)
            || self.check_lease().is_err()
            || other.check_lease().is_err()
        {
            return false;
        }
        match (&self.target, &other.target) {
            (PointerTarget::Tracked(a), PointerTarget::Tracked(b)) => {
                let state = self.shared.state.lock();
                match (state.live_id(*a), state.live_id(*b)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (PointerTarget::Identity(a), PointerTarget::Identity(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Gives back the usage count this handle owns.
    ///
    /// Views cannot be disposed, and a lease can be given back only once.
    pub fn dispose(&self) -> Result<()> {
        let Some(lease) = &self.lease else {
            return Err(PointerError::NotOwned(self.label.to_string()));
        };
        if lease.released.swap(true, Ordering::AcqRel) {
            return Err(PointerError::AlreadyDisposed(self.label.to_string()));
        }
        self.shared.release(&self.target)
    }

    /// Releases the lease if it is still held; used by scopes and containers.
    pub(crate) fn release_quietly(&self) {
        let Some(lease) = &self.lease else {
            return;
        };
        if lease.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(error) = self.shared.release(&self.target) {
            log::warn!("pointer release failed url={} error={}", self.label, error);
        }
    }
}
