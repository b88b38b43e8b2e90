//! Backing filesystem abstraction.
//!
//! The index never touches a disk. It asks a [`FileSystem`] two questions:
//! which file object currently lives at a path, and where a given file object
//! lives now. Everything else (watching, refreshing, reading) belongs to the
//! collaborator that feeds change events into the index.

use std::fmt;
use std::sync::Arc;

use fnv::FnvHashMap;

/// Opaque identity of a file object.
///
/// A `FileId` survives moves and renames: after `/a/b` is moved to `/z/b`,
/// the filesystem reports the same id at the new path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

pub trait FileSystem: Send + Sync {
    /// URL protocol served by this filesystem, e.g. `file` or `jar`.
    fn protocol(&self) -> &str;

    fn is_case_sensitive(&self) -> bool {
        true
    }

    /// Whether pointers into this filesystem can be tracked across events.
    ///
    /// Untracked filesystems get identity pointers that are resolved once.
    fn is_trackable(&self) -> bool {
        true
    }

    /// Looks up the file currently at a normalized path.
    fn find_file(&self, path: &str) -> Option<FileId>;

    /// Returns the current normalized path of a file, if it still exists.
    fn path_of(&self, file: FileId) -> Option<String>;
}

/// Protocol to filesystem mapping handed to the index.
#[derive(Clone, Default)]
pub struct FileSystemRegistry {
    filesystems: FnvHashMap<String, Arc<dyn FileSystem>>,
}

impl fmt::Debug for FileSystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protocols: Vec<_> = self.filesystems.keys().collect();
        protocols.sort();
        f.debug_struct("FileSystemRegistry")
            .field("protocols", &protocols)
            .finish()
    }
}

impl FileSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a filesystem under its protocol, replacing any previous one.
    pub fn register(&mut self, filesystem: Arc<dyn FileSystem>) -> &mut Self {
        let protocol = filesystem.protocol().to_ascii_lowercase();
        self.filesystems.insert(protocol, filesystem);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.register(filesystem);
        self
    }

    pub fn get(&self, protocol: &str) -> Option<&Arc<dyn FileSystem>> {
        self.filesystems.get(protocol)
    }

    pub fn len(&self) -> usize {
        self.filesystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filesystems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFileSystem;

    #[test]
    fn registry_lookup_is_by_lowercase_protocol() {
        let registry = FileSystemRegistry::new().with(Arc::new(MemoryFileSystem::new("File")));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("file").is_some());
        assert!(registry.get("jar").is_none());
    }

    #[test]
    fn registering_same_protocol_replaces() {
        let mut registry = FileSystemRegistry::new();
        registry.register(Arc::new(MemoryFileSystem::new("file")));
        registry.register(Arc::new(MemoryFileSystem::new("file").case_insensitive()));
        assert_eq!(registry.len(), 1);
        assert!(!registry.get("file").unwrap().is_case_sensitive());
    }
}
