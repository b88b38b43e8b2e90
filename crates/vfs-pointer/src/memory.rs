//! In-memory filesystem.
//!
//! Holds a flat map of paths to file identities. Moves keep identities,
//! copies allocate new ones, deletes are recursive. Parents are created
//! implicitly as directories.

use std::collections::BTreeMap;

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::error::{PointerError, Result};
use crate::fs::{FileId, FileSystem};
use crate::url::{
    child_path, enclosing_path, fold_char, is_ancestor_or_self, normalize_path, parent_path,
    strip_prefix_folded, DEFAULT_ARCHIVE_SEPARATOR,
};

#[derive(Debug, Clone)]
struct MemoryEntry {
    path: String,
    is_dir: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Case-folded path (per the filesystem rule) to file id.
    by_key: BTreeMap<String, FileId>,
    entries: FnvHashMap<FileId, MemoryEntry>,
    next_id: u64,
}

#[derive(Debug)]
pub struct MemoryFileSystem {
    protocol: String,
    case_sensitive: bool,
    trackable: bool,
    state: RwLock<MemoryState>,
}

impl MemoryFileSystem {
    /// Creates an empty, case-sensitive, trackable filesystem.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            case_sensitive: true,
            trackable: true,
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    /// Marks the filesystem as untrackable, so pointers into it degrade to
    /// identity pointers.
    pub fn untracked(mut self) -> Self {
        self.trackable = false;
        self
    }

    fn key(&self, path: &str) -> String {
        if self.case_sensitive {
            path.to_string()
        } else {
            path.chars().map(|c| fold_char(c, false)).collect()
        }
    }

    fn normalize(&self, path: &str) -> Result<String> {
        normalize_path(path, DEFAULT_ARCHIVE_SEPARATOR)
    }

    /// Creates a regular file, creating missing parent directories.
    pub fn create_file(&self, path: &str) -> Result<FileId> {
        self.create(path, false)
    }

    /// Creates a directory, creating missing parent directories.
    pub fn create_dir(&self, path: &str) -> Result<FileId> {
        self.create(path, true)
    }

    fn create(&self, path: &str, is_dir: bool) -> Result<FileId> {
        let path = self.normalize(path)?;
        let mut state = self.state.write();
        if state.by_key.contains_key(&self.key(&path)) {
            return Err(PointerError::PathExists(path));
        }
        self.ensure_parents(&mut state, &path);
        Ok(self.insert(&mut state, path, is_dir))
    }

    fn ensure_parents(&self, state: &mut MemoryState, path: &str) {
        let mut missing = Vec::new();
        let mut current = enclosing_path(path, DEFAULT_ARCHIVE_SEPARATOR);
        while let Some(parent) = current {
            if state.by_key.contains_key(&self.key(parent)) {
                break;
            }
            missing.push(parent.to_string());
            current = enclosing_path(parent, DEFAULT_ARCHIVE_SEPARATOR);
        }
        for parent in missing.into_iter().rev() {
            self.insert(state, parent, true);
        }
    }

    fn insert(&self, state: &mut MemoryState, path: String, is_dir: bool) -> FileId {
        state.next_id += 1;
        let id = FileId(state.next_id);
        state.by_key.insert(self.key(&path), id);
        state.entries.insert(id, MemoryEntry { path, is_dir });
        id
    }

    /// Collects `(id, path)` for `path` and everything below it.
    fn subtree(&self, state: &MemoryState, path: &str) -> Vec<(FileId, String)> {
        let mut found: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, entry)| {
                is_ancestor_or_self(
                    path,
                    &entry.path,
                    self.case_sensitive,
                    DEFAULT_ARCHIVE_SEPARATOR,
                )
            })
            .map(|(id, entry)| (*id, entry.path.clone()))
            .collect();
        found.sort_by(|a, b| a.1.cmp(&b.1));
        found
    }

    /// Deletes a path and everything below it, returning the number of
    /// removed entries.
    pub fn delete(&self, path: &str) -> Result<usize> {
        let path = self.normalize(path)?;
        let mut state = self.state.write();
        if !state.by_key.contains_key(&self.key(&path)) {
            return Err(PointerError::PathNotFound(path));
        }
        let doomed = self.subtree(&state, &path);
        for (id, entry_path) in &doomed {
            state.by_key.remove(&self.key(entry_path));
            state.entries.remove(id);
        }
        Ok(doomed.len())
    }

    /// Moves a path and everything below it, keeping file identities.
    pub fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let from = self.normalize(from)?;
        let to = self.normalize(to)?;
        let mut state = self.state.write();
        if !state.by_key.contains_key(&self.key(&from)) {
            return Err(PointerError::PathNotFound(from));
        }
        // A case-only rename maps onto its own key.
        if self.key(&to) != self.key(&from) && state.by_key.contains_key(&self.key(&to)) {
            return Err(PointerError::PathExists(to));
        }
        self.ensure_parents(&mut state, &to);
        for (id, old_path) in self.subtree(&state, &from) {
            let suffix = strip_prefix_folded(&old_path, &from, self.case_sensitive).unwrap_or("");
            let new_path = format!("{to}{suffix}");
            state.by_key.remove(&self.key(&old_path));
            state.by_key.insert(self.key(&new_path), id);
            if let Some(entry) = state.entries.get_mut(&id) {
                entry.path = new_path;
            }
        }
        Ok(())
    }

    /// Renames the last segment of a path.
    pub fn rename(&self, path: &str, new_name: &str) -> Result<()> {
        let normalized = self.normalize(path)?;
        let parent = parent_path(&normalized, DEFAULT_ARCHIVE_SEPARATOR)
            .ok_or_else(|| PointerError::PathNotFound(normalized.clone()))?;
        let target = child_path(parent, new_name);
        self.move_path(&normalized, &target)
    }

    /// Copies a path and everything below it under fresh identities.
    pub fn copy(&self, from: &str, to: &str) -> Result<FileId> {
        let from = self.normalize(from)?;
        let to = self.normalize(to)?;
        let mut state = self.state.write();
        let Some(&source) = state.by_key.get(&self.key(&from)) else {
            return Err(PointerError::PathNotFound(from));
        };
        if state.by_key.contains_key(&self.key(&to)) {
            return Err(PointerError::PathExists(to));
        }
        self.ensure_parents(&mut state, &to);
        let mut root_copy = None;
        for (id, old_path) in self.subtree(&state, &from) {
            let suffix = strip_prefix_folded(&old_path, &from, self.case_sensitive).unwrap_or("");
            let is_dir = state.entries.get(&id).is_some_and(|entry| entry.is_dir);
            let copied = self.insert(&mut state, format!("{to}{suffix}"), is_dir);
            if id == source {
                root_copy = Some(copied);
            }
        }
        root_copy.ok_or(PointerError::PathNotFound(from))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.normalize(path)
            .is_ok_and(|path| self.state.read().by_key.contains_key(&self.key(&path)))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let Some(id) = self.normalize(path).ok().and_then(|path| self.find_file(&path)) else {
            return false;
        };
        self.state
            .read()
            .entries
            .get(&id)
            .is_some_and(|entry| entry.is_dir)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl FileSystem for MemoryFileSystem {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn is_trackable(&self) -> bool {
        self.trackable
    }

    fn find_file(&self, path: &str) -> Option<FileId> {
        self.state.read().by_key.get(&self.key(path)).copied()
    }

    fn path_of(&self, file: FileId) -> Option<String> {
        self.state
            .read()
            .entries
            .get(&file)
            .map(|entry| entry.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_parents() {
        let fs = MemoryFileSystem::new("file");
        let file = fs.create_file("/a/b/c.txt").unwrap();
        assert!(fs.is_dir("/a"));
        assert!(fs.is_dir("/a/b"));
        assert!(!fs.is_dir("/a/b/c.txt"));
        assert_eq!(fs.find_file("/a/b/c.txt"), Some(file));
        assert_eq!(fs.len(), 4); // "/", "/a", "/a/b", "/a/b/c.txt"
        assert!(matches!(
            fs.create_file("/a/b/c.txt"),
            Err(PointerError::PathExists(_))
        ));
    }

    #[test]
    fn delete_is_recursive() {
        let fs = MemoryFileSystem::new("file");
        fs.create_file("/a/b/c").unwrap();
        fs.create_file("/a/bc").unwrap();
        assert_eq!(fs.delete("/a/b").unwrap(), 2);
        assert!(!fs.exists("/a/b/c"));
        assert!(fs.exists("/a/bc"));
        assert!(matches!(fs.delete("/a/b"), Err(PointerError::PathNotFound(_))));
    }

    #[test]
    fn move_keeps_identity() {
        let fs = MemoryFileSystem::new("file");
        let file = fs.create_file("/a/b").unwrap();
        fs.move_path("/a", "/z").unwrap();
        assert_eq!(fs.find_file("/z/b"), Some(file));
        assert_eq!(fs.path_of(file).as_deref(), Some("/z/b"));
        assert!(!fs.exists("/a/b"));
    }

    #[test]
    fn move_onto_existing_fails() {
        let fs = MemoryFileSystem::new("file");
        fs.create_file("/a").unwrap();
        fs.create_file("/b").unwrap();
        assert!(matches!(fs.move_path("/b", "/a"), Err(PointerError::PathExists(_))));
    }

    #[test]
    fn rename_moves_to_sibling() {
        let fs = MemoryFileSystem::new("file");
        let file = fs.create_file("/dir/old.txt").unwrap();
        fs.rename("/dir/old.txt", "new.txt").unwrap();
        assert_eq!(fs.path_of(file).as_deref(), Some("/dir/new.txt"));
    }

    #[test]
    fn copy_allocates_new_identities() {
        let fs = MemoryFileSystem::new("file");
        let original = fs.create_file("/src/x").unwrap();
        let copied_root = fs.copy("/src", "/dst").unwrap();
        let copied = fs.find_file("/dst/x").unwrap();
        assert_ne!(copied, original);
        assert_eq!(fs.find_file("/dst"), Some(copied_root));
        assert_eq!(fs.find_file("/src/x"), Some(original));
    }

    #[test]
    fn archive_entries_create_their_archive() {
        let fs = MemoryFileSystem::new("file");
        fs.create_file("/lib/a.jar!/x/Y.class").unwrap();
        assert!(fs.exists("/lib/a.jar"));
        assert!(fs.exists("/lib/a.jar!/"));
        assert_eq!(fs.delete("/lib/a.jar").unwrap(), 4);
        assert!(fs.exists("/lib"));
    }

    #[test]
    fn case_only_rename_on_case_insensitive_fs() {
        let fs = MemoryFileSystem::new("file").case_insensitive();
        let file = fs.create_file("/Readme.md").unwrap();
        fs.move_path("/Readme.md", "/README.md").unwrap();
        assert_eq!(fs.path_of(file).as_deref(), Some("/README.md"));
        assert_eq!(fs.find_file("/readme.md"), Some(file));
    }

    #[test]
    fn case_insensitive_lookup() {
        let fs = MemoryFileSystem::new("file").case_insensitive();
        let file = fs.create_file("/Docs/Readme.md").unwrap();
        assert_eq!(fs.find_file("/docs/readme.md"), Some(file));
        assert_eq!(fs.path_of(file).as_deref(), Some("/Docs/Readme.md"));
        assert!(!fs.is_case_sensitive());
    }
}
