//! Shared fixtures for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::fs::FileSystemRegistry;
use crate::index::PointerIndex;
use crate::listener::PointerListener;
use crate::memory::MemoryFileSystem;
use crate::pointer::FilePointer;

/// An index over one case-sensitive in-memory `file` filesystem, with
/// structure checks after every batch.
pub(crate) fn memory_index() -> (PointerIndex, Arc<MemoryFileSystem>) {
    let fs = Arc::new(MemoryFileSystem::new("file"));
    let registry = FileSystemRegistry::new().with(fs.clone());
    let index = PointerIndex::new(registry, IndexConfig::default().with_debug_checks(true))
        .expect("default config is valid");
    (index, fs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notification {
    pub phase: &'static str,
    /// Sorted URLs of the reported pointers.
    pub urls: Vec<String>,
    /// How many of them were valid when the callback ran.
    pub valid: usize,
}

/// Records every callback, querying the pointers while handling it.
#[derive(Debug, Default)]
pub(crate) struct RecordingListener {
    calls: Mutex<Vec<Notification>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Notification> {
        self.calls.lock().clone()
    }

    fn record(&self, phase: &'static str, pointers: &[FilePointer]) {
        let mut urls: Vec<String> = pointers
            .iter()
            .map(|pointer| pointer.url().unwrap_or_default())
            .collect();
        urls.sort();
        let valid = pointers
            .iter()
            .filter(|pointer| pointer.is_valid().unwrap_or(false))
            .count();
        self.calls.lock().push(Notification { phase, urls, valid });
    }
}

impl PointerListener for RecordingListener {
    fn before_validity_changed(&self, pointers: &[FilePointer]) {
        self.record("before", pointers);
    }

    fn validity_changed(&self, pointers: &[FilePointer]) {
        self.record("after", pointers);
    }
}
