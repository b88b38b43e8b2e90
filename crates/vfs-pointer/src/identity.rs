//! Identity pointers.
//!
//! Pointers into filesystems the index cannot track (or does not know) are
//! plain values: resolved once at creation and never updated. They are
//! cached by URL so that asking twice yields the same object.

use std::sync::Arc;

use crate::fs::FileId;

#[derive(Debug)]
pub(crate) struct IdentityPointer {
    pub url: String,
    pub protocol: String,
    pub path: String,
    pub file: Option<FileId>,
}

#[derive(Debug)]
pub(crate) struct IdentityEntry {
    pub pointer: Arc<IdentityPointer>,
    pub usage: u32,
    pub origin: Arc<str>,
    pub seq: u64,
}
