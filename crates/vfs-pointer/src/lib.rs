//! Virtual file pointer index.
//!
//! This crate tracks long-lived, path-addressed handles to files that may
//! not exist yet and may be renamed, moved or deleted:
//! - Compressed path prefix trees per listener and filesystem
//! - Usage-counted pointers with merge-on-collision after moves
//! - A two-phase before/after protocol for batched filesystem events
//! - Identity pointers for filesystems that cannot be tracked
//! - Scopes and containers for explicit lifetime management

pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod fs;
mod identity;
pub mod index;
pub mod listener;
pub mod memory;
pub mod pointer;
pub mod scope;
pub mod storage;
pub mod tree;
pub mod types;
pub mod url;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::IndexConfig;
pub use container::PointerContainer;
pub use error::{PointerError, Result};
pub use events::{FileEvent, Property};
pub use fs::{FileId, FileSystem, FileSystemRegistry};
pub use index::PointerIndex;
pub use listener::{ListenerId, PointerListener};
pub use memory::MemoryFileSystem;
pub use pointer::{FilePointer, PointerFlags};
pub use scope::Scope;
pub use types::IndexStats;
