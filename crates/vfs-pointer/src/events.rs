//! File change events and their reduction to index work.
//!
//! The index does not watch anything itself. Whoever observes the filesystem
//! calls `before` with a batch of [`FileEvent`]s while the old state is
//! still visible, applies the change, and then calls `after` with the same
//! batch.

use std::collections::BTreeMap;

use fnv::FnvHashSet;

use crate::error::Result;
use crate::url::{child_path, enclosing_path, parent_path, parse_url};

/// The property touched by a [`FileEvent::PropertyChanged`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// The file was renamed in place; carries the new last segment.
    Name(String),
    /// Any other property (permissions, timestamps). Pointers ignore these.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Create { url: String },
    Delete { url: String },
    Copy { from: String, to: String },
    Move { from: String, to: String },
    PropertyChanged { url: String, property: Property },
}

impl FileEvent {
    pub fn create(url: impl Into<String>) -> Self {
        Self::Create { url: url.into() }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::Delete { url: url.into() }
    }

    pub fn copy(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Copy {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn moved(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Move {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn rename(url: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::PropertyChanged {
            url: url.into(),
            property: Property::Name(new_name.into()),
        }
    }

    pub fn property_changed(url: impl Into<String>, property: impl Into<String>) -> Self {
        Self::PropertyChanged {
            url: url.into(),
            property: Property::Other(property.into()),
        }
    }
}

/// A normalized path on a given filesystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EventPath {
    pub protocol: String,
    pub path: String,
}

/// A subtree moving from one path to another within one filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relocation {
    pub protocol: String,
    pub from: String,
    pub to: String,
}

/// What an event batch means for pointers.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BatchChanges {
    /// Subtrees whose pointers may flip validity.
    pub flips: Vec<EventPath>,
    /// Paths that lose an entry without their own pointers flipping; only
    /// directory pointers above them are affected.
    pub departures: Vec<EventPath>,
    pub relocations: Vec<Relocation>,
}

impl BatchChanges {
    /// Parses every URL of the batch up front, so a bad event rejects the
    /// whole batch before anything is recorded.
    pub fn from_events(events: &[FileEvent], archive_separator: &str) -> Result<Self> {
        let mut flips = Vec::new();
        let mut departures = Vec::new();
        let mut relocations = Vec::new();

        let parse = |url: &str| -> Result<EventPath> {
            let (protocol, path) = parse_url(url, archive_separator)?;
            Ok(EventPath { protocol, path })
        };

        for event in events {
            match event {
                FileEvent::Create { url } | FileEvent::Delete { url } => flips.push(parse(url)?),
                FileEvent::Copy { from, to } => {
                    parse(from)?;
                    flips.push(parse(to)?);
                }
                FileEvent::Move { from, to } => {
                    let from = parse(from)?;
                    let to = parse(to)?;
                    push_move(from, to, &mut flips, &mut departures, &mut relocations);
                }
                FileEvent::PropertyChanged {
                    url,
                    property: Property::Name(new_name),
                } => {
                    let from = parse(url)?;
                    let Some(parent) = parent_path(&from.path, archive_separator) else {
                        log::debug!("rename of root ignored url={url}");
                        continue;
                    };
                    let to = EventPath {
                        protocol: from.protocol.clone(),
                        path: child_path(parent, new_name),
                    };
                    push_move(from, to, &mut flips, &mut departures, &mut relocations);
                }
                FileEvent::PropertyChanged {
                    url,
                    property: Property::Other(_),
                } => {
                    parse(url)?;
                }
            }
        }

        Ok(Self {
            flips: coalesce_event_paths(flips, archive_separator),
            departures: coalesce_event_paths(departures, archive_separator),
            relocations,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.flips.is_empty() && self.departures.is_empty() && self.relocations.is_empty()
    }
}

fn push_move(
    from: EventPath,
    to: EventPath,
    flips: &mut Vec<EventPath>,
    departures: &mut Vec<EventPath>,
    relocations: &mut Vec<Relocation>,
) {
    if from.protocol != to.protocol {
        // Cross-filesystem moves lose identity.
        flips.push(from);
        flips.push(to);
        return;
    }
    relocations.push(Relocation {
        protocol: from.protocol.clone(),
        from: from.path.clone(),
        to: to.path.clone(),
    });
    departures.push(from);
    flips.push(to);
}

/// Reduces event paths to a minimal set where no path is below another.
///
/// Paths on different filesystems never cover each other.
pub(crate) fn coalesce_event_paths(paths: Vec<EventPath>, archive_separator: &str) -> Vec<EventPath> {
    if paths.len() <= 1 {
        return paths;
    }

    let mut by_protocol: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();
    for EventPath { protocol, path } in paths {
        let depth = path_depth(&path);
        by_protocol.entry(protocol).or_default().push((path, depth));
    }

    let mut selected = Vec::new();
    for (protocol, mut candidates) in by_protocol {
        candidates.sort_unstable_by(|(path_a, depth_a), (path_b, depth_b)| {
            depth_a.cmp(depth_b).then_with(|| path_a.cmp(path_b))
        });
        candidates.dedup_by(|(path_a, _), (path_b, _)| path_a == path_b);

        let mut selected_set = FnvHashSet::default();
        for (path, _depth) in candidates {
            if has_selected_ancestor(&path, &selected_set, archive_separator) {
                continue;
            }
            selected_set.insert(path.clone());
            selected.push(EventPath {
                protocol: protocol.clone(),
                path,
            });
        }
    }
    selected
}

#[inline]
fn path_depth(path: &str) -> usize {
    path.bytes().filter(|b| *b == b'/').count()
}

fn has_selected_ancestor(path: &str, selected: &FnvHashSet<String>, archive_separator: &str) -> bool {
    let mut current = enclosing_path(path, archive_separator);
    while let Some(ancestor) = current {
        if selected.contains(ancestor) {
            return true;
        }
        current = enclosing_path(ancestor, archive_separator);
    }
    false
}
