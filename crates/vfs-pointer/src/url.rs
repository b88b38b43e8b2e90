//! URL splitting and path normalization.
//!
//! A pointer URL has the shape `<protocol>://<path>`. Paths use `/` as the
//! separator; an archive separator (by default `!/`) marks the boundary
//! between an archive file and its contents, e.g. `jar:///lib/a.jar!/x/Y`.

use crate::error::{PointerError, Result};

/// Separator between an archive file and the entries inside it.
pub const DEFAULT_ARCHIVE_SEPARATOR: &str = "!/";

/// Splits a URL into protocol and raw path.
pub fn split_url(url: &str) -> Result<(&str, &str)> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(PointerError::InvalidUrl("empty URL".to_string()));
    }
    let Some((protocol, path)) = trimmed.split_once("://") else {
        return Err(PointerError::InvalidUrl(format!("{url}: missing ://")));
    };
    if protocol.is_empty()
        || !protocol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(PointerError::InvalidUrl(format!("{url}: bad protocol")));
    }
    if path.is_empty() {
        return Err(PointerError::InvalidUrl(format!("{url}: empty path")));
    }
    Ok((protocol, path))
}

/// Splits and normalizes a URL, returning `(protocol, normalized path)`.
pub fn parse_url(url: &str, archive_separator: &str) -> Result<(String, String)> {
    let (protocol, raw_path) = split_url(url)?;
    let path = normalize_path(raw_path, archive_separator)?;
    Ok((protocol.to_ascii_lowercase(), path))
}

/// Builds a URL from a protocol and an already normalized path.
pub fn to_url(protocol: &str, path: &str) -> String {
    format!("{protocol}://{path}")
}

/// Normalizes a path: forward slashes, no repeated separators, no `.`
/// segments, `..` resolved, no trailing slash except for `/`, a drive root
/// or an archive root.
pub fn normalize_path(raw: &str, archive_separator: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    if unified.trim().is_empty() {
        return Err(PointerError::InvalidUrl(format!("{raw:?}: empty path")));
    }

    let absolute = unified.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(unified.len());
    if absolute {
        normalized.push('/');
    }
    normalized.push_str(&segments.join("/"));

    if unified.ends_with('/') && !normalized.ends_with('/') {
        let with_slash = format!("{normalized}/");
        if with_slash.ends_with(archive_separator) || looks_like_windows_drive_root(&with_slash)
        {
            normalized = with_slash;
        }
    } else if !absolute && segments.len() == 1 && looks_like_windows_drive_root(&format!("{normalized}/")) {
        normalized.push('/');
    }

    if normalized.is_empty() {
        return Err(PointerError::InvalidUrl(format!("{raw:?}: empty path")));
    }
    Ok(normalized)
}

fn looks_like_windows_drive_root(path: &str) -> bool {
    path.len() == 3
        && path.as_bytes()[1] == b':'
        && path.as_bytes()[2] == b'/'
        && path.as_bytes()[0].is_ascii_alphabetic()
}

/// Folds a character for comparison under the given case rule.
#[inline]
pub(crate) fn fold_char(c: char, case_sensitive: bool) -> char {
    if case_sensitive {
        c
    } else if c.is_ascii() {
        c.to_ascii_lowercase()
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}

/// Strips `prefix` from `s` under the case rule, returning the rest of `s`.
pub(crate) fn strip_prefix_folded<'a>(
    s: &'a str,
    prefix: &str,
    case_sensitive: bool,
) -> Option<&'a str> {
    if case_sensitive {
        return s.strip_prefix(prefix);
    }
    let mut rest = s.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = rest.next()?;
        if fold_char(actual, false) != fold_char(expected, false) {
            return None;
        }
    }
    let consumed = rest.next().map_or(s.len(), |(offset, _)| offset);
    Some(&s[consumed..])
}

/// Compares two normalized paths under the case rule.
pub fn paths_equal(a: &str, b: &str, case_sensitive: bool) -> bool {
    strip_prefix_folded(a, b, case_sensitive).is_some_and(str::is_empty)
}

/// Returns true if `path` equals `ancestor` or lies below it.
///
/// Matching respects segment boundaries: `/a/b` is not an ancestor of
/// `/a/bc`, but `/lib/a.jar` is an ancestor of `/lib/a.jar!/x`.
pub fn is_ancestor_or_self(
    ancestor: &str,
    path: &str,
    case_sensitive: bool,
    archive_separator: &str,
) -> bool {
    let Some(rest) = strip_prefix_folded(path, ancestor, case_sensitive) else {
        return false;
    };
    rest.is_empty()
        || ancestor.ends_with('/')
        || ancestor.ends_with(archive_separator)
        || rest.starts_with('/')
        || rest.starts_with(archive_separator)
}

/// Returns the parent of a normalized path, or `None` for a root.
pub fn parent_path<'a>(path: &'a str, archive_separator: &str) -> Option<&'a str> {
    if path == "/" || path.ends_with(archive_separator) || looks_like_windows_drive_root(path) {
        return None;
    }
    let split = path.rfind('/')?;
    let with_slash = &path[..=split];
    if split == 0 || with_slash.ends_with(archive_separator) || looks_like_windows_drive_root(with_slash)
    {
        Some(with_slash)
    } else {
        Some(&path[..split])
    }
}

/// Like [`parent_path`], but steps from an archive root to the archive
/// file itself, so `/lib/a.jar!/` encloses to `/lib/a.jar`.
pub fn enclosing_path<'a>(path: &'a str, archive_separator: &str) -> Option<&'a str> {
    parent_path(path, archive_separator).or_else(|| {
        path.strip_suffix(archive_separator)
            .filter(|archive| !archive.is_empty())
    })
}

/// Joins a child name onto a normalized parent path.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns the last segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: &str = DEFAULT_ARCHIVE_SEPARATOR;

    #[test]
    fn split_url_requires_protocol() {
        assert_eq!(split_url("file:///a/b").unwrap(), ("file", "/a/b"));
        assert_eq!(split_url("jar:///a.jar!/x").unwrap(), ("jar", "/a.jar!/x"));
        assert!(matches!(split_url(""), Err(PointerError::InvalidUrl(_))));
        assert!(matches!(split_url("/a/b"), Err(PointerError::InvalidUrl(_))));
        assert!(matches!(split_url("://a"), Err(PointerError::InvalidUrl(_))));
        assert!(matches!(split_url("fi le:///a"), Err(PointerError::InvalidUrl(_))));
        assert!(matches!(split_url("file://"), Err(PointerError::InvalidUrl(_))));
    }

    #[test]
    fn normalize_collapses_and_trims() {
        assert_eq!(normalize_path("/a//b/", SEP).unwrap(), "/a/b");
        assert_eq!(normalize_path("/a/./b/../c", SEP).unwrap(), "/a/c");
        assert_eq!(normalize_path("\\a\\b", SEP).unwrap(), "/a/b");
        assert_eq!(normalize_path("/", SEP).unwrap(), "/");
        assert_eq!(normalize_path("//", SEP).unwrap(), "/");
        assert_eq!(normalize_path("/../..", SEP).unwrap(), "/");
        assert!(normalize_path("", SEP).is_err());
    }

    #[test]
    fn normalize_keeps_archive_and_drive_roots() {
        assert_eq!(normalize_path("/lib/a.jar!/", SEP).unwrap(), "/lib/a.jar!/");
        assert_eq!(normalize_path("/lib/a.jar!/x/", SEP).unwrap(), "/lib/a.jar!/x");
        assert_eq!(normalize_path("C:/", SEP).unwrap(), "C:/");
        assert_eq!(normalize_path("C:", SEP).unwrap(), "C:/");
        assert_eq!(normalize_path("C:\\Users\\", SEP).unwrap(), "C:/Users");
    }

    #[test]
    fn parse_url_lowercases_protocol() {
        let (protocol, path) = parse_url("FILE:///a//b", SEP).unwrap();
        assert_eq!(protocol, "file");
        assert_eq!(path, "/a/b");
        assert_eq!(to_url(&protocol, &path), "file:///a/b");
    }

    #[test]
    fn ancestor_respects_segment_boundaries() {
        assert!(is_ancestor_or_self("/a/b", "/a/b", true, SEP));
        assert!(is_ancestor_or_self("/a/b", "/a/b/c", true, SEP));
        assert!(!is_ancestor_or_self("/a/b", "/a/bc", true, SEP));
        assert!(!is_ancestor_or_self("/a/b/c", "/a/b", true, SEP));
        assert!(is_ancestor_or_self("/", "/anything", true, SEP));
        assert!(is_ancestor_or_self("/lib/a.jar", "/lib/a.jar!/x", true, SEP));
        assert!(is_ancestor_or_self("/lib/a.jar!/", "/lib/a.jar!/x", true, SEP));
    }

    #[test]
    fn ancestor_case_rule() {
        assert!(!is_ancestor_or_self("/A", "/a/b", true, SEP));
        assert!(is_ancestor_or_self("/A", "/a/b", false, SEP));
        assert!(paths_equal("/Straße", "/straße", false));
        assert!(!paths_equal("/a", "/ab", false));
        assert!(!paths_equal("/ab", "/a", false));
    }

    #[test]
    fn parent_and_child_paths() {
        assert_eq!(parent_path("/a/b", SEP), Some("/a"));
        assert_eq!(parent_path("/a", SEP), Some("/"));
        assert_eq!(parent_path("/", SEP), None);
        assert_eq!(parent_path("/lib/a.jar!/x", SEP), Some("/lib/a.jar!/"));
        assert_eq!(parent_path("/lib/a.jar!/", SEP), None);
        assert_eq!(parent_path("C:/x", SEP), Some("C:/"));
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
        assert_eq!(file_name("/a/b"), "b");
    }

    #[test]
    fn enclosing_path_leaves_archive_roots() {
        assert_eq!(enclosing_path("/lib/a.jar!/x", SEP), Some("/lib/a.jar!/"));
        assert_eq!(enclosing_path("/lib/a.jar!/", SEP), Some("/lib/a.jar"));
        assert_eq!(enclosing_path("/lib/a.jar", SEP), Some("/lib"));
        assert_eq!(enclosing_path("/", SEP), None);
    }
}
