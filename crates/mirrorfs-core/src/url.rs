//! Root URL normalization.
//!
//! A root is keyed by `protocol://path` where the path has been normalized:
//! backslashes become slashes, empty and `.` segments vanish, `..` pops the
//! previous segment and the trailing slash is stripped. `/` itself and the
//! archive separator `!/` keep theirs. Case-insensitive delegates get a
//! lowercased path so that two spellings of one directory share a root.
//!
//! Normalization is idempotent.

use std::fmt;

/// Separator between an archive's local path and the entry inside it.
pub const ARCHIVE_SEPARATOR: &str = "!/";

/// Splits `archive.zip!/dir/entry` into `("archive.zip", "dir/entry")`.
pub fn split_archive_path(path: &str) -> Option<(&str, &str)> {
    path.split_once(ARCHIVE_SEPARATOR)
}

/// Normalizes a delegate path.
pub fn normalize_path(path: &str, case_sensitive: bool) -> String {
    let path = path.replace('\\', "/");
    let mut normalized = match split_archive_path(&path) {
        Some((local, entry)) => {
            let mut out = normalize_segments(local);
            out.push_str(ARCHIVE_SEPARATOR);
            out.push_str(normalize_segments(entry).trim_start_matches('/'));
            out
        }
        None => normalize_segments(&path),
    };
    if !case_sensitive {
        normalized = normalized.to_lowercase();
    }
    normalized
}

fn normalize_segments(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                // Cannot climb above an absolute root.
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// A normalized root URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootUrl {
    protocol: String,
    path: String,
}

impl RootUrl {
    /// Builds a URL, normalizing `path` by the delegate's case rule.
    pub fn new(protocol: &str, path: &str, case_sensitive: bool) -> Self {
        Self {
            protocol: protocol.to_string(),
            path: normalize_path(path, case_sensitive),
        }
    }

    /// Splits `protocol://path` without normalizing.
    pub fn split(url: &str) -> Option<(&str, &str)> {
        url.split_once("://")
    }

    /// Protocol part.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Normalized path part.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True for archive roots (`...!/`).
    pub fn is_archive(&self) -> bool {
        self.path.ends_with(ARCHIVE_SEPARATOR)
    }
}

impl fmt::Display for RootUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.path)
    }
}
