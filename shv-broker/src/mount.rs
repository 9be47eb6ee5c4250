//! The mount table: maps SHV path prefixes to the peer exposing that
//! subtree, sorted and binary-searchable by path.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    /// A mount already exists at this exact path.
    Exists,
    /// The candidate path is a prefix of an existing mount, or an existing
    /// mount is a prefix of it; either would make path-stripping ambiguous.
    Invalid,
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => write!(f, "MntExists"),
            Self::Invalid => write!(f, "MntInvalid"),
        }
    }
}

impl std::error::Error for MountError {}

#[derive(Debug, Clone)]
struct Mount {
    path: String,
    cid: i64,
}

/// Mount points sorted by path, so lookup-by-prefix is a binary search plus
/// a linear backward scan for path components.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

fn is_prefix_path(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a mount point for `cid` at `path`. Fails if `path` already
    /// has a mount, or is a prefix/extension of one (ancestor/descendant
    /// paths can never both be mount roots without making forwarding
    /// ambiguous).
    pub fn insert(&mut self, path: &str, cid: i64) -> Result<(), MountError> {
        for m in &self.mounts {
            if m.path == path {
                return Err(MountError::Exists);
            }
            if is_prefix_path(&m.path, path) || is_prefix_path(path, &m.path) {
                return Err(MountError::Invalid);
            }
        }
        let idx = self.mounts.partition_point(|m| m.path.as_str() < path);
        self.mounts.insert(idx, Mount { path: path.to_string(), cid });
        Ok(())
    }

    pub fn remove_cid(&mut self, cid: i64) {
        self.mounts.retain(|m| m.cid != cid);
    }

    /// Finds the mount whose path is a prefix of `path`, returning
    /// `(mount_path, cid, relative_path)`.
    pub fn lookup<'a>(&self, path: &'a str) -> Option<(&str, i64, &'a str)> {
        self.mounts
            .iter()
            .filter(|m| is_prefix_path(&m.path, path))
            .max_by_key(|m| m.path.len())
            .map(|m| {
                let rest = path.strip_prefix(&m.path).unwrap_or(path).trim_start_matches('/');
                (m.path.as_str(), m.cid, rest)
            })
    }

    pub fn path_of(&self, cid: i64) -> Option<&str> {
        self.mounts.iter().find(|m| m.cid == cid).map(|m| m.path.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.mounts.iter().map(|m| (m.path.as_str(), m.cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut t = MountTable::new();
        t.insert("test/device", 3).unwrap();
        let (mount_path, cid, rel) = t.lookup("test/device/status").unwrap();
        assert_eq!(mount_path, "test/device");
        assert_eq!(cid, 3);
        assert_eq!(rel, "status");
    }

    #[test]
    fn exact_mount_path_has_empty_relative() {
        let mut t = MountTable::new();
        t.insert("test/device", 3).unwrap();
        let (_, _, rel) = t.lookup("test/device").unwrap();
        assert_eq!(rel, "");
    }

    #[test]
    fn duplicate_mount_rejected() {
        let mut t = MountTable::new();
        t.insert("a/b", 1).unwrap();
        assert_eq!(t.insert("a/b", 2), Err(MountError::Exists));
    }

    #[test]
    fn prefix_or_extension_mount_rejected() {
        let mut t = MountTable::new();
        t.insert("a/b", 1).unwrap();
        assert_eq!(t.insert("a/b/c", 2), Err(MountError::Invalid));
        assert_eq!(t.insert("a", 2), Err(MountError::Invalid));
    }

    #[test]
    fn unrelated_path_does_not_match() {
        let mut t = MountTable::new();
        t.insert("test/device", 3).unwrap();
        assert!(t.lookup("other/path").is_none());
        assert!(t.lookup("test/devicex").is_none());
    }

    #[test]
    fn remove_cid_drops_its_mounts() {
        let mut t = MountTable::new();
        t.insert("a/b", 1).unwrap();
        t.remove_cid(1);
        assert!(t.lookup("a/b").is_none());
        t.insert("a/b", 2).unwrap();
    }
}
