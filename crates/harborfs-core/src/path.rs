//! Virtual paths and the object keys derived from them.
//!
//! A [`VirtualPath`] is what the filesystem client sees: absolute, `/`-separated,
//! without `.`/`..` components or a trailing slash. An [`ObjectKey`] is the same
//! path with the leading slash removed. The root has no key; it only exists as
//! the empty listing prefix.

use std::fmt;

use crate::error::{HarborError, HarborResult};

/// Zero-length object that keeps an otherwise empty directory alive.
pub const DIR_MARKER: &str = ".harborfs-dir";

/// Suffix of the object holding a symlink target.
pub const SYMLINK_SUFFIX: &str = ".harborfs-link";

/// Key separator used by the remote store.
pub const SEPARATOR: char = '/';

/// Normalized absolute path as seen by the filesystem client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// The root directory.
    pub fn root() -> Self {
        VirtualPath("/".to_string())
    }

    /// Parses and normalizes a client path.
    ///
    /// Repeated separators, `.` components and a trailing slash are dropped.
    /// Relative paths and `..` components are rejected.
    pub fn parse(raw: &str) -> HarborResult<Self> {
        if !raw.starts_with(SEPARATOR) {
            return Err(HarborError::InvalidPath(raw.to_string()));
        }
        let mut normalized = String::with_capacity(raw.len());
        for segment in raw.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => return Err(HarborError::InvalidPath(raw.to_string())),
                name => {
                    normalized.push(SEPARATOR);
                    normalized.push_str(name);
                }
            }
        }
        if normalized.is_empty() {
            return Ok(Self::root());
        }
        Ok(VirtualPath(normalized))
    }

    /// Rebuilds the path an object key was derived from.
    pub fn from_key(key: &ObjectKey) -> Self {
        VirtualPath(format!("{SEPARATOR}{}", key.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Returns the parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(VirtualPath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Final component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit(SEPARATOR).next()
    }

    /// Appends a single component.
    pub fn join(&self, name: &str) -> HarborResult<VirtualPath> {
        if name.is_empty() || name == "." || name == ".." || name.contains(SEPARATOR) {
            return Err(HarborError::InvalidPath(format!("{}/{name}", self.0)));
        }
        if self.is_root() {
            Ok(VirtualPath(format!("{SEPARATOR}{name}")))
        } else {
            Ok(VirtualPath(format!("{}{SEPARATOR}{name}", self.0)))
        }
    }

    /// Returns true if `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &VirtualPath) -> bool {
        if ancestor.is_root() || self == ancestor {
            return true;
        }
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    /// Moves `self` from under `from` to under `to`.
    ///
    /// Returns `None` if `self` is not within `from`.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Option<VirtualPath> {
        if !self.is_within(from) {
            return None;
        }
        if self == from {
            return Some(to.clone());
        }
        let rest = if from.is_root() {
            &self.0[1..]
        } else {
            &self.0[from.0.len() + 1..]
        };
        to.join_relative(rest)
    }

    fn join_relative(&self, rest: &str) -> Option<VirtualPath> {
        if rest.is_empty() {
            return Some(self.clone());
        }
        if self.is_root() {
            Some(VirtualPath(format!("{SEPARATOR}{rest}")))
        } else {
            Some(VirtualPath(format!("{}{SEPARATOR}{rest}", self.0)))
        }
    }

    /// Object key for this path, or `None` for the root.
    pub fn object_key(&self) -> Option<ObjectKey> {
        if self.is_root() {
            None
        } else {
            Some(ObjectKey(self.0[1..].to_string()))
        }
    }

    /// Prefix under which this path's children are stored.
    ///
    /// Empty for the root, `a/b/` for `/a/b`.
    pub fn listing_prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}{SEPARATOR}", &self.0[1..])
        }
    }

    /// Returns true if the final component collides with a key reserved for
    /// directory markers or symlink bodies.
    pub fn is_reserved(&self) -> bool {
        self.file_name()
            .is_some_and(|name| name == DIR_MARKER || name.ends_with(SYMLINK_SUFFIX))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Addressing key in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Wraps a key as returned by the store.
    pub fn new(key: impl Into<String>) -> Self {
        ObjectKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the object holding the symlink target for this path.
    pub fn symlink_key(&self) -> ObjectKey {
        ObjectKey(format!("{}{SYMLINK_SUFFIX}", self.0))
    }

    /// Key of the marker object that materializes this path as a directory.
    pub fn marker_key(&self) -> ObjectKey {
        ObjectKey(format!("{}{SEPARATOR}{DIR_MARKER}", self.0))
    }

    /// Children prefix (`key/`).
    pub fn dir_prefix(&self) -> String {
        format!("{}{SEPARATOR}", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(VirtualPath::parse("/").unwrap(), VirtualPath::root());
        assert_eq!(VirtualPath::parse("//").unwrap(), VirtualPath::root());
        assert_eq!(VirtualPath::parse("/a/b/").unwrap().as_str(), "/a/b");
        assert_eq!(VirtualPath::parse("/a//./b").unwrap().as_str(), "/a/b");
    }

    #[test]
    fn test_parse_rejects() {
        assert!(VirtualPath::parse("a/b").is_err());
        assert!(VirtualPath::parse("").is_err());
        assert!(VirtualPath::parse("/a/../b").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        let p = VirtualPath::parse("/a/b/c.txt").unwrap();
        assert_eq!(p.file_name(), Some("c.txt"));
        assert_eq!(p.parent().unwrap().as_str(), "/a/b");
        assert_eq!(
            VirtualPath::parse("/a").unwrap().parent(),
            Some(VirtualPath::root())
        );
        assert_eq!(VirtualPath::root().parent(), None);
        assert_eq!(VirtualPath::root().file_name(), None);
    }

    #[test]
    fn test_join() {
        let root = VirtualPath::root();
        let a = root.join("a").unwrap();
        assert_eq!(a.as_str(), "/a");
        assert_eq!(a.join("b").unwrap().as_str(), "/a/b");
        assert!(a.join("x/y").is_err());
        assert!(a.join("..").is_err());
        assert!(a.join("").is_err());
    }

    #[test]
    fn test_keys() {
        let p = VirtualPath::parse("/a/b.txt").unwrap();
        let key = p.object_key().unwrap();
        assert_eq!(key.as_str(), "a/b.txt");
        assert_eq!(VirtualPath::from_key(&key), p);
        assert_eq!(key.symlink_key().as_str(), "a/b.txt.harborfs-link");
        assert_eq!(key.marker_key().as_str(), "a/b.txt/.harborfs-dir");
        assert!(VirtualPath::root().object_key().is_none());
    }

    #[test]
    fn test_listing_prefix() {
        assert_eq!(VirtualPath::root().listing_prefix(), "");
        assert_eq!(VirtualPath::parse("/a/c").unwrap().listing_prefix(), "a/c/");
    }

    #[test]
    fn test_is_within_is_segment_aware() {
        let a = VirtualPath::parse("/a").unwrap();
        assert!(VirtualPath::parse("/a/b").unwrap().is_within(&a));
        assert!(a.is_within(&a));
        assert!(!VirtualPath::parse("/ab").unwrap().is_within(&a));
        assert!(a.is_within(&VirtualPath::root()));
    }

    #[test]
    fn test_rebase() {
        let from = VirtualPath::parse("/a").unwrap();
        let to = VirtualPath::parse("/x/y").unwrap();
        let p = VirtualPath::parse("/a/b/c").unwrap();
        assert_eq!(p.rebase(&from, &to).unwrap().as_str(), "/x/y/b/c");
        assert_eq!(from.rebase(&from, &to).unwrap(), to);
        assert!(VirtualPath::parse("/ab").unwrap().rebase(&from, &to).is_none());
    }

    #[test]
    fn test_reserved_names() {
        assert!(VirtualPath::parse("/d/.harborfs-dir").unwrap().is_reserved());
        assert!(VirtualPath::parse("/l.harborfs-link").unwrap().is_reserved());
        assert!(!VirtualPath::parse("/plain").unwrap().is_reserved());
    }
}
