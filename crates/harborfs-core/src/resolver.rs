//! Directory structure synthesized from object key prefixes.
//!
//! The store only knows flat keys. A path `P` is a directory iff some key
//! starts with `P/`; the children of `P` are the distinct first segments after
//! that prefix. Segments with nothing after them are files (or symlinks when
//! they carry the link suffix), segments followed by more key are collapsed
//! into one directory entry.
//!
//! Transport failures propagate. An empty `Vec` is only ever returned for a
//! listing the store confirmed to be empty.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{trace, warn};

use crate::error::HarborResult;
use crate::path::{DIR_MARKER, SEPARATOR, SYMLINK_SUFFIX, VirtualPath};
use crate::remote::{BoundedRemote, ObjectEntry};

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    /// Directories shadow symlinks, which shadow plain files of the same name.
    fn precedence(self) -> u8 {
        match self {
            EntryKind::File => 0,
            EntryKind::Symlink => 1,
            EntryKind::Directory => 2,
        }
    }
}

/// One child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Children of one prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Children sorted by name.
    pub entries: Vec<DirEntry>,
    /// True if any key lives under the prefix, including directory markers.
    pub materialized: bool,
}

/// How a path maps onto the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    File(ObjectEntry),
    Directory,
    /// Symlink; the entry describes the object holding the target.
    Symlink(ObjectEntry),
    NotFound,
}

impl Resolution {
    pub fn kind(&self) -> Option<EntryKind> {
        match self {
            Resolution::File(_) => Some(EntryKind::File),
            Resolution::Directory => Some(EntryKind::Directory),
            Resolution::Symlink(_) => Some(EntryKind::Symlink),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }
}

/// Groups keys by their first segment below `prefix`.
pub fn partition<'a>(prefix: &str, keys: impl IntoIterator<Item = &'a str>) -> Listing {
    let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
    let mut materialized = false;

    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        materialized = true;

        let (name, kind) = match rest.split_once(SEPARATOR) {
            Some(("", _)) => continue,
            Some((segment, _)) => (segment, EntryKind::Directory),
            None if rest == DIR_MARKER => continue,
            None => match rest.strip_suffix(SYMLINK_SUFFIX) {
                Some(target) if !target.is_empty() => (target, EntryKind::Symlink),
                _ => (rest, EntryKind::File),
            },
        };

        match children.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(kind);
            }
            Entry::Occupied(mut slot) => {
                let existing = *slot.get();
                if existing != kind {
                    warn!(
                        prefix,
                        name,
                        ?existing,
                        ?kind,
                        "Key collision under prefix, keeping higher-precedence entry"
                    );
                    if kind.precedence() > existing.precedence() {
                        slot.insert(kind);
                    }
                }
            }
        }
    }

    Listing {
        entries: children
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect(),
        materialized,
    }
}

/// Answers listing and existence queries against the store.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    remote: BoundedRemote,
}

impl DirectoryResolver {
    pub fn new(remote: BoundedRemote) -> Self {
        Self { remote }
    }

    /// Children of `dir` plus whether anything exists under it at all.
    pub async fn scan(&self, dir: &VirtualPath) -> HarborResult<Listing> {
        let prefix = dir.listing_prefix();
        let objects = self.remote.list_objects(&prefix).await?;
        let listing = partition(&prefix, objects.iter().map(|o| o.key.as_str()));
        trace!(
            path = %dir,
            objects = objects.len(),
            children = listing.entries.len(),
            "Scanned prefix"
        );
        Ok(listing)
    }

    /// Classifies `path`.
    ///
    /// The directory listing and the object head run concurrently; a directory
    /// wins over a same-named object, matching [`partition`].
    pub async fn exists(&self, path: &VirtualPath) -> HarborResult<Resolution> {
        let Some(key) = path.object_key() else {
            return Ok(Resolution::Directory);
        };
        let prefix = path.listing_prefix();
        let (is_dir, head) = tokio::join!(
            self.remote.has_prefix(&prefix),
            self.remote.head_object(&key)
        );
        if is_dir? {
            return Ok(Resolution::Directory);
        }
        if let Some(entry) = head? {
            return Ok(Resolution::File(entry));
        }
        match self.remote.head_object(&key.symlink_key()).await? {
            Some(entry) => Ok(Resolution::Symlink(entry)),
            None => Ok(Resolution::NotFound),
        }
    }
}
