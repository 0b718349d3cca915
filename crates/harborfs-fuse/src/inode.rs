//! Inode numbers for virtual paths.
//!
//! The bucket has no inode concept, so numbers are allocated on first sight
//! and kept until the kernel forgets them. Both directions are `DashMap`s;
//! when both maps are touched, the path map is locked first.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use harborfs_core::{EntryKind, VirtualPath};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
pub struct InodeEntry {
    pub path: VirtualPath,
    pub kind: EntryKind,
    /// Kernel references, released through `forget`.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: VirtualPath, kind: EntryKind, nlookup: u64) -> Self {
        Self {
            path,
            kind,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns `None` instead of wrapping below zero.
    fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

pub struct InodeTable {
    by_id: DashMap<u64, InodeEntry>,
    by_path: DashMap<VirtualPath, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            by_id: DashMap::new(),
            by_path: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.by_id.insert(
            ROOT_INODE,
            InodeEntry::new(VirtualPath::root(), EntryKind::Directory, 1),
        );
        table.by_path.insert(VirtualPath::root(), ROOT_INODE);
        table
    }

    /// Returns the inode for `path`, allocating one if needed, and counts a
    /// kernel reference.
    ///
    /// Used by every reply that hands an entry to the kernel (lookup, create,
    /// mkdir, symlink, link).
    pub fn get_or_insert(&self, path: &VirtualPath, kind: EntryKind) -> u64 {
        self.upsert(path, kind, true)
    }

    /// Same as [`get_or_insert`](Self::get_or_insert) without counting a
    /// reference. readdir entries do not take one.
    pub fn get_or_insert_no_lookup_inc(&self, path: &VirtualPath, kind: EntryKind) -> u64 {
        self.upsert(path, kind, false)
    }

    fn upsert(&self, path: &VirtualPath, kind: EntryKind, count: bool) -> u64 {
        match self.by_path.entry(path.clone()) {
            Entry::Occupied(slot) => {
                let ino = *slot.get();
                if let Some(mut entry) = self.by_id.get_mut(&ino) {
                    // The object behind a name can change kind between lookups
                    entry.kind = kind;
                    if count {
                        entry.inc_nlookup();
                    }
                }
                ino
            }
            Entry::Vacant(slot) => {
                let ino = self.next.fetch_add(1, Ordering::Relaxed);
                self.by_id
                    .insert(ino, InodeEntry::new(path.clone(), kind, u64::from(count)));
                slot.insert(ino);
                ino
            }
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<VirtualPath> {
        self.by_id.get(&ino).map(|e| e.path.clone())
    }

    pub fn kind_of(&self, ino: u64) -> Option<EntryKind> {
        self.by_id.get(&ino).map(|e| e.kind)
    }

    pub fn nlookup(&self, ino: u64) -> Option<u64> {
        self.by_id.get(&ino).map(|e| e.nlookup())
    }

    pub fn get_inode(&self, path: &VirtualPath) -> Option<u64> {
        self.by_path.get(path).map(|r| *r)
    }

    /// Drops `count` kernel references. Returns true if the inode was evicted.
    pub fn forget(&self, ino: u64, count: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        let remaining = match self.by_id.get(&ino) {
            Some(entry) => entry.dec_nlookup(count),
            None => return false,
        };
        if remaining != Some(0) {
            return false;
        }
        let Some((_, entry)) = self.by_id.remove_if(&ino, |_, e| e.nlookup() == 0) else {
            return false;
        };
        self.by_path.remove_if(&entry.path, |_, id| *id == ino);
        true
    }

    /// Unmaps a removed path. The inode itself stays until the kernel
    /// forgets it.
    pub fn invalidate_path(&self, path: &VirtualPath) {
        self.by_path.remove(path);
    }

    /// Re-points every inode at or under `from` to the same position under
    /// `to`. Whatever was mapped at the destination is unmapped first.
    pub fn rename_subtree(&self, from: &VirtualPath, to: &VirtualPath) {
        self.by_path.retain(|path, _| !path.is_within(to));

        let moved: Vec<(u64, VirtualPath)> = self
            .by_id
            .iter()
            .filter_map(|e| e.path.rebase(from, to).map(|p| (*e.key(), p)))
            .collect();
        for (ino, new_path) in moved {
            let Some(mut entry) = self.by_id.get_mut(&ino) else {
                continue;
            };
            let old_path = std::mem::replace(&mut entry.path, new_path.clone());
            drop(entry);
            self.by_path.remove_if(&old_path, |_, id| *id == ino);
            self.by_path.insert(new_path, ino);
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if only the root is present.
    pub fn is_empty(&self) -> bool {
        self.by_id.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
