//! Attribute conversion and caching.
//!
//! Synthesized [`AttributeRecord`]s become fuser `FileAttr`s here. Both
//! caches are moka caches with a time-to-live, so entries created by other
//! clients of the bucket appear once the TTL runs out.

use std::time::Duration;

use fuser::{FileAttr, FileType};
use harborfs_core::dispatcher::BLOCK_SIZE;
use harborfs_core::{AttributeRecord, EntryKind};
use moka::sync::Cache;

/// `st_blocks` is counted in 512-byte units regardless of `st_blksize`.
const STAT_BLOCK: u64 = 512;

const MAX_CACHED_ATTRS: u64 = 100_000;
const MAX_CACHED_NEGATIVES: u64 = 10_000;

pub fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
        EntryKind::Symlink => FileType::Symlink,
    }
}

/// Converts a synthesized record for inode `ino`.
pub fn to_file_attr(ino: u64, record: &AttributeRecord) -> FileAttr {
    let size = record.size_or_zero();
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(STAT_BLOCK),
        atime: record.atime,
        mtime: record.mtime,
        ctime: record.ctime,
        crtime: record.ctime,
        kind: file_type(record.kind),
        perm: record.perm,
        nlink: record.nlink,
        uid: record.uid,
        gid: record.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Positive and negative lookup caches.
///
/// A zero TTL disables the corresponding cache.
pub struct AttrCache {
    attrs: Option<Cache<u64, FileAttr>>,
    negative: Option<Cache<(u64, String), ()>>,
    ttl: Duration,
}

impl AttrCache {
    pub fn new(ttl: Duration, negative_ttl: Duration) -> Self {
        let attrs = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_CACHED_ATTRS)
                .time_to_live(ttl)
                .build()
        });
        let negative = (!negative_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_CACHED_NEGATIVES)
                .time_to_live(negative_ttl)
                .build()
        });
        Self {
            attrs,
            negative,
            ttl,
        }
    }

    /// TTL to hand the kernel along with attributes and entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, ino: u64) -> Option<FileAttr> {
        self.attrs.as_ref()?.get(&ino)
    }

    pub fn insert(&self, attr: FileAttr) {
        if let Some(cache) = &self.attrs {
            cache.insert(attr.ino, attr);
        }
    }

    pub fn invalidate(&self, ino: u64) {
        if let Some(cache) = &self.attrs {
            cache.invalidate(&ino);
        }
    }

    pub fn is_negative(&self, parent: u64, name: &str) -> bool {
        self.negative
            .as_ref()
            .is_some_and(|c| c.contains_key(&(parent, name.to_string())))
    }

    pub fn insert_negative(&self, parent: u64, name: &str) {
        if let Some(cache) = &self.negative {
            cache.insert((parent, name.to_string()), ());
        }
    }

    /// Drops a negative entry once the name has been created.
    pub fn remove_negative(&self, parent: u64, name: &str) {
        if let Some(cache) = &self.negative {
            cache.invalidate(&(parent, name.to_string()));
        }
    }

    /// Drops everything; used after renames, which can move whole subtrees.
    pub fn clear(&self) {
        if let Some(cache) = &self.attrs {
            cache.invalidate_all();
        }
        if let Some(cache) = &self.negative {
            cache.invalidate_all();
        }
    }
}
