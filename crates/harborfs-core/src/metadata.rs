//! POSIX attributes for paths that have no inode.
//!
//! Objects carry a length and (usually) a last-modified time, nothing else.
//! Directories carry nothing at all. [`MetadataSynthesizer`] fills the gaps
//! and records in every [`AttributeRecord`] which parts are real and which
//! were made up, so callers never mistake a placeholder for remote truth.
//!
//! Mode, owner and timestamp changes made through this mount live in an
//! in-process [`AttrOverlay`]; the store has nowhere to keep them.

use std::time::SystemTime;

use dashmap::DashMap;

use crate::config::CoreConfig;
use crate::error::{HarborError, HarborResult};
use crate::path::VirtualPath;
use crate::remote::ObjectEntry;
use crate::resolver::{DirectoryResolver, EntryKind, Resolution};

/// Size reported for directories. Not meaningful.
pub const DIR_SIZE: u64 = 4096;

/// Permission bits reported for symlinks.
pub const SYMLINK_PERM: u16 = 0o777;

/// Length of a file as far as the mount knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSize {
    Known(u64),
    /// The store did not report a length; do not trust any number derived
    /// from this entry.
    Unknown,
}

impl FileSize {
    pub fn known(self) -> Option<u64> {
        match self {
            FileSize::Known(size) => Some(size),
            FileSize::Unknown => None,
        }
    }
}

/// Where an entry's timestamps came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    /// Last-modified time reported by the store.
    Remote,
    /// Current time at query; repeated queries of an unchanged entry differ.
    Synthesized,
    /// Set through this mount (utimens, unsaved writes).
    Local,
}

/// Synthesized metadata for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub kind: EntryKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: FileSize,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub time_source: TimeSource,
}

impl AttributeRecord {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Size for callers that need a number; unknown sizes read as 0.
    pub fn size_or_zero(&self) -> u64 {
        self.size.known().unwrap_or(0)
    }
}

/// Attribute changes recorded by this mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrOverride {
    pub perm: Option<u16>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
}

/// Per-path attribute changes, kept until unmount.
#[derive(Debug, Default)]
pub struct AttrOverlay {
    entries: DashMap<VirtualPath, AttrOverride>,
}

impl AttrOverlay {
    pub fn set_perm(&self, path: &VirtualPath, perm: u16) {
        let mut entry = self.entries.entry(path.clone()).or_default();
        entry.perm = Some(perm & 0o7777);
        entry.ctime = Some(SystemTime::now());
    }

    pub fn set_owner(&self, path: &VirtualPath, uid: Option<u32>, gid: Option<u32>) {
        let mut entry = self.entries.entry(path.clone()).or_default();
        if uid.is_some() {
            entry.uid = uid;
        }
        if gid.is_some() {
            entry.gid = gid;
        }
        entry.ctime = Some(SystemTime::now());
    }

    pub fn set_times(
        &self,
        path: &VirtualPath,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) {
        let mut entry = self.entries.entry(path.clone()).or_default();
        if atime.is_some() {
            entry.atime = atime;
        }
        if mtime.is_some() {
            entry.mtime = mtime;
        }
        entry.ctime = Some(SystemTime::now());
    }

    /// Drops recorded timestamps for `path` (its content changed remotely).
    pub fn clear_times(&self, path: &VirtualPath) {
        if let Some(mut entry) = self.entries.get_mut(path) {
            entry.atime = None;
            entry.mtime = None;
        }
    }

    pub fn get(&self, path: &VirtualPath) -> Option<AttrOverride> {
        self.entries.get(path).map(|e| e.clone())
    }

    pub fn forget_within(&self, path: &VirtualPath) {
        self.entries.retain(|p, _| !p.is_within(path));
    }

    /// Moves entries at or below `from` under `to`.
    pub fn rename(&self, from: &VirtualPath, to: &VirtualPath) {
        self.forget_within(to);
        let moved: Vec<VirtualPath> = self
            .entries
            .iter()
            .filter(|e| e.key().is_within(from))
            .map(|e| e.key().clone())
            .collect();
        for old in moved {
            if let (Some(new), Some((_, entry))) = (old.rebase(from, to), self.entries.remove(&old))
            {
                self.entries.insert(new, entry);
            }
        }
    }

    /// Copies the entry for `from` to `to` (hard link copies).
    pub fn copy(&self, from: &VirtualPath, to: &VirtualPath) {
        if let Some(entry) = self.get(from) {
            self.entries.insert(to.clone(), entry);
        }
    }

    fn apply(&self, path: &VirtualPath, record: &mut AttributeRecord) {
        let Some(entry) = self.entries.get(path) else {
            return;
        };
        if let Some(perm) = entry.perm {
            record.perm = perm;
        }
        if let Some(uid) = entry.uid {
            record.uid = uid;
        }
        if let Some(gid) = entry.gid {
            record.gid = gid;
        }
        if let Some(atime) = entry.atime {
            record.atime = atime;
        }
        if let Some(mtime) = entry.mtime {
            record.mtime = mtime;
            record.time_source = TimeSource::Local;
        }
        if let Some(ctime) = entry.ctime {
            record.ctime = ctime;
        }
    }
}

/// Builds [`AttributeRecord`]s from resolver answers.
#[derive(Debug)]
pub struct MetadataSynthesizer {
    resolver: DirectoryResolver,
    overlay: AttrOverlay,
    uid: u32,
    gid: u32,
    file_perm: u16,
    dir_perm: u16,
}

impl MetadataSynthesizer {
    pub fn new(resolver: DirectoryResolver, config: &CoreConfig) -> Self {
        Self {
            resolver,
            overlay: AttrOverlay::default(),
            uid: config.uid,
            gid: config.gid,
            file_perm: config.file_perm,
            dir_perm: config.dir_perm,
        }
    }

    pub fn overlay(&self) -> &AttrOverlay {
        &self.overlay
    }

    /// Attributes of `path`.
    ///
    /// The root is always a directory. Anything else is classified by the
    /// resolver; a path with neither an object nor descendants is NotFound.
    pub async fn attributes_of(&self, path: &VirtualPath) -> HarborResult<AttributeRecord> {
        let resolution = self.resolver.exists(path).await?;
        self.from_resolution(path, &resolution)
            .ok_or_else(|| HarborError::NotFound(path.clone()))
    }

    /// Attributes for an already classified path; `None` for NotFound.
    pub fn from_resolution(
        &self,
        path: &VirtualPath,
        resolution: &Resolution,
    ) -> Option<AttributeRecord> {
        let mut record = match resolution {
            Resolution::Directory => self.directory(),
            Resolution::File(entry) => self.object(EntryKind::File, self.file_perm, entry),
            Resolution::Symlink(entry) => self.object(EntryKind::Symlink, SYMLINK_PERM, entry),
            Resolution::NotFound => return None,
        };
        self.overlay.apply(path, &mut record);
        Some(record)
    }

    /// Attributes of a file that so far only exists locally.
    pub fn local_file(&self, path: &VirtualPath, size: u64) -> AttributeRecord {
        let now = SystemTime::now();
        let mut record = AttributeRecord {
            kind: EntryKind::File,
            perm: self.file_perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size: FileSize::Known(size),
            atime: now,
            mtime: now,
            ctime: now,
            time_source: TimeSource::Local,
        };
        self.overlay.apply(path, &mut record);
        record
    }

    fn directory(&self) -> AttributeRecord {
        let now = SystemTime::now();
        AttributeRecord {
            kind: EntryKind::Directory,
            perm: self.dir_perm,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            size: FileSize::Known(DIR_SIZE),
            atime: now,
            mtime: now,
            ctime: now,
            time_source: TimeSource::Synthesized,
        }
    }

    fn object(&self, kind: EntryKind, perm: u16, entry: &ObjectEntry) -> AttributeRecord {
        let (time, time_source) = match entry.last_modified {
            Some(modified) => (modified, TimeSource::Remote),
            None => (SystemTime::now(), TimeSource::Synthesized),
        };
        AttributeRecord {
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size: entry.size.map_or(FileSize::Unknown, FileSize::Known),
            atime: time,
            mtime: time,
            ctime: time,
            time_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ObjectKey;
    use crate::remote::{BoundedRemote, ObjectStoreRemote};
    use std::sync::Arc;
    use std::time::Duration;

    fn synthesizer() -> MetadataSynthesizer {
        let remote = BoundedRemote::new(
            Arc::new(ObjectStoreRemote::in_memory("t")),
            Duration::from_secs(5),
        );
        MetadataSynthesizer::new(
            DirectoryResolver::new(remote),
            &CoreConfig::default().owner(1000, 100),
        )
    }

    fn path(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    fn entry(size: Option<u64>, last_modified: Option<SystemTime>) -> ObjectEntry {
        ObjectEntry {
            key: ObjectKey::new("f"),
            size,
            last_modified,
        }
    }

    #[tokio::test]
    async fn test_root_is_directory() {
        let synth = synthesizer();
        let attr = synth.attributes_of(&VirtualPath::root()).await.unwrap();
        assert!(attr.is_dir());
        assert!(attr.nlink >= 2);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.time_source, TimeSource::Synthesized);
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let synth = synthesizer();
        let err = synth.attributes_of(&path("/nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_file_uses_remote_size_and_mtime() {
        let synth = synthesizer();
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let attr = synth
            .from_resolution(
                &path("/f"),
                &Resolution::File(entry(Some(42), Some(modified))),
            )
            .unwrap();
        assert_eq!(attr.size, FileSize::Known(42));
        assert_eq!(attr.mtime, modified);
        assert_eq!(attr.time_source, TimeSource::Remote);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.nlink, 1);
    }

    #[test]
    fn test_unreported_size_and_time_are_marked() {
        let synth = synthesizer();
        let attr = synth
            .from_resolution(&path("/f"), &Resolution::File(entry(None, None)))
            .unwrap();
        assert_eq!(attr.size, FileSize::Unknown);
        assert_eq!(attr.size_or_zero(), 0);
        assert_eq!(attr.time_source, TimeSource::Synthesized);
    }

    #[test]
    fn test_overlay_applies() {
        let synth = synthesizer();
        let p = path("/f");
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        synth.overlay().set_perm(&p, 0o100600);
        synth.overlay().set_owner(&p, Some(7), None);
        synth.overlay().set_times(&p, None, Some(stamp));

        let attr = synth
            .from_resolution(&p, &Resolution::File(entry(Some(1), None)))
            .unwrap();
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.uid, 7);
        assert_eq!(attr.gid, 100);
        assert_eq!(attr.mtime, stamp);
        assert_eq!(attr.time_source, TimeSource::Local);
    }

    #[test]
    fn test_overlay_rename_and_forget() {
        let overlay = AttrOverlay::default();
        overlay.set_perm(&path("/d/a"), 0o600);
        overlay.rename(&path("/d"), &path("/e"));
        assert!(overlay.get(&path("/d/a")).is_none());
        assert_eq!(overlay.get(&path("/e/a")).unwrap().perm, Some(0o600));

        overlay.copy(&path("/e/a"), &path("/link"));
        overlay.forget_within(&path("/e"));
        assert!(overlay.get(&path("/e/a")).is_none());
        assert!(overlay.get(&path("/link")).is_some());
    }

    #[test]
    fn test_local_file() {
        let synth = synthesizer();
        let attr = synth.local_file(&path("/new"), 12);
        assert_eq!(attr.size, FileSize::Known(12));
        assert_eq!(attr.time_source, TimeSource::Local);
        assert_eq!(attr.kind, EntryKind::File);
    }
}
