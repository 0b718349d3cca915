//! fuser `Filesystem` implementation.
//!
//! Callbacks translate inodes to virtual paths, run the matching
//! [`HarborFs`] operation through the async bridge and convert the outcome
//! into a reply. All filesystem semantics live in `harborfs-core`; this layer
//! only owns the inode table, the kernel-facing caches and directory handle
//! snapshots.
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | lookup / forget | nlookup counted per reply, negative results cached |
//! | getattr / setattr | setattr applies truncate, chmod, chown, utimens in that order |
//! | opendir / readdir | listing is snapshotted at opendir, offsets index the snapshot |
//! | rename | `RENAME_NOREPLACE` honored, `RENAME_EXCHANGE` rejected with EINVAL |
//! | link | creates an independent copy (object stores have no hard links) |

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use harborfs_core::{
    AttributeRecord, EntryKind, HarborError, HarborFs, HarborResult, OpenFlags, VirtualPath,
};
use libc::c_int;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::async_bridge::{self, BridgeStats};
use crate::attr::{AttrCache, file_type, to_file_attr};
use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::inode::{InodeTable, ROOT_INODE};

/// `renameat2` flags, spelled out because libc only defines them on Linux.
const RENAME_NOREPLACE: u32 = 1;
const RENAME_EXCHANGE: u32 = 2;

/// One entry of an opendir snapshot.
#[derive(Debug, Clone)]
struct DirSlot {
    ino: u64,
    kind: FileType,
    name: String,
}

pub struct HarborFuse {
    fs: Arc<HarborFs>,
    runtime: Handle,
    config: MountConfig,
    inodes: InodeTable,
    attr_cache: AttrCache,
    dir_handles: DashMap<u64, Arc<Vec<DirSlot>>>,
    next_dir_handle: AtomicU64,
    bridge_stats: Arc<BridgeStats>,
}

impl HarborFuse {
    /// Wraps `fs` for mounting. Operations run on `runtime`.
    pub fn new(fs: Arc<HarborFs>, runtime: Handle, config: MountConfig) -> Self {
        let attr_cache = AttrCache::new(config.attr_ttl, config.negative_ttl);
        Self {
            fs,
            runtime,
            config,
            inodes: InodeTable::new(),
            attr_cache,
            dir_handles: DashMap::new(),
            next_dir_handle: AtomicU64::new(1),
            bridge_stats: BridgeStats::new(),
        }
    }

    pub fn bridge_stats(&self) -> &BridgeStats {
        &self.bridge_stats
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// Runs core operation `op` to completion on the runtime.
    fn exec<F, T>(&self, op: &'static str, future: F) -> FuseResult<T>
    where
        F: Future<Output = HarborResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let result = async_bridge::execute(
            &self.runtime,
            op,
            self.config.bridge_timeout,
            Some(&self.bridge_stats),
            future,
        )?;
        Ok(result?)
    }

    fn path_of(&self, ino: u64) -> FuseResult<VirtualPath> {
        self.inodes.path_of(ino).ok_or(FuseError::UnknownInode(ino))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> FuseResult<VirtualPath> {
        let name = name
            .to_str()
            .ok_or_else(|| FuseError::InvalidName(name.to_string_lossy().into_owned()))?;
        Ok(self.path_of(parent)?.join(name)?)
    }

    /// Registers `record` under `path` as a kernel reference and builds the
    /// attribute reply for it.
    fn entry_attr(&self, path: &VirtualPath, record: &AttributeRecord) -> FileAttr {
        let ino = self.inodes.get_or_insert(path, record.kind);
        let attr = to_file_attr(ino, record);
        self.attr_cache.insert(attr);
        attr
    }

    fn forget_name(&self, parent: u64, name: &OsStr) {
        if let Some(name) = name.to_str() {
            self.attr_cache.remove_negative(parent, name);
        }
    }

    fn parent_ino(&self, path: &VirtualPath) -> u64 {
        match path.parent() {
            None => ROOT_INODE,
            Some(parent) => self
                .inodes
                .get_or_insert_no_lookup_inc(&parent, EntryKind::Directory),
        }
    }

    fn errno(op: &'static str, err: &FuseError) -> c_int {
        let errno = err.to_errno();
        if errno == libc::ENOENT {
            trace!(op, error = %err, "Request failed");
        } else {
            debug!(op, errno, error = %err, "Request failed");
        }
        errno
    }
}

fn mode_bits(mode: u32) -> u16 {
    u16::try_from(mode & 0o7777).unwrap_or_default()
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

fn offset_of(offset: i64) -> FuseResult<u64> {
    u64::try_from(offset)
        .map_err(|_| HarborError::InvalidArgument(format!("negative offset {offset}")).into())
}

impl Filesystem for HarborFuse {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(bucket = self.fs.bucket(), "FUSE filesystem initialized");
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        let divergent = self.fs.divergent_paths();
        if !divergent.is_empty() {
            let fs = Arc::clone(&self.fs);
            let uploaded = self
                .exec("destroy", async move { Ok(fs.retry_divergent().await) })
                .unwrap_or(0);
            let lost = self.fs.divergent_paths();
            if lost.is_empty() {
                info!(uploaded, "Uploaded parked content before unmount");
            } else {
                warn!(
                    uploaded,
                    lost = lost.len(),
                    paths = ?lost,
                    "Unmounting with content that never reached the bucket"
                );
            }
        }
        info!(
            completed = self.bridge_stats.operations_completed.load(Ordering::Relaxed),
            timed_out = self.bridge_stats.operations_timed_out.load(Ordering::Relaxed),
            panicked = self.bridge_stats.operations_panicked.load(Ordering::Relaxed),
            "FUSE filesystem destroyed"
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name_str) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name = name_str, "lookup");

        if self.attr_cache.is_negative(parent, name_str) {
            reply.error(libc::ENOENT);
            return;
        }

        let result = self.child_path(parent, name).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let target = path.clone();
            let record = self.exec("lookup", async move { fs.getattr(&target).await })?;
            Ok((path, record))
        });
        match result {
            Ok((path, record)) => {
                let attr = self.entry_attr(&path, &record);
                reply.entry(&self.attr_cache.ttl(), &attr, 0);
            }
            Err(e) => {
                let errno = Self::errno("lookup", &e);
                if errno == libc::ENOENT {
                    self.attr_cache.insert_negative(parent, name_str);
                }
                reply.error(errno);
            }
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        if self.inodes.forget(ino, nlookup) {
            self.attr_cache.invalidate(ino);
        }
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            if self.inodes.forget(node.nodeid, node.nlookup) {
                self.attr_cache.invalidate(node.nodeid);
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        if let Some(attr) = self.attr_cache.get(ino) {
            reply.attr(&self.attr_cache.ttl(), &attr);
            return;
        }
        let result = self.path_of(ino).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            self.exec("getattr", async move { fs.getattr(&path).await })
        });
        match result {
            Ok(record) => {
                let attr = to_file_attr(ino, &record);
                self.attr_cache.insert(attr);
                reply.attr(&self.attr_cache.ttl(), &attr);
            }
            Err(e) => reply.error(Self::errno("getattr", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino, ?mode, ?uid, ?gid, ?size, ?fh, "setattr");
        self.attr_cache.invalidate(ino);

        let atime = atime.map(resolve_time);
        let mtime = mtime.map(resolve_time);
        let result = self.path_of(ino).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            self.exec("setattr", async move {
                if let Some(size) = size {
                    fs.truncate(&path, size, fh).await?;
                }
                if let Some(mode) = mode {
                    fs.chmod(&path, mode_bits(mode)).await?;
                }
                if uid.is_some() || gid.is_some() {
                    fs.chown(&path, uid, gid).await?;
                }
                if atime.is_some() || mtime.is_some() {
                    fs.utimens(&path, atime, mtime).await?;
                }
                fs.getattr(&path).await
            })
        });
        match result {
            Ok(record) => {
                let attr = to_file_attr(ino, &record);
                self.attr_cache.insert(attr);
                reply.attr(&self.attr_cache.ttl(), &attr);
            }
            Err(e) => reply.error(Self::errno("setattr", &e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(ino, "readlink");
        let result = self.path_of(ino).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            self.exec("readlink", async move { fs.readlink(&path).await })
        });
        match result {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(Self::errno("readlink", &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let result = self.child_path(parent, name).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let target = path.clone();
            let record = self.exec("mkdir", async move {
                fs.mkdir(&target, mode_bits(mode & !umask)).await?;
                fs.getattr(&target).await
            })?;
            Ok((path, record))
        });
        match result {
            Ok((path, record)) => {
                self.forget_name(parent, name);
                self.attr_cache.invalidate(parent);
                let attr = self.entry_attr(&path, &record);
                reply.entry(&self.attr_cache.ttl(), &attr, 0);
            }
            Err(e) => reply.error(Self::errno("mkdir", &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let target = path.clone();
            self.exec("unlink", async move { fs.unlink(&target).await })?;
            Ok(path)
        });
        match result {
            Ok(path) => {
                if let Some(ino) = self.inodes.get_inode(&path) {
                    self.attr_cache.invalidate(ino);
                }
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("unlink", &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let target = path.clone();
            self.exec("rmdir", async move { fs.rmdir(&target).await })?;
            Ok(path)
        });
        match result {
            Ok(path) => {
                if let Some(ino) = self.inodes.get_inode(&path) {
                    self.attr_cache.invalidate(ino);
                }
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rmdir", &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(target) = target.to_str().map(str::to_string) else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self.child_path(parent, link_name).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let link = path.clone();
            let record = self.exec("symlink", async move {
                fs.symlink(&target, &link).await?;
                fs.getattr(&link).await
            })?;
            Ok((path, record))
        });
        match result {
            Ok((path, record)) => {
                self.forget_name(parent, link_name);
                let attr = self.entry_attr(&path, &record);
                reply.entry(&self.attr_cache.ttl(), &attr, 0);
            }
            Err(e) => reply.error(Self::errno("symlink", &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags & RENAME_EXCHANGE != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let no_replace = flags & RENAME_NOREPLACE != 0;

        let result = self
            .child_path(parent, name)
            .and_then(|from| Ok((from, self.child_path(newparent, newname)?)))
            .and_then(|(from, to)| {
                let fs = Arc::clone(&self.fs);
                let (src, dst) = (from.clone(), to.clone());
                self.exec("rename", async move {
                    if no_replace && fs.getattr(&dst).await.is_ok() {
                        return Err(HarborError::AlreadyExists(dst));
                    }
                    fs.rename(&src, &dst).await
                })?;
                Ok((from, to))
            });
        match result {
            Ok((from, to)) => {
                self.inodes.rename_subtree(&from, &to);
                self.attr_cache.clear();
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rename", &e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let result = self.path_of(ino).and_then(|existing| {
            let path = self.child_path(newparent, newname)?;
            let fs = Arc::clone(&self.fs);
            let target = path.clone();
            let record = self.exec("link", async move {
                fs.link(&existing, &target).await?;
                fs.getattr(&target).await
            })?;
            Ok((path, record))
        });
        match result {
            Ok((path, record)) => {
                self.forget_name(newparent, newname);
                let attr = self.entry_attr(&path, &record);
                reply.entry(&self.attr_cache.ttl(), &attr, 0);
            }
            Err(e) => reply.error(Self::errno("link", &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");
        let open_flags = OpenFlags::from_libc(flags);
        let result = self.path_of(ino).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            self.exec("open", async move { fs.open(&path, open_flags).await })
        });
        match result {
            Ok(fh) => {
                if open_flags.truncate {
                    self.attr_cache.invalidate(ino);
                }
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(Self::errno("open", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");
        let result = offset_of(offset).and_then(|offset| {
            let fs = Arc::clone(&self.fs);
            let len = usize::try_from(size).unwrap_or(usize::MAX);
            self.exec("read", async move { fs.read(fh, len, offset).await })
        });
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::errno("read", &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, fh, offset, len = data.len(), "write");
        self.attr_cache.invalidate(ino);
        let data = data.to_vec();
        let result = offset_of(offset).and_then(|offset| {
            let fs = Arc::clone(&self.fs);
            self.exec("write", async move { fs.write(fh, &data, offset).await })
        });
        match result {
            Ok(written) => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Err(e) => reply.error(Self::errno("write", &e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(ino, fh, "flush");
        let fs = Arc::clone(&self.fs);
        match self.exec("flush", async move { fs.flush(fh).await }) {
            Ok(()) => {
                self.attr_cache.invalidate(ino);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("flush", &e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(ino, fh, "fsync");
        let fs = Arc::clone(&self.fs);
        match self.exec("fsync", async move { fs.fsync(fh).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("fsync", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(ino, fh, "release");
        self.attr_cache.invalidate(ino);
        let fs = Arc::clone(&self.fs);
        match self.exec("release", async move { fs.release(fh).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("release", &e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");
        let result = self.path_of(ino).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let dir = path.clone();
            let entries = self.exec("opendir", async move { fs.readdir(&dir).await })?;
            Ok((path, entries))
        });
        let (path, entries) = match result {
            Ok(found) => found,
            Err(e) => {
                reply.error(Self::errno("opendir", &e));
                return;
            }
        };

        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            let slot_ino = match entry.name.as_str() {
                "." => ino,
                ".." => self.parent_ino(&path),
                name => match path.join(name) {
                    Ok(child) => self.inodes.get_or_insert_no_lookup_inc(&child, entry.kind),
                    Err(e) => {
                        warn!(dir = %path, name, error = %e, "Skipping unrepresentable entry");
                        continue;
                    }
                },
            };
            slots.push(DirSlot {
                ino: slot_ino,
                kind: file_type(entry.kind),
                name: entry.name,
            });
        }

        let fh = self.next_dir_handle.fetch_add(1, Ordering::Relaxed);
        self.dir_handles.insert(fh, Arc::new(slots));
        reply.opened(fh, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, fh, offset, "readdir");
        let Some(slots) = self.dir_handles.get(&fh).map(|s| Arc::clone(s.value())) else {
            reply.error(libc::EBADF);
            return;
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (index, slot) in slots.iter().enumerate().skip(skip) {
            let next = i64::try_from(index + 1).unwrap_or(i64::MAX);
            if reply.add(slot.ino, next, slot.kind, &slot.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.dir_handles.remove(&fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.statfs();
        reply.statfs(
            stats.blocks,
            stats.bfree,
            stats.bavail,
            stats.files,
            stats.ffree,
            stats.bsize,
            stats.namelen,
            stats.frsize,
        );
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(ino, mask, "access");
        let result = self.path_of(ino).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            self.exec("access", async move { fs.access(&path, mask).await })
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("access", &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let open_flags = OpenFlags::from_libc(flags);
        let result = self.child_path(parent, name).and_then(|path| {
            let fs = Arc::clone(&self.fs);
            let target = path.clone();
            let created = self.exec("create", async move {
                let fh = fs.create(&target, open_flags, mode_bits(mode & !umask)).await?;
                match fs.getattr(&target).await {
                    Ok(record) => Ok((fh, record)),
                    Err(e) => {
                        // The kernel never learns of fh; drop it without an upload
                        if let Err(discard) = fs.discard(fh).await {
                            warn!(fh, path = %target, error = %discard, "Failed to discard handle");
                        }
                        Err(e)
                    }
                }
            })?;
            Ok((path, created))
        });
        match result {
            Ok((path, (fh, record))) => {
                self.forget_name(parent, name);
                let attr = self.entry_attr(&path, &record);
                reply.created(&self.attr_cache.ttl(), &attr, 0, fh, 0);
            }
            Err(e) => reply.error(Self::errno("create", &e)),
        }
    }
}
