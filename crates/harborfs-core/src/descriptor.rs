//! Open file handles.
//!
//! The table itself is a `DashMap` keyed by handle ID, so lookups of
//! different handles never contend and inserts/removes only lock one shard.
//! Each [`OpenFile`] carries its own async mutex around its backing resource:
//! reads, writes, truncates and uploads on one handle are strictly
//! serialized, while other handles proceed independently. No table-wide lock
//! is ever held across remote I/O.
//!
//! # Handle lifecycle
//!
//! 1. **Open**: a handle starts unloaded (existing object) or loaded with an
//!    empty dirty body (create, `O_TRUNC`)
//! 2. **First access**: an unloaded handle fetches the object body. A failed
//!    or timed-out fetch leaves it unloaded, so nothing stale is ever served
//! 3. **Flush/fsync**: dirty content is uploaded as a whole object
//! 4. **Release**: the handle leaves the table, dirty content is uploaded, and
//!    content that cannot be uploaded is parked in the [`DivergenceLedger`].
//!    [`DescriptorTable::discard`] drops a handle without any upload
//!
//! No write or truncate may grow content past the configured maximum; those
//! fail with [`HarborError::FileTooLarge`] before any byte is staged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, trace, warn};

use crate::backing::{BackingFile, BackingStore};
use crate::error::{HarborError, HarborResult};
use crate::ledger::DivergenceLedger;
use crate::path::VirtualPath;
use crate::remote::BoundedRemote;

/// Process-local token for an open file. Never 0.
pub type FileHandle = u64;

/// Access mode and behavior requested at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    /// Decodes `open(2)` flags.
    pub fn from_libc(flags: i32) -> Self {
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (true, false),
        };
        Self {
            read,
            write,
            truncate: write && flags & libc::O_TRUNC != 0,
            append: flags & libc::O_APPEND != 0,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }
}

/// How a handle's content starts out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialContent {
    /// Fetch the object body on first access.
    Remote,
    /// Start empty and dirty (create, truncate-on-open).
    Empty,
}

#[derive(Debug)]
enum Content {
    Unloaded,
    Loaded(Box<dyn BackingFile>),
    Closed,
}

/// One open handle.
#[derive(Debug)]
pub struct OpenFile {
    id: FileHandle,
    path: RwLock<VirtualPath>,
    flags: OpenFlags,
    content: Arc<AsyncMutex<Content>>,
    /// Length of dirty content, readable without the content lock.
    pending_size: Mutex<Option<u64>>,
    /// Set when the path was unlinked while open.
    detached: AtomicBool,
}

impl OpenFile {
    pub fn id(&self) -> FileHandle {
        self.id
    }

    pub fn path(&self) -> VirtualPath {
        self.path.read().clone()
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn pending_size(&self) -> Option<u64> {
        *self.pending_size.lock()
    }

    fn track_size(&self, backing: &dyn BackingFile) {
        let size = if backing.is_dirty() {
            backing.size().ok()
        } else {
            None
        };
        *self.pending_size.lock() = size;
    }
}

/// Handles held locked for the duration of a namespace mutation.
///
/// While held, no read/write/upload can run on these handles, so a rename or
/// unlink cannot race an in-flight upload to the old key.
#[must_use]
pub struct QuiescedHandles {
    held: Vec<(Arc<OpenFile>, OwnedMutexGuard<Content>)>,
}

impl QuiescedHandles {
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Points every held handle at its path rebased from `from` to `to`.
    pub fn retarget(&self, from: &VirtualPath, to: &VirtualPath) {
        for (file, _) in &self.held {
            let mut path = file.path.write();
            if let Some(new) = path.rebase(from, to) {
                trace!(fh = file.id, from = %*path, to = %new, "Retargeted handle");
                *path = new;
            }
        }
    }

    /// Marks every held handle as unlinked; their content is never uploaded.
    pub fn detach(&self) {
        for (file, _) in &self.held {
            file.detached.store(true, Ordering::Release);
            *file.pending_size.lock() = None;
        }
    }

    /// Detaches only the held handles at or below `path`.
    pub fn detach_within(&self, path: &VirtualPath) {
        for (file, _) in &self.held {
            if file.path().is_within(path) {
                trace!(fh = file.id, path = %path, "Detached handle");
                file.detached.store(true, Ordering::Release);
                *file.pending_size.lock() = None;
            }
        }
    }

    /// Applies `size` to every held handle whose content is loaded.
    pub fn truncate(&mut self, size: u64) -> HarborResult<()> {
        for (file, content) in &mut self.held {
            if let Content::Loaded(backing) = &mut **content {
                backing.truncate(size)?;
                file.track_size(&**backing);
            }
        }
        Ok(())
    }
}

/// Table of open handles.
#[derive(Debug)]
pub struct DescriptorTable {
    handles: DashMap<FileHandle, Arc<OpenFile>>,
    next_id: AtomicU64,
    remote: BoundedRemote,
    backing: Arc<dyn BackingStore>,
    ledger: Arc<DivergenceLedger>,
    max_file_size: u64,
}

impl DescriptorTable {
    pub fn new(
        remote: BoundedRemote,
        backing: Arc<dyn BackingStore>,
        ledger: Arc<DivergenceLedger>,
        max_file_size: u64,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
            remote,
            backing,
            ledger,
            max_file_size,
        }
    }

    /// Fails with [`HarborError::FileTooLarge`] if `size` exceeds the limit.
    pub fn check_size(&self, path: &VirtualPath, size: u64) -> HarborResult<()> {
        if size > self.max_file_size {
            debug!(path = %path, size, limit = self.max_file_size, "Refused oversized content");
            return Err(HarborError::FileTooLarge {
                path: path.clone(),
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Opens a handle on `path`.
    ///
    /// IDs start at 1 and wrap around to 1 on overflow, skipping IDs still
    /// in use.
    pub fn open(
        &self,
        path: &VirtualPath,
        flags: OpenFlags,
        initial: InitialContent,
    ) -> HarborResult<FileHandle> {
        let (content, pending) = match initial {
            InitialContent::Remote => (Content::Unloaded, None),
            InitialContent::Empty => (
                Content::Loaded(self.backing.open(path, Bytes::new(), true)?),
                Some(0),
            ),
        };

        let mut file = Some((content, pending));
        loop {
            let id = self
                .next_id
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.checked_add(1).unwrap_or(1))
                })
                .unwrap_or(1);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.handles.entry(id) {
                let Some((content, pending)) = file.take() else {
                    return Err(HarborError::InvalidHandle(id));
                };
                slot.insert(Arc::new(OpenFile {
                    id,
                    path: RwLock::new(path.clone()),
                    flags,
                    content: Arc::new(AsyncMutex::new(content)),
                    pending_size: Mutex::new(pending),
                    detached: AtomicBool::new(false),
                }));
                debug!(fh = id, path = %path, ?flags, ?initial, "Opened handle");
                return Ok(id);
            }
        }
    }

    pub fn get(&self, fh: FileHandle) -> HarborResult<Arc<OpenFile>> {
        self.handles
            .get(&fh)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(HarborError::InvalidHandle(fh))
    }

    pub fn contains(&self, fh: FileHandle) -> bool {
        self.handles.contains_key(&fh)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Reads up to `size` bytes at `offset`.
    pub async fn read(&self, fh: FileHandle, size: usize, offset: u64) -> HarborResult<Vec<u8>> {
        let file = self.get(fh)?;
        if !file.flags.read {
            return Err(HarborError::InvalidHandle(fh));
        }
        let mut content = file.content.lock().await;
        let backing = self.ensure_loaded(&file, &mut content).await?;
        let data = backing.read_at(offset, size)?;
        trace!(fh, offset, requested = size, returned = data.len(), "Read");
        Ok(data)
    }

    /// Writes `data` at `offset` (or at the end for append handles).
    pub async fn write(&self, fh: FileHandle, data: &[u8], offset: u64) -> HarborResult<usize> {
        let file = self.get(fh)?;
        if !file.flags.write {
            return Err(HarborError::InvalidHandle(fh));
        }
        let mut content = file.content.lock().await;
        let backing = self.ensure_loaded(&file, &mut content).await?;
        let offset = if file.flags.append {
            backing.size()?
        } else {
            offset
        };
        if !data.is_empty() {
            self.check_size(&file.path(), offset.saturating_add(data.len() as u64))?;
        }
        let written = backing.write_at(offset, data)?;
        file.track_size(&**backing);
        trace!(fh, offset, written, "Write");
        Ok(written)
    }

    /// Resizes the content behind `fh`.
    pub async fn truncate(&self, fh: FileHandle, size: u64) -> HarborResult<()> {
        let file = self.get(fh)?;
        if !file.flags.write {
            return Err(HarborError::InvalidHandle(fh));
        }
        self.check_size(&file.path(), size)?;
        let mut content = file.content.lock().await;
        if size == 0 && matches!(*content, Content::Unloaded) {
            *content = Content::Loaded(self.backing.open(&file.path(), Bytes::new(), true)?);
        }
        let backing = self.ensure_loaded(&file, &mut content).await?;
        backing.truncate(size)?;
        file.track_size(&**backing);
        debug!(fh, size, "Truncated handle");
        Ok(())
    }

    /// Uploads dirty content.
    pub async fn flush(&self, fh: FileHandle) -> HarborResult<()> {
        let file = self.get(fh)?;
        let mut content = file.content.lock().await;
        self.upload_if_dirty(&file, &mut content).await
    }

    /// Makes content durable locally, then uploads it.
    pub async fn fsync(&self, fh: FileHandle) -> HarborResult<()> {
        let file = self.get(fh)?;
        let mut content = file.content.lock().await;
        if let Content::Loaded(backing) = &mut *content {
            backing.sync()?;
        }
        self.upload_if_dirty(&file, &mut content).await
    }

    /// Uploads dirty content and discards the handle.
    ///
    /// The handle is gone even if the upload fails; in that case its content
    /// is parked in the ledger and the error is returned as
    /// [`HarborError::Inconsistent`].
    pub async fn release(&self, fh: FileHandle) -> HarborResult<()> {
        let Some((_, file)) = self.handles.remove(&fh) else {
            return Err(HarborError::InvalidHandle(fh));
        };
        let mut content = file.content.lock().await;
        let result = self.upload_if_dirty(&file, &mut content).await;

        if let Content::Loaded(backing) = std::mem::replace(&mut *content, Content::Closed) {
            if result.is_err() && backing.is_dirty() && !file.is_detached() {
                match backing.snapshot() {
                    Ok(body) => self.ledger.park(&file.path(), body, "write-back failed on release"),
                    Err(e) => error!(
                        fh,
                        path = %file.path(),
                        error = %e,
                        "Lost unsaved content: snapshot failed after write-back failure"
                    ),
                }
            }
            if let Err(e) = backing.close() {
                warn!(fh, error = %e, "Failed to close backing file");
            }
        }
        *file.pending_size.lock() = None;
        debug!(fh, path = %file.path(), ok = result.is_ok(), "Released handle");
        result
    }

    /// Drops a handle and its staged content without uploading anything.
    ///
    /// Used when the operation that opened the handle failed afterwards.
    pub async fn discard(&self, fh: FileHandle) -> HarborResult<()> {
        let Some((_, file)) = self.handles.remove(&fh) else {
            return Err(HarborError::InvalidHandle(fh));
        };
        let mut content = file.content.lock().await;
        *file.pending_size.lock() = None;
        let closed = match std::mem::replace(&mut *content, Content::Closed) {
            Content::Loaded(backing) => backing.close(),
            Content::Unloaded | Content::Closed => Ok(()),
        };
        debug!(fh, path = %file.path(), "Discarded handle");
        closed
    }

    /// Handles open on exactly `path`, in ID order.
    pub fn handles_on(&self, path: &VirtualPath) -> Vec<FileHandle> {
        let mut ids: Vec<FileHandle> = self
            .handles
            .iter()
            .filter(|entry| !entry.value().is_detached() && entry.value().path() == *path)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Locks every handle at or below `path`, in ID order.
    pub async fn quiesce(&self, path: &VirtualPath) -> QuiescedHandles {
        self.quiesce_many(&[path]).await
    }

    /// Locks every handle at or below any of `paths`.
    ///
    /// All handles are locked in one ascending-ID pass, so two quiescers can
    /// never hold each other's handles.
    pub async fn quiesce_many(&self, paths: &[&VirtualPath]) -> QuiescedHandles {
        let mut files: Vec<Arc<OpenFile>> = self
            .handles
            .iter()
            .filter(|entry| {
                let current = entry.value().path();
                paths.iter().any(|p| current.is_within(p))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        files.sort_by_key(|f| f.id);

        let mut held = Vec::with_capacity(files.len());
        for file in files {
            let guard = Arc::clone(&file.content).lock_owned().await;
            held.push((file, guard));
        }
        QuiescedHandles { held }
    }

    /// Size of unsaved content on any handle open on exactly `path`.
    pub fn pending_size(&self, path: &VirtualPath) -> Option<u64> {
        self.handles
            .iter()
            .filter(|entry| !entry.value().is_detached() && entry.value().path() == *path)
            .filter_map(|entry| entry.value().pending_size())
            .max()
    }

    /// Paths directly under `dir` that only exist as unsaved open handles.
    pub fn pending_children(&self, dir: &VirtualPath) -> Vec<VirtualPath> {
        let mut paths: Vec<VirtualPath> = self
            .handles
            .iter()
            .filter(|entry| entry.value().pending_size().is_some() && !entry.value().is_detached())
            .map(|entry| entry.value().path())
            .filter(|path| path.parent().as_ref() == Some(dir))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    async fn ensure_loaded<'a>(
        &self,
        file: &OpenFile,
        content: &'a mut Content,
    ) -> HarborResult<&'a mut Box<dyn BackingFile>> {
        if matches!(content, Content::Unloaded) {
            let path = file.path();
            let (body, dirty) = if let Some(parked) = self.ledger.content(&path) {
                (parked, true)
            } else {
                let key = path
                    .object_key()
                    .ok_or_else(|| HarborError::IsADirectory(path.clone()))?;
                match self.remote.get_object(&key).await? {
                    Some(body) => (body, false),
                    None => return Err(HarborError::NotFound(path)),
                }
            };
            trace!(fh = file.id, path = %path, size = body.len(), parked = dirty, "Loaded content");
            *content = Content::Loaded(self.backing.open(&path, body, dirty)?);
            if dirty && let Content::Loaded(backing) = &*content {
                file.track_size(&**backing);
            }
        }
        match content {
            Content::Loaded(backing) => Ok(backing),
            Content::Unloaded | Content::Closed => Err(HarborError::InvalidHandle(file.id)),
        }
    }

    async fn upload_if_dirty(&self, file: &OpenFile, content: &mut Content) -> HarborResult<()> {
        let Content::Loaded(backing) = content else {
            return Ok(());
        };
        if !backing.is_dirty() {
            return Ok(());
        }
        if file.is_detached() {
            backing.mark_clean();
            return Ok(());
        }

        let path = file.path();
        let key = path
            .object_key()
            .ok_or_else(|| HarborError::IsADirectory(path.clone()))?;
        let body = backing.snapshot()?;
        let size = body.len();
        match self.remote.put_object(&key, body).await {
            Ok(()) => {
                backing.mark_clean();
                file.track_size(&**backing);
                self.ledger.resolve(&path);
                debug!(fh = file.id, path = %path, size, "Wrote back content");
                Ok(())
            }
            Err(e) => {
                error!(
                    fh = file.id,
                    path = %path,
                    size,
                    error = %e,
                    "Write-back failed, local content diverges from remote"
                );
                Err(e.diverged(&path, "write-back failed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBacking;
    use crate::path::ObjectKey;
    use crate::remote::ObjectStoreRemote;
    use std::time::Duration;

    fn table() -> DescriptorTable {
        let remote = BoundedRemote::new(
            Arc::new(ObjectStoreRemote::in_memory("test")),
            Duration::from_secs(5),
        );
        DescriptorTable::new(
            remote,
            Arc::new(MemoryBacking),
            Arc::new(DivergenceLedger::new()),
            64,
        )
    }

    fn path(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn test_open_flags_from_libc() {
        let flags = OpenFlags::from_libc(libc::O_RDONLY);
        assert!(flags.read && !flags.write);
        let flags = OpenFlags::from_libc(libc::O_WRONLY | libc::O_TRUNC);
        assert!(!flags.read && flags.write && flags.truncate);
        let flags = OpenFlags::from_libc(libc::O_RDWR | libc::O_APPEND);
        assert!(flags.read && flags.write && flags.append);
        // O_TRUNC without write access is ignored
        assert!(!OpenFlags::from_libc(libc::O_RDONLY | libc::O_TRUNC).truncate);
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let table = table();
        let a = table
            .open(&path("/a"), OpenFlags::read_only(), InitialContent::Remote)
            .unwrap();
        let b = table
            .open(&path("/b"), OpenFlags::read_only(), InitialContent::Remote)
            .unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_id_wraps_and_skips_zero() {
        let table = table();
        table.next_id.store(u64::MAX, Ordering::Relaxed);
        let last = table
            .open(&path("/a"), OpenFlags::read_only(), InitialContent::Remote)
            .unwrap();
        assert_eq!(last, u64::MAX);
        let next = table
            .open(&path("/b"), OpenFlags::read_only(), InitialContent::Remote)
            .unwrap();
        assert_eq!(next, 1);
    }

    #[tokio::test]
    async fn test_write_flush_read() {
        let table = table();
        let fh = table
            .open(&path("/f"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        assert_eq!(table.write(fh, b"hello", 0).await.unwrap(), 5);
        assert_eq!(table.pending_size(&path("/f")), Some(5));
        table.flush(fh).await.unwrap();
        assert_eq!(table.pending_size(&path("/f")), None);
        assert_eq!(table.read(fh, 5, 0).await.unwrap(), b"hello");

        let body = table
            .remote
            .get_object(&ObjectKey::new("f"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_release_twice_is_invalid_handle() {
        let table = table();
        let fh = table
            .open(&path("/f"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        table.release(fh).await.unwrap();
        let err = table.release(fh).await.unwrap_err();
        assert!(matches!(err, HarborError::InvalidHandle(id) if id == fh));
        assert!(matches!(
            table.read(fh, 1, 0).await,
            Err(HarborError::InvalidHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_release_uploads_created_empty_file() {
        let table = table();
        let fh = table
            .open(&path("/empty"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        table.release(fh).await.unwrap();
        let head = table
            .remote
            .head_object(&ObjectKey::new("empty"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.size, Some(0));
    }

    #[tokio::test]
    async fn test_discard_uploads_nothing() {
        let table = table();
        let fh = table
            .open(&path("/abandoned"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        table.write(fh, b"never stored", 0).await.unwrap();
        table.discard(fh).await.unwrap();

        assert!(table.is_empty());
        assert_eq!(table.pending_size(&path("/abandoned")), None);
        assert!(
            table
                .remote
                .head_object(&ObjectKey::new("abandoned"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            table.discard(fh).await,
            Err(HarborError::InvalidHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_growth_past_limit_is_file_too_large() {
        let table = table();
        let fh = table
            .open(&path("/f"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        table.write(fh, &[7u8; 64], 0).await.unwrap();

        let err = table.write(fh, b"x", 64).await.unwrap_err();
        assert_eq!(err.to_errno(), libc::EFBIG);
        let err = table.truncate(fh, 1 << 46).await.unwrap_err();
        assert_eq!(err.to_errno(), libc::EFBIG);
        // Nothing was staged by the refused calls
        assert_eq!(table.pending_size(&path("/f")), Some(64));
        assert_eq!(table.write(fh, &[], 1 << 46).await.unwrap(), 0);
        table.truncate(fh, 10).await.unwrap();
        assert_eq!(table.pending_size(&path("/f")), Some(10));
    }

    #[tokio::test]
    async fn test_read_missing_object_is_not_found() {
        let table = table();
        let fh = table
            .open(&path("/ghost"), OpenFlags::read_only(), InitialContent::Remote)
            .unwrap();
        assert!(matches!(
            table.read(fh, 10, 0).await,
            Err(HarborError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_on_read_only_handle() {
        let table = table();
        let fh = table
            .open(&path("/f"), OpenFlags::read_only(), InitialContent::Empty)
            .unwrap();
        assert!(matches!(
            table.write(fh, b"x", 0).await,
            Err(HarborError::InvalidHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_append_writes_at_end() {
        let table = table();
        let flags = OpenFlags {
            append: true,
            ..OpenFlags::read_write()
        };
        let fh = table.open(&path("/log"), flags, InitialContent::Empty).unwrap();
        table.write(fh, b"one", 0).await.unwrap();
        table.write(fh, b"two", 0).await.unwrap();
        assert_eq!(table.read(fh, 10, 0).await.unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn test_quiesce_retarget_and_detach() {
        let table = table();
        let fh = table
            .open(&path("/d/x"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        {
            let held = table.quiesce(&path("/d")).await;
            assert_eq!(held.len(), 1);
            held.retarget(&path("/d"), &path("/e"));
        }
        assert_eq!(table.get(fh).unwrap().path(), path("/e/x"));
        assert_eq!(table.pending_children(&path("/e")), vec![path("/e/x")]);

        {
            let held = table.quiesce(&path("/e/x")).await;
            held.detach();
        }
        table.write(fh, b"gone", 0).await.unwrap();
        table.release(fh).await.unwrap();
        assert!(
            table
                .remote
                .head_object(&ObjectKey::new("e/x"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_quiesce_many_and_detach_within() {
        let table = table();
        let a = table
            .open(&path("/a"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        let b = table
            .open(&path("/b/x"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        table
            .open(&path("/c"), OpenFlags::read_write(), InitialContent::Empty)
            .unwrap();
        assert_eq!(table.handles_on(&path("/a")), vec![a]);

        {
            let held = table.quiesce_many(&[&path("/a"), &path("/b")]).await;
            assert_eq!(held.len(), 2);
            held.detach_within(&path("/b"));
        }
        assert!(!table.get(a).unwrap().is_detached());
        assert!(table.get(b).unwrap().is_detached());
        assert!(table.handles_on(&path("/b/x")).is_empty());
    }

    #[tokio::test]
    async fn test_parked_content_is_loaded_dirty() {
        let table = table();
        table
            .ledger
            .park(&path("/p"), Bytes::from_static(b"parked"), "test");
        let fh = table
            .open(&path("/p"), OpenFlags::read_only(), InitialContent::Remote)
            .unwrap();
        assert_eq!(table.read(fh, 10, 0).await.unwrap(), b"parked");
        table.flush(fh).await.unwrap();
        assert!(table.ledger.is_empty());
    }
}
