//! Path-based filesystem operations over a remote bucket.
//!
//! [`HarborFs`] ties the components together: the [`DirectoryResolver`]
//! answers structure queries, the [`MetadataSynthesizer`] turns them into
//! attributes, the [`DescriptorTable`] owns open handles and their staged
//! content, and [`PathLocks`] serialize namespace mutations per path.
//!
//! Every operation is async and returns a [`HarborResult`]; transports map
//! errors with [`HarborError::to_errno`].
//!
//! # Consistency
//!
//! Content written through a handle reaches the store on flush, fsync and
//! release. Until then it is visible through this mount only (getattr sizes,
//! readdir entries for new files). Namespace operations that need several
//! remote calls (directory rename) are not atomic; a failure after the first
//! mutating call is reported as [`HarborError::Inconsistent`] and logged.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::backing::backing_store;
use crate::config::CoreConfig;
use crate::descriptor::{DescriptorTable, FileHandle, InitialContent, OpenFlags};
use crate::error::{HarborError, HarborResult};
use crate::ledger::DivergenceLedger;
use crate::locks::PathLocks;
use crate::metadata::{AttributeRecord, FileSize, MetadataSynthesizer};
use crate::path::{ObjectKey, VirtualPath};
use crate::remote::{BoundedRemote, RemoteStore};
use crate::resolver::{DirEntry, DirectoryResolver, EntryKind, Resolution};

/// Block size reported by statfs.
pub const BLOCK_SIZE: u32 = 4096;

/// Longest file name accepted.
pub const MAX_NAME_LEN: u32 = 255;

/// Reported for capacity fields; object stores have no fixed capacity.
const UNBOUNDED: u64 = u64::MAX / 2;

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// The filesystem.
#[derive(Debug)]
pub struct HarborFs {
    remote: BoundedRemote,
    resolver: DirectoryResolver,
    metadata: MetadataSynthesizer,
    handles: DescriptorTable,
    ledger: Arc<DivergenceLedger>,
    locks: PathLocks,
    config: CoreConfig,
}

impl HarborFs {
    pub fn new(store: Arc<dyn RemoteStore>, config: CoreConfig) -> Self {
        let remote = BoundedRemote::new(store, config.remote_timeout);
        let resolver = DirectoryResolver::new(remote.clone());
        let ledger = Arc::new(DivergenceLedger::new());
        let handles = DescriptorTable::new(
            remote.clone(),
            backing_store(&config.staging),
            Arc::clone(&ledger),
            config.max_file_size,
        );
        info!(
            bucket = remote.bucket(),
            timeout_ms = config.remote_timeout.as_millis(),
            staging = ?config.staging,
            read_only = config.read_only,
            max_file_size = config.max_file_size,
            "Filesystem ready"
        );
        Self {
            metadata: MetadataSynthesizer::new(resolver.clone(), &config),
            resolver,
            remote,
            handles,
            ledger,
            locks: PathLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn bucket(&self) -> &str {
        self.remote.bucket()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Paths whose last write-back failed and whose content is parked.
    pub fn divergent_paths(&self) -> Vec<VirtualPath> {
        self.ledger.paths()
    }

    // ---- checks ---------------------------------------------------------

    fn check_writable(&self, path: &VirtualPath) -> HarborResult<()> {
        if self.config.read_only {
            return Err(HarborError::ReadOnly(path.clone()));
        }
        Ok(())
    }

    fn check_new_name(path: &VirtualPath) -> HarborResult<()> {
        if path.is_reserved() {
            return Err(HarborError::InvalidArgument(format!(
                "name reserved for internal objects: {path}"
            )));
        }
        if path
            .file_name()
            .is_some_and(|name| name.len() > MAX_NAME_LEN as usize)
        {
            return Err(HarborError::InvalidArgument(format!("name too long: {path}")));
        }
        Ok(())
    }

    /// Classifies `path`. Internal objects are never visible.
    async fn classify(&self, path: &VirtualPath) -> HarborResult<Resolution> {
        if path.is_reserved() {
            return Ok(Resolution::NotFound);
        }
        self.resolver.exists(path).await
    }

    /// Size of content only this mount knows about: unsaved handles first,
    /// then parked content.
    fn local_size(&self, path: &VirtualPath) -> Option<u64> {
        self.handles
            .pending_size(path)
            .or_else(|| self.ledger.size(path))
    }

    /// Direct children of `dir` that exist only in this mount: unsaved
    /// handles and parked content.
    fn local_children(&self, dir: &VirtualPath) -> Vec<VirtualPath> {
        let mut children = self.handles.pending_children(dir);
        children.extend(
            self.ledger
                .paths()
                .into_iter()
                .filter(|path| path.parent().as_ref() == Some(dir)),
        );
        children.sort();
        children.dedup();
        children
    }

    async fn require_parent_dir(&self, path: &VirtualPath) -> HarborResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.classify(&parent).await? {
            Resolution::Directory => Ok(()),
            Resolution::NotFound => Err(HarborError::NotFound(parent)),
            Resolution::File(_) | Resolution::Symlink(_) => {
                Err(HarborError::NotADirectory(parent))
            }
        }
    }

    /// Uploads dirty content of every handle open on `path`.
    async fn flush_path(&self, path: &VirtualPath) -> HarborResult<()> {
        for fh in self.handles.handles_on(path) {
            match self.handles.flush(fh).await {
                Ok(()) | Err(HarborError::InvalidHandle(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn key_of(path: &VirtualPath) -> HarborResult<ObjectKey> {
        path.object_key()
            .ok_or_else(|| HarborError::Busy(path.clone()))
    }

    // ---- attributes -----------------------------------------------------

    /// Checks `mask` (`F_OK` or a combination of `R_OK`, `W_OK`, `X_OK`)
    /// against the owner permission bits of `path`.
    #[instrument(level = "trace", name = "fs::access", skip_all, fields(path = %path))]
    pub async fn access(&self, path: &VirtualPath, mask: i32) -> HarborResult<()> {
        let attr = self.getattr(path).await?;
        if mask == libc::F_OK {
            return Ok(());
        }
        if mask & libc::W_OK != 0 {
            self.check_writable(path)?;
        }
        let wanted = u16::try_from(mask & 0o7).unwrap_or(0);
        let owner = (attr.perm >> 6) & 0o7;
        if owner & wanted != wanted {
            debug!(path = %path, mask, perm = format_args!("{:o}", attr.perm), "Access denied");
            return Err(HarborError::PermissionDenied(path.clone()));
        }
        Ok(())
    }

    /// Attributes of `path`.
    #[instrument(level = "trace", name = "fs::getattr", skip_all, fields(path = %path))]
    pub async fn getattr(&self, path: &VirtualPath) -> HarborResult<AttributeRecord> {
        let resolution = self.classify(path).await?;
        let local = self.local_size(path);
        match (self.metadata.from_resolution(path, &resolution), local) {
            (Some(mut attr), Some(size)) if attr.kind == EntryKind::File => {
                attr.size = FileSize::Known(size);
                Ok(attr)
            }
            (Some(attr), _) => Ok(attr),
            (None, Some(size)) => Ok(self.metadata.local_file(path, size)),
            (None, None) => Err(HarborError::NotFound(path.clone())),
        }
    }

    /// Entries of directory `path`, starting with `.` and `..`.
    ///
    /// Fails rather than returning a partial or empty listing when the store
    /// cannot be listed.
    #[instrument(level = "trace", name = "fs::readdir", skip_all, fields(path = %path))]
    pub async fn readdir(&self, path: &VirtualPath) -> HarborResult<Vec<DirEntry>> {
        let listing = self.resolver.scan(path).await?;
        let pending = self.local_children(path);

        if !path.is_root() && !listing.materialized {
            match self.classify(path).await? {
                Resolution::Directory => {}
                Resolution::File(_) | Resolution::Symlink(_) => {
                    return Err(HarborError::NotADirectory(path.clone()));
                }
                Resolution::NotFound if pending.is_empty() => {
                    return Err(HarborError::NotFound(path.clone()));
                }
                Resolution::NotFound => {}
            }
        }

        let mut children = listing.entries;
        for local in pending {
            if let Some(name) = local.file_name()
                && !children.iter().any(|e| e.name == name)
            {
                children.push(DirEntry::new(name, EntryKind::File));
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry::new(".", EntryKind::Directory));
        entries.push(DirEntry::new("..", EntryKind::Directory));
        entries.extend(children);
        trace!(path = %path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    // ---- handles --------------------------------------------------------

    /// Opens an existing file.
    #[instrument(level = "debug", name = "fs::open", skip_all, fields(path = %path))]
    pub async fn open(&self, path: &VirtualPath, flags: OpenFlags) -> HarborResult<FileHandle> {
        if flags.write {
            self.check_writable(path)?;
        }
        let _within = self.locks.read_within(path).await;
        let _guard = self.locks.read(path).await;
        match self.classify(path).await? {
            Resolution::Directory => return Err(HarborError::IsADirectory(path.clone())),
            Resolution::Symlink(_) => return Err(HarborError::NotSupported("open of a symlink")),
            Resolution::File(_) => {}
            Resolution::NotFound => {
                if self.handles.pending_size(path).is_some() {
                    // Created through another handle and not uploaded yet.
                    self.flush_path(path).await?;
                } else if self.ledger.size(path).is_none() {
                    return Err(HarborError::NotFound(path.clone()));
                }
            }
        }
        let initial = if flags.truncate {
            InitialContent::Empty
        } else {
            InitialContent::Remote
        };
        self.handles.open(path, flags, initial)
    }

    /// Creates (or truncates) a file and opens it.
    ///
    /// The object is uploaded on the first flush or on release.
    #[instrument(level = "debug", name = "fs::create", skip_all, fields(path = %path))]
    pub async fn create(
        &self,
        path: &VirtualPath,
        flags: OpenFlags,
        mode: u16,
    ) -> HarborResult<FileHandle> {
        self.check_writable(path)?;
        Self::check_new_name(path)?;
        let _within = self.locks.read_within(path).await;
        let _guard = self.locks.write(path).await;
        self.require_parent_dir(path).await?;
        if let Resolution::Directory = self.classify(path).await? {
            return Err(HarborError::IsADirectory(path.clone()));
        }

        let fh = self.handles.open(path, flags, InitialContent::Empty)?;
        let perm = mode & 0o7777;
        if perm != 0 && perm != self.config.file_perm {
            self.metadata.overlay().set_perm(path, perm);
        }
        debug!(fh, path = %path, "Created file");
        Ok(fh)
    }

    pub async fn read(&self, fh: FileHandle, size: usize, offset: u64) -> HarborResult<Vec<u8>> {
        self.handles.read(fh, size, offset).await
    }

    pub async fn write(&self, fh: FileHandle, data: &[u8], offset: u64) -> HarborResult<usize> {
        self.handles.write(fh, data, offset).await
    }

    /// Uploads unsaved content of `fh`.
    pub async fn flush(&self, fh: FileHandle) -> HarborResult<()> {
        self.handles.flush(fh).await
    }

    pub async fn fsync(&self, fh: FileHandle) -> HarborResult<()> {
        self.handles.fsync(fh).await
    }

    /// Uploads unsaved content and closes `fh`.
    ///
    /// Releasing an unknown or already released handle is
    /// [`HarborError::InvalidHandle`].
    pub async fn release(&self, fh: FileHandle) -> HarborResult<()> {
        self.handles.release(fh).await
    }

    /// Closes `fh` without uploading its content.
    ///
    /// For handles whose opening call failed after the handle was created;
    /// the bucket is left exactly as it was.
    pub async fn discard(&self, fh: FileHandle) -> HarborResult<()> {
        self.handles.discard(fh).await
    }

    // ---- namespace ------------------------------------------------------

    /// Resizes a file. With `fh` set this is `ftruncate` on that handle.
    #[instrument(level = "debug", name = "fs::truncate", skip_all, fields(path = %path))]
    pub async fn truncate(
        &self,
        path: &VirtualPath,
        size: u64,
        fh: Option<FileHandle>,
    ) -> HarborResult<()> {
        self.check_writable(path)?;
        if let Some(fh) = fh {
            return self.handles.truncate(fh, size).await;
        }
        self.handles.check_size(path, size)?;

        let _within = self.locks.read_within(path).await;
        let _guard = self.locks.write(path).await;
        let resolution = self.classify(path).await?;
        let mut held = self.handles.quiesce(path).await;
        match resolution {
            Resolution::Directory => return Err(HarborError::IsADirectory(path.clone())),
            Resolution::Symlink(_) => {
                return Err(HarborError::InvalidArgument(format!(
                    "cannot truncate symlink {path}"
                )));
            }
            Resolution::NotFound if held.is_empty() && self.ledger.size(path).is_none() => {
                return Err(HarborError::NotFound(path.clone()));
            }
            Resolution::NotFound if self.ledger.size(path).is_none() => {
                held.truncate(size)?;
                debug!(path = %path, size, "Truncated unsaved file");
                return Ok(());
            }
            Resolution::File(_) | Resolution::NotFound => {}
        }

        let key = Self::key_of(path)?;
        let mut body = if size == 0 {
            Vec::new()
        } else if let Some(parked) = self.ledger.content(path) {
            parked.to_vec()
        } else {
            self.remote
                .get_object(&key)
                .await?
                .ok_or_else(|| HarborError::NotFound(path.clone()))?
                .to_vec()
        };
        let size_usize = usize::try_from(size)
            .map_err(|_| HarborError::out_of_memory(path, size))?;
        if size_usize > body.len() {
            body.try_reserve_exact(size_usize - body.len())
                .map_err(|_| HarborError::out_of_memory(path, size))?;
        }
        body.resize(size_usize, 0);
        self.remote.put_object(&key, Bytes::from(body)).await?;

        self.ledger.resolve(path);
        held.truncate(size)?;
        self.metadata.overlay().clear_times(path);
        debug!(path = %path, size, handles = held.len(), "Truncated file");
        Ok(())
    }

    /// Removes a file or symlink.
    #[instrument(level = "debug", name = "fs::unlink", skip_all, fields(path = %path))]
    pub async fn unlink(&self, path: &VirtualPath) -> HarborResult<()> {
        self.check_writable(path)?;
        let _guard = self.locks.write(path).await;
        let key = match self.classify(path).await? {
            Resolution::Directory => return Err(HarborError::IsADirectory(path.clone())),
            Resolution::File(_) => Some(Self::key_of(path)?),
            Resolution::Symlink(_) => Some(Self::key_of(path)?.symlink_key()),
            Resolution::NotFound if self.local_size(path).is_some() => None,
            Resolution::NotFound => return Err(HarborError::NotFound(path.clone())),
        };

        let held = self.handles.quiesce(path).await;
        if let Some(key) = key {
            self.remote.delete_object(&key).await?;
        }
        held.detach();
        drop(held);

        self.ledger.forget_within(path);
        self.metadata.overlay().forget_within(path);
        debug!(path = %path, "Unlinked");
        Ok(())
    }

    /// Creates an empty directory by writing its marker object.
    #[instrument(level = "debug", name = "fs::mkdir", skip_all, fields(path = %path))]
    pub async fn mkdir(&self, path: &VirtualPath, mode: u16) -> HarborResult<()> {
        self.check_writable(path)?;
        Self::check_new_name(path)?;
        let key = path
            .object_key()
            .ok_or_else(|| HarborError::AlreadyExists(path.clone()))?;
        let _within = self.locks.read_within(path).await;
        let _guard = self.locks.write(path).await;
        self.require_parent_dir(path).await?;
        if self.classify(path).await?.is_found() || self.local_size(path).is_some() {
            return Err(HarborError::AlreadyExists(path.clone()));
        }

        self.remote.put_object(&key.marker_key(), Bytes::new()).await?;
        let perm = mode & 0o7777;
        if perm != 0 && perm != self.config.dir_perm {
            self.metadata.overlay().set_perm(path, perm);
        }
        debug!(path = %path, "Created directory");
        Ok(())
    }

    /// Removes an empty directory.
    #[instrument(level = "debug", name = "fs::rmdir", skip_all, fields(path = %path))]
    pub async fn rmdir(&self, path: &VirtualPath) -> HarborResult<()> {
        self.check_writable(path)?;
        let key = Self::key_of(path)?;
        let _guard = self.locks.write(path).await;
        match self.classify(path).await? {
            Resolution::Directory => {}
            Resolution::NotFound => return Err(HarborError::NotFound(path.clone())),
            Resolution::File(_) | Resolution::Symlink(_) => {
                return Err(HarborError::NotADirectory(path.clone()));
            }
        }
        let listing = self.resolver.scan(path).await?;
        if !listing.entries.is_empty() || !self.local_children(path).is_empty() {
            return Err(HarborError::NotEmpty(path.clone()));
        }

        self.remote.delete_object(&key.marker_key()).await?;
        self.metadata.overlay().forget_within(path);
        debug!(path = %path, "Removed directory");
        Ok(())
    }

    /// Moves `from` to `to`, replacing a file (or empty directory) at `to`.
    ///
    /// Implemented as copy-then-delete; directories are moved object by
    /// object. Open handles follow the move.
    #[instrument(level = "debug", name = "fs::rename", skip_all, fields(from = %from, to = %to))]
    pub async fn rename(&self, from: &VirtualPath, to: &VirtualPath) -> HarborResult<()> {
        self.check_writable(from)?;
        Self::check_new_name(to)?;
        if from.is_root() {
            return Err(HarborError::Busy(from.clone()));
        }
        if to.is_root() {
            return Err(HarborError::Busy(to.clone()));
        }
        if to != from && to.is_within(from) {
            return Err(HarborError::InvalidArgument(format!(
                "cannot move {from} into its own subtree {to}"
            )));
        }

        let _guards = self.locks.write_ordered(&[from, to]).await;
        let source = self.classify(from).await?;
        if from == to {
            return if source.is_found() || self.local_size(from).is_some() {
                Ok(())
            } else {
                Err(HarborError::NotFound(from.clone()))
            };
        }
        self.require_parent_dir(to).await?;
        let target = self.classify(to).await?;

        match source {
            Resolution::NotFound => {
                if self.local_size(from).is_none() {
                    return Err(HarborError::NotFound(from.clone()));
                }
                if target.kind() == Some(EntryKind::Directory) {
                    return Err(HarborError::IsADirectory(to.clone()));
                }
                let held = self.handles.quiesce_many(&[from, to]).await;
                held.detach_within(to);
                held.retarget(from, to);
                drop(held);
                self.move_local_state(from, to);
                debug!(from = %from, to = %to, "Renamed unsaved file");
            }
            Resolution::File(_) | Resolution::Symlink(_) => {
                if target.kind() == Some(EntryKind::Directory) {
                    return Err(HarborError::IsADirectory(to.clone()));
                }
                self.rename_object(from, to, &source, &target).await?;
            }
            Resolution::Directory => {
                match target {
                    Resolution::File(_) | Resolution::Symlink(_) => {
                        return Err(HarborError::NotADirectory(to.clone()));
                    }
                    Resolution::Directory => {
                        let listing = self.resolver.scan(to).await?;
                        if !listing.entries.is_empty() || !self.local_children(to).is_empty() {
                            return Err(HarborError::NotEmpty(to.clone()));
                        }
                    }
                    Resolution::NotFound => {}
                }
                self.rename_tree(from, to).await?;
            }
        }
        Ok(())
    }

    async fn rename_object(
        &self,
        from: &VirtualPath,
        to: &VirtualPath,
        source: &Resolution,
        target: &Resolution,
    ) -> HarborResult<()> {
        let is_link = matches!(source, Resolution::Symlink(_));
        let (from_key, to_key) = if is_link {
            (Self::key_of(from)?.symlink_key(), Self::key_of(to)?.symlink_key())
        } else {
            (Self::key_of(from)?, Self::key_of(to)?)
        };

        let held = self.handles.quiesce_many(&[from, to]).await;
        if !self.remote.copy_object(&from_key, &to_key).await? {
            return Err(HarborError::NotFound(from.clone()));
        }

        // The replaced entry may live under the other key form.
        let stale = match target {
            Resolution::File(_) if is_link => Some(Self::key_of(to)?),
            Resolution::Symlink(_) if !is_link => Some(Self::key_of(to)?.symlink_key()),
            _ => None,
        };
        let cleanup = async {
            if let Some(stale) = &stale {
                self.remote.delete_object(stale).await?;
            }
            self.remote.delete_object(&from_key).await
        };
        if let Err(e) = cleanup.await {
            error!(
                from = %from,
                to = %to,
                error = %e,
                "Rename copied the object but could not remove the old key"
            );
            return Err(e.diverged(from, format!("rename to {to} left the source behind")));
        }

        held.detach_within(to);
        held.retarget(from, to);
        drop(held);
        self.move_local_state(from, to);
        debug!(from = %from, to = %to, "Renamed");
        Ok(())
    }

    async fn rename_tree(&self, from: &VirtualPath, to: &VirtualPath) -> HarborResult<()> {
        let from_prefix = from.listing_prefix();
        let to_prefix = to.listing_prefix();
        let objects = self.remote.list_objects(&from_prefix).await?;
        let held = self.handles.quiesce_many(&[from, to]).await;

        let mut copied = 0usize;
        for object in &objects {
            let Some(rest) = object.key.as_str().strip_prefix(&from_prefix) else {
                continue;
            };
            let new_key = ObjectKey::new(format!("{to_prefix}{rest}"));
            if let Err(e) = self.remote.copy_object(&object.key, &new_key).await {
                if copied == 0 {
                    return Err(e);
                }
                error!(
                    from = %from,
                    to = %to,
                    copied,
                    total = objects.len(),
                    error = %e,
                    "Directory rename failed part way through copying"
                );
                return Err(e.diverged(to, format!("partial copy of {from}")));
            }
            copied += 1;
        }

        for object in &objects {
            if let Err(e) = self.remote.delete_object(&object.key).await {
                error!(
                    from = %from,
                    to = %to,
                    key = %object.key,
                    error = %e,
                    "Directory rename copied everything but could not remove the source"
                );
                return Err(e.diverged(from, format!("rename to {to} left source objects")));
            }
        }

        held.retarget(from, to);
        drop(held);
        self.move_local_state(from, to);
        debug!(from = %from, to = %to, objects = objects.len(), "Renamed directory");
        Ok(())
    }

    fn move_local_state(&self, from: &VirtualPath, to: &VirtualPath) {
        self.ledger.forget_within(to);
        self.ledger.rename(from, to);
        self.metadata.overlay().rename(from, to);
    }

    /// Creates `new` as a copy of `existing`.
    ///
    /// Object stores have no hard links; the two names diverge on the next
    /// write to either.
    #[instrument(level = "debug", name = "fs::link", skip_all, fields(existing = %existing, new = %new))]
    pub async fn link(&self, existing: &VirtualPath, new: &VirtualPath) -> HarborResult<()> {
        self.check_writable(new)?;
        Self::check_new_name(new)?;
        let _guards = self.locks.write_ordered(&[existing, new]).await;
        self.require_parent_dir(new).await?;

        self.flush_path(existing).await?;
        let (from_key, to_key) = match self.classify(existing).await? {
            Resolution::Directory => return Err(HarborError::PermissionDenied(existing.clone())),
            Resolution::NotFound => return Err(HarborError::NotFound(existing.clone())),
            Resolution::File(_) => (Self::key_of(existing)?, Self::key_of(new)?),
            Resolution::Symlink(_) => (
                Self::key_of(existing)?.symlink_key(),
                Self::key_of(new)?.symlink_key(),
            ),
        };
        if self.classify(new).await?.is_found() || self.local_size(new).is_some() {
            return Err(HarborError::AlreadyExists(new.clone()));
        }

        if !self.remote.copy_object(&from_key, &to_key).await? {
            return Err(HarborError::NotFound(existing.clone()));
        }
        self.metadata.overlay().copy(existing, new);
        debug!(existing = %existing, new = %new, "Linked by copy");
        Ok(())
    }

    /// Creates a symlink at `link` pointing to `target`.
    #[instrument(level = "debug", name = "fs::symlink", skip_all, fields(link = %link))]
    pub async fn symlink(&self, target: &str, link: &VirtualPath) -> HarborResult<()> {
        self.check_writable(link)?;
        Self::check_new_name(link)?;
        if target.is_empty() {
            return Err(HarborError::InvalidArgument("empty symlink target".to_string()));
        }
        let key = Self::key_of(link)?;
        let _within = self.locks.read_within(link).await;
        let _guard = self.locks.write(link).await;
        self.require_parent_dir(link).await?;
        if self.classify(link).await?.is_found() || self.local_size(link).is_some() {
            return Err(HarborError::AlreadyExists(link.clone()));
        }

        self.remote
            .put_object(&key.symlink_key(), Bytes::copy_from_slice(target.as_bytes()))
            .await?;
        debug!(link = %link, target, "Created symlink");
        Ok(())
    }

    /// Target of the symlink at `path`.
    pub async fn readlink(&self, path: &VirtualPath) -> HarborResult<String> {
        match self.classify(path).await? {
            Resolution::Symlink(_) => {}
            Resolution::NotFound => return Err(HarborError::NotFound(path.clone())),
            Resolution::File(_) | Resolution::Directory => {
                return Err(HarborError::InvalidArgument(format!("not a symlink: {path}")));
            }
        }
        let body = self
            .remote
            .get_object(&Self::key_of(path)?.symlink_key())
            .await?
            .ok_or_else(|| HarborError::NotFound(path.clone()))?;
        String::from_utf8(body.to_vec())
            .map_err(|_| HarborError::InvalidArgument(format!("symlink target of {path} is not UTF-8")))
    }

    /// Filesystem statistics. Capacity is reported as effectively unbounded.
    pub fn statfs(&self) -> FsStats {
        FsStats {
            blocks: UNBOUNDED,
            bfree: UNBOUNDED,
            bavail: UNBOUNDED,
            files: UNBOUNDED,
            ffree: UNBOUNDED,
            bsize: BLOCK_SIZE,
            namelen: MAX_NAME_LEN,
            frsize: BLOCK_SIZE,
        }
    }

    // ---- attribute changes ----------------------------------------------

    /// Records new permission bits for `path`.
    pub async fn chmod(&self, path: &VirtualPath, mode: u16) -> HarborResult<AttributeRecord> {
        self.check_writable(path)?;
        self.getattr(path).await?;
        self.metadata.overlay().set_perm(path, mode);
        debug!(path = %path, mode = format_args!("{:o}", mode & 0o7777), "chmod");
        self.getattr(path).await
    }

    /// Records a new owner and/or group for `path`.
    pub async fn chown(
        &self,
        path: &VirtualPath,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> HarborResult<AttributeRecord> {
        self.check_writable(path)?;
        self.getattr(path).await?;
        self.metadata.overlay().set_owner(path, uid, gid);
        debug!(path = %path, ?uid, ?gid, "chown");
        self.getattr(path).await
    }

    /// Records access and/or modification times for `path`.
    pub async fn utimens(
        &self,
        path: &VirtualPath,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> HarborResult<AttributeRecord> {
        self.check_writable(path)?;
        self.getattr(path).await?;
        self.metadata.overlay().set_times(path, atime, mtime);
        trace!(path = %path, "utimens");
        self.getattr(path).await
    }

    // ---- divergence -----------------------------------------------------

    /// Re-uploads parked content. Returns how many paths were resolved.
    pub async fn retry_divergent(&self) -> usize {
        let mut resolved = 0;
        for path in self.ledger.paths() {
            let Some(divergence) = self.ledger.get(&path) else {
                continue;
            };
            let Some(key) = path.object_key() else {
                continue;
            };
            let _guard = self.locks.write(&path).await;
            match self.remote.put_object(&key, divergence.body.clone()).await {
                Ok(()) => {
                    if self.ledger.resolve_generation(&path, divergence.generation()) {
                        resolved += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Retry of parked content failed");
                }
            }
        }
        if resolved > 0 {
            info!(resolved, remaining = self.ledger.len(), "Retried divergent paths");
        }
        resolved
    }
}
