//! Backing resources for open files.
//!
//! A [`BackingFile`] is where an open handle's bytes live between the first
//! access and write-back: an in-memory [`WriteBuffer`] or a staged file under
//! the shadow root. The descriptor table and dispatcher only see the trait, so
//! both staging modes share them unchanged.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tracing::{trace, warn};

use crate::config::StagingMode;
use crate::error::{HarborError, HarborResult};
use crate::path::VirtualPath;
use crate::shadow::ShadowMapper;
use crate::write_buffer::WriteBuffer;

/// Byte storage behind one open handle.
pub trait BackingFile: Send + fmt::Debug {
    /// Reads up to `size` bytes at `offset`; short or empty at end of file.
    fn read_at(&self, offset: u64, size: usize) -> HarborResult<Vec<u8>>;

    /// Writes all of `data` at `offset`, zero-filling any gap.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> HarborResult<usize>;

    /// Resizes, zero-filling when growing.
    fn truncate(&mut self, size: u64) -> HarborResult<()>;

    /// Current length in bytes.
    fn size(&self) -> HarborResult<u64>;

    /// Modified since the last upload.
    fn is_dirty(&self) -> bool;

    fn mark_clean(&mut self);

    /// Whole content, for upload.
    fn snapshot(&self) -> HarborResult<Bytes>;

    /// Makes local bytes durable.
    fn sync(&mut self) -> HarborResult<()>;

    /// Releases local resources.
    fn close(self: Box<Self>) -> HarborResult<()>;
}

/// Creates backing files.
pub trait BackingStore: Send + Sync + fmt::Debug {
    /// Opens a backing file for `path` holding `content`.
    ///
    /// `dirty` marks content that differs from the remote object (new or
    /// truncated files).
    fn open(
        &self,
        path: &VirtualPath,
        content: Bytes,
        dirty: bool,
    ) -> HarborResult<Box<dyn BackingFile>>;
}

/// Builds the store for a staging mode.
pub fn backing_store(mode: &StagingMode) -> Arc<dyn BackingStore> {
    match mode {
        StagingMode::Memory => Arc::new(MemoryBacking),
        StagingMode::Disk(root) => Arc::new(ShadowBacking::new(ShadowMapper::new(root.clone()))),
    }
}

/// Keeps open-file content in memory.
#[derive(Debug, Default)]
pub struct MemoryBacking;

impl BackingStore for MemoryBacking {
    fn open(
        &self,
        path: &VirtualPath,
        content: Bytes,
        dirty: bool,
    ) -> HarborResult<Box<dyn BackingFile>> {
        let mut buffer = WriteBuffer::new(content.to_vec());
        if dirty {
            buffer.mark_dirty();
        }
        Ok(Box::new(MemoryFile {
            path: path.clone(),
            buffer,
        }))
    }
}

#[derive(Debug)]
struct MemoryFile {
    path: VirtualPath,
    buffer: WriteBuffer,
}

impl BackingFile for MemoryFile {
    fn read_at(&self, offset: u64, size: usize) -> HarborResult<Vec<u8>> {
        Ok(self.buffer.read(offset, size).to_vec())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> HarborResult<usize> {
        self.buffer.write(offset, data).map_err(|_| {
            HarborError::out_of_memory(&self.path, offset.saturating_add(data.len() as u64))
        })
    }

    fn truncate(&mut self, size: u64) -> HarborResult<()> {
        self.buffer
            .truncate(size)
            .map_err(|_| HarborError::out_of_memory(&self.path, size))
    }

    fn size(&self) -> HarborResult<u64> {
        Ok(self.buffer.len())
    }

    fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }

    fn mark_clean(&mut self) {
        self.buffer.mark_clean();
    }

    fn snapshot(&self) -> HarborResult<Bytes> {
        Ok(Bytes::copy_from_slice(self.buffer.content()))
    }

    fn sync(&mut self) -> HarborResult<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> HarborResult<()> {
        Ok(())
    }
}

/// Stages open-file content as files under a shadow root.
#[derive(Debug)]
pub struct ShadowBacking {
    mapper: ShadowMapper,
    next_seq: AtomicU64,
}

impl ShadowBacking {
    pub fn new(mapper: ShadowMapper) -> Self {
        Self {
            mapper,
            next_seq: AtomicU64::new(1),
        }
    }
}

impl BackingStore for ShadowBacking {
    fn open(
        &self,
        path: &VirtualPath,
        content: Bytes,
        dirty: bool,
    ) -> HarborResult<Box<dyn BackingFile>> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let location = self.mapper.staging_file(path, seq);
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&location)?;
        file.write_all(&content)?;
        trace!(path = %path, location = %location.display(), size = content.len(), "Staged file");
        Ok(Box::new(ShadowFile {
            file,
            location,
            dirty,
            removed: false,
        }))
    }
}

#[derive(Debug)]
struct ShadowFile {
    file: File,
    location: PathBuf,
    dirty: bool,
    removed: bool,
}

impl ShadowFile {
    fn remove(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match fs::remove_file(&self.location) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl BackingFile for ShadowFile {
    fn read_at(&self, offset: u64, size: usize) -> HarborResult<Vec<u8>> {
        let len = self.file.metadata()?.len();
        if offset >= len {
            return Ok(Vec::new());
        }
        #[allow(clippy::cast_possible_truncation)]
        let available = (len - offset).min(size as u64) as usize;
        let mut buf = vec![0u8; available];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> HarborResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.file.write_all_at(data, offset)?;
        self.dirty = true;
        Ok(data.len())
    }

    fn truncate(&mut self, size: u64) -> HarborResult<()> {
        if self.file.metadata()?.len() != size {
            self.file.set_len(size)?;
            self.dirty = true;
        }
        Ok(())
    }

    fn size(&self) -> HarborResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn snapshot(&self) -> HarborResult<Bytes> {
        let len = self.size()?;
        Ok(Bytes::from(self.read_at(0, usize::try_from(len).unwrap_or(usize::MAX))?))
    }

    fn sync(&mut self) -> HarborResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> HarborResult<()> {
        self.remove()?;
        Ok(())
    }
}

impl Drop for ShadowFile {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(location = %self.location.display(), error = %e, "Failed to remove staged file");
        }
    }
}
