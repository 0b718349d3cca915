//! In-memory content of an open object.
//!
//! Objects cannot be patched in place: the store only accepts whole bodies.
//! [`WriteBuffer`] therefore implements read-modify-write:
//! 1. On first access (without truncate): the current body is fetched
//! 2. On write: data is copied into the buffer at the given offset
//! 3. On flush/release: if modified, the whole buffer is uploaded
//!
//! Growth goes through `try_reserve`, so a size the allocator cannot satisfy
//! comes back as an error for the caller to report instead of aborting.

use std::collections::TryReserveError;

/// Random-access buffer over one object's body.
///
/// # Example
///
/// ```
/// use harborfs_core::WriteBuffer;
///
/// let mut buf = WriteBuffer::new(Vec::new());
/// buf.write(0, b"Hello, World!").unwrap();
/// assert_eq!(buf.len(), 13);
/// assert!(buf.is_dirty());
/// assert_eq!(buf.read(0, 5), b"Hello");
/// ```
#[derive(Debug, Default)]
pub struct WriteBuffer {
    content: Vec<u8>,
    /// Modified since the last upload.
    dirty: bool,
}

impl WriteBuffer {
    /// Buffer over an object's current body.
    pub fn new(existing_content: Vec<u8>) -> Self {
        Self {
            content: existing_content,
            dirty: false,
        }
    }

    /// Writes `data` at `offset`.
    ///
    /// The buffer grows as needed and gaps are zero-filled. An empty write
    /// changes nothing, including the length. On error the buffer is left
    /// as it was.
    ///
    /// Returns the number of bytes written (always `data.len()`).
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, TryReserveError> {
        if data.is_empty() {
            return Ok(0);
        }
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = offset.saturating_add(data.len());
        self.grow_to(end)?;

        self.content[offset..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    /// Reads up to `size` bytes at `offset`; empty past the end.
    pub fn read(&self, offset: u64, size: usize) -> &[u8] {
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        if offset >= self.content.len() {
            return &[];
        }
        let end = offset.saturating_add(size).min(self.content.len());
        &self.content[offset..end]
    }

    /// Resizes to `size`, zero-filling when growing.
    pub fn truncate(&mut self, size: u64) -> Result<(), TryReserveError> {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size == self.content.len() {
            return Ok(());
        }
        if size < self.content.len() {
            self.content.truncate(size);
        } else {
            self.grow_to(size)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Zero-extends to `end` bytes; never shrinks.
    fn grow_to(&mut self, end: usize) -> Result<(), TryReserveError> {
        if end > self.content.len() {
            // Vec keeps amortized doubling, so sequential appends stay cheap
            self.content.try_reserve(end - self.content.len())?;
            self.content.resize(end, 0);
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Mark the buffer as clean (after a successful upload).
    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Mark the buffer as dirty (content known to differ from the remote).
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}
