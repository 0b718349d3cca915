//! Error taxonomy for filesystem operations over an object store.
//!
//! Every operation in this crate returns [`HarborResult`]. Errors are grouped
//! into an [`ErrorCategory`] which is the single place where POSIX error codes
//! are decided, so transports (FUSE today) never re-derive the mapping.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::path::VirtualPath;

/// Boxed error from a remote store client.
pub type RemoteSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type HarborResult<T> = Result<T, HarborError>;

/// Errors produced by the translation layer.
#[derive(Debug, Error)]
pub enum HarborError {
    /// The path has no object and no synthesized directory.
    #[error("No such file or directory: {0}")]
    NotFound(VirtualPath),

    /// Access check failed.
    #[error("Permission denied: {0}")]
    PermissionDenied(VirtualPath),

    /// Operation on an unknown or already released handle.
    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    /// Transport or authentication failure while talking to the store.
    #[error("Remote store unavailable during {operation} of '{key}': {source}")]
    RemoteUnavailable {
        operation: &'static str,
        key: String,
        #[source]
        source: RemoteSource,
    },

    /// A remote call did not complete within the configured bound.
    #[error("Remote {operation} of '{key}' timed out after {timeout:?}")]
    RemoteTimeout {
        operation: &'static str,
        key: String,
        timeout: Duration,
    },

    /// Local state and the remote object diverged.
    ///
    /// Only the named path is affected; the underlying failure is kept as the
    /// source so callers can decide whether to retry.
    #[error("Inconsistent state for {path}: {reason}")]
    Inconsistent {
        path: VirtualPath,
        reason: String,
        #[source]
        source: Box<HarborError>,
    },

    #[error("File exists: {0}")]
    AlreadyExists(VirtualPath),

    #[error("Directory not empty: {0}")]
    NotEmpty(VirtualPath),

    #[error("Not a directory: {0}")]
    NotADirectory(VirtualPath),

    #[error("Is a directory: {0}")]
    IsADirectory(VirtualPath),

    /// The string could not be normalized into a virtual path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Mutation attempted on a read-only mount.
    #[error("Read-only filesystem: {0}")]
    ReadOnly(VirtualPath),

    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("Resource busy: {0}")]
    Busy(VirtualPath),

    /// The requested size exceeds what may be staged or uploaded.
    #[error("File too large: {path} would be {size} bytes, limit is {limit}")]
    FileTooLarge {
        path: VirtualPath,
        size: u64,
        limit: u64,
    },

    /// Local I/O error (staging files, shadow root).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HarborError {
    /// Wraps a client error as [`HarborError::RemoteUnavailable`].
    pub fn remote(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<RemoteSource>,
    ) -> Self {
        HarborError::RemoteUnavailable {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    /// Wraps `self` as the cause of a divergence on `path`.
    pub fn diverged(self, path: &VirtualPath, reason: impl Into<String>) -> Self {
        HarborError::Inconsistent {
            path: path.clone(),
            reason: reason.into(),
            source: Box::new(self),
        }
    }

    /// Classifies this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarborError::NotFound(_) => ErrorCategory::NotFound,
            HarborError::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            HarborError::InvalidHandle(_) => ErrorCategory::InvalidHandle,
            HarborError::RemoteUnavailable { .. } | HarborError::RemoteTimeout { .. } => {
                ErrorCategory::RemoteUnavailable
            }
            HarborError::Inconsistent { .. } => ErrorCategory::InconsistentState,
            HarborError::AlreadyExists(_) => ErrorCategory::AlreadyExists,
            HarborError::NotEmpty(_) => ErrorCategory::NotEmpty,
            HarborError::NotADirectory(_) => ErrorCategory::NotADirectory,
            HarborError::IsADirectory(_) => ErrorCategory::IsADirectory,
            HarborError::InvalidPath(_) | HarborError::InvalidArgument(_) => {
                ErrorCategory::InvalidArgument
            }
            HarborError::ReadOnly(_) => ErrorCategory::ReadOnly,
            HarborError::NotSupported(_) => ErrorCategory::NotSupported,
            HarborError::Busy(_) => ErrorCategory::Busy,
            HarborError::FileTooLarge { .. } => ErrorCategory::FileTooLarge,
            HarborError::Io(e) => ErrorCategory::Io(io_error_to_errno(e)),
        }
    }

    /// POSIX error code for this error.
    pub fn to_errno(&self) -> i32 {
        self.category().to_errno()
    }

    /// Allocation failure while staging content for `path`.
    pub(crate) fn out_of_memory(path: &VirtualPath, size: u64) -> Self {
        tracing::warn!(path = %path, size, "Could not allocate staging memory");
        HarborError::Io(io::Error::from_raw_os_error(libc::ENOMEM))
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RemoteUnavailable | ErrorCategory::InconsistentState
        )
    }

    /// Returns true for [`HarborError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, HarborError::NotFound(_))
    }
}

/// Classification of errors, independent of the transport that reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    PermissionDenied,
    InvalidHandle,
    RemoteUnavailable,
    InconsistentState,
    AlreadyExists,
    NotEmpty,
    NotADirectory,
    IsADirectory,
    InvalidArgument,
    ReadOnly,
    NotSupported,
    Busy,
    FileTooLarge,
    /// Local I/O failure carrying its own errno.
    Io(i32),
}

impl ErrorCategory {
    /// Converts the category to a libc error code.
    pub fn to_errno(self) -> i32 {
        match self {
            ErrorCategory::NotFound => libc::ENOENT,
            ErrorCategory::PermissionDenied => libc::EACCES,
            ErrorCategory::InvalidHandle => libc::EBADF,
            ErrorCategory::RemoteUnavailable | ErrorCategory::InconsistentState => libc::EIO,
            ErrorCategory::AlreadyExists => libc::EEXIST,
            ErrorCategory::NotEmpty => libc::ENOTEMPTY,
            ErrorCategory::NotADirectory => libc::ENOTDIR,
            ErrorCategory::IsADirectory => libc::EISDIR,
            ErrorCategory::InvalidArgument => libc::EINVAL,
            ErrorCategory::ReadOnly => libc::EROFS,
            ErrorCategory::NotSupported => libc::ENOTSUP,
            ErrorCategory::Busy => libc::EBUSY,
            ErrorCategory::FileTooLarge => libc::EFBIG,
            ErrorCategory::Io(errno) => errno,
        }
    }
}

/// Converts an IO error to a libc error code.
///
/// Uses the raw OS error if available, otherwise falls back to EIO.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}
