//! Errors raised while serving FUSE requests.
//!
//! Filesystem failures arrive as [`HarborError`] and keep the errno the core
//! assigns them. Everything else here is specific to the transport: the
//! inode table, the async bridge and mounting.

use std::io;
use std::path::PathBuf;

use harborfs_core::HarborError;
use harborfs_core::error::io_error_to_errno;
use thiserror::Error;

use crate::async_bridge::BridgeError;

#[derive(Debug, Error)]
pub enum FuseError {
    /// Boxed to keep the enum small.
    #[error("{0}")]
    Fs(Box<HarborError>),

    #[error("Async bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// The kernel referenced an inode this mount never handed out or
    /// already forgot.
    #[error("Unknown inode: {0}")]
    UnknownInode(u64),

    /// Name from the kernel is not valid UTF-8.
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Mount point is not a directory: {}", .0.display())]
    BadMountpoint(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FuseError {
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Fs(e) => e.to_errno(),
            FuseError::Bridge(e) => e.to_errno(),
            FuseError::UnknownInode(_) => libc::ENOENT,
            FuseError::InvalidName(_) => libc::EINVAL,
            FuseError::BadMountpoint(_) => libc::ENOTDIR,
            FuseError::Io(e) => io_error_to_errno(e),
        }
    }
}

impl From<HarborError> for FuseError {
    fn from(e: HarborError) -> Self {
        FuseError::Fs(Box::new(e))
    }
}

pub type FuseResult<T> = Result<T, FuseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use harborfs_core::VirtualPath;
    use std::time::Duration;

    #[test]
    fn test_core_errors_keep_their_errno() {
        let cases = [
            (HarborError::NotFound(VirtualPath::root()), libc::ENOENT),
            (HarborError::PermissionDenied(VirtualPath::root()), libc::EACCES),
            (HarborError::InvalidHandle(3), libc::EBADF),
            (
                HarborError::RemoteTimeout {
                    operation: "get",
                    key: "k".to_string(),
                    timeout: Duration::from_secs(1),
                },
                libc::EIO,
            ),
            (HarborError::ReadOnly(VirtualPath::root()), libc::EROFS),
        ];
        for (err, errno) in cases {
            assert_eq!(FuseError::from(err).to_errno(), errno);
        }
    }

    #[test]
    fn test_transport_errors() {
        assert_eq!(FuseError::UnknownInode(9).to_errno(), libc::ENOENT);
        assert_eq!(FuseError::InvalidName("x".into()).to_errno(), libc::EINVAL);
        let timeout = BridgeError::Timeout {
            op: "read",
            after: Duration::from_secs(1),
        };
        assert_eq!(FuseError::from(timeout).to_errno(), libc::EIO);
        assert_eq!(
            FuseError::from(BridgeError::Panicked("write")).to_errno(),
            libc::EIO
        );
        assert_eq!(
            FuseError::from(io::Error::from_raw_os_error(libc::ENOSPC)).to_errno(),
            libc::ENOSPC
        );
    }

    #[test]
    fn test_display_includes_context() {
        let e = FuseError::from(HarborError::NotFound(VirtualPath::parse("/a/b").unwrap()));
        assert!(e.to_string().contains("/a/b"));
        let e = FuseError::BadMountpoint(PathBuf::from("/mnt/x"));
        assert!(e.to_string().contains("/mnt/x"));
    }
}
