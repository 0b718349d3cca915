//! Mounting and unmounting.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use fuser::{BackgroundSession, MountOption};
use tracing::{debug, info, warn};

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::filesystem::HarborFuse;

/// Bound on the mount syscall; a stale FUSE mount at the mount point can
/// block it indefinitely.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a graceful join before falling back to a lazy unmount.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Kernel mount options for `config`.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype("harborfs".to_string()),
        MountOption::NoDev,
        MountOption::NoSuid,
    ];
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.read_only {
        options.push(MountOption::RO);
    } else {
        options.push(MountOption::RW);
    }
    options
}

/// A mounted filesystem. Dropping it unmounts.
pub struct MountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl MountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session to finish.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "Unmounting");
        if let Some(session) = self.session.take() {
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "Unmounted");
    }

    fn lazy_unmount(&self) {
        #[cfg(target_os = "linux")]
        let result = std::process::Command::new("fusermount")
            .arg("-uz")
            .arg(&self.mountpoint)
            .output();
        #[cfg(not(target_os = "linux"))]
        let result = std::process::Command::new("umount")
            .arg("-f")
            .arg(&self.mountpoint)
            .output();
        if let Err(e) = result {
            warn!(mountpoint = %self.mountpoint.display(), error = %e, "Forced unmount failed");
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mountpoint = %self.mountpoint.display(), "Unmounting on drop");
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });
        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            warn!(
                mountpoint = %self.mountpoint.display(),
                timeout = ?JOIN_TIMEOUT,
                "Session did not finish, forcing unmount"
            );
            self.lazy_unmount();
        }
    }
}

/// Mounts `fs` at `mountpoint` in the background.
pub fn mount(fs: HarborFuse, mountpoint: &Path, config: &MountConfig) -> FuseResult<MountHandle> {
    if !mountpoint.is_dir() {
        return Err(FuseError::BadMountpoint(mountpoint.to_path_buf()));
    }
    let options = mount_options(config);
    info!(
        mountpoint = %mountpoint.display(),
        fs_name = %config.fs_name,
        read_only = config.read_only,
        "Mounting"
    );

    let target = mountpoint.to_path_buf();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(fuser::spawn_mount2(fs, &target, &options));
    });
    let session = match rx.recv_timeout(MOUNT_TIMEOUT) {
        Ok(result) => result?,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            return Err(FuseError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "mount timed out; the mount point may be a stale FUSE mount",
            )));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            return Err(FuseError::Io(io::Error::other(
                "mount thread terminated unexpectedly",
            )));
        }
    };

    Ok(MountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}
