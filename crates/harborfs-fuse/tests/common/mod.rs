//! Mount harness for FUSE integration tests.
//!
//! `TestMount` mounts an in-memory bucket on a temporary directory and
//! unmounts it on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use harborfs_core::{CoreConfig, HarborFs, ObjectKey, ObjectStoreRemote, RemoteStore};
use harborfs_fuse::{HarborFuse, MountConfig, MountHandle, mount};
use tempfile::TempDir;
use tokio::runtime::Runtime;

const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

pub struct TestMount {
    // Field order matters: unmount before the runtime goes away
    handle: Option<MountHandle>,
    pub remote: Arc<ObjectStoreRemote>,
    pub mount_path: PathBuf,
    runtime: Runtime,
    _temp: TempDir,
}

impl TestMount {
    /// Mounts an empty bucket.
    pub fn empty() -> Result<Self, String> {
        Self::seeded(&[])
    }

    /// Mounts a bucket holding `objects` (key, body).
    pub fn seeded(objects: &[(&str, &[u8])]) -> Result<Self, String> {
        let runtime = Runtime::new().map_err(|e| format!("Failed to start runtime: {e}"))?;
        let remote = Arc::new(ObjectStoreRemote::in_memory("mount-test"));
        for (key, body) in objects {
            runtime
                .block_on(remote.put_object(&ObjectKey::new(*key), Bytes::copy_from_slice(body)))
                .map_err(|e| format!("Failed to seed {key}: {e}"))?;
        }

        let temp = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let core = CoreConfig::default().remote_timeout(Duration::from_secs(5));
        let fs = Arc::new(HarborFs::new(Arc::clone(&remote) as Arc<dyn RemoteStore>, core));
        // Zero TTLs keep the kernel from serving stale attributes between steps
        let config = MountConfig::for_bucket("mount-test")
            .attr_ttl(Duration::ZERO)
            .negative_ttl(Duration::ZERO)
            .bridge_timeout(Duration::from_secs(20));
        let fuse = HarborFuse::new(fs, runtime.handle().clone(), config.clone());
        let handle = mount(fuse, &mount_path, &config).map_err(|e| format!("Failed to mount: {e}"))?;

        Self::wait_for_mount(&mount_path)?;

        Ok(Self {
            handle: Some(handle),
            remote,
            mount_path,
            runtime,
            _temp: temp,
        })
    }

    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        use std::os::unix::fs::MetadataExt;

        let parent = mount_path.parent().ok_or("mount path has no parent")?;
        let parent_dev = fs::metadata(parent)
            .map_err(|e| format!("Failed to stat parent: {e}"))?
            .dev();
        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(meta) = fs::metadata(mount_path)
                && meta.dev() != parent_dev
            {
                return Ok(());
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err(format!("Mount not ready within {MOUNT_READY_TIMEOUT:?}"))
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.mount_path.join(rel)
    }

    pub fn write(&self, rel: &str, content: &[u8]) -> std::io::Result<()> {
        fs::write(self.path(rel), content)
    }

    pub fn read(&self, rel: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.path(rel))
    }

    /// Sorted names of a directory (without `.` and `..`).
    pub fn list(&self, rel: &str) -> std::io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(rel))?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        names.sort();
        Ok(names)
    }

    /// Body of `key` straight from the bucket.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.runtime
            .block_on(self.remote.get_object(&ObjectKey::new(key)))
            .ok()
            .flatten()
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unmount();
        }
    }
}

#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI containers).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
