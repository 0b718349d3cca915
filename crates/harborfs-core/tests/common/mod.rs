//! Shared fixtures for filesystem scenario tests.

// Not every test file uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use harborfs_core::{
    CoreConfig, HarborError, HarborFs, HarborResult, ObjectEntry, ObjectKey, ObjectStoreRemote,
    OpenFlags, RemoteStore, StagingMode, VirtualPath,
};

/// Largest single write the kernel hands to a FUSE filesystem.
pub const BUFFER_UNIT: usize = 128 * 1024;

/// How long a stalled call sleeps; far beyond any test timeout.
const STALL: Duration = Duration::from_secs(3600);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("harborfs_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn p(raw: &str) -> VirtualPath {
    VirtualPath::parse(raw).expect("valid test path")
}

/// In-memory bucket with switchable failure modes.
#[derive(Debug)]
pub struct ControlledRemote {
    inner: ObjectStoreRemote,
    fail_puts: AtomicBool,
    stall_gets: AtomicBool,
    stall_lists: AtomicBool,
}

impl ControlledRemote {
    pub fn new() -> Self {
        Self {
            inner: ObjectStoreRemote::in_memory("test-bucket"),
            fail_puts: AtomicBool::new(false),
            stall_gets: AtomicBool::new(false),
            stall_lists: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn stall_gets(&self, stall: bool) {
        self.stall_gets.store(stall, Ordering::SeqCst);
    }

    pub fn stall_lists(&self, stall: bool) {
        self.stall_lists.store(stall, Ordering::SeqCst);
    }

    pub async fn seed(&self, key: &str, body: &[u8]) {
        self.inner
            .put_object(&ObjectKey::new(key), Bytes::copy_from_slice(body))
            .await
            .expect("seed object");
    }

    pub async fn body(&self, key: &str) -> Option<Bytes> {
        self.inner
            .get_object(&ObjectKey::new(key))
            .await
            .expect("read back object")
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .list_objects("")
            .await
            .expect("list bucket")
            .into_iter()
            .map(|e| e.key.as_str().to_string())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl RemoteStore for ControlledRemote {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn list_objects(&self, prefix: &str) -> HarborResult<Vec<ObjectEntry>> {
        if self.stall_lists.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
        }
        self.inner.list_objects(prefix).await
    }

    async fn head_object(&self, key: &ObjectKey) -> HarborResult<Option<ObjectEntry>> {
        self.inner.head_object(key).await
    }

    async fn get_object(&self, key: &ObjectKey) -> HarborResult<Option<Bytes>> {
        if self.stall_gets.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
        }
        self.inner.get_object(key).await
    }

    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> HarborResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(HarborError::remote(
                "put",
                key.as_str(),
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "injected failure"),
            ));
        }
        self.inner.put_object(key, data).await
    }

    async fn delete_object(&self, key: &ObjectKey) -> HarborResult<()> {
        self.inner.delete_object(key).await
    }

    async fn has_prefix(&self, prefix: &str) -> HarborResult<bool> {
        if self.stall_lists.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
        }
        self.inner.has_prefix(prefix).await
    }
}

/// A filesystem over a fresh [`ControlledRemote`].
pub struct Fixture {
    pub remote: Arc<ControlledRemote>,
    pub fs: HarborFs,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default().remote_timeout(Duration::from_secs(2)))
    }

    pub fn with_config(config: CoreConfig) -> Self {
        init_tracing();
        let remote = Arc::new(ControlledRemote::new());
        let fs = HarborFs::new(Arc::clone(&remote) as Arc<dyn RemoteStore>, config);
        Self { remote, fs }
    }

    /// Staging on disk below `root`.
    pub fn on_disk(root: &std::path::Path) -> Self {
        Self::with_config(
            CoreConfig::default()
                .remote_timeout(Duration::from_secs(2))
                .staging(StagingMode::Disk(root.to_path_buf())),
        )
    }

    pub async fn seeded(objects: &[(&str, &str)]) -> Self {
        let fixture = Self::new();
        for (key, body) in objects {
            fixture.remote.seed(key, body.as_bytes()).await;
        }
        fixture
    }

    /// Creates `path` with `content` through the filesystem and closes it.
    pub async fn write_file(&self, path: &str, content: &[u8]) {
        let fh = self
            .fs
            .create(&p(path), OpenFlags::read_write(), 0o644)
            .await
            .expect("create");
        let mut offset = 0;
        for chunk in content.chunks(BUFFER_UNIT) {
            let written = self
                .fs
                .write(fh, chunk, offset as u64)
                .await
                .expect("write");
            assert_eq!(written, chunk.len());
            offset += written;
        }
        self.fs.release(fh).await.expect("release");
    }

    /// Reads `path` to the end through a fresh handle.
    pub async fn read_file(&self, path: &str) -> HarborResult<Vec<u8>> {
        let fh = self.fs.open(&p(path), OpenFlags::read_only()).await?;
        let mut content = Vec::new();
        loop {
            let chunk = self
                .fs
                .read(fh, BUFFER_UNIT, content.len() as u64)
                .await?;
            if chunk.is_empty() {
                break;
            }
            content.extend_from_slice(&chunk);
        }
        self.fs.release(fh).await?;
        Ok(content)
    }

    /// Names returned by readdir, in order.
    pub async fn names(&self, dir: &str) -> Vec<String> {
        self.fs
            .readdir(&p(dir))
            .await
            .expect("readdir")
            .into_iter()
            .map(|e| e.name)
            .collect()
    }
}

/// Deterministic content of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
