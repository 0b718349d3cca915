//! Mount configuration for the FUSE layer.
//!
//! These settings only affect how results are handed to the kernel (cache
//! lifetimes, mount options, the bridge deadline). Everything about the
//! bucket and the translation layer lives in
//! [`harborfs_core::CoreConfig`].

use std::time::Duration;

/// Kernel attribute cache lifetime for remote buckets.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Negative lookup cache lifetime.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_millis(500);

/// Outer deadline for one FUSE request, on top of the per-call remote bound.
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes handed to the kernel and cached locally.
    ///
    /// Other clients of the bucket are only noticed once this expires.
    pub attr_ttl: Duration,

    /// Time-to-live for cached ENOENT lookups.
    pub negative_ttl: Duration,

    /// Deadline for a whole FUSE request.
    ///
    /// A request exceeding it fails with EIO. Must exceed the remote timeout,
    /// since one request can issue several remote calls.
    pub bridge_timeout: Duration,

    /// Name shown in the mount table.
    pub fs_name: String,

    /// Allow users other than the mounting one to access the mount.
    pub allow_other: bool,

    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,

    /// Mount read-only at the kernel level as well.
    pub read_only: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            bridge_timeout: DEFAULT_BRIDGE_TIMEOUT,
            fs_name: "harborfs".to_string(),
            allow_other: false,
            auto_unmount: true,
            read_only: false,
        }
    }
}

impl MountConfig {
    /// Configuration named after the mounted bucket.
    pub fn for_bucket(bucket: &str) -> Self {
        Self {
            fs_name: format!("harborfs:{bucket}"),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Sets the deadline for a whole FUSE request.
    #[must_use]
    pub fn bridge_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_timeout = timeout;
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn auto_unmount(mut self, enabled: bool) -> Self {
        self.auto_unmount = enabled;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
