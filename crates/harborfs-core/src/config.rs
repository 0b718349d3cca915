//! Configuration for the remote store and the translation layer.
//!
//! [`RemoteConfig`] is supplied once at startup and never changes for the
//! lifetime of the process. [`CoreConfig`] tunes timeouts, staging and the
//! ownership/permission bits reported for synthesized metadata.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::HarborError;

/// Default endpoint domain of the object store.
pub const DEFAULT_ENDPOINT: &str = "obs.casearth.cn";

/// Region passed to S3 signing when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default bound on every remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest object a single upload can create (5 GiB, the S3 `PutObject`
/// limit). Also the default cap on staged content.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default permission bits for files.
pub const DEFAULT_FILE_PERM: u16 = 0o644;

/// Default permission bits for directories.
pub const DEFAULT_DIR_PERM: u16 = 0o755;

/// URL scheme used to reach the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = HarborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(HarborError::InvalidArgument(format!(
                "unknown scheme '{other}', expected http or https"
            ))),
        }
    }
}

/// Connection settings for an S3-compatible bucket.
///
/// The secret key is redacted from `Debug` output.
#[derive(Debug)]
pub struct RemoteConfig {
    pub scheme: Scheme,
    /// Endpoint domain, without scheme (`obs.casearth.cn`).
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: SecretString,
}

impl RemoteConfig {
    /// Creates a configuration for `bucket` on the default endpoint.
    pub fn new(
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            scheme: Scheme::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: SecretString::from(secret_key.into()),
        }
    }

    #[must_use]
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Full endpoint URL (`https://obs.casearth.cn`).
    ///
    /// An endpoint that already carries a scheme is used as-is.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("{}://{}", self.scheme, self.endpoint)
        }
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

/// Where open-file bytes live between open and write-back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StagingMode {
    /// In-process buffers.
    #[default]
    Memory,
    /// Files beneath a local shadow root.
    Disk(PathBuf),
}

/// Settings for the translation layer.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Bound applied to every remote call.
    ///
    /// A call exceeding it fails with an I/O error. Default: 30 seconds.
    pub remote_timeout: Duration,

    /// Staging of open-file content. Default: memory.
    pub staging: StagingMode,

    /// Owner reported for every entry.
    pub uid: u32,
    pub gid: u32,

    pub file_perm: u16,
    pub dir_perm: u16,

    /// Rejects every mutation with EROFS.
    pub read_only: bool,

    /// Largest size a file may be written or truncated to.
    ///
    /// Beyond it writes and truncates fail with EFBIG before anything is
    /// staged. Default: [`DEFAULT_MAX_FILE_SIZE`].
    pub max_file_size: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            staging: StagingMode::Memory,
            uid: 0,
            gid: 0,
            file_perm: DEFAULT_FILE_PERM,
            dir_perm: DEFAULT_DIR_PERM,
            read_only: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl CoreConfig {
    /// Sets the bound on remote calls.
    #[must_use]
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Sets the staging mode.
    #[must_use]
    pub fn staging(mut self, staging: StagingMode) -> Self {
        self.staging = staging;
        self
    }

    /// Sets the owner reported for every entry.
    #[must_use]
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    #[must_use]
    pub fn permissions(mut self, file_perm: u16, dir_perm: u16) -> Self {
        self.file_perm = file_perm;
        self.dir_perm = dir_perm;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Caps the size of staged content.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }
}
