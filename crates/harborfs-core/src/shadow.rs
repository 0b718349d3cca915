//! Mapping from virtual paths to the local shadow area.
//!
//! The mapper is a pure function of the path: it never touches the disk and
//! does not check that anything exists. Callers combine it with the resolver.

use std::path::{Path, PathBuf};

use crate::path::VirtualPath;

/// Suffix separating a staged copy from the mirrored path.
const STAGING_MARK: &str = ".~";

/// Maps client paths into a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowMapper {
    root: PathBuf,
}

impl ShadowMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location mirroring `path` under the shadow root.
    pub fn resolve(&self, path: &VirtualPath) -> PathBuf {
        match path.object_key() {
            Some(key) => self.root.join(key.as_str()),
            None => self.root.clone(),
        }
    }

    /// Location of one staged copy of `path`.
    ///
    /// Each open handle stages into its own file so concurrent handles on the
    /// same path never share bytes before write-back.
    pub fn staging_file(&self, path: &VirtualPath, seq: u64) -> PathBuf {
        let mut location = self.resolve(path).into_os_string();
        location.push(format!("{STAGING_MARK}{seq}"));
        PathBuf::from(location)
    }
}
