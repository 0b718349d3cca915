//! Remote object store seam.
//!
//! [`RemoteStore`] is the only surface the translation layer needs from an
//! object store: list under a prefix, head, get, put and delete. Every call
//! made by the rest of the crate goes through [`BoundedRemote`], which puts a
//! deadline on it so a hung endpoint surfaces as an I/O error instead of
//! blocking a handle forever.

mod object;

pub use object::ObjectStoreRemote;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{trace, warn};

use crate::error::{HarborError, HarborResult};
use crate::path::ObjectKey;

/// One object as reported by a listing or a head call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: ObjectKey,
    /// `None` when the store did not report a length.
    pub size: Option<u64>,
    /// `None` when the store does not track modification times.
    pub last_modified: Option<SystemTime>,
}

/// Operations the filesystem needs from an object store.
///
/// Prefixes are either empty (whole bucket) or end with `/`.
#[async_trait]
pub trait RemoteStore: Send + Sync + fmt::Debug {
    /// Bucket this store is bound to.
    fn bucket(&self) -> &str;

    /// Lists every object whose key starts with `prefix`, recursively.
    async fn list_objects(&self, prefix: &str) -> HarborResult<Vec<ObjectEntry>>;

    /// Metadata of `key`, or `None` if it does not exist.
    async fn head_object(&self, key: &ObjectKey) -> HarborResult<Option<ObjectEntry>>;

    /// Body of `key`, or `None` if it does not exist.
    async fn get_object(&self, key: &ObjectKey) -> HarborResult<Option<Bytes>>;

    /// Replaces the body of `key`.
    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> HarborResult<()>;

    /// Deletes `key`. Deleting a missing key succeeds.
    async fn delete_object(&self, key: &ObjectKey) -> HarborResult<()>;

    /// Returns true if at least one key starts with `prefix`.
    async fn has_prefix(&self, prefix: &str) -> HarborResult<bool> {
        Ok(!self.list_objects(prefix).await?.is_empty())
    }
}

/// A [`RemoteStore`] with a deadline on every call.
#[derive(Debug, Clone)]
pub struct BoundedRemote {
    inner: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl BoundedRemote {
    pub fn new(inner: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, fut: F) -> HarborResult<T>
    where
        F: Future<Output = HarborResult<T>>,
    {
        trace!(operation, key, "remote call");
        if let Ok(result) = tokio::time::timeout(self.timeout, fut).await {
            result
        } else {
            warn!(
                operation,
                key,
                bucket = self.bucket(),
                timeout_ms = self.timeout.as_millis(),
                "Remote call timed out"
            );
            Err(HarborError::RemoteTimeout {
                operation,
                key: key.to_string(),
                timeout: self.timeout,
            })
        }
    }

    pub async fn list_objects(&self, prefix: &str) -> HarborResult<Vec<ObjectEntry>> {
        self.bounded("list", prefix, self.inner.list_objects(prefix))
            .await
    }

    pub async fn has_prefix(&self, prefix: &str) -> HarborResult<bool> {
        self.bounded("list", prefix, self.inner.has_prefix(prefix))
            .await
    }

    pub async fn head_object(&self, key: &ObjectKey) -> HarborResult<Option<ObjectEntry>> {
        self.bounded("head", key.as_str(), self.inner.head_object(key))
            .await
    }

    pub async fn get_object(&self, key: &ObjectKey) -> HarborResult<Option<Bytes>> {
        self.bounded("get", key.as_str(), self.inner.get_object(key))
            .await
    }

    pub async fn put_object(&self, key: &ObjectKey, data: Bytes) -> HarborResult<()> {
        self.bounded("put", key.as_str(), self.inner.put_object(key, data))
            .await
    }

    pub async fn delete_object(&self, key: &ObjectKey) -> HarborResult<()> {
        self.bounded("delete", key.as_str(), self.inner.delete_object(key))
            .await
    }

    /// Copies `from` to `to` through the client.
    ///
    /// Returns false if `from` does not exist.
    pub async fn copy_object(&self, from: &ObjectKey, to: &ObjectKey) -> HarborResult<bool> {
        match self.get_object(from).await? {
            Some(body) => {
                self.put_object(to, body).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
