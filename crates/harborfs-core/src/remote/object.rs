//! [`RemoteStore`] over the `object_store` crate.
//!
//! Production mounts talk to an S3-compatible endpoint through
//! [`AmazonS3Builder`]. Tests use the in-memory store and development mounts
//! can point at a local directory.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::{ClientOptions, ObjectMeta, ObjectStore, PutPayload};
use tracing::{debug, info};

use super::{ObjectEntry, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{HarborError, HarborResult};
use crate::path::{ObjectKey, SEPARATOR};

/// Object store client bound to one bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreRemote {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreRemote {
    /// Connects to an S3-compatible endpoint.
    ///
    /// `timeout` bounds each HTTP request; [`super::BoundedRemote`] bounds the
    /// whole call including retries.
    pub fn s3(config: &RemoteConfig, timeout: Duration) -> HarborResult<Self> {
        let endpoint = config.endpoint_url();
        let allow_http = endpoint.starts_with("http://");
        let store = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_endpoint(&endpoint)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(config.secret())
            .with_allow_http(allow_http)
            .with_virtual_hosted_style_request(false)
            .with_client_options(
                ClientOptions::new()
                    .with_timeout(timeout)
                    .with_connect_timeout(timeout),
            )
            .build()
            .map_err(|e| HarborError::remote("connect", config.bucket.as_str(), e))?;

        info!(
            bucket = %config.bucket,
            endpoint = %endpoint,
            region = %config.region,
            "Configured S3 remote store"
        );
        Ok(Self::from_store(config.bucket.clone(), Arc::new(store)))
    }

    /// Serves a local directory as the bucket.
    pub fn local(bucket: impl Into<String>, root: &Path) -> HarborResult<Self> {
        let store = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| HarborError::remote("connect", root.display().to_string(), e))?;
        info!(root = %root.display(), "Configured local directory remote store");
        Ok(Self::from_store(bucket, Arc::new(store)))
    }

    /// Ephemeral in-process bucket.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::from_store(bucket, Arc::new(InMemory::new()))
    }

    pub fn from_store(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Location to list for `prefix`, `None` for the whole bucket.
    fn list_location(prefix: &str) -> HarborResult<Option<StorePath>> {
        let dir = prefix.trim_end_matches(SEPARATOR);
        if dir.is_empty() {
            return Ok(None);
        }
        store_path(dir).map(Some)
    }
}

/// Store location for `key`, taken verbatim.
///
/// `StorePath::from` percent-encodes characters such as `#`, `%` and spaces,
/// and listings hand the encoded form back, so a key would not survive the
/// trip. `parse` keeps the key as is and only rejects what the store cannot
/// address (empty or dot segments, control characters).
fn store_path(key: &str) -> HarborResult<StorePath> {
    StorePath::parse(key).map_err(|e| HarborError::InvalidPath(format!("{key}: {e}")))
}

fn entry_from_meta(meta: ObjectMeta) -> ObjectEntry {
    ObjectEntry {
        key: ObjectKey::new(meta.location.as_ref()),
        size: Some(meta.size as u64),
        last_modified: Some(SystemTime::from(meta.last_modified)),
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreRemote {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(&self, prefix: &str) -> HarborResult<Vec<ObjectEntry>> {
        let location = Self::list_location(prefix)?;
        let metas: Vec<ObjectMeta> = self
            .store
            .list(location.as_ref())
            .try_collect()
            .await
            .map_err(|e| HarborError::remote("list", prefix, e))?;

        let entries: Vec<ObjectEntry> = metas
            .into_iter()
            .filter(|meta| meta.location.as_ref().starts_with(prefix))
            .map(entry_from_meta)
            .collect();
        debug!(bucket = %self.bucket, prefix, count = entries.len(), "Listed objects");
        Ok(entries)
    }

    async fn head_object(&self, key: &ObjectKey) -> HarborResult<Option<ObjectEntry>> {
        match self.store.head(&store_path(key.as_str())?).await {
            Ok(meta) => Ok(Some(entry_from_meta(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(HarborError::remote("head", key.as_str(), e)),
        }
    }

    async fn get_object(&self, key: &ObjectKey) -> HarborResult<Option<Bytes>> {
        let result = match self.store.get(&store_path(key.as_str())?).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(HarborError::remote("get", key.as_str(), e)),
        };
        let body = result
            .bytes()
            .await
            .map_err(|e| HarborError::remote("get", key.as_str(), e))?;
        debug!(bucket = %self.bucket, key = %key, size = body.len(), "Fetched object");
        Ok(Some(body))
    }

    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> HarborResult<()> {
        let size = data.len();
        self.store
            .put(&store_path(key.as_str())?, PutPayload::from(data))
            .await
            .map_err(|e| HarborError::remote("put", key.as_str(), e))?;
        debug!(bucket = %self.bucket, key = %key, size, "Stored object");
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> HarborResult<()> {
        match self.store.delete(&store_path(key.as_str())?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                debug!(bucket = %self.bucket, key = %key, "Deleted object");
                Ok(())
            }
            Err(e) => Err(HarborError::remote("delete", key.as_str(), e)),
        }
    }

    async fn has_prefix(&self, prefix: &str) -> HarborResult<bool> {
        let location = Self::list_location(prefix)?;
        let mut stream = self.store.list(location.as_ref());
        while let Some(item) = stream.next().await {
            let meta = item.map_err(|e| HarborError::remote("list", prefix, e))?;
            if meta.location.as_ref().starts_with(prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
