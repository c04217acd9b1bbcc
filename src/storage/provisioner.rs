//! Bucket provisioning and the process-wide storage instance / 存储桶初始化与全局实例
//!
//! `get_instance()` hands out one shared `Storage<S3Client>`. The first caller
//! connects and creates every configured bucket that is missing; everyone
//! else (including concurrent first callers) waits for that and reuses it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use crate::config::{self, StorageConfig};
use super::{
    BucketInfo, ObjectInfo, ObjectStat, ObjectStorage, PostPolicy, PresignedPost, S3Client,
};

/// Global storage instance (lazy) / 全局存储实例（懒加载）
static STORAGE: Lazy<StorageCell<S3Client>> = Lazy::new(StorageCell::new);

/// Provisioned storage: a backend client whose configured buckets are known to exist
pub struct Storage<C> {
    client: C,
}

impl<C: ObjectStorage> Storage<C> {
    /// Reconcile `buckets` against the backend, in order, then wrap the client.
    ///
    /// Stops at the first failure; buckets created before it are left in place.
    pub async fn provision(client: C, buckets: &[String]) -> Result<Self, C::Error> {
        let mut created = 0usize;
        for bucket in buckets {
            if ensure_bucket(&client, bucket).await? {
                created += 1;
            }
        }
        tracing::info!(
            "Object storage ready: {} bucket(s) configured, {} created",
            buckets.len(),
            created
        );
        Ok(Self { client })
    }
}

impl<C> Storage<C> {
    /// Underlying client, for capabilities the wrapper does not expose / 底层客户端
    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Create `bucket` if absent. Returns whether this call created it.
async fn ensure_bucket<C: ObjectStorage>(client: &C, bucket: &str) -> Result<bool, C::Error> {
    if client.bucket_exists(bucket).await? {
        tracing::debug!("Bucket already exists: {}", bucket);
        return Ok(false);
    }

    match client.make_bucket(bucket).await {
        Ok(()) => {
            tracing::info!("Bucket created: {}", bucket);
            Ok(true)
        }
        Err(e) => {
            // Lost a create race with another process: the bucket exists now, which is all we need
            if client.bucket_exists(bucket).await.unwrap_or(false) {
                tracing::warn!("Bucket {} appeared concurrently, ignoring create error: {}", bucket, e);
                Ok(false)
            } else {
                tracing::error!("Failed to create bucket {}: {}", bucket, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<C: ObjectStorage> ObjectStorage for Storage<C> {
    type Error = C::Error;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, C::Error> {
        self.client.bucket_exists(bucket).await
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), C::Error> {
        self.client.make_bucket(bucket).await
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<(), C::Error> {
        self.client.remove_bucket(bucket).await
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, C::Error> {
        self.client.list_buckets().await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>, C::Error> {
        self.client.list_objects(bucket, prefix).await
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<Bytes, C::Error> {
        self.client.get_object(bucket, object).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), C::Error> {
        self.client.put_object(bucket, object, data, content_type).await
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat, C::Error> {
        self.client.stat_object(bucket, object).await
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> Result<(), C::Error> {
        self.client.remove_object(bucket, object).await
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, C::Error> {
        self.client.presigned_get_object(bucket, object, expires).await
    }

    async fn presigned_put_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, C::Error> {
        self.client.presigned_put_object(bucket, object, expires).await
    }

    async fn presigned_post_policy(&self, policy: &PostPolicy) -> Result<PresignedPost, C::Error> {
        self.client.presigned_post_policy(policy).await
    }
}

/// One-time initialization guard for a shared `Storage` / 一次性初始化容器
///
/// Uninitialized until an `init` succeeds, then ready forever. A failed
/// `init` leaves the cell empty so a later call can try again.
pub struct StorageCell<C> {
    inner: RwLock<Option<Arc<Storage<C>>>>,
}

impl<C> StorageCell<C> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Instance if already initialized
    pub async fn get(&self) -> Option<Arc<Storage<C>>> {
        self.inner.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Get the instance, running `init` if this is the first successful access.
    ///
    /// The write lock is held across `init`, so concurrent first callers
    /// queue behind a single initialization and then see its result.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<Storage<C>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Storage<C>, E>>,
    {
        {
            let guard = self.inner.read().await;
            if let Some(ref storage) = *guard {
                return Ok(storage.clone());
            }
        }

        let mut guard = self.inner.write().await;
        // 双重检查
        if let Some(ref storage) = *guard {
            return Ok(storage.clone());
        }

        let storage = Arc::new(init().await?);
        *guard = Some(storage.clone());
        Ok(storage)
    }
}

impl<C> Default for StorageCell<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect to the configured endpoint and provision its buckets / 连接并初始化存储桶
pub async fn connect(settings: &StorageConfig) -> anyhow::Result<Storage<S3Client>> {
    tracing::info!(
        "Connecting to object storage at {} ({} bucket(s))",
        settings.endpoint_url(),
        settings.buckets.len()
    );
    let client = S3Client::new(settings).context("failed to create object storage client")?;
    Storage::provision(client, &settings.buckets)
        .await
        .context("failed to provision object storage")
}

/// Process-wide storage instance / 获取全局存储实例
///
/// Errors (unloadable configuration, unreachable endpoint, bad credentials,
/// bucket creation refused) are returned to the caller and nothing is memoized.
pub async fn get_instance() -> anyhow::Result<Arc<Storage<S3Client>>> {
    STORAGE
        .get_or_try_init(|| async {
            let app_config = config::config().context("failed to load configuration")?;
            connect(&app_config.minio).await
        })
        .await
}
