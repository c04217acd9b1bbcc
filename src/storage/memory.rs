//! In-process object store / 内存对象存储
//!
//! Mirrors the S3 error semantics closely enough to stand in for a real
//! backend in tests and offline development. Nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::{BucketInfo, ObjectInfo, ObjectStat, ObjectStorage, PostPolicy, PresignedPost};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("NoSuchBucket: {0}")]
    NoSuchBucket(String),
    #[error("NoSuchKey: {bucket}/{object}")]
    NoSuchKey { bucket: String, object: String },
    #[error("BucketAlreadyOwnedByYou: {0}")]
    BucketAlreadyOwnedByYou(String),
    #[error("BucketNotEmpty: {0}")]
    BucketNotEmpty(String),
    #[error("InvalidBucketName: {0}")]
    InvalidBucketName(String),
}

impl MemoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NoSuchBucket(_) | MemoryError::NoSuchKey { .. })
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    last_modified: String,
}

#[derive(Debug, Default)]
struct MemoryBucket {
    created_at: String,
    objects: BTreeMap<String, StoredObject>,
}

/// Memory backend, cheap to clone (shared state) / 内存后端
#[derive(Clone, Default)]
pub struct MemoryStorage {
    buckets: Arc<RwLock<BTreeMap<String, MemoryBucket>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(bucket: &str) -> Result<(), MemoryError> {
        let valid = (3..=63).contains(&bucket.len())
            && bucket
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        if valid {
            Ok(())
        } else {
            Err(MemoryError::InvalidBucketName(bucket.to_string()))
        }
    }

    fn presign(&self, method: &str, bucket: &str, object: &str, expires: Duration) -> String {
        format!(
            "memory://{}/{}?method={}&expires={}",
            bucket,
            object,
            method,
            expires.as_secs()
        )
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    type Error = MemoryError;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, MemoryError> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), MemoryError> {
        Self::check_name(bucket)?;
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(MemoryError::BucketAlreadyOwnedByYou(bucket.to_string()));
        }
        buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                created_at: Utc::now().to_rfc3339(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<(), MemoryError> {
        let mut buckets = self.buckets.write();
        match buckets.get(bucket) {
            None => Err(MemoryError::NoSuchBucket(bucket.to_string())),
            Some(b) if !b.objects.is_empty() => Err(MemoryError::BucketNotEmpty(bucket.to_string())),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, MemoryError> {
        Ok(self
            .buckets
            .read()
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                creation_date: Some(b.created_at.clone()),
            })
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>, MemoryError> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.to_string()))?;
        let prefix = prefix.unwrap_or_default();

        Ok(b.objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, obj)| ObjectInfo {
                object_name: name.clone(),
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified.clone()),
                etag: Some(obj.etag.clone()),
            })
            .collect())
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<Bytes, MemoryError> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.to_string()))?;
        b.objects
            .get(object)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| MemoryError::NoSuchKey {
                bucket: bucket.to_string(),
                object: object.to_string(),
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), MemoryError> {
        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.to_string()))?;
        b.objects.insert(
            object.to_string(),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                content_type: content_type.map(str::to_string),
                etag: hex::encode(&Sha256::digest(data)[..16]),
                last_modified: Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat, MemoryError> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.to_string()))?;
        let obj = b.objects.get(object).ok_or_else(|| MemoryError::NoSuchKey {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })?;

        Ok(ObjectStat {
            object_name: object.to_string(),
            size: obj.data.len() as u64,
            content_type: obj.content_type.clone(),
            etag: Some(obj.etag.clone()),
            last_modified: Some(obj.last_modified.clone()),
        })
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> Result<(), MemoryError> {
        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.to_string()))?;
        // S3 DeleteObject succeeds for missing keys
        b.objects.remove(object);
        Ok(())
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, MemoryError> {
        if !self.bucket_exists(bucket).await? {
            return Err(MemoryError::NoSuchBucket(bucket.to_string()));
        }
        Ok(self.presign("GET", bucket, object, expires))
    }

    async fn presigned_put_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, MemoryError> {
        if !self.bucket_exists(bucket).await? {
            return Err(MemoryError::NoSuchBucket(bucket.to_string()));
        }
        Ok(self.presign("PUT", bucket, object, expires))
    }

    async fn presigned_post_policy(&self, policy: &PostPolicy) -> Result<PresignedPost, MemoryError> {
        if !self.bucket_exists(&policy.bucket).await? {
            return Err(MemoryError::NoSuchBucket(policy.bucket.clone()));
        }

        let mut fields = HashMap::new();
        let key = match &policy.key {
            super::KeyCondition::Exact(key) => key.clone(),
            super::KeyCondition::StartsWith(prefix) => format!("{}${{filename}}", prefix),
        };
        fields.insert("key".to_string(), key);
        fields.insert("bucket".to_string(), policy.bucket.clone());
        fields.insert(
            "x-amz-expires".to_string(),
            policy.expires_in.as_secs().to_string(),
        );
        if let Some(content_type) = &policy.content_type {
            fields.insert("Content-Type".to_string(), content_type.clone());
        }

        Ok(PresignedPost {
            url: format!("memory://{}", policy.bucket),
            fields,
        })
    }
}
