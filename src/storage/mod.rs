//! Object storage layer / 对象存储层
//!
//! `ObjectStorage` lists every operation the service uses against a bucket
//! store. Backends implement it (`S3Client`, `MemoryStorage`), and
//! `Storage<C>` wraps one backend as the process-wide provisioned instance.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

mod memory;
mod provisioner;
mod s3;

pub use memory::{MemoryError, MemoryStorage};
pub use provisioner::{get_instance, Storage, StorageCell};
pub use self::s3::S3Client;

/// Bucket summary / 存储桶信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
}

/// Entry returned by `list_objects` / 对象列表项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub object_name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Object metadata returned by `stat_object` / 对象元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub object_name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Object key condition of a POST policy / POST策略的对象键条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCondition {
    Exact(String),
    StartsWith(String),
}

impl KeyCondition {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyCondition::Exact(expected) => key == expected,
            KeyCondition::StartsWith(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

/// Browser upload policy / 浏览器直传策略
#[derive(Debug, Clone)]
pub struct PostPolicy {
    pub bucket: String,
    pub key: KeyCondition,
    pub expires_in: Duration,
    pub content_type: Option<String>,
    /// Inclusive byte range accepted for the upload
    pub content_length_range: Option<(u32, u32)>,
}

impl PostPolicy {
    pub fn new(bucket: impl Into<String>, key: KeyCondition, expires_in: Duration) -> Self {
        Self {
            bucket: bucket.into(),
            key,
            expires_in,
            content_type: None,
            content_length_range: None,
        }
    }

    pub fn content_type(mut self, val: &str) -> Self {
        self.content_type = Some(val.to_string());
        self
    }

    pub fn content_length_range(mut self, min: u32, max: u32) -> Self {
        self.content_length_range = Some((min, max));
        self
    }
}

/// Presigned POST form: target URL plus the form fields to submit / 预签名POST表单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedPost {
    pub url: String,
    pub fields: HashMap<String, String>,
}

/// Operations supported against an object store / 对象存储操作
///
/// Every method maps to exactly one backend call. Errors are the backend's
/// own error type, never translated.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Self::Error>;

    async fn make_bucket(&self, bucket: &str) -> Result<(), Self::Error>;

    async fn remove_bucket(&self, bucket: &str) -> Result<(), Self::Error>;

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, Self::Error>;

    /// List objects recursively, optionally restricted to a key prefix
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>, Self::Error>;

    async fn get_object(&self, bucket: &str, object: &str) -> Result<Bytes, Self::Error>;

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), Self::Error>;

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat, Self::Error>;

    async fn remove_object(&self, bucket: &str, object: &str) -> Result<(), Self::Error>;

    async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, Self::Error>;

    async fn presigned_put_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, Self::Error>;

    async fn presigned_post_policy(&self, policy: &PostPolicy) -> Result<PresignedPost, Self::Error>;
}
