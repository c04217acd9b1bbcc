//! S3 compatible backend (MinIO, AWS, OSS...) / S3兼容存储后端
//!
//! rust-s3 addresses one bucket per `Bucket` handle, so the client keeps the
//! region and credentials and builds a path-style handle per call.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::post_policy::{PostPolicy as S3PostPolicy, PostPolicyField, PostPolicyValue};
use s3::{BucketConfiguration, Region};

use crate::config::StorageConfig;
use super::{
    BucketInfo, KeyCondition, ObjectInfo, ObjectStat, ObjectStorage, PostPolicy, PresignedPost,
};

/// S3 client / S3客户端
#[derive(Clone)]
pub struct S3Client {
    region: Region,
    credentials: Credentials,
}

impl S3Client {
    /// Build a client from storage configuration (no network access) / 根据配置创建客户端
    pub fn new(config: &StorageConfig) -> Result<Self, S3Error> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            config.session_token(),
            None,
            None,
        )?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url(),
        };

        Ok(Self { region, credentials })
    }

    /// Raw rust-s3 handle for anything `ObjectStorage` does not model / 获取底层Bucket句柄
    pub fn bucket(&self, name: &str) -> Result<Box<Bucket>, S3Error> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        Ok(bucket.with_path_style())
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Expiry in whole seconds as rust-s3 takes it; range checks are left to rust-s3 and the server
fn expiry_secs(expires: Duration) -> u32 {
    u32::try_from(expires.as_secs()).unwrap_or(u32::MAX)
}

/// Conditions of a browser upload policy, in the order they are applied / POST策略条件
fn post_policy_conditions(policy: &PostPolicy) -> Vec<(PostPolicyField, PostPolicyValue<'_>)> {
    let key_value = match &policy.key {
        KeyCondition::Exact(key) => PostPolicyValue::Exact(Cow::from(key.as_str())),
        KeyCondition::StartsWith(prefix) => PostPolicyValue::StartsWith(Cow::from(prefix.as_str())),
    };

    let mut conditions = vec![(PostPolicyField::Key, key_value)];
    if let Some(content_type) = &policy.content_type {
        conditions.push((
            PostPolicyField::ContentType,
            PostPolicyValue::Exact(Cow::from(content_type.as_str())),
        ));
    }
    if let Some((min, max)) = policy.content_length_range {
        conditions.push((PostPolicyField::ContentLengthRange, PostPolicyValue::Range(min, max)));
    }
    conditions
}

fn ensure_success(code: u16, body: String) -> Result<(), S3Error> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(S3Error::HttpFailWithBody(code, body))
    }
}

#[async_trait]
impl ObjectStorage for S3Client {
    type Error = S3Error;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, S3Error> {
        self.bucket(bucket)?.exists().await
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let response = Bucket::create_with_path_style(
            bucket,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await?;

        ensure_success(response.response_code, response.response_text)?;
        tracing::debug!("CreateBucket {} answered {}", bucket, response.response_code);
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let code = self.bucket(bucket)?.delete().await?;
        ensure_success(code, String::new())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, S3Error> {
        let response = Bucket::list_buckets(self.region.clone(), self.credentials.clone()).await?;
        Ok(response
            .bucket_names()
            .map(|name| BucketInfo { name, creation_date: None })
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>, S3Error> {
        let results = self
            .bucket(bucket)?
            .list(prefix.unwrap_or_default().to_string(), None)
            .await?;

        let mut objects = Vec::new();
        for result in results {
            for obj in result.contents {
                objects.push(ObjectInfo {
                    object_name: obj.key,
                    size: obj.size,
                    last_modified: Some(obj.last_modified),
                    etag: obj.e_tag,
                });
            }
        }
        Ok(objects)
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<Bytes, S3Error> {
        let response = self.bucket(bucket)?.get_object(object).await?;
        ensure_success(response.status_code(), String::new())?;
        Ok(response.bytes().clone())
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), S3Error> {
        let handle = self.bucket(bucket)?;
        let response = match content_type {
            Some(ct) => handle.put_object_with_content_type(object, data, ct).await?,
            None => handle.put_object(object, data).await?,
        };
        ensure_success(response.status_code(), String::new())
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat, S3Error> {
        let (head, code) = self.bucket(bucket)?.head_object(object).await?;
        ensure_success(code, String::new())?;

        Ok(ObjectStat {
            object_name: object.to_string(),
            size: head.content_length.unwrap_or(0).max(0) as u64,
            content_type: head.content_type,
            etag: head.e_tag,
            last_modified: head.last_modified,
        })
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> Result<(), S3Error> {
        let response = self.bucket(bucket)?.delete_object(object).await?;
        ensure_success(response.status_code(), String::new())
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, S3Error> {
        self.bucket(bucket)?
            .presign_get(object, expiry_secs(expires), None)
            .await
    }

    async fn presigned_put_object(
        &self,
        bucket: &str,
        object: &str,
        expires: Duration,
    ) -> Result<String, S3Error> {
        self.bucket(bucket)?
            .presign_put(object, expiry_secs(expires), None, None)
            .await
    }

    async fn presigned_post_policy(&self, policy: &PostPolicy) -> Result<PresignedPost, S3Error> {
        let mut s3_policy = S3PostPolicy::new(expiry_secs(policy.expires_in));
        for (field, value) in post_policy_conditions(policy) {
            s3_policy = s3_policy.condition(field, value)?;
        }

        let presigned = self.bucket(&policy.bucket)?.presign_post(s3_policy).await?;

        let mut fields = presigned.fields;
        fields.extend(presigned.dynamic_fields);
        Ok(PresignedPost { url: presigned.url, fields })
    }
}
