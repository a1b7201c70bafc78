//! Narrow client interface the remote backend needs from an object store.
//!
//! Only the handful of calls the upload/display flow uses are modelled. The
//! production implementation is [`S3ObjectClient`](super::s3_client::S3ObjectClient).

use crate::{models::bucket::LifecycleRule, services::storage_service::StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Header prefix carrying user-defined metadata on S3-compatible stores.
pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// A complete object ready to be sent. The body length is known up front.
#[derive(Clone, Debug)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    /// Extra request headers, e.g. `content-type` or `cache-control`.
    pub headers: HashMap<String, String>,
    /// User metadata without the provider prefix.
    pub user_metadata: HashMap<String, String>,
    pub body: Bytes,
}

/// An object as returned by the store.
#[derive(Clone, Debug, Default)]
pub struct ObjectResponse {
    /// Response headers with lowercase names. User metadata appears here with
    /// its [`USER_METADATA_PREFIX`].
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Create `bucket`. Returns
    /// [`BucketAlreadyExists`](crate::services::storage_service::StorageError::BucketAlreadyExists)
    /// when the bucket appeared in the meantime.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn put_lifecycle_rule(&self, bucket: &str, rule: &LifecycleRule) -> StorageResult<()>;

    async fn put_object(&self, request: PutObjectRequest) -> StorageResult<()>;

    /// Fetch an object. Missing objects and buckets map to the matching
    /// not-found errors.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectResponse>;
}
