//! Remote object-store backend.
//!
//! Files live in S3-compatible buckets. Buckets are created on first write
//! and confirmed buckets are remembered in a concurrent set so hot paths skip
//! the existence round trip. Temporary buckets get an expiry lifecycle rule
//! when they are created.

use crate::{
    models::{
        bucket::{Bucket, LifecycleRule},
        file_metadata::FileMetadata,
    },
    services::{
        file_id::{FileId, date_partition, file_type_of, public_location, synthetic_file_name},
        object_client::{ObjectStoreClient, PutObjectRequest, USER_METADATA_PREFIX},
        storage_service::{
            ByteReader, FilePart, FileStorage, StorageError, StorageResult, ensure_segment_safe,
        },
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashSet;
use futures::TryStreamExt;
use std::{collections::HashMap, sync::Arc};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// User-metadata key holding the original upload filename.
pub const FILE_NAME_KEY: &str = "file-name";
const CONTENT_LENGTH: &str = "content-length";

pub struct RemoteStorage {
    client: Arc<dyn ObjectStoreClient>,
    /// Prefix of the location strings handed back to clients.
    display_prefix: String,
    /// Retention applied to temporary buckets.
    expiry_days: u32,
    /// Buckets confirmed to exist. Only ever grows.
    known_buckets: DashSet<String>,
}

impl RemoteStorage {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        display_prefix: impl Into<String>,
        expiry_days: u32,
    ) -> Self {
        Self {
            client,
            display_prefix: display_prefix.into(),
            expiry_days,
            known_buckets: DashSet::new(),
        }
    }

    /// Make sure `bucket` exists, creating it when `create` is set.
    ///
    /// Safe to race: when another caller creates the same bucket first, the
    /// provider's "already exists" answer counts as success.
    pub async fn ensure_bucket(&self, bucket: &Bucket, create: bool) -> StorageResult<()> {
        if self.known_buckets.contains(&bucket.name) {
            return Ok(());
        }
        if self.client.bucket_exists(&bucket.name).await? {
            self.known_buckets.insert(bucket.name.clone());
            return Ok(());
        }

        warn!("bucket [{}] does not exist", bucket.name);
        if !create {
            return Err(StorageError::BucketNotFound(bucket.name.clone()));
        }

        match self.client.create_bucket(&bucket.name).await {
            Ok(()) => {
                info!("created bucket [{}]", bucket.name);
                if bucket.temporary {
                    let rule = LifecycleRule::expire_after(self.expiry_days);
                    // The bucket stays behind without its rule; later writes
                    // find it existing and never retry the rule.
                    self.client
                        .put_lifecycle_rule(&bucket.name, &rule)
                        .await
                        .inspect_err(|err| {
                            error!(
                                "temporary bucket [{}] created without its expiry rule: {}",
                                bucket.name, err
                            );
                        })?;
                    info!(
                        "bucket [{}] objects expire after {} days",
                        bucket.name, rule.days
                    );
                }
            }
            Err(StorageError::BucketAlreadyExists(_)) => {
                debug!("bucket [{}] was created concurrently", bucket.name);
            }
            Err(err) => return Err(err),
        }
        self.known_buckets.insert(bucket.name.clone());
        Ok(())
    }

    /// Upload a complete object into `bucket`, creating the bucket if needed.
    ///
    /// `user_metadata` defaults to `{file-name: file_name}`.
    pub async fn upload_file(
        &self,
        bucket: &Bucket,
        file_name: &str,
        headers: Option<HashMap<String, String>>,
        user_metadata: Option<HashMap<String, String>>,
        body: Bytes,
    ) -> StorageResult<FileMetadata> {
        let result = self
            .upload_inner(bucket, file_name, headers, user_metadata, body)
            .await;
        if let Err(err) = &result {
            error!("upload of `{}` into [{}] failed: {}", file_name, bucket.name, err);
        }
        result
    }

    async fn upload_inner(
        &self,
        bucket: &Bucket,
        file_name: &str,
        headers: Option<HashMap<String, String>>,
        user_metadata: Option<HashMap<String, String>>,
        body: Bytes,
    ) -> StorageResult<FileMetadata> {
        ensure_segment_safe(&bucket.name)?;
        let file_id = FileId::generate(file_name)?;
        self.ensure_bucket(bucket, true).await?;

        let headers = headers.unwrap_or_default();
        let metadata = user_metadata.unwrap_or_else(|| {
            HashMap::from([(FILE_NAME_KEY.to_string(), file_name.to_string())])
        });

        self.client
            .put_object(PutObjectRequest {
                bucket: bucket.name.clone(),
                key: file_id.id.clone(),
                headers: headers.clone(),
                user_metadata: metadata.clone(),
                body: body.clone(),
            })
            .await?;
        debug!(
            "uploaded {} bytes as [{}]/{}",
            body.len(),
            bucket.name,
            file_id.id
        );

        Ok(FileMetadata {
            bucket: bucket.name.clone(),
            file_type: file_id.extension,
            file_name: file_name.to_string(),
            file_id: FileMetadata::qualified_id(&bucket.name, &file_id.id),
            file_size: body.len() as u64,
            headers,
            metadata,
            bytes: body,
        })
    }

    async fn fetch(&self, bucket: &str, file_id: &str) -> StorageResult<FileMetadata> {
        ensure_segment_safe(bucket)?;
        ensure_segment_safe(file_id)?;
        self.ensure_bucket(&Bucket::permanent(bucket), false).await?;

        let response = self.client.get_object(bucket, file_id).await?;

        let mut file_name = file_id.to_string();
        let mut metadata = HashMap::new();
        for (name, value) in &response.headers {
            if let Some(key) = name.strip_prefix(USER_METADATA_PREFIX) {
                if key == FILE_NAME_KEY {
                    file_name = value.clone();
                }
                metadata.insert(key.to_string(), value.clone());
            }
        }

        let file_size = match response.headers.get(CONTENT_LENGTH) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| StorageError::MalformedHeader {
                    name: CONTENT_LENGTH.to_string(),
                    value: value.clone(),
                })?,
            None => response.body.len() as u64,
        };

        Ok(FileMetadata {
            bucket: bucket.to_string(),
            file_type: file_type_of(file_id).to_string(),
            file_name,
            file_id: FileMetadata::qualified_id(bucket, file_id),
            file_size,
            headers: response.headers,
            metadata,
            bytes: response.body,
        })
    }

    /// Upload into today's bucket and return the client-facing location.
    async fn save_dated(
        &self,
        file_name: &str,
        headers: Option<HashMap<String, String>>,
        body: Bytes,
    ) -> StorageResult<String> {
        let bucket = Bucket::permanent(date_partition());
        let stored = self
            .upload_file(&bucket, file_name, headers, None, body)
            .await?;
        Ok(public_location(&self.display_prefix, &[&stored.file_id]))
    }
}

#[async_trait]
impl FileStorage for RemoteStorage {
    fn name(&self) -> &str {
        "s3"
    }

    async fn save_part(&self, part: FilePart<'_>) -> StorageResult<String> {
        // The object store wants the content length before the first byte.
        let mut content = part.content;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = content.try_next().await.inspect_err(|err| {
            error!("failed reading upload `{}`: {}", part.file_name, err);
        })? {
            buffer.extend_from_slice(&chunk);
        }

        let headers = part
            .content_type
            .map(|value| HashMap::from([("content-type".to_string(), value)]));
        self.save_dated(&part.file_name, headers, buffer.freeze())
            .await
    }

    async fn save_stream(&self, reader: ByteReader<'_>, file_type: &str) -> StorageResult<String> {
        let mut reader = reader;
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.inspect_err(|err| {
            error!("failed reading `{}` stream: {}", file_type, err);
        })?;
        self.save_dated(&synthetic_file_name(file_type), None, body.into())
            .await
    }

    async fn get_file(&self, bucket: &str, file_id: &str) -> StorageResult<FileMetadata> {
        let result = self.fetch(bucket, file_id).await;
        match &result {
            Err(err) if err.is_not_found() => warn!("[{}]/{}: {}", bucket, file_id, err),
            Err(err) => error!("failed to fetch [{}]/{}: {}", bucket, file_id, err),
            Ok(_) => {}
        }
        result
    }
}
