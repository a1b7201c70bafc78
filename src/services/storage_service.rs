//! src/services/storage_service.rs
//!
//! StorageService — the one handle the HTTP layer talks to. It forwards to
//! exactly one [`FileStorage`] backend (local disk or an S3-compatible object
//! store), chosen once at startup from configuration.

use crate::{
    config::{AppConfig, StorageMode},
    models::file_metadata::FileMetadata,
    services::{
        local_storage::LocalStorage, remote_storage::RemoteStorage, s3_client::S3ObjectClient,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin, sync::Arc};
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, info};

const MAX_SEGMENT_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("file name `{0}` has no usable extension")]
    InvalidFileName(String),
    #[error("malformed `{name}` header: `{value}`")]
    MalformedHeader { name: String, value: String },
    #[error("object store error: {0}")]
    Remote(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    /// True for the "nothing stored under that address" family.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BucketNotFound(_) | Self::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked upload body, as produced by a multipart decoder.
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

/// Arbitrary byte source whose length is not known up front.
pub type ByteReader<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// A single named file part of an upload request, still streaming.
pub struct FilePart<'a> {
    /// Filename the client sent; its extension becomes part of the file id.
    pub file_name: String,
    pub content_type: Option<String>,
    pub content: ByteStream<'a>,
}

impl<'a> FilePart<'a> {
    pub fn new<S>(file_name: impl Into<String>, content_type: Option<String>, content: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'a,
    {
        Self {
            file_name: file_name.into(),
            content_type,
            content: Box::pin(content),
        }
    }
}

/// Contract every storage backend fulfils.
///
/// Saves return the client-facing location of the new file; reads address a
/// file by `(bucket, file_id)`. Failures are logged by the backend where they
/// happen and returned as a typed [`StorageError`], so callers can tell a
/// missing file from a broken backend.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Short backend name, used for logging.
    fn name(&self) -> &str;

    /// Store an uploaded part under today's partition.
    async fn save_part(&self, part: FilePart<'_>) -> StorageResult<String>;

    /// Store everything `reader` yields as a file of type `file_type`
    /// (`"pdf"` or `".pdf"`).
    async fn save_stream(&self, reader: ByteReader<'_>, file_type: &str) -> StorageResult<String>;

    /// Load a stored file with its metadata.
    async fn get_file(&self, bucket: &str, file_id: &str) -> StorageResult<FileMetadata>;
}

/// Facade over the active backend. Cheap to clone; shared as router state.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn FileStorage>,
}

impl StorageService {
    pub fn new(backend: impl FileStorage + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Build the backend selected by `cfg.storage`.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let service = match cfg.storage {
            StorageMode::Local => {
                if !cfg.static_dir.exists() {
                    tokio::fs::create_dir_all(&cfg.static_dir).await?;
                    info!("Created static directory at {}", cfg.static_dir.display());
                }
                Self::new(LocalStorage::new(
                    cfg.static_dir.clone(),
                    cfg.static_location.clone(),
                ))
            }
            StorageMode::S3 => {
                let client = S3ObjectClient::new(&cfg.s3);
                Self::new(RemoteStorage::new(
                    Arc::new(client),
                    cfg.static_location.clone(),
                    cfg.temporary_expiry_days,
                ))
            }
        };
        info!("Using `{}` storage backend", service.backend_name());
        Ok(service)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn save_part(&self, part: FilePart<'_>) -> StorageResult<String> {
        debug!("saving upload `{}`", part.file_name);
        self.backend.save_part(part).await
    }

    pub async fn save_stream<R>(&self, reader: R, file_type: &str) -> StorageResult<String>
    where
        R: AsyncRead + Send,
    {
        self.backend.save_stream(Box::pin(reader), file_type).await
    }

    pub async fn get_file(&self, bucket: &str, file_id: &str) -> StorageResult<FileMetadata> {
        self.backend.get_file(bucket, file_id).await
    }
}

/// Reject bucket names and file ids that could escape their directory or
/// break a storage key.
pub(crate) fn ensure_segment_safe(segment: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidObjectKey(segment.to_string());
    if segment.is_empty() || segment.len() > MAX_SEGMENT_LEN {
        return Err(invalid());
    }
    if segment == "." || segment.contains("..") {
        return Err(invalid());
    }
    if segment
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_validation() {
        assert!(ensure_segment_safe("20240101").is_ok());
        assert!(ensure_segment_safe("0189abc.pdf").is_ok());
        assert!(ensure_segment_safe("").is_err());
        assert!(ensure_segment_safe(".").is_err());
        assert!(ensure_segment_safe("..").is_err());
        assert!(ensure_segment_safe("a/b").is_err());
        assert!(ensure_segment_safe("a\\b").is_err());
        assert!(ensure_segment_safe("a\0b").is_err());
        assert!(ensure_segment_safe(&"x".repeat(MAX_SEGMENT_LEN + 1)).is_err());
    }

    #[test]
    fn test_not_found_family() {
        assert!(StorageError::BucketNotFound("b".into()).is_not_found());
        assert!(
            StorageError::ObjectNotFound {
                bucket: "b".into(),
                key: "k".into()
            }
            .is_not_found()
        );
        assert!(!StorageError::Remote("boom".into()).is_not_found());
    }
}
