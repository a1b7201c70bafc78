//! File identifiers and on-disk/public path derivation.
//!
//! Every stored file is addressed as `(bucket, id)` where `id` is a
//! time-ordered UUIDv7 followed by the original extension, e.g.
//! `01890a5d8d2b7c3f9a4e6b1c2d3e4f50.pdf`. Keeping the extension in the id is
//! what lets the HTTP layer pick a content type on read without any stored
//! metadata.

use crate::services::storage_service::{StorageError, StorageResult};
use chrono::Local;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Filename stem used when only a type hint is available.
const SYNTHETIC_STEM: &str = "_temp";

/// A freshly generated identifier for an uploaded file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileId {
    /// `{uuid}.{ext}`
    pub id: String,
    /// Extension copied from the original filename, case preserved.
    pub extension: String,
}

impl FileId {
    /// Generate a new id for `original_filename`.
    ///
    /// Fails with [`StorageError::InvalidFileName`] when the name has no
    /// usable extension.
    pub fn generate(original_filename: &str) -> StorageResult<Self> {
        let extension = extension_of(original_filename)?.to_string();
        let id = format!("{}.{}", Uuid::now_v7().simple(), extension);
        Ok(Self { id, extension })
    }
}

/// Extract the extension (text after the last `.`) from an upload filename.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted so the extension can
/// never smuggle a path separator into a storage key.
pub fn extension_of(filename: &str) -> StorageResult<&str> {
    let invalid = || StorageError::InvalidFileName(filename.to_string());
    let (_, ext) = filename.rsplit_once('.').ok_or_else(invalid)?;
    if ext.is_empty()
        || !ext
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(invalid());
    }
    Ok(ext)
}

/// File type of an already stored id. Lenient: ids without a dot yield the
/// whole id.
pub fn file_type_of(file_id: &str) -> &str {
    file_id.rsplit('.').next().unwrap_or(file_id)
}

/// Build a filename from a bare type hint (`"pdf"` or `".pdf"`).
pub fn synthetic_file_name(type_hint: &str) -> String {
    format!("{}.{}", SYNTHETIC_STEM, type_hint.trim_start_matches('.'))
}

/// Today's partition segment, formatted `yyyyMMdd` in local time.
pub fn date_partition() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Join a public base and path segments with exactly one `/` between each.
pub fn public_location(base: &str, segments: &[&str]) -> String {
    let mut location = base.trim_end_matches('/').to_string();
    for segment in segments {
        location.push('/');
        location.push_str(segment.trim_matches('/'));
    }
    location
}

/// Where a local upload is written and how clients will ask for it again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticFileInfo {
    /// Absolute (or root-relative) filesystem destination.
    pub save_path: PathBuf,
    /// Location string returned to the client.
    pub location: String,
    pub file_id: FileId,
}

impl StaticFileInfo {
    /// Derive `{root}/{partition}/{id}` and `{public_base}/{partition}/{id}`.
    pub fn new(
        root: &Path,
        public_base: &str,
        partition: &str,
        original_filename: &str,
    ) -> StorageResult<Self> {
        let file_id = FileId::generate(original_filename)?;
        let save_path = root.join(partition).join(&file_id.id);
        let location = public_location(public_base, &[partition, &file_id.id]);
        Ok(Self {
            save_path,
            location,
            file_id,
        })
    }
}
