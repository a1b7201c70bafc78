//! Represents a stored file as returned by a storage backend.

use bytes::Bytes;
use std::collections::HashMap;

/// Metadata and content of a single stored file.
///
/// Built by a backend after a successful upload or retrieval and handed to
/// the caller by value. `bytes` is a cheaply clonable buffer, so passing the
/// record around never copies the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// Bucket (or date partition) the file lives in.
    pub bucket: String,

    /// File extension without the leading dot, e.g. `pdf`.
    pub file_type: String,

    /// Display name: the original upload name when the backend kept it,
    /// otherwise the generated id.
    pub file_name: String,

    /// Bucket-qualified identifier: `{bucket}/{id}`.
    pub file_id: String,

    /// Size in bytes.
    pub file_size: u64,

    /// Raw provider headers (lowercase names). Empty for the local backend.
    pub headers: HashMap<String, String>,

    /// User-defined metadata with the provider prefix stripped.
    pub metadata: HashMap<String, String>,

    /// File content.
    pub bytes: Bytes,
}

impl FileMetadata {
    /// Qualify a generated id with its bucket.
    pub fn qualified_id(bucket: &str, id: &str) -> String {
        format!("{}/{}", bucket, id)
    }
}
