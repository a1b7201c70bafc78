//! Local filesystem backend.
//!
//! Uploads land in `{root}/{yyyyMMdd}/{id}.{ext}` and are announced to
//! clients as `{public_base}/{yyyyMMdd}/{id}.{ext}`. Bytes are streamed to a
//! hidden temporary file next to the destination and renamed into place once
//! complete, so a half-written upload is never visible under its final name.

use crate::{
    models::file_metadata::FileMetadata,
    services::{
        file_id::{StaticFileInfo, date_partition, file_type_of, synthetic_file_name},
        storage_service::{
            ByteReader, FilePart, FileStorage, StorageError, StorageResult, ensure_segment_safe,
        },
    },
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::StreamReader;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Bytes moved per read/write round trip.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct LocalStorage {
    /// Directory holding one sub-directory per partition.
    root: PathBuf,
    /// Prefix of the location strings handed back to clients.
    public_base: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    /// Stream `reader` into a new file derived from `file_name` and return
    /// its public location.
    async fn save_reader<R>(&self, reader: &mut R, file_name: &str) -> StorageResult<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let info = StaticFileInfo::new(&self.root, &self.public_base, &date_partition(), file_name)?;
        let written = write_atomically(reader, &info.save_path).await?;
        debug!(
            "stored {} bytes for `{}` at {}",
            written,
            file_name,
            info.save_path.display()
        );
        Ok(info.location)
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn save_part(&self, part: FilePart<'_>) -> StorageResult<String> {
        let mut reader = StreamReader::new(part.content);
        self.save_reader(&mut reader, &part.file_name).await
    }

    async fn save_stream(&self, reader: ByteReader<'_>, file_type: &str) -> StorageResult<String> {
        let mut reader = reader;
        self.save_reader(&mut reader, &synthetic_file_name(file_type))
            .await
    }

    async fn get_file(&self, bucket: &str, file_id: &str) -> StorageResult<FileMetadata> {
        ensure_segment_safe(bucket)?;
        ensure_segment_safe(file_id)?;
        // Hidden names are in-flight uploads, never finished files.
        if file_id.starts_with('.') {
            return Err(StorageError::InvalidObjectKey(file_id.to_string()));
        }

        let path = self.root.join(bucket).join(file_id);
        let mut file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                warn!("no file at {}", path.display());
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: file_id.to_string(),
                }
            } else {
                error!("failed to open {}: {}", path.display(), err);
                StorageError::Io(err)
            }
        })?;

        let mut bytes = Vec::new();
        let read = async {
            let expected = file.metadata().await?.len();
            bytes.reserve(usize::try_from(expected).unwrap_or_default());
            file.read_to_end(&mut bytes).await
        };
        if let Err(err) = read.await {
            error!("failed to read {}: {}", path.display(), err);
            return Err(StorageError::Io(err));
        }

        Ok(FileMetadata {
            bucket: bucket.to_string(),
            file_type: file_type_of(file_id).to_string(),
            file_name: file_id.to_string(),
            file_id: FileMetadata::qualified_id(bucket, file_id),
            file_size: bytes.len() as u64,
            headers: HashMap::new(),
            metadata: HashMap::new(),
            bytes: bytes.into(),
        })
    }
}

/// Copy `reader` into `dest` via a temporary sibling file.
///
/// The temporary file is removed on every failure path, including the caller
/// dropping the future mid-copy. The destination is only replaced once all
/// bytes are flushed and synced.
async fn write_atomically<R>(reader: &mut R, dest: &Path) -> StorageResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let parent = dest.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::new(
            ErrorKind::Other,
            "destination path missing parent directory",
        ))
    })?;
    fs::create_dir_all(&parent).await.inspect_err(|err| {
        error!("failed to create {}: {}", parent.display(), err);
    })?;

    let tmp = TempUpload::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
    let mut file = File::create(&tmp.path).await.inspect_err(|err| {
        error!("failed to create {}: {}", tmp.path.display(), err);
    })?;

    let written = copy_chunks(reader, &mut file).await.inspect_err(|err| {
        error!("failed writing {}: {}", dest.display(), err);
    })?;
    drop(file);

    fs::rename(&tmp.path, dest).await.inspect_err(|err| {
        error!("failed to move upload into {}: {}", dest.display(), err);
    })?;
    tmp.disarm();
    Ok(written)
}

/// Removes the temporary file when dropped, unless it was renamed into place.
struct TempUpload {
    path: PathBuf,
    armed: bool,
}

impl TempUpload {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed unfinished upload {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {}: {}", self.path.display(), err),
        }
    }
}

/// Move bytes in bounded chunks until the source reports end of input.
///
/// A zero-byte read ends the transfer, so the total length never has to be
/// known in advance.
async fn copy_chunks<R>(reader: &mut R, file: &mut File) -> io::Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        file.write_all(&buf[..read]).await?;
        total += read as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use std::{io::Cursor, time::Duration};

    fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        LocalStorage::new(dir.path(), "/file/display")
    }

    /// Split a location back into `(bucket, file_id)`.
    fn address(location: &str) -> (String, String) {
        let rest = location.strip_prefix("/file/display/").unwrap();
        let (bucket, id) = rest.split_once('/').unwrap();
        (bucket.to_string(), id.to_string())
    }

    fn part_of(name: &str, chunks: Vec<&'static [u8]>) -> FilePart<'static> {
        let chunks = chunks
            .into_iter()
            .map(|c| Ok::<_, io::Error>(Bytes::from_static(c)));
        FilePart::new(name, None, stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_save_part_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let location = storage
            .save_part(part_of("notes.txt", vec![b"hello ", b"world"]))
            .await
            .unwrap();
        assert!(location.ends_with(".txt"));

        let (bucket, id) = address(&location);
        assert_eq!(bucket, date_partition());
        let file = storage.get_file(&bucket, &id).await.unwrap();
        assert_eq!(&file.bytes[..], b"hello world");
        assert_eq!(file.file_size, 11);
        assert_eq!(file.file_type, "txt");
        assert_eq!(file.file_name, id);
        assert_eq!(file.file_id, format!("{}/{}", bucket, id));
        assert!(file.headers.is_empty());
    }

    #[tokio::test]
    async fn test_report_pdf_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let mut content = b"%PDF-1.4".to_vec();
        content.resize(1024, b'.');
        let body = Bytes::from(content.clone());

        let location = storage
            .save_part(FilePart::new(
                "report.pdf",
                Some("application/pdf".into()),
                stream::iter([Ok::<_, io::Error>(body)]),
            ))
            .await
            .unwrap();
        assert!(location.contains(".pdf"));

        let (bucket, id) = address(&location);
        let file = storage.get_file(&bucket, &id).await.unwrap();
        assert_eq!(file.file_type, "pdf");
        assert_eq!(file.file_size, 1024);
        assert_eq!(&file.bytes[..], &content[..]);
    }

    #[tokio::test]
    async fn test_save_stream_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        for size in [0usize, 1, 1 << 20, TRANSFER_CHUNK_SIZE * 3 + 17] {
            let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let location = storage
                .save_stream(Box::pin(Cursor::new(content.clone())), "bin")
                .await
                .unwrap();
            let (bucket, id) = address(&location);
            let file = storage.get_file(&bucket, &id).await.unwrap();
            assert_eq!(file.file_size, size as u64, "size {size}");
            assert_eq!(&file.bytes[..], &content[..], "size {size}");
        }
    }

    #[tokio::test]
    async fn test_save_stream_accepts_dotted_type_hint() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let location = storage
            .save_stream(Box::pin(Cursor::new(b"x".to_vec())), ".csv")
            .await
            .unwrap();
        assert!(location.ends_with(".csv"));
        assert!(!location.contains("..csv"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let err = storage
            .get_file("20240101", "missing.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_file_is_present() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let location = storage.save_part(part_of("empty.txt", vec![])).await.unwrap();
        let (bucket, id) = address(&location);
        let file = storage.get_file(&bucket, &id).await.unwrap();
        assert_eq!(file.file_size, 0);
        assert!(file.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let err = storage.get_file("..", "passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey(_)));
        let err = storage.get_file("20240101", "../x.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey(_)));
    }

    #[tokio::test]
    async fn test_rejects_name_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let err = storage
            .save_part(part_of("Makefile", vec![b"all:"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidFileName(_)));
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ];
        let err = storage
            .save_part(FilePart::new("a.txt", None, stream::iter(chunks)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        let partition = dir.path().join(date_partition());
        let mut entries = fs::read_dir(&partition).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_upload_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        // The writer half stays open, so the read after "partial" never ends.
        let (stalled, _writer) = tokio::io::duplex(64);
        let reader = Cursor::new(b"partial".to_vec()).chain(stalled);

        let saved = tokio::time::timeout(
            Duration::from_millis(100),
            storage.save_stream(Box::pin(reader), "txt"),
        )
        .await;
        assert!(saved.is_err());

        let partition = dir.path().join(date_partition());
        let mut entries = fs::read_dir(&partition).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_hidden_file_id() {
        let dir = tempfile::tempdir().unwrap();
        let partition = dir.path().join("20240101");
        std::fs::create_dir_all(&partition).unwrap();
        std::fs::write(partition.join(".tmp-upload"), b"half").unwrap();
        let storage = storage(&dir);

        let err = storage
            .get_file("20240101", ".tmp-upload")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey(_)));
    }
}
