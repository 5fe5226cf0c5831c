use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use futures::Stream;
use futures_util::StreamExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter, Take};
use uuid::Uuid;

use crate::domain::{FileRecord, StoredBlob};
use crate::error::TransferError;

const HASH_BUFFER_SIZE: usize = 64 * 1024;
const MAX_EXTENSION_LEN: usize = 16;

/// Owns blob placement on disk.
///
/// Blobs are named by a random identifier plus the lowercased extension of the
/// declared name. The declared name itself never reaches the filesystem.
pub struct ContentStore {
    blobs_dir: PathBuf,
    scratch_dir: PathBuf,
    max_file_size: u64,
}

impl ContentStore {
    /// Opens the store creating the blob and scratch directories when missing.
    pub async fn open(
        blobs_dir: PathBuf,
        scratch_dir: PathBuf,
        max_file_size: u64,
    ) -> Result<Self, TransferError> {
        for dir in [&blobs_dir, &scratch_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                TransferError::StorageWrite(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(Self {
            blobs_dir,
            scratch_dir,
            max_file_size,
        })
    }

    #[must_use]
    pub fn blobs_dir(&self) -> &Path {
        &self.blobs_dir
    }

    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Writes the stream into a new blob hashing it on the fly.
    ///
    /// `on_chunk` is called with the length of every chunk persisted.
    /// On any failure, or when the returned future is dropped before it
    /// completes, the partially written blob is removed.
    pub async fn put<S, B, E, F>(
        &self,
        stream: S,
        declared_name: &str,
        mut on_chunk: F,
    ) -> Result<StoredBlob, TransferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error,
        F: FnMut(usize),
    {
        let file_id = new_id();
        let storage_path = self.blobs_dir.join(storage_name(&file_id, declared_name));
        let pending = PendingBlob::new(storage_path.clone());

        let (size_bytes, checksum) = self.write_blob(stream, &storage_path, &mut on_chunk).await?;
        pending.keep();
        Ok(StoredBlob {
            file_id,
            storage_path,
            size_bytes,
            checksum,
        })
    }

    async fn write_blob<S, B, E, F>(
        &self,
        stream: S,
        path: &Path,
        on_chunk: &mut F,
    ) -> Result<(u64, String), TransferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error,
        F: FnMut(usize),
    {
        // Created before the first await so the pending guard always sees it.
        let file = std::fs::File::create(path).map_err(write_error)?;
        let mut writer = BufWriter::new(File::from_std(file));
        let mut hasher = blake3::Hasher::new();
        let mut written: u64 = 0;

        futures::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| TransferError::StorageWrite(format!("upload interrupted: {e}")))?;
            let chunk = chunk.as_ref();
            written += chunk.len() as u64;
            if written > self.max_file_size {
                return Err(TransferError::LimitExceeded(format!(
                    "file is larger than {} bytes",
                    self.max_file_size
                )));
            }
            hasher.update(chunk);
            writer.write_all(chunk).await.map_err(write_error)?;
            on_chunk(chunk.len());
        }

        writer.flush().await.map_err(write_error)?;
        writer.get_ref().sync_all().await.map_err(write_error)?;
        Ok((written, hasher.finalize().to_hex().to_string()))
    }

    /// Opens a blob for reading from the start.
    pub async fn open_read(&self, storage_path: &Path) -> Result<File, TransferError> {
        File::open(storage_path)
            .await
            .map_err(|e| read_error(storage_path, &e))
    }

    /// Opens a blob limited to `len` bytes starting at `start`.
    pub async fn open_range(
        &self,
        storage_path: &Path,
        start: u64,
        len: u64,
    ) -> Result<Take<File>, TransferError> {
        let mut file = self.open_read(storage_path).await?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| read_error(storage_path, &e))?;
        Ok(file.take(len))
    }

    /// Removes a blob. Returns `false` only when the blob is still present afterwards.
    ///
    /// A blob that is already gone counts as removed since sweeps and explicit
    /// deletes race each other.
    pub async fn remove(&self, storage_path: &Path) -> bool {
        match fs::remove_file(storage_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("blob {} already absent", storage_path.display());
                true
            }
            Err(e) => {
                tracing::error!("blob {} not removed. Error: {e}", storage_path.display());
                false
            }
        }
    }

    /// Recomputes the BLAKE3 hash of a stored blob.
    pub async fn checksum_of(&self, storage_path: &Path) -> Result<String, TransferError> {
        let mut file = self.open_read(storage_path).await?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|e| read_error(storage_path, &e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Checks that the blob behind a record still hashes to the recorded checksum.
    pub async fn verify(&self, record: &FileRecord) -> Result<bool, TransferError> {
        let Some(expected) = record.checksum.as_deref() else {
            return Ok(true);
        };
        let actual = self.checksum_of(&record.storage_path).await?;
        Ok(actual == expected)
    }

    /// Path for a new scratch file, not created yet.
    #[must_use]
    pub fn scratch_path(&self, prefix: &str, extension: &str) -> PathBuf {
        self.scratch_dir.join(format!("{prefix}_{}.{extension}", new_id()))
    }

    pub async fn list_blobs(&self) -> io::Result<Vec<(PathBuf, SystemTime)>> {
        list_files(&self.blobs_dir).await
    }

    pub async fn list_scratch(&self) -> io::Result<Vec<(PathBuf, SystemTime)>> {
        list_files(&self.scratch_dir).await
    }
}

/// Blob being written. Removed on drop unless kept.
struct PendingBlob {
    path: Option<PathBuf>,
}

impl PendingBlob {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_blob_now(&path);
        }
    }
}

/// Synchronous removal for drop paths where no runtime can be awaited.
pub(crate) fn remove_blob_now(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("unfinished blob {} removed", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("unfinished blob {} not removed. Error: {e}", path.display()),
    }
}

/// Regular files of a directory with their modification times.
async fn list_files(dir: &Path) -> io::Result<Vec<(PathBuf, SystemTime)>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("cannot stat {}: {e}", entry.path().display());
                continue;
            }
        };
        if meta.is_file() {
            files.push((entry.path(), meta.modified()?));
        }
    }
    Ok(files)
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn storage_name(file_id: &str, declared_name: &str) -> String {
    let extension = Path::new(declared_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        });
    match extension {
        Some(ext) => format!("{file_id}.{}", ext.to_ascii_lowercase()),
        None => file_id.to_owned(),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn write_error(e: io::Error) -> TransferError {
    TransferError::StorageWrite(e.to_string())
}

fn read_error(path: &Path, e: &io::Error) -> TransferError {
    if e.kind() == io::ErrorKind::NotFound {
        TransferError::NotFound(format!("blob {}", path.display()))
    } else {
        TransferError::StorageRead(format!("{}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use rstest::rstest;
    use tempfile::TempDir;

    async fn store(max_file_size: u64) -> (TempDir, ContentStore) {
        let root = tempfile::tempdir().unwrap();
        let store = ContentStore::open(
            root.path().join("uploads"),
            root.path().join("temp"),
            max_file_size,
        )
        .await
        .unwrap();
        (root, store)
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<&'static [u8], io::Error>> {
        stream::iter(parts.iter().map(|p| Ok(*p)).collect::<Vec<_>>())
    }

    #[rstest]
    #[case("movie.MP4", "mp4")]
    #[case("archive.tar.gz", "gz")]
    #[case("../../etc/passwd", "")]
    #[case("dir/notes.txt", "txt")]
    #[case("weird.ex t", "")]
    #[case("noext", "")]
    #[trace]
    fn storage_name_keeps_only_extension(#[case] declared: &str, #[case] ext: &str) {
        // Act
        let name = storage_name("abc", declared);

        // Assert
        let expected = if ext.is_empty() {
            "abc".to_owned()
        } else {
            format!("abc.{ext}")
        };
        assert_eq!(name, expected);
    }

    #[tokio::test]
    async fn put_writes_and_hashes_in_one_pass() {
        // Arrange
        let (_root, store) = store(1024).await;
        let mut seen = 0usize;

        // Act
        let blob = store
            .put(chunks(&[b"hello ", b"world"]), "greeting.txt", |n| seen += n)
            .await
            .unwrap();

        // Assert
        assert_eq!(blob.size_bytes, 11);
        assert_eq!(seen, 11);
        assert_eq!(blob.checksum, blake3::hash(b"hello world").to_hex().to_string());
        assert_eq!(fs::read(&blob.storage_path).await.unwrap(), b"hello world");
        assert!(blob.storage_path.starts_with(store.blobs_dir()));
        assert_eq!(
            blob.storage_path.extension().and_then(|e| e.to_str()),
            Some("txt")
        );
    }

    #[tokio::test]
    async fn checksum_matches_recomputed_value() {
        // Arrange
        let (_root, store) = store(1024).await;
        let blob = store
            .put(chunks(&[b"abc", b"def"]), "x.bin", |_| {})
            .await
            .unwrap();

        // Act
        let recomputed = store.checksum_of(&blob.storage_path).await.unwrap();

        // Assert
        assert_eq!(recomputed, blob.checksum);
    }

    #[tokio::test]
    async fn oversized_upload_leaves_nothing_behind() {
        // Arrange
        let (_root, store) = store(4).await;

        // Act
        let result = store.put(chunks(&[b"abc", b"def"]), "big.bin", |_| {}).await;

        // Assert
        assert!(matches!(result, Err(TransferError::LimitExceeded(_))));
        assert!(store.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupted_upload_leaves_nothing_behind() {
        // Arrange
        let (_root, store) = store(1024).await;
        let broken = stream::iter(vec![
            Ok(&b"abc"[..]),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        // Act
        let result = store.put(broken, "part.bin", |_| {}).await;

        // Assert
        assert!(matches!(result, Err(TransferError::StorageWrite(_))));
        assert!(store.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_leaves_nothing_behind() {
        // Arrange
        let (_root, store) = store(1024 * 1024).await;
        let chunk: &'static [u8] = &[7u8; 100_000];
        let stalled = stream::iter(vec![Ok::<_, io::Error>(chunk)]).chain(stream::pending());
        let mut put = Box::pin(store.put(stalled, "stalled.bin", |_| {}));

        // Act
        for _ in 0..20 {
            assert!(futures::poll!(put.as_mut()).is_pending());
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(store.list_blobs().await.unwrap().len(), 1);
        drop(put);

        // Assert
        assert!(store.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_missing_blob_is_not_found() {
        // Arrange
        let (_root, store) = store(1024).await;
        let path = store.blobs_dir().join("missing");

        // Act
        let result = store.open_read(&path).await;

        // Assert
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn open_range_reads_exact_span() {
        // Arrange
        let (_root, store) = store(1024).await;
        let blob = store
            .put(chunks(&[b"0123456789"]), "digits.bin", |_| {})
            .await
            .unwrap();

        // Act
        let mut reader = store.open_range(&blob.storage_path, 3, 4).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        // Assert
        assert_eq!(out, b"3456");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        // Arrange
        let (_root, store) = store(1024).await;
        let blob = store.put(chunks(&[b"x"]), "x", |_| {}).await.unwrap();

        // Act
        let first = store.remove(&blob.storage_path).await;
        let second = store.remove(&blob.storage_path).await;

        // Assert
        assert!(first);
        assert!(second);
        assert!(!blob.storage_path.exists());
    }
}
