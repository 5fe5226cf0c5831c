use std::collections::HashSet;
use std::fs;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::FileRecord;
use crate::error::TransferError;
use crate::progress::TransferSession;

const CHUNK_SIZE: usize = 64 * 1024;
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;
const FALLBACK_ENTRY_NAME: &str = "file";

/// Temporary archive on disk. The file is deleted when the value is dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("scratch {} removed", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("scratch {} not removed. Error: {e}", self.path.display()),
        }
    }
}

/// Packs stored files into a zip container.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveBuilder {
    compression_level: i64,
}

impl ArchiveBuilder {
    #[must_use]
    pub fn new(compression_level: i64) -> Self {
        Self { compression_level }
    }

    /// Builds the archive of `members` into `scratch` on a blocking worker.
    ///
    /// The session advances by the source bytes consumed, so progress reaches
    /// 100 exactly when the last member has been read whatever the compression
    /// ratio. Dropping the returned future cancels the build; on any failure
    /// the scratch file is gone before the error is returned.
    pub async fn build(
        &self,
        members: Vec<FileRecord>,
        scratch: ScratchFile,
        mut session: TransferSession,
        comment: String,
    ) -> Result<ScratchFile, TransferError> {
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let builder = *self;
        // Opened here, not on the worker, so a drop of this future can only
        // remove a file that already exists.
        let file = fs::File::create(scratch.path()).map_err(|e| {
            TransferError::Transfer(format!("cannot create {}: {e}", scratch.path().display()))
        })?;

        let task = tokio::task::spawn_blocking(move || {
            let sink = {
                let mut on_chunk = |n: u64| session.advance(n);
                builder.write_archive(
                    &members,
                    BufWriter::new(file),
                    &comment,
                    &mut on_chunk,
                    &cancel,
                )?
            };
            sink.into_inner()
                .map_err(|e| TransferError::Transfer(e.to_string()))?
                .sync_all()
                .map_err(|e| TransferError::Transfer(e.to_string()))?;
            Ok::<_, TransferError>(session)
        });

        match task.await {
            Ok(Ok(mut session)) => {
                session.finish();
                Ok(scratch)
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(TransferError::Transfer(format!("archive worker failed: {e}"))),
        }
    }

    /// Writes every member into `sink` in order under its original name.
    ///
    /// `on_chunk` gets the number of source bytes consumed after each chunk is
    /// compressed. Cancellation is checked between chunks.
    pub fn write_archive<W, F>(
        &self,
        members: &[FileRecord],
        sink: W,
        comment: &str,
        on_chunk: &mut F,
        cancel: &CancellationToken,
    ) -> Result<W, TransferError>
    where
        W: Write + Seek,
        F: FnMut(u64),
    {
        let mut zip = ZipWriter::new(sink);
        zip.set_comment(comment.to_owned());

        let names = entry_names(members);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        for (member, name) in members.iter().zip(names) {
            let mut source = fs::File::open(&member.storage_path).map_err(|e| {
                TransferError::Transfer(format!("{} unavailable: {e}", member.original_name))
            })?;
            zip.start_file(name, self.entry_options(member))
                .map_err(|e| TransferError::Transfer(e.to_string()))?;

            loop {
                if cancel.is_cancelled() {
                    return Err(TransferError::Transfer("archive cancelled".to_owned()));
                }
                let read = source.read(&mut buffer).map_err(|e| {
                    TransferError::Transfer(format!("{} read failed: {e}", member.original_name))
                })?;
                if read == 0 {
                    break;
                }
                zip.write_all(&buffer[..read])
                    .map_err(|e| TransferError::Transfer(e.to_string()))?;
                on_chunk(read as u64);
            }
        }

        zip.finish().map_err(|e| TransferError::Transfer(e.to_string()))
    }

    fn entry_options(&self, member: &FileRecord) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level))
            .large_file(member.size_bytes >= ZIP64_THRESHOLD);
        match zip_time(member.uploaded_at) {
            Some(time) => options.last_modified_time(time),
            None => options,
        }
    }
}

/// Download name of a group archive.
#[must_use]
pub fn archive_name(group_id: &str, now: DateTime<Utc>) -> String {
    format!("files_{group_id}_{}.zip", now.format("%Y-%m-%d"))
}

/// Entry names for members: last path component of the original name, made
/// unique inside the archive by appending ` (n)` before the extension.
#[must_use]
pub fn entry_names(members: &[FileRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    members
        .iter()
        .map(|m| {
            let base = base_name(&m.original_name);
            let mut candidate = base.to_owned();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                candidate = numbered(base, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

fn base_name(name: &str) -> &str {
    let name = match name.rfind(['\\', '/']) {
        Some(ix) => &name[ix + 1..],
        None => name,
    };
    match name {
        "" | "." | ".." => FALLBACK_ENTRY_NAME,
        n => n,
    }
}

fn numbered(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(ix) if ix > 0 => format!("{} ({n}){}", &name[..ix], &name[ix..]),
        _ => format!("{name} ({n})"),
    }
}

fn zip_time(at: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(at.year()).ok()?,
        u8::try_from(at.month()).ok()?,
        u8::try_from(at.day()).ok()?,
        u8::try_from(at.hour()).ok()?,
        u8::try_from(at.minute()).ok()?,
        u8::try_from(at.second()).ok()?,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_MIME;
    use crate::progress::ProgressBroadcaster;
    use kernel::TransferKind;
    use rstest::rstest;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn member(dir: &TempDir, name: &str, content: &[u8]) -> FileRecord {
        let path = dir.path().join(crate::store::new_id());
        fs::write(&path, content).unwrap();
        FileRecord {
            file_id: crate::store::new_id(),
            original_name: name.to_owned(),
            size_bytes: content.len() as u64,
            mime_type: DEFAULT_MIME.to_owned(),
            storage_path: path,
            checksum: None,
            uploaded_at: Utc::now(),
        }
    }

    fn read_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut content = Vec::new();
                entry.read_to_end(&mut content).unwrap();
                (entry.name().to_owned(), content)
            })
            .collect()
    }

    #[rstest]
    #[case(vec!["a.txt", "b.txt"], vec!["a.txt", "b.txt"])]
    #[case(vec!["a.txt", "a.txt", "a.txt"], vec!["a.txt", "a (1).txt", "a (2).txt"])]
    #[case(vec!["dir/a.txt", "other\\a.txt"], vec!["a.txt", "a (1).txt"])]
    #[case(vec!["README", "README"], vec!["README", "README (1)"])]
    #[case(vec![".env", ".env"], vec![".env", ".env (1)"])]
    #[case(vec!["../", ""], vec!["file", "file (1)"])]
    #[case(vec!["a (1).txt", "a.txt", "a.txt"], vec!["a (1).txt", "a.txt", "a (2).txt"])]
    #[trace]
    fn entry_names_are_unique(#[case] names: Vec<&str>, #[case] expected: Vec<&str>) {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let members: Vec<_> = names.iter().map(|n| member(&dir, n, b"")).collect();

        // Act
        let result = entry_names(&members);

        // Assert
        assert_eq!(result, expected);
    }

    #[test]
    fn archive_name_has_group_and_date() {
        // Arrange
        let at = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // Act
        let name = archive_name("abc", at);

        // Assert
        assert_eq!(name, "files_abc_2024-03-05.zip");
    }

    #[test]
    fn write_archive_preserves_order_names_and_content() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let members = vec![
            member(&dir, "second.bin", &big),
            member(&dir, "first.txt", b"hello"),
            member(&dir, "empty", b""),
        ];
        let mut consumed = 0u64;

        // Act
        let cursor = ArchiveBuilder::new(9)
            .write_archive(
                &members,
                Cursor::new(Vec::new()),
                "comment",
                &mut |n| consumed += n,
                &CancellationToken::new(),
            )
            .unwrap();

        // Assert
        let entries = read_entries(cursor.into_inner());
        assert_eq!(consumed, big.len() as u64 + 5);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], ("second.bin".to_owned(), big));
        assert_eq!(entries[1], ("first.txt".to_owned(), b"hello".to_vec()));
        assert_eq!(entries[2], ("empty".to_owned(), Vec::new()));
    }

    #[test]
    fn cancelled_archive_stops() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let members = vec![member(&dir, "a.txt", b"abc")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Act
        let result = ArchiveBuilder::new(1).write_archive(
            &members,
            Cursor::new(Vec::new()),
            "",
            &mut |_| {},
            &cancel,
        );

        // Assert
        assert!(matches!(result, Err(TransferError::Transfer(_))));
    }

    #[tokio::test]
    async fn build_reports_progress_to_hundred() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let members = vec![
            member(&dir, "a.txt", &[b'a'; 100_000]),
            member(&dir, "b.txt", &[b'b'; 50_000]),
        ];
        let broadcaster = ProgressBroadcaster::new(1024);
        let mut rx = broadcaster.subscribe();
        let session = TransferSession::new(broadcaster, "g", TransferKind::Download, 150_000)
            .with_total_files(2);
        let scratch = ScratchFile::new(dir.path().join("out.zip"));

        // Act
        let scratch = ArchiveBuilder::new(6)
            .build(members, scratch, session, String::new())
            .await
            .unwrap();

        // Assert
        let entries = read_entries(fs::read(scratch.path()).unwrap());
        assert_eq!(entries.len(), 2);
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.total_files, Some(2));
            seen.push(event.percentage);
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn failed_build_removes_scratch() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let present = member(&dir, "a.txt", b"abc");
        let vanished = member(&dir, "b.txt", b"def");
        fs::remove_file(&vanished.storage_path).unwrap();
        let scratch_path = dir.path().join("broken.zip");
        let session = TransferSession::new(
            ProgressBroadcaster::new(8),
            "g",
            TransferKind::Download,
            6,
        );

        // Act
        let result = ArchiveBuilder::new(6)
            .build(
                vec![present, vanished],
                ScratchFile::new(scratch_path.clone()),
                session,
                String::new(),
            )
            .await;

        // Assert
        assert!(matches!(result, Err(TransferError::Transfer(_))));
        assert!(!scratch_path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_build_leaves_no_scratch() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let big: Vec<u8> = (0..2_000_000u32).map(|i| (i % 251) as u8).collect();
        let source = member(&dir, "big.bin", &big);

        for i in 0..20 {
            let scratch_path = dir.path().join(format!("cancelled_{i}.zip"));
            let session = TransferSession::new(
                ProgressBroadcaster::new(8),
                "g",
                TransferKind::Download,
                big.len() as u64,
            );

            // Act
            let builder = ArchiveBuilder::new(9);
            let mut build = Box::pin(builder.build(
                vec![source.clone()],
                ScratchFile::new(scratch_path.clone()),
                session,
                String::new(),
            ));
            let _ = futures::poll!(build.as_mut());
            drop(build);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            // Assert
            assert!(!scratch_path.exists(), "iteration {i} left {}", scratch_path.display());
        }
    }

    #[test]
    fn scratch_file_removed_on_drop() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.zip");
        fs::write(&path, b"x").unwrap();

        // Act
        drop(ScratchFile::new(path.clone()));

        // Assert
        assert!(!path.exists());
    }
}
