use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use kernel::{DeleteResult, FileSummary, GroupSummary, ProgressEvent, TransferKind, UploadSummary};
use tokio::fs::File;
use tokio::io::Take;
use tokio_util::io::ReaderStream;

use crate::archive::{archive_name, ArchiveBuilder, ScratchFile};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::domain::{group_summary, total_size, FileRecord};
use crate::error::TransferError;
use crate::progress::{percentage, ProgressBroadcaster, TransferSession};
use crate::range::{is_streamable, ByteSpan, RangeSpec};
use crate::reader_stream::TransferStream;
use crate::store::{new_id, remove_blob_now, ContentStore};
use crate::sweeper::{RetentionPolicy, RetentionSweeper};

const ZIP_MIME: &str = "application/zip";

/// File content ready to be sent as a whole.
pub struct Download {
    pub stream: TransferStream<ReaderStream<File>>,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// Part of a media file ready to be sent as partial content.
pub struct RangeDownload {
    pub stream: ReaderStream<Take<File>>,
    pub span: ByteSpan,
    pub content_type: String,
}

/// One file of a programmatic group submission.
pub struct IncomingFile<S> {
    pub name: String,
    pub mime_hint: Option<String>,
    pub content: S,
}

/// Entry point of the transfer core: owns the content store, the catalog and
/// the progress channel and exposes the operations request handlers need.
pub struct TransferService {
    store: Arc<ContentStore>,
    catalog: Arc<Catalog>,
    progress: ProgressBroadcaster,
    archiver: ArchiveBuilder,
    max_files: usize,
    range_chunk_size: u64,
    retention: RetentionPolicy,
}

impl TransferService {
    pub async fn open(config: &Config) -> Result<Self, TransferError> {
        let store = ContentStore::open(
            config.blobs_dir(),
            config.scratch_dir(),
            config.max_file_size,
        )
        .await?;
        Ok(Self {
            store: Arc::new(store),
            catalog: Arc::new(Catalog::new()),
            progress: ProgressBroadcaster::new(config.progress_capacity),
            archiver: ArchiveBuilder::new(config.compression_level),
            max_files: config.max_files,
            range_chunk_size: config.range_chunk_size,
            retention: RetentionPolicy {
                file_max_age: config.file_retention,
                scratch_max_age: config.scratch_retention,
                interval: config.sweep_interval,
            },
        })
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Sweeper working on this service's store and catalog.
    #[must_use]
    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            self.retention,
        )
    }

    /// Starts a group upload. `expected_bytes` is the request size when known
    /// and drives upload progress.
    #[must_use]
    pub fn begin_group(&self, expected_bytes: Option<u64>) -> GroupUpload<'_> {
        let group_id = new_id();
        let session = expected_bytes.map(|total| {
            TransferSession::new(self.progress.clone(), &group_id, TransferKind::Upload, total)
        });
        GroupUpload {
            service: self,
            group_id,
            accepted: Vec::new(),
            session,
        }
    }

    /// Stores every file in order and registers them as one group. Stops at the
    /// first failure keeping whatever was stored before it.
    pub async fn submit_group<S, B, E>(
        &self,
        files: Vec<IncomingFile<S>>,
    ) -> Result<UploadSummary, TransferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error,
    {
        let mut upload = self.begin_group(None);
        let mut failure = None;
        for file in files {
            if let Err(e) = upload
                .add(&file.name, file.mime_hint.as_deref(), file.content)
                .await
            {
                failure = Some(e);
                break;
            }
        }
        upload.finish(failure)
    }

    pub fn group_summary(&self, group_id: &str) -> Result<GroupSummary, TransferError> {
        let members = self.live_members(group_id)?;
        Ok(group_summary(group_id, &members))
    }

    pub fn file_summary(&self, file_id: &str) -> Result<FileSummary, TransferError> {
        Ok(self.catalog.get_file(file_id)?.summary())
    }

    /// Opens a single file for download.
    pub async fn open_download(&self, file_id: &str) -> Result<Download, TransferError> {
        let record = self.catalog.get_file(file_id)?;
        self.open_raw(file_id, record).await
    }

    /// Opens a group for download: the file itself when the group has one
    /// member, a zip archive of all members otherwise.
    pub async fn open_group_download(&self, group_id: &str) -> Result<Download, TransferError> {
        let mut members = self.live_members(group_id)?;
        if members.len() == 1 {
            if let Some(record) = members.pop() {
                return self.open_raw(group_id, record).await;
            }
        }

        let now = Utc::now();
        let total = total_size(&members);
        let files_count = members.len();
        let file_name = archive_name(group_id, now);
        let session = TransferSession::new(
            self.progress.clone(),
            group_id,
            TransferKind::Download,
            total,
        )
        .with_total_files(files_count);
        let scratch = ScratchFile::new(
            self.store
                .scratch_path(&format!("files_{group_id}"), "zip"),
        );

        tracing::info!("group {group_id}: archiving {files_count} files, {total} bytes");
        let scratch = self
            .archiver
            .build(
                members,
                scratch,
                session,
                format!("Created on {}", now.to_rfc3339()),
            )
            .await?;

        let file = File::open(scratch.path())
            .await
            .map_err(|e| TransferError::StorageRead(e.to_string()))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TransferError::StorageRead(e.to_string()))?
            .len();
        tracing::info!("group {group_id}: archive {file_name} ready, {size} bytes");

        Ok(Download {
            stream: TransferStream::new(ReaderStream::new(file)).with_scratch(scratch),
            file_name,
            content_type: ZIP_MIME.to_owned(),
            size,
        })
    }

    /// Opens one chunk of a media file for seekable playback.
    pub async fn open_range(
        &self,
        file_id: &str,
        range: Option<&str>,
    ) -> Result<RangeDownload, TransferError> {
        let record = self.catalog.get_file(file_id)?;
        if !is_streamable(&record.mime_type) {
            return Err(TransferError::UnsupportedMediaType(record.mime_type));
        }
        let range = range.ok_or(TransferError::RangeRequired)?;
        let span = RangeSpec::parse(range)?.resolve(record.size_bytes, self.range_chunk_size)?;
        let reader = self
            .store
            .open_range(&record.storage_path, span.start, span.len())
            .await?;

        self.progress.publish(ProgressEvent {
            subject_id: file_id.to_owned(),
            kind: TransferKind::Download,
            percentage: percentage(span.end + 1, span.total),
            throughput: None,
            file_name: Some(record.original_name),
            total_files: None,
        });

        Ok(RangeDownload {
            stream: ReaderStream::new(reader),
            span,
            content_type: record.mime_type,
        })
    }

    /// Deletes a file's blob and then its record. A group left without live
    /// members goes with it.
    pub async fn delete_file(&self, file_id: &str) -> Result<DeleteResult, TransferError> {
        let record = self.catalog.get_file(file_id)?;
        if !self.store.remove(&record.storage_path).await {
            return Err(TransferError::StorageWrite(format!(
                "blob of file {file_id} not removed"
            )));
        }

        let mut result = DeleteResult {
            blobs: 1,
            ..DeleteResult::default()
        };
        if self.catalog.delete_file(file_id).is_some() {
            result.files = 1;
        }
        if let Some(group_id) = self.catalog.group_of(file_id) {
            if self.live_members(&group_id).is_err() {
                result.groups = 1;
            }
        }
        tracing::info!("file: {file_id} deleted");
        Ok(result)
    }

    /// Deletes a group with every member blob and record.
    pub async fn delete_group(&self, group_id: &str) -> Result<DeleteResult, TransferError> {
        let group = self.catalog.get_group(group_id)?;
        let mut result = DeleteResult::default();
        for member in self.catalog.group_members(&group) {
            if self.store.remove(&member.storage_path).await {
                result.blobs += 1;
                if self.catalog.delete_file(&member.file_id).is_some() {
                    result.files += 1;
                }
            }
        }
        if self.catalog.delete_group(group_id).is_some() {
            result.groups = 1;
        }
        tracing::info!(
            "group: {group_id} deleted. The number of files removed {} blobs removed {}",
            result.files,
            result.blobs
        );
        Ok(result)
    }

    /// Members of a group that still resolve. A group with none left is
    /// removed on the spot and reported as not found.
    fn live_members(&self, group_id: &str) -> Result<Vec<FileRecord>, TransferError> {
        let group = self.catalog.get_group(group_id)?;
        let members = self.catalog.group_members(&group);
        if members.is_empty() {
            self.catalog.delete_group(group_id);
            tracing::info!("group {group_id} has no files left, removed");
            return Err(TransferError::NotFound(format!("group {group_id}")));
        }
        Ok(members)
    }

    async fn open_raw(
        &self,
        subject_id: &str,
        record: FileRecord,
    ) -> Result<Download, TransferError> {
        let file = self.store.open_read(&record.storage_path).await?;
        let session = TransferSession::new(
            self.progress.clone(),
            subject_id,
            TransferKind::Download,
            record.size_bytes,
        )
        .with_file_name(&record.original_name);
        Ok(Download {
            stream: TransferStream::new(ReaderStream::new(file)).with_session(session),
            file_name: record.original_name,
            content_type: record.mime_type,
            size: record.size_bytes,
        })
    }
}

/// Files of one upload request being stored one after another.
pub struct GroupUpload<'a> {
    service: &'a TransferService,
    group_id: String,
    accepted: Vec<FileRecord>,
    session: Option<TransferSession>,
}

impl GroupUpload<'_> {
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Stores the next file. Nothing is written when the file count ceiling is
    /// already reached.
    pub async fn add<S, B, E>(
        &mut self,
        name: &str,
        mime_hint: Option<&str>,
        content: S,
    ) -> Result<(), TransferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error,
    {
        if self.accepted.len() >= self.service.max_files {
            return Err(TransferError::LimitExceeded(format!(
                "no more than {} files per upload",
                self.service.max_files
            )));
        }

        let session = &mut self.session;
        let blob = self
            .service
            .store
            .put(content, name, |n| {
                if let Some(s) = session.as_mut() {
                    s.advance(n as u64);
                }
            })
            .await
            .inspect_err(|e| tracing::error!("file '{name}' not stored. Error: {e}"))?;

        let record = FileRecord::new(blob, name, mime_hint);
        tracing::info!(
            "file: {} read: {} file id: {}",
            name,
            record.size_bytes,
            record.file_id
        );
        self.accepted.push(record);
        Ok(())
    }

    /// Registers whatever was stored as the group and reports it together with
    /// the failure that stopped the upload, if any.
    pub fn finish(
        mut self,
        failure: Option<TransferError>,
    ) -> Result<UploadSummary, TransferError> {
        let accepted = std::mem::take(&mut self.accepted);
        if accepted.is_empty() {
            return Err(failure
                .unwrap_or_else(|| TransferError::Validation("no files in request".to_owned())));
        }

        let group = self
            .service
            .catalog
            .register_group(&self.group_id, accepted)?;
        let members = self.service.catalog.group_members(&group);
        if let Some(mut session) = self.session.take() {
            session.finish();
        }
        let summary = group_summary(&group.group_id, &members);
        tracing::info!(
            "group: {} created with {} files, {} bytes",
            summary.group_id,
            summary.files_count,
            summary.total_size
        );

        Ok(UploadSummary {
            group_id: Some(summary.group_id),
            files_count: summary.files_count,
            total_size: summary.total_size,
            files: summary.files,
            error: failure.map(|e| e.to_string()),
        })
    }
}

/// An upload abandoned before `finish` takes its stored blobs with it.
impl Drop for GroupUpload<'_> {
    fn drop(&mut self) {
        if self.accepted.is_empty() {
            return;
        }
        tracing::warn!(
            "upload of group {} abandoned, removing {} stored files",
            self.group_id,
            self.accepted.len()
        );
        for record in self.accepted.drain(..) {
            remove_blob_now(&record.storage_path);
        }
    }
}
