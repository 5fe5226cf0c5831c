use std::path::PathBuf;

use chrono::{DateTime, Utc};
use kernel::{FileSummary, GroupSummary};

pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Blob written by the content store, not yet described in the catalog.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub file_id: String,
    pub storage_path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
}

/// One uploaded file. Read-only once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub storage_path: PathBuf,
    pub checksum: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    #[must_use]
    pub fn new(blob: StoredBlob, original_name: &str, mime_hint: Option<&str>) -> Self {
        Self {
            file_id: blob.file_id,
            original_name: original_name.to_owned(),
            size_bytes: blob.size_bytes,
            mime_type: resolve_mime(mime_hint, original_name),
            storage_path: blob.storage_path,
            checksum: Some(blob.checksum),
            uploaded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.file_id.clone(),
            name: self.original_name.clone(),
            size: self.size_bytes,
            mime_type: self.mime_type.clone(),
            checksum: self.checksum.clone(),
            upload_date: self.uploaded_at,
        }
    }
}

/// Files uploaded together. Membership never changes after registration.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    pub group_id: String,
    pub member_file_ids: Vec<String>,
    /// Upload time of the earliest member, the group's retention age
    pub created_at: DateTime<Utc>,
}

/// Builds the wire summary for a group out of its live members.
#[must_use]
pub fn group_summary(group_id: &str, members: &[FileRecord]) -> GroupSummary {
    GroupSummary {
        group_id: group_id.to_owned(),
        files_count: members.len(),
        total_size: total_size(members),
        files: members.iter().map(FileRecord::summary).collect(),
    }
}

#[must_use]
pub fn total_size(members: &[FileRecord]) -> u64 {
    members.iter().map(|f| f.size_bytes).sum()
}

/// Uses the uploader's declared type when present, falls back to the file extension
/// and finally to an opaque binary type.
#[must_use]
pub fn resolve_mime(hint: Option<&str>, file_name: &str) -> String {
    match hint.map(str::trim) {
        Some(h) if !h.is_empty() => h.to_owned(),
        _ => mime_guess::from_path(file_name)
            .first_raw()
            .unwrap_or(DEFAULT_MIME)
            .to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("video/webm"), "clip.mp4", "video/webm")]
    #[case(None, "clip.mp4", "video/mp4")]
    #[case(Some("  "), "notes.txt", "text/plain")]
    #[case(None, "archive.unknownext", DEFAULT_MIME)]
    #[case(None, "no_extension", DEFAULT_MIME)]
    #[trace]
    fn resolve_mime_cases(
        #[case] hint: Option<&str>,
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        // Act
        let mime = resolve_mime(hint, name);

        // Assert
        assert_eq!(mime, expected);
    }

    #[test]
    fn group_summary_sums_members() {
        // Arrange
        let members: Vec<FileRecord> = [3u64, 5, 7]
            .iter()
            .enumerate()
            .map(|(i, size)| FileRecord {
                file_id: format!("f{i}"),
                original_name: format!("n{i}"),
                size_bytes: *size,
                mime_type: DEFAULT_MIME.to_owned(),
                storage_path: PathBuf::from(format!("f{i}")),
                checksum: None,
                uploaded_at: Utc::now(),
            })
            .collect();

        // Act
        let summary = group_summary("g", &members);

        // Assert
        assert_eq!(summary.files_count, 3);
        assert_eq!(summary.total_size, 15);
        assert_eq!(summary.files[1].name, "n1");
    }
}
