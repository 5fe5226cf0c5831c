#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Describes a single stored file.
///
/// The name is the one supplied by the uploader and is only used for display
/// and download headers. It never takes part in building storage paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    /// Opaque file identifier
    pub id: String,
    /// Original file name as uploaded
    pub name: String,
    /// Exact size of the stored content in bytes
    pub size: u64,
    /// Resolved MIME type
    #[serde(rename = "type")]
    pub mime_type: String,
    /// BLAKE3 hash of the content computed at upload time
    pub checksum: Option<String>,
    /// Moment the upload finished
    pub upload_date: DateTime<Utc>,
}

/// Files uploaded together and addressed by one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    /// Opaque group identifier
    pub group_id: String,
    /// Number of files in the group
    pub files_count: usize,
    /// Sum of all member sizes in bytes
    pub total_size: u64,
    /// Members in upload order
    pub files: Vec<FileSummary>,
}

/// Result of a group upload.
///
/// Uploads are not rolled back when one file fails: whatever was stored
/// before the failure forms the group and the failure is reported in `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    /// Identifier of the created group, absent when nothing was stored
    pub group_id: Option<String>,
    pub files_count: usize,
    pub total_size: u64,
    pub files: Vec<FileSummary>,
    /// Reason the upload stopped early, if it did
    pub error: Option<String>,
}

/// Direction of a transfer reported through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
}

/// Transfer progress notification published to every connected observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Group or file the transfer belongs to
    pub subject_id: String,
    pub kind: TransferKind,
    /// Completion in percent, from 0 to 100
    pub percentage: u8,
    /// Average throughput since the transfer started, bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
}

/// Result of a delete operation showing the number of items removed.
///
/// Distinguishes catalog entries from the blobs that backed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
pub struct DeleteResult {
    /// Number of file records deleted
    pub files: usize,
    /// Number of stored blobs deleted
    pub blobs: usize,
    /// Number of group records deleted
    pub groups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_omits_empty_optionals() {
        // Arrange
        let event = ProgressEvent {
            subject_id: "g1".to_owned(),
            kind: TransferKind::Download,
            percentage: 42,
            throughput: None,
            file_name: None,
            total_files: Some(3),
        };

        // Act
        let json = serde_json::to_value(&event).unwrap();

        // Assert
        assert_eq!(json["subjectId"], "g1");
        assert_eq!(json["kind"], "download");
        assert_eq!(json["percentage"], 42);
        assert_eq!(json["totalFiles"], 3);
        assert!(json.get("throughput").is_none());
        assert!(json.get("fileName").is_none());
    }

    #[test]
    fn file_summary_uses_type_field_for_mime() {
        // Arrange
        let summary = FileSummary {
            id: "f1".to_owned(),
            name: "movie.mp4".to_owned(),
            size: 10,
            mime_type: "video/mp4".to_owned(),
            checksum: None,
            upload_date: Utc::now(),
        };

        // Act
        let json = serde_json::to_value(&summary).unwrap();

        // Assert
        assert_eq!(json["type"], "video/mp4");
        assert_eq!(json["size"], 10);
        assert!(json.get("uploadDate").is_some());
    }
}
