#![allow(clippy::unused_async)]
use crate::domain::DEFAULT_MIME;
use crate::error::TransferError;
use crate::file_reply::{FileReply, RangeReply};
use crate::service::TransferService;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::Stream;
use futures_util::StreamExt;
use kernel::{DeleteResult, FileSummary, GroupSummary, TransferKind, UploadSummary};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use utoipa::OpenApi;

use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
};

type Service = State<Arc<TransferService>>;

/// Uploads all files of a multipart form as one group.
///
/// Files are stored in form order. When one fails the files before it still
/// form the group and the failure is reported in the summary.
#[utoipa::path(
    post,
    path = "/api/upload",
    responses(
        (status = 201, description = "Group created", body = UploadSummary),
        (status = 400, description = "No files in request"),
        (status = 413, description = "File too large or too many files"),
        (status = 500, description = "Server error")
    ),
    tag = "groups",
)]
pub async fn upload_group(
    State(service): Service,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, TransferError> {
    let expected = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut upload = service.begin_group(expected);
    tracing::info!("create group: {}", upload.group_id());
    let mut failure = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("multipart read failed: {e}");
                failure = Some(TransferError::Transfer(e.to_string()));
                break;
            }
        };
        let Some(file_name) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        let mime_hint = field
            .content_type()
            .filter(|m| *m != DEFAULT_MIME)
            .map(ToOwned::to_owned);

        if let Err(e) = upload.add(&file_name, mime_hint.as_deref(), field).await {
            failure = Some(e);
            break;
        }
    }

    let summary = upload.finish(failure)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Gets group's information
#[utoipa::path(
    get,
    path = "/api/group/{id}",
    responses(
        (status = 200, body = GroupSummary),
        (status = 404, description = "Group not found")
    ),
    tag = "groups",
    params(
        ("id" = String, Path, description = "Group id")
    ),
)]
pub async fn get_group(
    Path(id): Path<String>,
    State(service): Service,
) -> Result<Json<GroupSummary>, TransferError> {
    service.group_summary(&id).map(Json)
}

/// Downloads a group: the file itself for a one file group, a zip archive otherwise
#[utoipa::path(
    get,
    path = "/api/group/{id}/download",
    responses(
        (status = 200, description = "File or zip archive binary content"),
        (status = 404, description = "Group not found")
    ),
    tag = "groups",
    params(
        ("id" = String, Path, description = "Group id")
    ),
)]
pub async fn download_group(
    Path(id): Path<String>,
    State(service): Service,
) -> Result<impl IntoResponse, TransferError> {
    let download = service.open_group_download(&id).await?;
    Ok(FileReply::new(
        download.stream,
        download.file_name,
        download.content_type,
        download.size,
    ))
}

/// Deletes whole group with all it's files
#[utoipa::path(
    delete,
    path = "/api/group/{id}",
    responses(
        (status = 200, description = "Group with all files successfully deleted", body = DeleteResult),
        (status = 404, description = "Group not found")
    ),
    tag = "groups",
    params(
        ("id" = String, Path, description = "Group id")
    ),
)]
pub async fn delete_group(
    Path(id): Path<String>,
    State(service): Service,
) -> Result<Json<DeleteResult>, TransferError> {
    service.delete_group(&id).await.map(Json)
}

/// Gets file binary content by file id
#[utoipa::path(
    get,
    path = "/api/file/{id}",
    responses(
        (status = 200, description = "File binary content"),
        (status = 404, description = "File not found")
    ),
    tag = "files",
    params(
        ("id" = String, Path, description = "File id")
    ),
)]
pub async fn download_file(
    Path(id): Path<String>,
    State(service): Service,
) -> Result<impl IntoResponse, TransferError> {
    let download = service.open_download(&id).await?;
    Ok(FileReply::new(
        download.stream,
        download.file_name,
        download.content_type,
        download.size,
    ))
}

/// Gets file's information by file id
#[utoipa::path(
    get,
    path = "/api/file/{id}/meta",
    responses(
        (status = 200, body = FileSummary),
        (status = 404, description = "File not found")
    ),
    tag = "files",
    params(
        ("id" = String, Path, description = "File id")
    ),
)]
pub async fn get_file_info(
    Path(id): Path<String>,
    State(service): Service,
) -> Result<Json<FileSummary>, TransferError> {
    service.file_summary(&id).map(Json)
}

/// Streams a part of an audio or video file for seekable playback
#[utoipa::path(
    get,
    path = "/api/file/{id}/stream",
    responses(
        (status = 206, description = "Requested part of the file"),
        (status = 400, description = "Range header missing or malformed"),
        (status = 404, description = "File not found"),
        (status = 415, description = "File is neither audio nor video"),
        (status = 416, description = "Range outside of the file")
    ),
    tag = "files",
    params(
        ("id" = String, Path, description = "File id"),
        ("Range" = String, Header, description = "Single byte range, e.g. bytes=0-1023")
    ),
)]
pub async fn stream_file(
    Path(id): Path<String>,
    State(service): Service,
    headers: HeaderMap,
) -> Result<impl IntoResponse, TransferError> {
    let range = match headers.get(header::RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| TransferError::Validation("range is not ascii".to_owned()))?,
        ),
        None => None,
    };
    let chunk = service.open_range(&id, range).await?;
    Ok(RangeReply::new(chunk.stream, chunk.span, chunk.content_type))
}

/// Deletes file by id
#[utoipa::path(
    delete,
    path = "/api/file/{id}",
    responses(
        (status = 200, description = "File successfully deleted", body = DeleteResult),
        (status = 404, description = "File not found")
    ),
    tag = "files",
    params(
        ("id" = String, Path, description = "File id")
    ),
)]
pub async fn delete_file(
    Path(id): Path<String>,
    State(service): Service,
) -> Result<Json<DeleteResult>, TransferError> {
    service.delete_file(&id).await.map(Json)
}

/// Server sent events with the progress of every transfer
#[utoipa::path(
    get,
    path = "/api/progress",
    responses(
        (status = 200, description = "uploadProgress and downloadProgress events"),
    ),
    tag = "progress",
)]
pub async fn progress_events(
    State(service): Service,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(service.progress().subscribe()).filter_map(|item| async {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("progress observer behind: {e}");
                return None;
            }
        };
        let name = match event.kind {
            TransferKind::Upload => "uploadProgress",
            TransferKind::Download => "downloadProgress",
        };
        match Event::default().event(name).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!("progress event not encoded: {e}");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `OpenAPI` description of the service
pub async fn openapi() -> impl IntoResponse {
    Json(crate::ApiDoc::openapi())
}
