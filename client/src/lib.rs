use std::path::{Path, PathBuf};

use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use futures::StreamExt;
use kernel::{GroupSummary, UploadSummary};
use reqwest::{Client, Response, StatusCode};
use resource::Resource;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;

pub mod resource;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server uri {0}")]
    InvalidUri(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// Uploads files as one group.
pub async fn upload_group<P: AsRef<Path>>(
    uri: &str,
    files: &[P],
) -> Result<UploadSummary, ClientError> {
    let resource = Resource::upload(uri).ok_or_else(|| ClientError::InvalidUri(uri.to_owned()))?;

    let mut form = reqwest::multipart::Form::new();
    for path in files {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let f = File::open(path).await.map_err(|e| io_error(path, e))?;
        let meta = f.metadata().await.map_err(|e| io_error(path, e))?;
        let stream = reqwest::Body::wrap_stream(ReaderStream::new(f));
        let part =
            reqwest::multipart::Part::stream_with_length(stream, meta.len()).file_name(file_name);
        form = form.part("file", part);
    }

    let response = Client::new()
        .post(resource.to_string())
        .multipart(form)
        .send()
        .await?;
    Ok(success(response).await?.json().await?)
}

pub async fn group_info(uri: &str, group_id: &str) -> Result<GroupSummary, ClientError> {
    let resource =
        Resource::group(uri, group_id).ok_or_else(|| ClientError::InvalidUri(uri.to_owned()))?;
    let response = Client::new().get(resource.to_string()).send().await?;
    Ok(success(response).await?.json().await?)
}

/// Downloads a group into `dir` under the name the server suggests and
/// returns the path written.
pub async fn download_group(
    uri: &str,
    group_id: &str,
    dir: &Path,
) -> Result<PathBuf, ClientError> {
    let resource = Resource::group_download(uri, group_id)
        .ok_or_else(|| ClientError::InvalidUri(uri.to_owned()))?;
    let response = success(Client::new().get(resource.to_string()).send().await?).await?;

    let file_name = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(attachment_name)
        .unwrap_or_else(|| group_id.to_owned());
    let target = dir.join(file_name);

    let f = File::create(&target)
        .await
        .map_err(|e| io_error(&target, e))?;
    let mut writer = BufWriter::new(f);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        writer
            .write_all(&chunk?)
            .await
            .map_err(|e| io_error(&target, e))?;
    }
    writer.flush().await.map_err(|e| io_error(&target, e))?;
    Ok(target)
}

#[must_use]
pub fn group_table(group: &GroupSummary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(vec![
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Size").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Uploaded").add_attribute(Attribute::Bold),
        ]);

    for f in &group.files {
        table.add_row(vec![
            Cell::new(&f.id),
            Cell::new(&f.name),
            Cell::new(f.size),
            Cell::new(&f.mime_type),
            Cell::new(f.upload_date.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table
}

async fn success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status,
        message: error_message(&text),
    })
}

/// Server errors come as `{"error": "..."}`, anything else is shown as is.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(ToOwned::to_owned))
        .unwrap_or_else(|| body.to_owned())
}

fn attachment_name(disposition: &str) -> Option<String> {
    let quoted = disposition
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("filename="))?;
    let name = quoted.trim_matches('"');
    let decoded = urlencoding::decode(name).ok()?;
    let name = Path::new(decoded.as_ref()).file_name()?.to_str()?;
    Some(name.to_owned())
}

fn io_error(path: &Path, source: std::io::Error) -> ClientError {
    ClientError::Io {
        path: path.display().to_string(),
        source,
    }
}
