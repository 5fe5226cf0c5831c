use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by the transfer core to the request boundary.
///
/// Nothing inside the core retries: every variant reaches the caller as is.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("storage read failed: {0}")]
    StorageRead(String),

    #[error("transfer aborted: {0}")]
    Transfer(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("range header required")]
    RangeRequired,

    #[error("range not satisfiable for content of {total} bytes")]
    RangeNotSatisfiable { total: u64 },
}

impl TransferError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            TransferError::Validation(_) | TransferError::RangeRequired => StatusCode::BAD_REQUEST,
            TransferError::NotFound(_) => StatusCode::NOT_FOUND,
            TransferError::StorageWrite(_)
            | TransferError::StorageRead(_)
            | TransferError::Transfer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TransferError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            TransferError::LimitExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            TransferError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }

        let mut res = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let TransferError::RangeNotSatisfiable { total } = self {
            if let Ok(val) = HeaderValue::from_str(&format!("bytes */{total}")) {
                res.headers_mut().insert(header::CONTENT_RANGE, val);
            }
        }
        res
    }
}
