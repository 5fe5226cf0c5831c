use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::Stream;
use std::io;

use crate::range::ByteSpan;

/// Whole file or archive sent as an attachment.
pub struct FileReply<S> {
    body: S,
    file_name: String,
    content_type: String,
    size: u64,
}

impl<S> FileReply<S> {
    #[must_use]
    pub fn new(body: S, file_name: String, content_type: String, size: u64) -> Self {
        Self {
            body,
            file_name,
            content_type,
            size,
        }
    }
}

impl<S> IntoResponse for FileReply<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    fn into_response(self) -> Response {
        let mut res = Body::from_stream(self.body).into_response();
        let headers = res.headers_mut();
        insert(headers, header::CONTENT_TYPE, &self.content_type);
        insert(
            headers,
            header::CONTENT_DISPOSITION,
            &content_disposition(&self.file_name),
        );
        insert(headers, header::CONTENT_LENGTH, &self.size.to_string());
        res
    }
}

/// One chunk of a media file sent as partial content.
pub struct RangeReply<S> {
    body: S,
    span: ByteSpan,
    content_type: String,
}

impl<S> RangeReply<S> {
    #[must_use]
    pub fn new(body: S, span: ByteSpan, content_type: String) -> Self {
        Self {
            body,
            span,
            content_type,
        }
    }
}

impl<S> IntoResponse for RangeReply<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    fn into_response(self) -> Response {
        let mut res = Body::from_stream(self.body).into_response();
        *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        let headers = res.headers_mut();
        insert(headers, header::CONTENT_TYPE, &self.content_type);
        insert(headers, header::CONTENT_RANGE, &self.span.content_range());
        insert(headers, header::CONTENT_LENGTH, &self.span.len().to_string());
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        res
    }
}

fn insert(headers: &mut axum::http::HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(val) => {
            headers.insert(name, val);
        }
        Err(e) => tracing::warn!("header {name} not set. Error: {e}"),
    }
}

/// File name is percent encoded so any original name fits a header value.
fn content_disposition(file_name: &str) -> String {
    format!(
        r#"attachment; filename="{}""#,
        urlencoding::encode(file_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use rstest::rstest;

    #[rstest]
    #[case("file.ext", r#"attachment; filename="file.ext""#)]
    #[case("my file.txt", r#"attachment; filename="my%20file.txt""#)]
    #[case("отчёт.pdf", r#"attachment; filename="%D0%BE%D1%82%D1%87%D1%91%D1%82.pdf""#)]
    #[case(r#"a"b.txt"#, r#"attachment; filename="a%22b.txt""#)]
    #[trace]
    fn disposition(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(content_disposition(name), expected);
    }

    #[test]
    fn file_reply_headers() {
        // Arrange
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"abc"))]);
        let reply = FileReply::new(body, "a.zip".to_owned(), "application/zip".to_owned(), 3);

        // Act
        let res = reply.into_response();

        // Assert
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "3");
        assert_eq!(
            res.headers()[header::CONTENT_DISPOSITION],
            r#"attachment; filename="a.zip""#
        );
    }

    #[test]
    fn range_reply_headers() {
        // Arrange
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"0123456789"))]);
        let span = ByteSpan {
            start: 4990,
            end: 4999,
            total: 5000,
        };
        let reply = RangeReply::new(body, span, "video/mp4".to_owned());

        // Act
        let res = reply.into_response();

        // Assert
        assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(res.headers()[header::CONTENT_RANGE], "bytes 4990-4999/5000");
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "10");
        assert_eq!(res.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(res.headers()[header::CONTENT_TYPE], "video/mp4");
    }
}
