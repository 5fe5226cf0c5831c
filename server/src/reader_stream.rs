use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures::Stream;

use crate::archive::ScratchFile;
use crate::progress::TransferSession;

/// Response body stream that reports progress as chunks leave and keeps the
/// scratch file it reads from alive until the stream is dropped.
///
/// The body is dropped both after the last chunk and when the client goes
/// away. Fields drop in order: the reader is closed before the scratch file
/// is deleted.
pub struct TransferStream<S> {
    inner: S,
    session: Option<TransferSession>,
    scratch: Option<ScratchFile>,
}

impl<S> TransferStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            session: None,
            scratch: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: TransferSession) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn with_scratch(mut self, scratch: ScratchFile) -> Self {
        self.scratch = Some(scratch);
        self
    }
}

impl<S> Stream for TransferStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(session) = this.session.as_mut() {
                    session.advance(chunk.len() as u64);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if let Some(session) = this.session.as_mut() {
                    session.finish();
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
