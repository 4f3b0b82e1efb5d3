use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderMap, StatusCode};

/// Body of an upstream response.
///
/// Normalizers read it to the end (or until they stop caring) and then call
/// [`UpstreamBody::close`] exactly once on every exit path.
pub trait UpstreamBody: Stream<Item = io::Result<Bytes>> + Unpin + Send {
    /// Release the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported while releasing the resource.
    fn close(&mut self) -> io::Result<()>;
}

/// Status, headers and body of one upstream response.
#[derive(Debug)]
pub struct UpstreamResponse<B> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: B,
}

// ---------------------------------------------------------------------------
// ReqwestBody
// ---------------------------------------------------------------------------

type ReqwestByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// [`UpstreamBody`] over a `reqwest` response stream.
pub struct ReqwestBody {
    inner: Option<ReqwestByteStream>,
}

impl ReqwestBody {
    #[must_use]
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            inner: Some(Box::pin(response.bytes_stream())),
        }
    }
}

impl Stream for ReqwestBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        inner
            .as_mut()
            .poll_next(cx)
            .map(|item| item.map(|chunk| chunk.map_err(io::Error::other)))
    }
}

impl UpstreamBody for ReqwestBody {
    fn close(&mut self) -> io::Result<()> {
        // Dropping the stream returns the connection to the pool or aborts it.
        self.inner = None;
        Ok(())
    }
}

/// Split a `reqwest` response into an [`UpstreamResponse`].
#[must_use]
pub fn from_reqwest(response: reqwest::Response) -> UpstreamResponse<ReqwestBody> {
    UpstreamResponse {
        status: response.status(),
        headers: response.headers().clone(),
        body: ReqwestBody::new(response),
    }
}

// ---------------------------------------------------------------------------
// BytesBody: in-memory body
// ---------------------------------------------------------------------------

/// [`UpstreamBody`] serving pre-recorded chunks, with injectable failures.
#[derive(Debug, Default)]
pub struct BytesBody {
    chunks: VecDeque<io::Result<Bytes>>,
    close_error: Option<io::Error>,
    close_calls: Arc<AtomicUsize>,
}

impl BytesBody {
    #[must_use]
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(|c| Ok(c.into())).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::from_chunks([Bytes::copy_from_slice(text.as_bytes())])
    }

    /// Fail the next read after the chunks queued so far.
    #[must_use]
    pub fn with_read_error(mut self, message: &str) -> Self {
        self.chunks.push_back(Err(io::Error::other(message.to_owned())));
        self
    }

    /// Make [`UpstreamBody::close`] fail.
    #[must_use]
    pub fn with_close_error(mut self, message: &str) -> Self {
        self.close_error = Some(io::Error::other(message.to_owned()));
        self
    }

    /// Shared counter of `close` calls, observable after the body is moved.
    #[must_use]
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }
}

impl Stream for BytesBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.chunks.pop_front())
    }
}

impl UpstreamBody for BytesBody {
    fn close(&mut self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.chunks.clear();
        match self.close_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
