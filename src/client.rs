//! The client half of a relayed response.
//!
//! Normalizers write through a [`ClientSink`] instead of building a response
//! value, so a client that goes away mid-stream surfaces as a write error.

use std::future::Future;

use axum::body::Body;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

/// Failure to deliver bytes to the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientWriteError {
    #[error("client disconnected")]
    Disconnected,
    #[error("response head already sent")]
    HeadAlreadySent,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Destination for one relayed response.
pub trait ClientSink: Send {
    /// Send the status line and headers. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ClientWriteError::HeadAlreadySent`] on a second call and
    /// [`ClientWriteError::Disconnected`] when the client is gone.
    fn send_head(&mut self, status: StatusCode, headers: HeaderMap)
        -> Result<(), ClientWriteError>;

    /// Send one body chunk. A `200` head with no headers is implied if none
    /// was sent yet.
    fn send_data(
        &mut self,
        data: Bytes,
    ) -> impl Future<Output = Result<(), ClientWriteError>> + Send;
}

// ---------------------------------------------------------------------------
// ChannelSink: bridges a spawned normalizer to an axum response
// ---------------------------------------------------------------------------

type Head = (StatusCode, HeaderMap);

/// Sink half of [`channel`].
pub struct ChannelSink {
    head: Option<oneshot::Sender<Head>>,
    data: mpsc::Sender<Bytes>,
}

/// Response half of [`channel`].
pub struct PendingResponse {
    head: oneshot::Receiver<Head>,
    data: mpsc::Receiver<Bytes>,
}

/// Create a connected sink/response pair with `buffer` in-flight chunks.
#[must_use]
pub fn channel(buffer: usize) -> (ChannelSink, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (data_tx, data_rx) = mpsc::channel(buffer.max(1));
    (
        ChannelSink {
            head: Some(head_tx),
            data: data_tx,
        },
        PendingResponse {
            head: head_rx,
            data: data_rx,
        },
    )
}

impl ClientSink for ChannelSink {
    fn send_head(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<(), ClientWriteError> {
        let sender = self.head.take().ok_or(ClientWriteError::HeadAlreadySent)?;
        sender
            .send((status, headers))
            .map_err(|_| ClientWriteError::Disconnected)
    }

    async fn send_data(&mut self, data: Bytes) -> Result<(), ClientWriteError> {
        if self.head.is_some() {
            self.send_head(StatusCode::OK, HeaderMap::new())?;
        }
        self.data
            .send(data)
            .await
            .map_err(|_| ClientWriteError::Disconnected)
    }
}

impl PendingResponse {
    /// Wait for the head and turn the pair into a streaming response.
    ///
    /// Returns `None` when the sink was dropped before sending a head, which
    /// means the producer failed before writing anything.
    pub async fn into_response(self) -> Option<Response> {
        let (status, headers) = self.head.await.ok()?;
        let stream = futures_util::stream::unfold(self.data, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, std::convert::Infallible>(chunk), rx))
        });
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Some(response)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink: in-memory sink
// ---------------------------------------------------------------------------

/// Collects everything written to it; optionally fails after N data writes.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub frames: Vec<Bytes>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose client disconnects after `writes` successful data writes.
    #[must_use]
    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    /// All body bytes written so far.
    #[must_use]
    pub fn body(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.frames.iter().map(Bytes::len).sum());
        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
        out.freeze()
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }
}

impl ClientSink for RecordingSink {
    fn send_head(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<(), ClientWriteError> {
        if self.status.is_some() {
            return Err(ClientWriteError::HeadAlreadySent);
        }
        self.status = Some(status);
        self.headers = headers;
        Ok(())
    }

    async fn send_data(&mut self, data: Bytes) -> Result<(), ClientWriteError> {
        if self
            .fail_after
            .is_some_and(|limit| self.frames.len() >= limit)
        {
            return Err(ClientWriteError::Disconnected);
        }
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.frames.push(data);
        Ok(())
    }
}
