pub mod converter;
pub mod sse;

pub use converter::{Emit, StreamConverter, StreamMetadata, StreamOutcome};
pub use sse::{classify_line, LineEvent, LineReader};

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::client::{ClientSink, ClientWriteError};
use crate::error::RelayError;
use crate::fc::ConversionPolicy;
use crate::transport::UpstreamBody;

/// Writes SSE events to the client.
///
/// Client write failures are not fatal to the relay: the first one is logged
/// and every later write becomes a no-op, so the upstream can still be
/// drained and accounted for.
pub struct EventWriter<'a, S> {
    sink: &'a mut S,
    client_gone: bool,
}

impl<'a, S: ClientSink> EventWriter<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            client_gone: false,
        }
    }

    /// Send the `200` event-stream head.
    pub fn start(&mut self) {
        let result = self.sink.send_head(StatusCode::OK, sse::event_stream_headers());
        self.record(result);
    }

    pub async fn write_object_event<T: Serialize + ?Sized>(&mut self, value: &T) {
        match sse::object_frame(value) {
            Ok(frame) => self.write_frame(frame).await,
            Err(err) => error!(error = %err, "failed to encode stream event"),
        }
    }

    pub async fn write_raw_event(&mut self, line: &str) {
        self.write_frame(sse::raw_line_frame(line)).await;
    }

    pub async fn write_terminal(&mut self) {
        self.write_frame(sse::done_frame()).await;
    }

    /// Write and clear a batch of converter output.
    pub async fn write_all(&mut self, emits: &mut Vec<Emit>) {
        for emit in emits.drain(..) {
            match emit {
                Emit::Chunk(chunk) => self.write_object_event(&chunk).await,
                Emit::Raw(line) => self.write_raw_event(&line).await,
                Emit::Done => self.write_terminal().await,
            }
        }
    }

    #[must_use]
    pub fn client_gone(&self) -> bool {
        self.client_gone
    }

    async fn write_frame(&mut self, frame: Bytes) {
        if self.client_gone {
            return;
        }
        let result = self.sink.send_data(frame).await;
        self.record(result);
    }

    fn record(&mut self, result: Result<(), ClientWriteError>) {
        if let Err(err) = result {
            if !self.client_gone {
                debug!(error = %err, "client write failed, discarding further events");
            }
            self.client_gone = true;
        }
    }
}

/// Relay an upstream event stream to the client, converting buffered tool
/// call text when the policy asks for it.
///
/// The body is closed exactly once on every path. Upstream read errors end
/// the stream early but still run the termination protocol.
///
/// # Errors
///
/// Returns [`RelayError::ResourceClose`] when releasing the upstream body
/// fails. Everything written before that has already reached the client.
pub async fn stream_handler<S, B>(
    sink: &mut S,
    body: B,
    policy: ConversionPolicy,
) -> Result<StreamOutcome, RelayError>
where
    S: ClientSink,
    B: UpstreamBody,
{
    let mut writer = EventWriter::new(sink);
    writer.start();

    let mut converter = StreamConverter::new(policy);
    let mut reader = LineReader::new(body);
    let mut emits = Vec::with_capacity(4);

    while let Some(next) = reader.next_line().await {
        let line = match next {
            Ok(line) => line,
            Err(err) => {
                let metadata = converter.metadata();
                warn!(
                    error = %err,
                    upstream_id = %metadata.id,
                    model = %metadata.model,
                    "error reading upstream stream"
                );
                break;
            }
        };
        converter.on_line_into(&line, &mut emits);
        writer.write_all(&mut emits).await;
        if converter.is_terminated() {
            break;
        }
    }
    converter.finish_into(&mut emits);
    writer.write_all(&mut emits).await;
    debug!(
        upstream_id = %converter.metadata().id,
        converted = converter.conversion_active(),
        client_gone = writer.client_gone(),
        "upstream stream finished"
    );

    reader
        .get_mut()
        .close()
        .map_err(RelayError::ResourceClose)?;
    Ok(converter.into_outcome())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::client::RecordingSink;
    use crate::protocol::RelayMode;
    use crate::transport::BytesBody;

    fn chat(enabled: bool) -> ConversionPolicy {
        ConversionPolicy::new(enabled, RelayMode::ChatCompletions)
    }

    #[tokio::test]
    async fn test_stream_handler_sends_event_stream_head() {
        let mut sink = RecordingSink::new();
        let body = BytesBody::from_text("data: [DONE]\n\n");
        stream_handler(&mut sink, body, chat(true)).await.unwrap();
        assert_eq!(sink.status, Some(StatusCode::OK));
        assert_eq!(
            sink.headers[http::header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(sink.body_text(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_handler_closes_body_once() {
        let body = BytesBody::from_text("data: [DONE]\n\ndata: {\"late\":true}\n\n");
        let closes = body.close_counter();
        let mut sink = RecordingSink::new();
        stream_handler(&mut sink, body, chat(false)).await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(sink.body_text(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_read_error_still_terminates_stream() {
        let body = BytesBody::from_chunks([
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n",
        ])
        .with_read_error("connection reset");
        let closes = body.close_counter();
        let mut sink = RecordingSink::new();
        let outcome = stream_handler(&mut sink, body, chat(true)).await.unwrap();

        let text = sink.body_text();
        assert!(text.contains("\"content\":\"hi\""));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(text.matches("[DONE]").count(), 1);
        assert_eq!(outcome.transcript, "hi");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_failure_overrides_outcome() {
        let body = BytesBody::from_text("data: [DONE]\n").with_close_error("socket reset");
        let mut sink = RecordingSink::new();
        let err = stream_handler(&mut sink, body, chat(true))
            .await
            .expect_err("close failure surfaces");
        assert_eq!(err.code(), "close_response_body_failed");
        assert_eq!(sink.body_text(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_stop_accounting() {
        let body = BytesBody::from_text(concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"one\"}}]}\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" two\"}}]}\n",
            "data: [DONE]\n",
        ));
        let closes = body.close_counter();
        let mut sink = RecordingSink::failing_after(1);
        let outcome = stream_handler(&mut sink, body, chat(false)).await.unwrap();
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(outcome.transcript, "one two");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_writer_ignores_writes_after_failure() {
        let mut sink = RecordingSink::failing_after(0);
        let mut writer = EventWriter::new(&mut sink);
        writer.write_raw_event("data: {}").await;
        assert!(writer.client_gone());
        writer.write_terminal().await;
        assert!(sink.frames.is_empty());
    }
}
