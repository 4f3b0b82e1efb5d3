/// Line-level SSE handling for `OpenAI`-style streams.
///
/// Upstream bodies are split into lines (`\n` or `\r\n`) and each line is
/// classified into a [`LineEvent`]. Only the `data: ` subset of SSE used by
/// LLM vendors is understood; every other field is noise.
use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use memchr::memchr;
use serde::Serialize;

use crate::transport::UpstreamBody;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_MARKER: &str = "[DONE]";
const MARKER_LEN: usize = DATA_PREFIX.len();
const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What a single upstream line means to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// Blank lines, keep-alive comments, `event:`/`id:` fields.
    Ignored,
    /// The stream terminal marker.
    Done,
    /// JSON payload of a `data: ` line.
    Data(&'a str),
}

/// Classify one line (without its line terminator).
///
/// A bare `[DONE]` line is accepted as a terminal marker as well.
#[must_use]
pub fn classify_line(line: &str) -> LineEvent<'_> {
    if line.len() < MARKER_LEN {
        return LineEvent::Ignored;
    }
    if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        if payload.trim() == DONE_MARKER {
            LineEvent::Done
        } else {
            LineEvent::Data(payload)
        }
    } else if line.starts_with(DONE_MARKER) && line.trim_end() == DONE_MARKER {
        LineEvent::Done
    } else {
        LineEvent::Ignored
    }
}

// ---------------------------------------------------------------------------
// LineReader: incremental line splitter over an upstream body
// ---------------------------------------------------------------------------

/// Splits an [`UpstreamBody`] into lines as chunks arrive.
///
/// Partial lines are held until their terminator (or end of input) is seen.
/// Invalid UTF-8 is replaced rather than rejected.
pub struct LineReader<B> {
    body: B,
    buffer: BytesMut,
    scanned: usize,
    eof: bool,
}

impl<B: UpstreamBody> LineReader<B> {
    #[must_use]
    pub fn new(body: B) -> Self {
        Self {
            body,
            buffer: BytesMut::with_capacity(8 * 1024),
            scanned: 0,
            eof: false,
        }
    }

    /// Read the next line.
    ///
    /// Returns `None` at end of input. A read error is returned once; the
    /// caller decides whether to keep reading.
    pub async fn next_line(&mut self) -> Option<io::Result<String>> {
        loop {
            if let Some(rel_pos) = memchr(b'\n', &self.buffer[self.scanned..]) {
                let line_end = self.scanned + rel_pos;
                let raw = self.buffer.split_to(line_end + 1);
                self.scanned = 0;
                return Some(Ok(line_from_bytes(&raw[..line_end])));
            }
            self.scanned = self.buffer.len();

            if self.eof {
                if self.buffer.is_empty() {
                    return None;
                }
                let raw = self.buffer.split();
                self.scanned = 0;
                return Some(Ok(line_from_bytes(&raw)));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => return Some(Err(err)),
                None => self.eof = true,
            }
        }
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.body
    }

    pub fn into_inner(self) -> B {
        self.body
    }
}

fn line_from_bytes(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Encode a payload as `data: {payload}\n\n`.
#[must_use]
pub fn data_frame(payload: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(MARKER_LEN + payload.len() + 2);
    out.extend_from_slice(DATA_PREFIX.as_bytes());
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(b"\n\n");
    out.freeze()
}

/// Serialize a value and encode it as a data frame.
///
/// # Errors
///
/// Returns the serialization error, if any.
pub fn object_frame<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, serde_json::Error> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(DATA_PREFIX.as_bytes());
    serde_json::to_writer(&mut out, value)?;
    out.extend_from_slice(b"\n\n");
    Ok(Bytes::from(out))
}

/// Re-frame an upstream line unchanged (the `data: ` prefix is normalized).
#[must_use]
pub fn raw_line_frame(line: &str) -> Bytes {
    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
    data_frame(payload.strip_suffix('\r').unwrap_or(payload))
}

#[inline]
#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}

/// Response headers for an event stream.
#[must_use]
pub fn event_stream_headers() -> http::HeaderMap {
    let mut headers = http::HeaderMap::with_capacity(4);
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        http::HeaderName::from_static("x-accel-buffering"),
        http::HeaderValue::from_static("no"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BytesBody;

    #[test]
    fn test_classify_short_and_noise_lines() {
        assert_eq!(classify_line(""), LineEvent::Ignored);
        assert_eq!(classify_line("data:"), LineEvent::Ignored);
        assert_eq!(classify_line(": keep-alive"), LineEvent::Ignored);
        assert_eq!(classify_line("event: message"), LineEvent::Ignored);
        assert_eq!(classify_line("data:{\"a\":1}"), LineEvent::Ignored);
    }

    #[test]
    fn test_classify_done_variants() {
        assert_eq!(classify_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(classify_line("data: [DONE]  "), LineEvent::Done);
        assert_eq!(classify_line("[DONE]"), LineEvent::Done);
        assert_eq!(classify_line("[DONE] trailing"), LineEvent::Ignored);
    }

    #[test]
    fn test_classify_data_payload() {
        assert_eq!(
            classify_line("data: {\"id\":\"x\"}"),
            LineEvent::Data("{\"id\":\"x\"}")
        );
        assert_eq!(classify_line("data: not json"), LineEvent::Data("not json"));
    }

    #[tokio::test]
    async fn test_line_reader_handles_split_chunks_and_crlf() {
        let body = BytesBody::from_chunks(["data: {\"a\"", ":1}\r\n\r\nda", "ta: [DONE]"]);
        let mut reader = LineReader::new(body);
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "data: {\"a\":1}");
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "");
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "data: [DONE]");
        assert!(reader.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_line_reader_surfaces_read_error() {
        let body = BytesBody::from_chunks(["data: 1\n", "partial"]).with_read_error("reset");
        let mut reader = LineReader::new(body);
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "data: 1");
        assert!(reader.next_line().await.unwrap().is_err());
    }

    #[test]
    fn test_frames() {
        assert_eq!(&data_frame("{}")[..], b"data: {}\n\n");
        assert_eq!(&raw_line_frame("data: {\"x\":1}")[..], b"data: {\"x\":1}\n\n");
        assert_eq!(&raw_line_frame("[DONE]")[..], b"data: [DONE]\n\n");
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
        let frame = object_frame(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(&frame[..], b"data: {\"a\":1}\n\n");
    }

    #[test]
    fn test_event_stream_headers() {
        let headers = event_stream_headers();
        assert_eq!(headers[http::header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[http::header::CACHE_CONTROL], "no-cache");
    }
}
