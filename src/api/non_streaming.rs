use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::HeaderMap;
use tracing::{debug, warn};

use crate::client::ClientSink;
use crate::error::RelayError;
use crate::fc::{synthesize_tool_calls, ConversionPolicy};
use crate::observability::token_counter::{count_completion_usage, needs_recount, TokenCounter};
use crate::protocol::openai_chat::{ResponseEnvelope, UsageRecord, FINISH_REASON_TOOL_CALLS};
use crate::transport::{UpstreamBody, UpstreamResponse};

/// Headers describing the upstream connection rather than the body.
pub(crate) fn is_hop_by_hop(name: &http::HeaderName) -> bool {
    *name == http::header::CONNECTION
        || *name == http::header::TRANSFER_ENCODING
        || *name == http::header::UPGRADE
}

/// Read, normalize and relay a complete (non-streaming) response.
///
/// Chat responses whose choices carry tool-call JSON as text are rewritten
/// with structured `tool_calls`; anything else is relayed byte-for-byte.
///
/// # Errors
///
/// Every failure is fatal and maps to a stable [`RelayError::code`]: body read,
/// body close, envelope decode, re-encode and client write.
pub async fn handle_non_streaming<S, B>(
    sink: &mut S,
    upstream: UpstreamResponse<B>,
    prompt_tokens: u64,
    model: &str,
    policy: ConversionPolicy,
    counter: &dyn TokenCounter,
) -> Result<UsageRecord, RelayError>
where
    S: ClientSink,
    B: UpstreamBody,
{
    let UpstreamResponse {
        status,
        headers: upstream_headers,
        mut body,
    } = upstream;

    let read = read_body(&mut body).await;
    let closed = body.close();
    let raw = match read {
        Ok(raw) => raw,
        Err(err) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "failed to close upstream body after read error");
            }
            return Err(RelayError::BodyRead(err));
        }
    };
    closed.map_err(RelayError::ResourceClose)?;

    let mut envelope: ResponseEnvelope =
        serde_json::from_slice(&raw).map_err(RelayError::EnvelopeDecode)?;

    let mut converted = 0usize;
    if policy.non_streaming_active() {
        for (index, choice) in envelope.choices.iter_mut().enumerate() {
            if synthesize_tool_calls(&mut choice.message) {
                choice.finish_reason = Some(FINISH_REASON_TOOL_CALLS.to_owned());
                converted += 1;
                debug!(
                    index,
                    tool_calls = choice.message.tool_call_count(),
                    "converted message text into tool calls"
                );
            }
        }
    }

    let mut headers = first_values(&upstream_headers);
    let body_out = if converted > 0 {
        let encoded = Bytes::from(serde_json::to_vec(&envelope).map_err(RelayError::Reencode)?);
        headers.insert(http::header::CONTENT_LENGTH, http::HeaderValue::from(encoded.len()));
        encoded
    } else {
        raw
    };

    let is_converted = converted > 0;
    sink.send_head(status, headers)
        .map_err(|source| RelayError::ClientWrite {
            converted: is_converted,
            source,
        })?;
    sink.send_data(body_out)
        .await
        .map_err(|source| RelayError::ClientWrite {
            converted: is_converted,
            source,
        })?;

    Ok(reconcile_usage(envelope, prompt_tokens, model, counter))
}

async fn read_body<B: UpstreamBody>(body: &mut B) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Copy the first value of every header, skipping hop-by-hop ones.
fn first_values(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.keys_len());
    for name in upstream.keys() {
        if is_hop_by_hop(name) {
            continue;
        }
        if let Some(value) = upstream.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

fn reconcile_usage(
    envelope: ResponseEnvelope,
    prompt_tokens: u64,
    model: &str,
    counter: &dyn TokenCounter,
) -> UsageRecord {
    if !needs_recount(envelope.usage.as_ref()) {
        return envelope.usage.unwrap_or_default();
    }
    let texts: Vec<_> = envelope
        .choices
        .iter()
        .map(|choice| choice.message.text())
        .collect();
    count_completion_usage(prompt_tokens, texts.iter().map(|text| &**text), model, counter)
}
