use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::client::{self, ClientSink};
use crate::error::RelayError;
use crate::fc::ConversionPolicy;
use crate::observability::log_request_complete;
use crate::observability::token_counter::{resolve_stream_usage, TokenCounter};
use crate::protocol::openai_chat::{null_as_default, UsageRecord};
use crate::protocol::{MessageContent, RelayMode};
use crate::state::AppState;
use crate::stream::stream_handler;
use crate::transport::{ReqwestBody, UpstreamBody, UpstreamResponse};

use super::non_streaming::{handle_non_streaming, is_hop_by_hop};

/// The parts of a client request the relay looks at. The body itself is
/// forwarded unchanged.
#[derive(Debug, Default, Deserialize)]
struct RelayRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    messages: Vec<RequestMessage>,
    #[serde(default)]
    prompt: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RequestMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

impl RelayRequest {
    /// Local prompt-token estimate, used when the upstream reports no usage.
    fn prompt_tokens(&self, counter: &dyn TokenCounter) -> u64 {
        let model = self.model.as_str();
        let messages: u64 = self
            .messages
            .iter()
            .filter_map(|message| message.content.as_ref())
            .map(|content| counter.count(&content.to_text(), model))
            .sum();
        let prompt = match &self.prompt {
            Some(Value::String(text)) => counter.count(text, model),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|text| counter.count(text, model))
                .sum(),
            _ => 0,
        };
        messages + prompt
    }
}

/// Relay one request to the upstream and normalize its response.
pub async fn handler(state: Arc<AppState>, mode: RelayMode, path: &str, body: Bytes) -> Response {
    match handler_inner(state, mode, path, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    mode: RelayMode,
    path: &str,
    body: Bytes,
) -> Result<Response, RelayError> {
    let start_time = Instant::now();
    let request: RelayRequest = serde_json::from_slice(&body)
        .map_err(|err| RelayError::InvalidRequest(format!("Invalid JSON body: {err}")))?;
    let prompt_tokens = request.prompt_tokens(state.counter.as_ref());
    let policy = state.conversion_policy(mode);
    let stream = request.stream.unwrap_or(false);
    let model = request.model;

    let upstream = state.transport.post_json(path, body).await.inspect_err(|err| {
        warn!(error = %err, model = %model, "upstream request failed");
    })?;
    if !upstream.status.is_success() {
        warn!(
            status = %upstream.status,
            model = %model,
            "upstream returned an error status, relaying it unchanged"
        );
        return Ok(passthrough_response(upstream));
    }

    let (mut sink, pending) = client::channel(state.config.server.client_channel_capacity);
    let counter = Arc::clone(&state.counter);
    let task = tokio::spawn(async move {
        let result = relay_response(
            &mut sink,
            upstream,
            prompt_tokens,
            &model,
            stream,
            policy,
            counter.as_ref(),
        )
        .await;
        match &result {
            Ok(usage) => log_request_complete(&model, usage, stream, start_time),
            Err(err) => warn!(
                code = err.code(),
                error = %err,
                model = %model,
                stream,
                "failed to relay upstream response"
            ),
        }
        result
    });

    if let Some(response) = pending.into_response().await {
        return Ok(response);
    }
    match task.await {
        Ok(Err(err)) => Err(err),
        Ok(Ok(_)) => Err(RelayError::Internal(
            "response finished without a status line".to_string(),
        )),
        Err(err) => Err(RelayError::Internal(format!("relay task failed: {err}"))),
    }
}

async fn relay_response<S, B>(
    sink: &mut S,
    upstream: UpstreamResponse<B>,
    prompt_tokens: u64,
    model: &str,
    stream: bool,
    policy: ConversionPolicy,
    counter: &dyn TokenCounter,
) -> Result<UsageRecord, RelayError>
where
    S: ClientSink,
    B: UpstreamBody,
{
    if stream {
        let outcome = stream_handler(sink, upstream.body, policy).await?;
        Ok(resolve_stream_usage(
            outcome.usage,
            prompt_tokens,
            &outcome.transcript,
            model,
            counter,
        ))
    } else {
        handle_non_streaming(sink, upstream, prompt_tokens, model, policy, counter).await
    }
}

/// Relay an upstream error response as-is; vendor error payloads are content.
fn passthrough_response(upstream: UpstreamResponse<ReqwestBody>) -> Response {
    let UpstreamResponse {
        status,
        headers: upstream_headers,
        body,
    } = upstream;
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &upstream_headers {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::RecordingSink;
    use crate::observability::token_counter::EstimatingCounter;
    use crate::transport::BytesBody;

    fn byte_counter(text: &str, _model: &str) -> u64 {
        text.len() as u64
    }

    #[test]
    fn test_prompt_tokens_over_chat_messages() {
        let request: RelayRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [
                {"role": "system", "content": "abc"},
                {"role": "user", "content": [{"type": "text", "text": "de"}]},
                {"role": "assistant", "content": null}
            ]
        }))
        .unwrap();
        assert_eq!(request.prompt_tokens(&byte_counter), 5);
    }

    #[test]
    fn test_prompt_tokens_over_completions_prompt() {
        let single: RelayRequest =
            serde_json::from_value(json!({"model": "m", "prompt": "hello"})).unwrap();
        assert_eq!(single.prompt_tokens(&byte_counter), 5);
        let batch: RelayRequest =
            serde_json::from_value(json!({"model": "m", "prompt": ["ab", "c", 7]})).unwrap();
        assert_eq!(batch.prompt_tokens(&byte_counter), 3);
    }

    #[test]
    fn test_null_stream_flag_is_accepted() {
        let request: RelayRequest =
            serde_json::from_value(json!({"model": "m", "stream": null})).unwrap();
        assert_eq!(request.stream, None);
    }

    #[test]
    fn test_null_model_and_messages_read_as_empty() {
        let request: RelayRequest =
            serde_json::from_value(json!({"model": null, "messages": null, "prompt": "abc"}))
                .unwrap();
        assert!(request.model.is_empty());
        assert_eq!(request.prompt_tokens(&byte_counter), 3);
    }

    #[tokio::test]
    async fn test_stream_usage_falls_back_to_transcript() {
        let body = BytesBody::from_text(concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"12345678\"}}]}\n\n",
            "data: [DONE]\n\n",
        ));
        let mut sink = RecordingSink::new();
        let usage = relay_response(
            &mut sink,
            UpstreamResponse {
                status: http::StatusCode::OK,
                headers: http::HeaderMap::new(),
                body,
            },
            4,
            "m",
            true,
            ConversionPolicy::new(true, RelayMode::ChatCompletions),
            &EstimatingCounter,
        )
        .await
        .unwrap();
        assert_eq!(usage, UsageRecord::computed(4, 2));
    }
}
