use http::{HeaderMap, StatusCode};
use serde_json::{json, Value};
use tool_relay::api::handle_non_streaming;
use tool_relay::client::RecordingSink;
use tool_relay::fc::ConversionPolicy;
use tool_relay::observability::token_counter::EstimatingCounter;
use tool_relay::protocol::openai_chat::UsageRecord;
use tool_relay::protocol::RelayMode;
use tool_relay::transport::{BytesBody, UpstreamResponse};

fn upstream(body: &Value) -> UpstreamResponse<BytesBody> {
    UpstreamResponse {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: BytesBody::from_text(&body.to_string()),
    }
}

fn chat() -> ConversionPolicy {
    ConversionPolicy::new(true, RelayMode::ChatCompletions)
}

#[tokio::test]
async fn test_existing_tool_calls_are_left_alone() {
    let body = json!({
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": "call_native",
                    "type": "function",
                    "function": {"name": "native", "arguments": "{\"a\":1}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
    });
    let mut sink = RecordingSink::new();
    let usage = handle_non_streaming(&mut sink, upstream(&body), 2, "m", chat(), &EstimatingCounter)
        .await
        .expect("relayed");

    assert_eq!(sink.body_text(), body.to_string());
    assert_eq!(usage, UsageRecord::computed(2, 3));
}

#[tokio::test]
async fn test_zero_usage_is_recomputed_and_non_zero_is_verbatim() {
    let zero = json!({
        "choices": [{"message": {"role": "assistant", "content": "abcdefgh"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}
    });
    let mut sink = RecordingSink::new();
    let usage = handle_non_streaming(&mut sink, upstream(&zero), 10, "m", chat(), &EstimatingCounter)
        .await
        .expect("relayed");
    assert_eq!(usage, UsageRecord::computed(10, 2));

    let partial = json!({
        "choices": [{"message": {"role": "assistant", "content": "abcdefgh"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 0, "completion_tokens": 4, "total_tokens": 0}
    });
    let mut sink = RecordingSink::new();
    let usage = handle_non_streaming(&mut sink, upstream(&partial), 10, "m", chat(), &EstimatingCounter)
        .await
        .expect("relayed");
    assert_eq!(usage.completion_tokens, 4);
    assert_eq!(usage.total_tokens, 0);
}

#[tokio::test]
async fn test_custom_counter_is_used_for_recount() {
    let body = json!({
        "choices": [
            {"message": {"role": "assistant", "content": "one"}, "finish_reason": "stop"},
            {"message": {"role": "assistant", "content": "three"}, "finish_reason": "stop"}
        ]
    });
    let counter = |text: &str, _model: &str| text.len() as u64;
    let mut sink = RecordingSink::new();
    let usage = handle_non_streaming(&mut sink, upstream(&body), 1, "m", chat(), &counter)
        .await
        .expect("relayed");
    assert_eq!(usage, UsageRecord::computed(1, 8));
}

#[tokio::test]
async fn test_non_tool_json_is_not_converted() {
    let body = json!({
        "choices": [{"message": {"role": "assistant", "content": "{\"foo\":\"bar\"}"}, "finish_reason": "stop"}]
    });
    let mut sink = RecordingSink::new();
    handle_non_streaming(&mut sink, upstream(&body), 0, "m", chat(), &EstimatingCounter)
        .await
        .expect("relayed");
    let relayed: Value = serde_json::from_slice(&sink.body()).expect("json");
    assert_eq!(relayed["choices"][0]["message"]["content"], "{\"foo\":\"bar\"}");
    assert_eq!(relayed["choices"][0]["finish_reason"], "stop");
    assert!(sink.headers.get(http::header::CONTENT_LENGTH).is_none());
}

#[tokio::test]
async fn test_null_role_and_tool_type_pass_through_unchanged() {
    let body = json!({
        "id": null,
        "choices": [{
            "index": 0,
            "message": {
                "role": null,
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": null,
                    "function": {"name": null, "arguments": "{}"}
                }]
            },
            "finish_reason": null
        }],
        "usage": {"prompt_tokens": 4, "completion_tokens": null, "total_tokens": 4}
    });
    let mut sink = RecordingSink::new();
    let usage = handle_non_streaming(&mut sink, upstream(&body), 4, "m", chat(), &EstimatingCounter)
        .await
        .expect("null fields decode");

    assert_eq!(sink.status, Some(StatusCode::OK));
    assert_eq!(sink.body_text(), body.to_string());
    assert_eq!(usage.prompt_tokens, 4);
    assert_eq!(usage.completion_tokens, 0);
    assert_eq!(usage.total_tokens, 4);
}
