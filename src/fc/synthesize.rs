use serde::Deserialize;

use crate::protocol::openai_chat::{FunctionCall, ResponseMessage, ToolCall, TOOL_TYPE_FUNCTION};
use crate::util::next_call_id;

use super::fence::strip_code_fences;

/// `{"tool_calls": [...]}`
#[derive(Debug, Deserialize)]
struct ToolCallsWrapper {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// `{"type": "function", "function": {...}}`
#[derive(Debug, Deserialize)]
struct SingleToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    function: Option<FunctionCall>,
}

/// Parse textual model output as a tool-call payload.
///
/// Recognizes a wrapper object with a non-empty `tool_calls` array, or a bare
/// call object whose `function.name` is set or whose `type` is `"function"`.
/// Any text that is not brace-delimited after fence stripping is rejected
/// without attempting a JSON decode.
#[must_use]
pub fn parse_tool_call_payload(text: &str) -> Option<Vec<ToolCall>> {
    if text.trim().is_empty() {
        return None;
    }
    let raw = strip_code_fences(text).trim();
    if !raw.starts_with('{') || !raw.ends_with('}') {
        return None;
    }

    if let Ok(wrapper) = serde_json::from_str::<ToolCallsWrapper>(raw) {
        if !wrapper.tool_calls.is_empty() {
            return Some(normalize_tool_calls(wrapper.tool_calls));
        }
    }

    let single = serde_json::from_str::<SingleToolCall>(raw).ok()?;
    let function = single.function.unwrap_or_default();
    if function.name.trim().is_empty() && single.kind != TOOL_TYPE_FUNCTION {
        return None;
    }
    Some(normalize_tool_calls(vec![ToolCall {
        index: None,
        id: single.id,
        kind: single.kind,
        function,
    }]))
}

/// Fill the fields clients rely on: `type`, a call id and string arguments.
fn normalize_tool_calls(mut calls: Vec<ToolCall>) -> Vec<ToolCall> {
    for call in &mut calls {
        if call.kind.is_empty() {
            call.kind = TOOL_TYPE_FUNCTION.to_owned();
        }
        if call.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            call.id = Some(next_call_id());
        }
        if call.function.arguments.trim().is_empty() {
            call.function.arguments = "{}".to_owned();
        }
    }
    calls
}

/// Try to upgrade a message's textual content into structured tool calls.
///
/// On success the calls are installed, `content` is cleared and `true` is
/// returned. On failure the message is left untouched. A message whose text is
/// blank (including one that already carries tool calls) always fails.
pub fn synthesize_tool_calls(message: &mut ResponseMessage) -> bool {
    let Some(calls) = parse_tool_call_payload(&message.text()) else {
        return false;
    };
    message.tool_calls = Some(calls);
    message.content = None;
    true
}
