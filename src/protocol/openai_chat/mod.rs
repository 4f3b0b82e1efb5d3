use serde::{Deserialize, Deserializer, Serialize};

use super::content::{content_text, MessageContent};

pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const ASSISTANT_ROLE: &str = "assistant";
pub const FINISH_REASON_STOP: &str = "stop";
pub const FINISH_REASON_TOOL_CALLS: &str = "tool_calls";
pub const TOOL_TYPE_FUNCTION: &str = "function";

/// Token usage as reported by the upstream or computed locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u64,
    /// Vendor detail objects (`prompt_tokens_details`, ...), kept as-is.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl UsageRecord {
    /// Build a locally computed record; `total_tokens` is always the sum.
    #[must_use]
    pub fn computed(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            extra: ExtraFields::new(),
        }
    }

    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

/// Function part of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Always a JSON string on the way out; structured values are flattened
    /// to their compact JSON text when decoded.
    #[serde(default, deserialize_with = "arguments_from_any")]
    pub arguments: String,
}

/// A structured tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Position within a streamed `tool_calls` delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub function: FunctionCall,
}

/// Decode an explicit JSON `null` as the field's default value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn arguments_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

/// Incremental update for one choice in one stream event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A chat-completion stream chunk, both as decoded from upstream and as
/// synthesized for the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub object: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<StreamChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRecord>,
}

/// Assistant message of a non-streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl ResponseMessage {
    /// Assistant message holding plain text.
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: ASSISTANT_ROLE.to_owned(),
            content: Some(MessageContent::Text(text.into())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        content_text(self.content.as_ref())
    }

    #[must_use]
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.as_ref().map_or(0, Vec::len)
    }
}

/// A choice of a non-streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Slim view of a non-streaming response body.
///
/// Fields the relay does not inspect (`id`, `model`, `created`, ...) are
/// carried in `extra` so a re-encoded body keeps them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ResponseChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRecord>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// A legacy text-completion stream chunk; only the parts the relay reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionsChunk {
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<CompletionsChoice>,
    #[serde(default)]
    pub usage: Option<UsageRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionsChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}
