//! Tool-call synthesis: upgrading JSON-looking assistant text into structured
//! `tool_calls`.

pub mod fence;
pub mod synthesize;

pub use fence::strip_code_fences;
pub use synthesize::{parse_tool_call_payload, synthesize_tool_calls};

use crate::protocol::RelayMode;

/// Per-request conversion settings, resolved once before the response is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversionPolicy {
    /// Whether the request asked for prompt-based tool-call conversion.
    pub enabled: bool,
    pub mode: RelayMode,
    /// Per-channel buffer cap for streaming conversion; `None` is unbounded.
    pub max_buffer_bytes: Option<usize>,
}

impl ConversionPolicy {
    #[must_use]
    pub fn new(enabled: bool, mode: RelayMode) -> Self {
        Self {
            enabled,
            mode,
            max_buffer_bytes: None,
        }
    }

    #[must_use]
    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: Option<usize>) -> Self {
        self.max_buffer_bytes = max_buffer_bytes;
        self
    }

    /// Streaming conversion needs both the request flag and chat mode.
    #[must_use]
    pub fn streaming_active(&self) -> bool {
        self.enabled && self.mode == RelayMode::ChatCompletions
    }

    /// Non-streaming synthesis is opportunistic for every chat response.
    #[must_use]
    pub fn non_streaming_active(&self) -> bool {
        self.mode == RelayMode::ChatCompletions
    }
}
