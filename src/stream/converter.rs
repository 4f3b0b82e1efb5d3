use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::fc::{synthesize_tool_calls, ConversionPolicy};
use crate::protocol::openai_chat::{
    ChatCompletionChunk, CompletionsChunk, Delta, ResponseMessage, StreamChoice, UsageRecord,
    ASSISTANT_ROLE, CHUNK_OBJECT, FINISH_REASON_STOP, FINISH_REASON_TOOL_CALLS,
};
use crate::protocol::{MessageContent, RelayMode};

use super::sse::{classify_line, LineEvent};

/// One client-bound event produced by the converter.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    /// A chunk built by the relay.
    Chunk(ChatCompletionChunk),
    /// An upstream line forwarded unchanged.
    Raw(String),
    /// The terminal marker.
    Done,
}

/// What the stream produced, for usage accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub transcript: String,
    pub usage: Option<UsageRecord>,
}

/// Last-seen envelope fields, stamped onto synthesized chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetadata {
    pub id: String,
    pub model: String,
    pub created_at: i64,
    pub usage: Option<UsageRecord>,
}

impl StreamMetadata {
    fn absorb(&mut self, chunk: &mut ChatCompletionChunk) {
        if !chunk.id.is_empty() {
            self.id = std::mem::take(&mut chunk.id);
        }
        if !chunk.model.is_empty() {
            self.model = std::mem::take(&mut chunk.model);
        }
        if chunk.created != 0 {
            self.created_at = chunk.created;
        }
        if let Some(usage) = chunk.usage.take() {
            self.usage = Some(usage);
        }
    }

    fn chunk(&self, choices: Vec<StreamChoice>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: CHUNK_OBJECT.to_owned(),
            created: self.created_at,
            model: self.model.clone(),
            choices,
            usage: None,
        }
    }

    fn choice_chunk(
        &self,
        index: u32,
        delta: Delta,
        finish_reason: Option<&str>,
    ) -> ChatCompletionChunk {
        self.chunk(vec![StreamChoice {
            index,
            delta,
            finish_reason: finish_reason.map(str::to_owned),
        }])
    }

    fn role_chunk(&self, index: u32) -> ChatCompletionChunk {
        self.choice_chunk(
            index,
            Delta {
                role: Some(ASSISTANT_ROLE.to_owned()),
                ..Delta::default()
            },
            None,
        )
    }

    fn content_chunk(&self, index: u32, text: String) -> ChatCompletionChunk {
        self.choice_chunk(
            index,
            Delta {
                content: Some(MessageContent::Text(text)),
                ..Delta::default()
            },
            None,
        )
    }

    fn finish_chunk(&self, index: u32, reason: &str) -> ChatCompletionChunk {
        self.choice_chunk(index, Delta::default(), Some(reason))
    }

    fn usage_chunk(&self, usage: UsageRecord) -> ChatCompletionChunk {
        let mut chunk = self.chunk(Vec::new());
        chunk.usage = Some(usage);
        chunk
    }
}

/// Per-choice conversion state.
#[derive(Debug, Default)]
struct ChannelState {
    buffer: String,
    role_sent: bool,
    /// Buffer cap exceeded; content is forwarded as it arrives.
    overflowed: bool,
}

/// Line-driven SSE conversion state machine.
///
/// Feed it upstream lines with [`StreamConverter::on_line_into`] and call
/// [`StreamConverter::finish_into`] when input ends. While conversion is
/// active, chat content is withheld per choice and released at termination
/// either as a `tool_calls` delta or as one content delta. Otherwise lines
/// are forwarded unchanged.
///
/// Exactly one terminal marker is produced per stream, and nothing follows it.
#[derive(Debug)]
pub struct StreamConverter {
    mode: RelayMode,
    conversion_active: bool,
    max_buffer_bytes: Option<usize>,
    metadata: StreamMetadata,
    channels: BTreeMap<u32, ChannelState>,
    transcript: String,
    terminated: bool,
}

impl StreamConverter {
    #[must_use]
    pub fn new(policy: ConversionPolicy) -> Self {
        Self {
            mode: policy.mode,
            conversion_active: policy.streaming_active(),
            max_buffer_bytes: policy.max_buffer_bytes,
            metadata: StreamMetadata::default(),
            channels: BTreeMap::new(),
            transcript: String::new(),
            terminated: false,
        }
    }

    #[must_use]
    pub fn conversion_active(&self) -> bool {
        self.conversion_active
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    #[must_use]
    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    /// Process one upstream line (without its terminator).
    pub fn on_line_into(&mut self, line: &str, out: &mut Vec<Emit>) {
        if self.terminated {
            return;
        }
        match classify_line(line) {
            LineEvent::Ignored => {}
            LineEvent::Done => self.terminate_into(Some(line), out),
            LineEvent::Data(payload) => match self.mode {
                RelayMode::ChatCompletions => self.on_chat_data_into(line, payload, out),
                RelayMode::Completions => self.on_completions_data_into(line, payload, out),
                _ => out.push(Emit::Raw(line.to_owned())),
            },
        }
    }

    /// Input ended. Runs the termination protocol if no terminal marker was
    /// seen; a no-op otherwise.
    pub fn finish_into(&mut self, out: &mut Vec<Emit>) {
        if !self.terminated {
            debug!("upstream stream ended without a terminal marker");
            self.terminate_into(None, out);
        }
    }

    #[must_use]
    pub fn into_outcome(self) -> StreamOutcome {
        StreamOutcome {
            transcript: self.transcript,
            usage: self.metadata.usage,
        }
    }

    fn on_chat_data_into(&mut self, line: &str, payload: &str, out: &mut Vec<Emit>) {
        let mut chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "failed to decode upstream stream chunk");
                if !self.conversion_active {
                    out.push(Emit::Raw(line.to_owned()));
                }
                return;
            }
        };
        if chunk.choices.is_empty() && chunk.usage.is_none() {
            return;
        }
        self.metadata.absorb(&mut chunk);

        if !self.conversion_active {
            out.push(Emit::Raw(line.to_owned()));
            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    content.push_text_into(&mut self.transcript);
                }
            }
            return;
        }

        for choice in chunk.choices {
            let index = choice.index;
            let state = self.channels.entry(index).or_default();
            if choice.delta.role.as_deref().is_some_and(|r| !r.is_empty()) {
                ensure_role_into(state, &self.metadata, index, out);
            }
            let Some(content) = choice.delta.content else {
                continue;
            };

            if state.overflowed {
                let text = content.to_text().into_owned();
                if !text.is_empty() {
                    ensure_role_into(state, &self.metadata, index, out);
                    self.transcript.push_str(&text);
                    out.push(Emit::Chunk(self.metadata.content_chunk(index, text)));
                }
                continue;
            }

            content.push_text_into(&mut state.buffer);
            if self
                .max_buffer_bytes
                .is_some_and(|cap| state.buffer.len() > cap)
            {
                warn!(
                    index,
                    buffered_bytes = state.buffer.len(),
                    "conversion buffer cap exceeded, forwarding content as text"
                );
                state.overflowed = true;
                let text = std::mem::take(&mut state.buffer);
                ensure_role_into(state, &self.metadata, index, out);
                self.transcript.push_str(&text);
                out.push(Emit::Chunk(self.metadata.content_chunk(index, text)));
            }
        }
    }

    fn on_completions_data_into(&mut self, line: &str, payload: &str, out: &mut Vec<Emit>) {
        out.push(Emit::Raw(line.to_owned()));
        match serde_json::from_str::<CompletionsChunk>(payload) {
            Ok(chunk) => {
                for choice in &chunk.choices {
                    self.transcript.push_str(&choice.text);
                }
                if chunk.usage.is_some() {
                    self.metadata.usage = chunk.usage;
                }
            }
            Err(err) => warn!(error = %err, "failed to decode upstream completions chunk"),
        }
    }

    /// Termination protocol. `observed` is the upstream terminal line, if
    /// there was one.
    fn terminate_into(&mut self, observed: Option<&str>, out: &mut Vec<Emit>) {
        self.terminated = true;

        if !self.conversion_active {
            match observed {
                Some(line) => out.push(Emit::Raw(line.to_owned())),
                None => out.push(Emit::Done),
            }
            return;
        }

        let channels = std::mem::take(&mut self.channels);
        for (index, mut state) in channels {
            ensure_role_into(&mut state, &self.metadata, index, out);
            if state.overflowed {
                out.push(Emit::Chunk(
                    self.metadata.finish_chunk(index, FINISH_REASON_STOP),
                ));
                continue;
            }

            let text = std::mem::take(&mut state.buffer);
            self.transcript.push_str(&text);
            let mut message = ResponseMessage::assistant_text(text);
            if synthesize_tool_calls(&mut message) {
                let mut calls = message.tool_calls.take().unwrap_or_default();
                for (position, call) in calls.iter_mut().enumerate() {
                    call.index = u32::try_from(position).ok();
                }
                debug!(
                    index,
                    tool_calls = calls.len(),
                    "converted buffered text into tool calls"
                );
                let delta = Delta {
                    tool_calls: Some(calls),
                    ..Delta::default()
                };
                out.push(Emit::Chunk(self.metadata.choice_chunk(index, delta, None)));
                out.push(Emit::Chunk(
                    self.metadata.finish_chunk(index, FINISH_REASON_TOOL_CALLS),
                ));
            } else {
                let text = message.text();
                if !text.trim().is_empty() {
                    out.push(Emit::Chunk(
                        self.metadata.content_chunk(index, text.into_owned()),
                    ));
                }
                out.push(Emit::Chunk(
                    self.metadata.finish_chunk(index, FINISH_REASON_STOP),
                ));
            }
        }

        if let Some(usage) = self.metadata.usage.clone() {
            out.push(Emit::Chunk(self.metadata.usage_chunk(usage)));
        }
        out.push(Emit::Done);
    }
}

fn ensure_role_into(
    state: &mut ChannelState,
    metadata: &StreamMetadata,
    index: u32,
    out: &mut Vec<Emit>,
) {
    if !state.role_sent {
        state.role_sent = true;
        out.push(Emit::Chunk(metadata.role_chunk(index)));
    }
}
