use std::time::Duration;

use tracing::info;

use crate::protocol::openai_chat::UsageRecord;

/// Counts tokens in a piece of text for a given model.
///
/// Implementations are expected to be infallible; unknown models should fall
/// back to an estimate rather than fail.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str, model: &str) -> u64;
}

impl<F> TokenCounter for F
where
    F: Fn(&str, &str) -> u64 + Send + Sync,
{
    fn count(&self, text: &str, model: &str) -> u64 {
        self(text, model)
    }
}

/// Default counter backed by [`estimate_tokens`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingCounter;

impl TokenCounter for EstimatingCounter {
    fn count(&self, text: &str, model: &str) -> u64 {
        estimate_tokens(text, model)
    }
}

/// Estimate the number of tokens in `text` for the given model.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str, _model: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Whether an upstream usage record must be replaced by a local count.
///
/// Absent or all-zero records are recounted; anything else is trusted as-is,
/// even if its fields do not add up.
#[must_use]
pub fn needs_recount(upstream: Option<&UsageRecord>) -> bool {
    upstream.map_or(true, UsageRecord::is_all_zero)
}

/// Compute usage from the prompt count and the completion texts.
#[must_use]
pub fn count_completion_usage<'a, I>(
    prompt_tokens: u64,
    completion_texts: I,
    model: &str,
    counter: &dyn TokenCounter,
) -> UsageRecord
where
    I: IntoIterator<Item = &'a str>,
{
    let completion_tokens = completion_texts
        .into_iter()
        .map(|text| counter.count(text, model))
        .sum();
    UsageRecord::computed(prompt_tokens, completion_tokens)
}

/// Final usage of a streamed response: upstream's record unless it is absent
/// or all-zero, otherwise a count over the transcript.
#[must_use]
pub fn resolve_stream_usage(
    upstream: Option<UsageRecord>,
    prompt_tokens: u64,
    transcript: &str,
    model: &str,
    counter: &dyn TokenCounter,
) -> UsageRecord {
    match upstream {
        Some(usage) if !usage.is_all_zero() => usage,
        _ => count_completion_usage(prompt_tokens, [transcript], model, counter),
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &UsageRecord, stream: bool, duration: Duration) {
    info!(
        model = model,
        stream = stream,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
