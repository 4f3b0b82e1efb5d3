const FENCE: &str = "```";

/// Remove a wrapping markdown code fence (```` ```json ... ``` ````) if present.
///
/// The opening fence line, including any language tag, is dropped along with
/// everything after the last closing fence. Text without a leading fence is
/// returned trimmed.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix(FENCE) else {
        return trimmed;
    };
    let body = match memchr::memchr(b'\n', rest.as_bytes()) {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    match body.rfind(FENCE) {
        Some(close) => &body[..close],
        None => body,
    }
}
