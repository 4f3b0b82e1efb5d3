use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Message `content` as it appears on the wire.
///
/// Vendors send a plain string, occasionally a bare number, or an array of
/// typed content parts. Anything else is kept verbatim and reads as empty text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Number(serde_json::Number),
    Parts(Vec<ContentPart>),
    Other(serde_json::Value),
}

/// One element of an array-valued `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentPart {
    fn text_fragment(&self) -> Option<&str> {
        match self.kind.as_deref() {
            None | Some("text") => self.text.as_deref(),
            Some(_) => None,
        }
    }
}

impl MessageContent {
    /// Canonical textual form of this content.
    ///
    /// Text parts are concatenated in order; non-text parts are skipped.
    #[must_use]
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            MessageContent::Text(text) => Cow::Borrowed(text.as_str()),
            MessageContent::Number(number) => Cow::Owned(number.to_string()),
            MessageContent::Parts(parts) => {
                let mut fragments = parts.iter().filter_map(ContentPart::text_fragment);
                let Some(first) = fragments.next() else {
                    return Cow::Borrowed("");
                };
                match fragments.next() {
                    None => Cow::Borrowed(first),
                    Some(second) => {
                        let mut out = String::with_capacity(first.len() + second.len());
                        out.push_str(first);
                        out.push_str(second);
                        for fragment in fragments {
                            out.push_str(fragment);
                        }
                        Cow::Owned(out)
                    }
                }
            }
            MessageContent::Other(_) => Cow::Borrowed(""),
        }
    }

    /// Append the textual form to `out` without an intermediate allocation.
    pub fn push_text_into(&self, out: &mut String) {
        match self {
            MessageContent::Text(text) => out.push_str(text),
            MessageContent::Parts(parts) => {
                for fragment in parts.iter().filter_map(ContentPart::text_fragment) {
                    out.push_str(fragment);
                }
            }
            MessageContent::Number(_) | MessageContent::Other(_) => out.push_str(&self.to_text()),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_owned())
    }
}

/// Text of an optional content value; absent content is empty text.
#[must_use]
pub fn content_text(content: Option<&MessageContent>) -> Cow<'_, str> {
    content.map_or(Cow::Borrowed(""), MessageContent::to_text)
}
