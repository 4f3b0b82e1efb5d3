pub mod content;
pub(crate) mod error_shapes;
pub mod openai_chat;
pub mod relay_mode;

pub use content::{content_text, ContentPart, MessageContent};
pub use relay_mode::RelayMode;
