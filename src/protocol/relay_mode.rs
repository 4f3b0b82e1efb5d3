use std::fmt;

/// The kind of upstream endpoint a request is relayed to.
///
/// Only [`RelayMode::ChatCompletions`] supports tool-call synthesis; every
/// other mode is relayed as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayMode {
    #[default]
    Unknown,
    ChatCompletions,
    Completions,
    Embeddings,
    Moderations,
    ImagesGenerations,
    Edits,
    AudioSpeech,
    AudioTranscription,
    AudioTranslation,
}

impl RelayMode {
    /// Classify a request path such as `/v1/chat/completions`.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/v1/chat/completions") {
            RelayMode::ChatCompletions
        } else if path.starts_with("/v1/completions") {
            RelayMode::Completions
        } else if path.starts_with("/v1/embeddings") || path.ends_with("embeddings") {
            RelayMode::Embeddings
        } else if path.starts_with("/v1/moderations") {
            RelayMode::Moderations
        } else if path.starts_with("/v1/images/generations") {
            RelayMode::ImagesGenerations
        } else if path.starts_with("/v1/edits") {
            RelayMode::Edits
        } else if path.starts_with("/v1/audio/speech") {
            RelayMode::AudioSpeech
        } else if path.starts_with("/v1/audio/transcriptions") {
            RelayMode::AudioTranscription
        } else if path.starts_with("/v1/audio/translations") {
            RelayMode::AudioTranslation
        } else {
            RelayMode::Unknown
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RelayMode::Unknown => "unknown",
            RelayMode::ChatCompletions => "chat_completions",
            RelayMode::Completions => "completions",
            RelayMode::Embeddings => "embeddings",
            RelayMode::Moderations => "moderations",
            RelayMode::ImagesGenerations => "images_generations",
            RelayMode::Edits => "edits",
            RelayMode::AudioSpeech => "audio_speech",
            RelayMode::AudioTranscription => "audio_transcription",
            RelayMode::AudioTranslation => "audio_translation",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::RelayMode;

    #[test]
    fn test_from_path() {
        assert_eq!(
            RelayMode::from_path("/v1/chat/completions"),
            RelayMode::ChatCompletions
        );
        assert_eq!(RelayMode::from_path("/v1/completions"), RelayMode::Completions);
        assert_eq!(
            RelayMode::from_path("/v1/engines/text-embedding-ada-002/embeddings"),
            RelayMode::Embeddings
        );
        assert_eq!(
            RelayMode::from_path("/v1/audio/transcriptions"),
            RelayMode::AudioTranscription
        );
        assert_eq!(RelayMode::from_path("/v1/unknown"), RelayMode::Unknown);
    }
}
