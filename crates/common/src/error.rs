//! Error types shared across Clipreel crates.

/// Top-level error type for playback and export operations.
#[derive(Debug, thiserror::Error)]
pub enum ClipreelError {
    /// A segment references a source without a playable handle.
    #[error("Source unavailable: {source_id}. Re-import the video first.")]
    SourceUnavailable { source_id: String },

    /// Every segment collapsed to zero length after clamping.
    #[error("This clip has no playable segments.")]
    NoPlayableSegments,

    #[error("Seek failed: {message}")]
    SeekFailed { message: String },

    #[error("Playback failed: {message}")]
    PlaybackFailed { message: String },

    /// No acceptable output container/codec on this host.
    #[error("Encoder unsupported: {message}")]
    EncoderUnsupported { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ClipreelError.
pub type ClipreelResult<T> = Result<T, ClipreelError>;

impl ClipreelError {
    pub fn source_unavailable(source_id: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
        }
    }

    pub fn seek_failed(msg: impl Into<String>) -> Self {
        Self::SeekFailed {
            message: msg.into(),
        }
    }

    pub fn playback_failed(msg: impl Into<String>) -> Self {
        Self::PlaybackFailed {
            message: msg.into(),
        }
    }

    pub fn encoder_unsupported(msg: impl Into<String>) -> Self {
        Self::EncoderUnsupported {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error ended an export because the caller aborted it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_user_facing() {
        let err = ClipreelError::source_unavailable("cam-a");
        assert_eq!(
            err.to_string(),
            "Source unavailable: cam-a. Re-import the video first."
        );
        assert_eq!(
            ClipreelError::NoPlayableSegments.to_string(),
            "This clip has no playable segments."
        );
        assert!(ClipreelError::seek_failed("Unable to seek within the source video.")
            .to_string()
            .contains("Unable to seek"));
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(ClipreelError::Cancelled.is_cancelled());
        assert!(!ClipreelError::encoder("boom").is_cancelled());
    }
}
