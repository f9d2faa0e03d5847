use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Why a synthesis run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisErrorKind {
    /// The text could not be turned into speech (empty after normalisation, unsupported script, ...).
    InvalidText,
    /// The reference voice sample is corrupt, empty or in a format the engine cannot read.
    InvalidVoiceSample,
    /// The model failed while producing audio.
    Inference,
    /// The engine ran out of memory, accelerator capacity or similar.
    ResourceExhausted,
    /// No segment arrived within the allowed wait.
    Timeout,
}

impl SynthesisErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SynthesisErrorKind::InvalidText => "invalid_text",
            SynthesisErrorKind::InvalidVoiceSample => "invalid_voice_sample",
            SynthesisErrorKind::Inference => "inference",
            SynthesisErrorKind::ResourceExhausted => "resource_exhausted",
            SynthesisErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SynthesisErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-side failure, raised before the first segment or in the middle of a stream.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct SynthesisError {
    kind: SynthesisErrorKind,
    message: String,
}

impl SynthesisError {
    pub fn new(kind: SynthesisErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_text(message: impl Into<String>) -> Self {
        Self::new(SynthesisErrorKind::InvalidText, message)
    }

    pub fn invalid_voice_sample(message: impl Into<String>) -> Self {
        Self::new(SynthesisErrorKind::InvalidVoiceSample, message)
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::new(SynthesisErrorKind::Inference, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(SynthesisErrorKind::ResourceExhausted, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SynthesisErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> SynthesisErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
