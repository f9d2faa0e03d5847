use std::path::Path;

use axum::body::Bytes;

use crate::error::ApiError;

/// Maximum text length for TTS requests
const MAX_TEXT_LENGTH: usize = 5000;
/// Longest file extension kept from a client-declared filename
const MAX_EXTENSION_LENGTH: usize = 5;

/// Reference voice as uploaded by the client.
#[derive(Debug, Clone)]
pub struct VoiceUpload {
    /// Declared by the client; informational only, never used as a path.
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl VoiceUpload {
    /// Server-chosen name for the staged file.
    pub fn stored_filename(&self) -> String {
        stored_voice_filename(self.filename.as_deref())
    }
}

/// A validated synthesis request. Immutable once built.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceUpload,
}

/// Validate the text field
pub fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// Validate the uploaded reference voice
pub fn validate_voice_upload(upload: &VoiceUpload) -> Result<(), ApiError> {
    if upload.bytes.is_empty() {
        return Err(ApiError::InvalidInput("Voice file is empty".to_string()));
    }

    if let Some(content_type) = upload.content_type.as_deref() {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !essence.starts_with("audio/") && essence != "application/octet-stream" {
            return Err(ApiError::InvalidInput(format!(
                "Voice file must be audio, got content type {content_type}"
            )));
        }
    }

    Ok(())
}

/// Build the validated request out of the parsed multipart fields.
pub fn validate_synthesis_request(
    text: Option<String>,
    voice: Option<VoiceUpload>,
) -> Result<SynthesisRequest, ApiError> {
    let text = text.ok_or_else(|| ApiError::InvalidInput("Missing 'text' field".to_string()))?;
    validate_text(&text)?;

    let voice =
        voice.ok_or_else(|| ApiError::InvalidInput("Missing 'voice_file' field".to_string()))?;
    validate_voice_upload(&voice)?;

    Ok(SynthesisRequest { text, voice })
}

/// Name the staged voice file `reference.<ext>`, keeping only a short
/// alphanumeric extension from the client's filename.
pub fn stored_voice_filename(declared: Option<&str>) -> String {
    let extension = declared
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LENGTH
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string());

    format!("reference.{extension}")
}
