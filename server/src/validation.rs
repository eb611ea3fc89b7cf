use proxy_core::params::{GENDER, PROMPT_AUDIO, TEXT, TEXT_FILE};
use proxy_core::RequestParams;

use crate::error::ApiError;

/// Maximum text length for TTS requests
const MAX_TEXT_LENGTH: usize = 5000;

/// Validate a filtered TTS request
pub fn validate_params(params: &RequestParams) -> Result<(), ApiError> {
    // Something to speak: inline text or a text file
    if !params.contains(TEXT) && !params.contains(TEXT_FILE) {
        return Err(ApiError::InvalidInput(
            "Either text or text_file must be provided".to_string(),
        ));
    }

    // A voice: reference audio or a gender preset
    if !params.contains(PROMPT_AUDIO) && !params.contains(GENDER) {
        return Err(ApiError::InvalidInput(
            "Either prompt_audio or gender must be provided".to_string(),
        ));
    }

    if let Some(text) = params.get(TEXT) {
        if text.chars().count() > MAX_TEXT_LENGTH {
            return Err(ApiError::InvalidInput(format!(
                "Text too long (max {} characters)",
                MAX_TEXT_LENGTH
            )));
        }
    }

    Ok(())
}
