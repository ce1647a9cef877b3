//! JSON payload validation.
//!
//! Every outbound payload passes through [`validate_payload`] before it is
//! written, so a malformed message is rejected with an explicit error instead
//! of corrupting the stream seen by the peer.

use crate::error::ServerError;
use serde::de::IgnoredAny;

/// Returns `true` if `text` is syntactically valid JSON.
///
/// Empty and whitespace-only input is invalid. The check never panics; any
/// parse failure simply yields `false`.
pub fn is_valid_json(text: &str) -> bool {
    validate_payload(text).is_ok()
}

/// Validates an outbound payload, returning the reason it was rejected.
///
/// # Errors
///
/// * [`ServerError::EmptyPayload`] for empty or whitespace-only input
/// * [`ServerError::InvalidJson`] when the text does not parse as JSON
pub fn validate_payload(text: &str) -> Result<(), ServerError> {
    if text.trim().is_empty() {
        return Err(ServerError::EmptyPayload);
    }

    serde_json::from_str::<IgnoredAny>(text)
        .map(|_| ())
        .map_err(|e| ServerError::InvalidJson(e.to_string()))
}
