//! Symptom normalization. Pure string handling, no model calls.

use crate::error::{CarelineError, Result};
use crate::models::NormalizedSymptoms;

/// Lower-case and whitespace-tokenize a symptom description.
pub fn normalize(input: &str) -> Result<NormalizedSymptoms> {
    let raw_text = input.trim();
    if raw_text.is_empty() {
        return Err(CarelineError::invalid("symptom text cannot be empty"));
    }

    let text = raw_text.to_lowercase();
    let tokens = text.split_whitespace().map(str::to_string).collect();

    Ok(NormalizedSymptoms {
        raw_text: raw_text.to_string(),
        text,
        tokens,
    })
}

/// The first `max_chars` characters of `text`, never splitting a code point.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
