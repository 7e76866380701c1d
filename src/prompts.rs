//! Prompts sent to the VLM alongside each page image.
//!
//! Every built-in provider shares [`DEFAULT_PROMPT`] so a caller who omits the
//! prompt gets the same instruction whichever backend is selected. Provider
//! definitions loaded from disk may carry their own default; per-run overrides
//! take precedence over both.

/// Default instruction used when neither the caller nor the model record
/// supplies a prompt.
pub const DEFAULT_PROMPT: &str = "Extract text to markdown.";

/// Pick the prompt for a request: explicit override if non-blank, else the
/// provider default.
pub fn effective_prompt<'a>(explicit: Option<&'a str>, provider_default: &'a str) -> &'a str {
    match explicit {
        Some(p) if !p.trim().is_empty() => p,
        _ => provider_default,
    }
}
