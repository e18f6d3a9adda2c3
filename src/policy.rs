//! Prompt validation and safety rewriting.
//!
//! Every prompt entering the gatekeeper passes through [`validate`] before
//! anything else happens — before quota is consumed, before the cache is
//! consulted, before an upstream call is considered. The rewritten prompt
//! (not the raw user text) is what downstream components fingerprint,
//! cache, and send to the provider.

use crate::{HeimdallError, Result};

/// Maximum prompt length in characters; longer input is truncated, not
/// rejected.
pub const MAX_PROMPT_CHARS: usize = 600;

/// Case-insensitive substring blocklist applied to the trimmed prompt.
const BLOCKED_KEYWORDS: &[&str] = &[
    "nude",
    "nudity",
    "explicit",
    "sexual",
    "porn",
    "gore",
    "bloodbath",
    "beheading",
    "violence",
    "kill",
    "hate symbol",
];

/// Fixed preamble prepended to every accepted prompt.
const SAFETY_PREAMBLE: &str =
    "Create a family-friendly, gift-ready artwork for merchandise printing. ";

/// Fixed suffix appended to every accepted prompt.
const SAFETY_SUFFIX: &str = "Avoid nudity, violence, hate symbols, deformed anatomy, \
     text artifacts, blur, and watermarks.";

/// A prompt that has passed validation and carries the safety rewrite.
///
/// This string is the canonical request content: the fingerprint, the cache
/// key, and the upstream payload are all derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPrompt(String);

impl NormalizedPrompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NormalizedPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a raw prompt and produce its safety-rewritten form.
///
/// Trims, truncates to [`MAX_PROMPT_CHARS`], rejects empty input and
/// blocklisted content, then wraps the user text in the fixed preamble and
/// suffix. Pure — no side effects, no quota consumption.
pub fn validate(raw: &str) -> Result<NormalizedPrompt> {
    let trimmed: String = raw.trim().chars().take(MAX_PROMPT_CHARS).collect();
    if trimmed.is_empty() {
        return Err(HeimdallError::EmptyPrompt);
    }

    let lower = trimmed.to_lowercase();
    if BLOCKED_KEYWORDS.iter().any(|word| lower.contains(word)) {
        return Err(HeimdallError::BlockedContent);
    }

    Ok(NormalizedPrompt(format!(
        "{SAFETY_PREAMBLE}{trimmed}. {SAFETY_SUFFIX}"
    )))
}
