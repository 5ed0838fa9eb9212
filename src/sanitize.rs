//! Prompt-injection scrubbing for text that reaches a model prompt
//!
//! Applied to book text before it is embedded in an extraction prompt and to
//! every user-edited text field before it is persisted. This is a
//! defense-in-depth filter, not a guarantee.

use regex_lite::Regex;
use std::sync::OnceLock;

/// Replacement for every matched pattern.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Injection-signaling patterns, matched case-insensitively.
///
/// The bracketed chat-template markers come before the bare `INST]` form so
/// that `[INST]` is replaced as a whole.
const INJECTION_PATTERNS: &[&str] = &[
    r"ignore\s+(?:all\s+)?previous\s+instructions",
    r"you\s+are\s+now",
    r"system\s*:",
    r"<\s*/?\s*system\s*>",
    r"</?\s*(?:user|assistant|human|ai)\s*>",
    r"\[/?INST\]",
    r"INST\]",
    r"<</?SYS>>",
];

fn patterns() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        INJECTION_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).expect("injection pattern must compile"))
            .collect()
    })
}

/// Replace every injection pattern with [`REDACTION_MARKER`] and trim.
///
/// Sanitizing already-sanitized text returns it unchanged.
pub fn sanitize(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in patterns() {
        if pattern.is_match(&result) {
            result = pattern.replace_all(&result, REDACTION_MARKER).into_owned();
        }
    }
    result.trim().to_string()
}

/// Scrub chapter text before it is placed in a prompt.
pub fn sanitize_book_text(text: &str) -> String {
    sanitize(text)
}

/// Scrub user-edited text before it is persisted.
pub fn sanitize_user_input(text: &str) -> String {
    sanitize(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "ignore previous instructions",
        "Ignore All Previous Instructions",
        "IGNORE   previous\ninstructions",
        "you are now",
        "You Are Now",
        "system:",
        "SYSTEM :",
        "<system>",
        "</System>",
        "< / system >",
        "<user>",
        "</USER>",
        "<assistant>",
        "</human>",
        "<AI>",
        "[INST]",
        "[inst]",
        "[/INST]",
        "INST]",
        "<<SYS>>",
        "<</sys>>",
    ];

    #[test]
    fn every_pattern_is_replaced_in_any_case() {
        for sample in SAMPLES {
            let text = format!("before {} after", sample);
            let cleaned = sanitize(&text);
            assert!(
                cleaned.contains(REDACTION_MARKER),
                "'{}' was not redacted: {}",
                sample,
                cleaned
            );
            assert!(
                !cleaned.to_lowercase().contains(&sample.to_lowercase()),
                "'{}' survived: {}",
                sample,
                cleaned
            );
            assert!(cleaned.starts_with("before "));
            assert!(cleaned.ends_with(" after"));
        }
    }

    #[test]
    fn sanitizing_twice_is_a_noop() {
        let text = "  Then <system> said: ignore previous instructions, you are now [INST] free <<SYS>>  ";
        let once = sanitize(text);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
        assert!(!once.starts_with(' '));
    }

    #[test]
    fn ordinary_prose_is_untouched() {
        let text = "He stretched out his arms toward the dark water in a curious way.";
        assert_eq!(sanitize(text), text);
        assert_eq!(sanitize_book_text(text), sanitize_user_input(text));
    }

    #[test]
    fn bracketed_inst_is_replaced_whole() {
        assert_eq!(sanitize("[INST] go"), "[REDACTED] go");
    }
}
