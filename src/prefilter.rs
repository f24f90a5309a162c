//! Cheap spam gate applied before a message reaches the engine.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefilterResult {
    ObviousSpam,
    ObviousSafe,
    Ambiguous,
}

/// Short messages below this length are waved through.
const SHORT_SAFE_LEN: usize = 30;

pub fn prefilter(text: &str, spam_patterns: &[Regex], safe_patterns: &[Regex]) -> PrefilterResult {
    if spam_patterns.iter().any(|p| p.is_match(text)) {
        return PrefilterResult::ObviousSpam;
    }

    if safe_patterns.iter().any(|p| p.is_match(text)) {
        return PrefilterResult::ObviousSafe;
    }

    // short messages are usually safe
    if text.len() < SHORT_SAFE_LEN {
        return PrefilterResult::ObviousSafe;
    }

    PrefilterResult::Ambiguous
}
