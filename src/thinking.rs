//! Removal of `<think>…</think>` segments from model output.
//!
//! Reasoning models prefix their answers with a delimited scratchpad. This is
//! applied after the adapter returns, so both providers produce identical
//! output for identical raw text.

use regex::Regex;
use std::sync::LazyLock;

static THINK_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>.*?</think>").expect("static regex is valid")
});

/// Strips every thinking segment and trims the remainder.
pub fn strip_thinking(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}
