//! Parsing of the model's free-form sectioned reply.
//!
//! Replies look like:
//!
//! ```text
//! 原文：hello world
//! 英文：hello world
//! 日文：こんにちは
//! 世界
//! ```
//!
//! Each line whose first ASCII or full-width colon has non-empty text to
//! its left opens a section; colon-free lines append to the current
//! section. The verbatim reply is always kept under [`RAW_TEXT_KEY`], so
//! parsing can never lose information and never fails.

use std::collections::HashMap;

/// Key under which the unmodified reply text is stored.
pub const RAW_TEXT_KEY: &str = "raw_text";

/// Parse a model reply into its sections.
///
/// Later occurrences of a duplicate section header replace earlier ones;
/// callers must treat the keys as unordered. Empty lines inside a section
/// are preserved as empty value lines.
pub fn parse_reply(content: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    sections.insert(RAW_TEXT_KEY.to_string(), content.to_string());

    let mut current_key: Option<String> = None;
    let mut current_lines: Vec<String> = Vec::new();

    for line in content.trim().lines() {
        let stripped = line.trim();

        if stripped.is_empty() {
            if current_key.is_some() {
                current_lines.push(String::new());
            }
            continue;
        }

        match stripped.split_once([':', '：']) {
            Some((left, right)) => {
                let key = left.trim();
                if !key.is_empty() {
                    if let Some(finished) = current_key.take() {
                        sections.insert(finished, current_lines.join("\n"));
                    }
                    current_key = Some(key.to_string());
                    current_lines = vec![right.trim().to_string()];
                } else if current_key.is_some() {
                    // Line starts with a colon; treat as continuation.
                    current_lines.push(stripped.to_string());
                }
            }
            None => {
                if current_key.is_some() {
                    current_lines.push(stripped.to_string());
                }
            }
        }
    }

    if let Some(finished) = current_key {
        sections.insert(finished, current_lines.join("\n"));
    }

    sections
}
