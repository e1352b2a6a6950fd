//! crates/inbox_assistant_core/src/text.rs
//!
//! Text helpers shared by the pipelines: entity decoding, comparison
//! normalization, tokenization and `{NAME}` templating.

use regex::Regex;
use std::sync::OnceLock;

/// Placeholder stored in drafts so one reply can be fanned out to many senders.
pub const NAME_PLACEHOLDER: &str = "{NAME}";

/// Decodes the handful of HTML entities seen in email snippets. Does not render HTML.
pub fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
}

/// Normalizes a body for exact-duplicate comparison.
///
/// Entity-decoded, curly quotes straightened, lowercased, whitespace collapsed and trimmed.
pub fn normalize_for_comparison(text: &str) -> String {
    let decoded = decode_html_entities(text);
    let straightened: String = decoded
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    straightened
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn punctuation() -> &'static Regex {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    PUNCT.get_or_init(|| {
        Regex::new(r#"["'`\-_/\\()\[\]{}.,!?;:@#$%^&*=+<>~]"#).expect("static regex is valid")
    })
}

/// Lowercases, turns punctuation into spaces and splits on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    punctuation()
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Truncates to at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// The first whitespace-separated token of a trimmed sender name, or an empty string.
pub fn first_name(full_name: &str) -> &str {
    full_name.split_whitespace().next().unwrap_or("")
}

/// Rewrites a draft so every whole-word occurrence of the sender's first name becomes `{NAME}`.
///
/// Drafts that already carry the placeholder are left untouched.
pub fn templatize_name(draft: &str, sender_name: &str) -> String {
    if draft.contains(NAME_PLACEHOLDER) {
        return draft.to_string();
    }
    let first = first_name(sender_name);
    if first.is_empty() {
        return draft.to_string();
    }
    match Regex::new(&format!(r"\b{}\b", regex::escape(first))) {
        Ok(name) => name.replace_all(draft, regex::NoExpand(NAME_PLACEHOLDER)).into_owned(),
        Err(_) => draft.to_string(),
    }
}

/// Fills the `{NAME}` placeholder with the recipient's first name.
pub fn personalize(template: &str, recipient_name: &str) -> String {
    template.replace(NAME_PLACEHOLDER, first_name(recipient_name))
}
