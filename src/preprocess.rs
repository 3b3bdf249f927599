use std::sync::OnceLock;

use regex::Regex;

fn digit_runs() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\d+").expect("invalid regex"))
}

/// Normalize a bank description before any similarity scoring: lowercase,
/// every run of digits (any script) becomes one space, whitespace collapsed
/// and trimmed. Applying it twice gives the same string.
pub fn preprocess_description(text: &str) -> String {
    let lowered = text.to_lowercase();
    digit_runs()
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
