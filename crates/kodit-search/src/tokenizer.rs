//! Code-aware tokenizer for BM25
//!
//! Splits identifiers the way code is written: `parseHTTPRequest` and
//! `parse_http_request` both yield `parse`, `http`, `request`. The same
//! tokenizer runs at index and query time so scores line up.

/// Tokenize source text or a natural-language query
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        for word in raw.split('_') {
            for part in split_camel_case(word) {
                if part.len() > 1 {
                    tokens.push(part.to_lowercase());
                }
            }
        }
    }

    tokens
}

/// Split camelCase / PascalCase / HTTPServer-style boundaries
fn split_camel_case(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    if chars.is_empty() {
        return parts;
    }

    let mut start = 0;
    for window in 1..chars.len() {
        let (index, current) = chars[window];
        let (_, previous) = chars[window - 1];

        let lower_to_upper = previous.is_lowercase() && current.is_uppercase();
        // Acronym boundary: "HTTPServer" -> "HTTP" | "Server"
        let acronym_end = previous.is_uppercase()
            && current.is_uppercase()
            && chars
                .get(window + 1)
                .is_some_and(|(_, next)| next.is_lowercase());
        let digit_boundary = previous.is_ascii_digit() != current.is_ascii_digit();

        if lower_to_upper || acronym_end || digit_boundary {
            parts.push(&word[start..index]);
            start = index;
        }
    }
    parts.push(&word[start..]);
    parts
}
