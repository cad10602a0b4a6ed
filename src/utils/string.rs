/// Find the largest valid UTF-8 boundary at or before the given byte index.
#[inline]
fn safe_byte_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    s.char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0)
}

/// Truncate a string at a word boundary with "..." suffix (UTF-8 safe).
///
/// Prefers whitespace, period, or comma as the cut point and falls back to a
/// character boundary when none is found.
#[inline]
pub fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let truncate_at = safe_byte_boundary(s, max_len.saturating_sub(3));
    let boundary = s[..truncate_at]
        .rfind(|c: char| c.is_whitespace() || c == '.' || c == ',')
        .unwrap_or(truncate_at);
    format!("{}...", &s[..boundary])
}

/// Pull the JSON object out of a free-form model reply.
///
/// Accepts a fenced ```json block, a bare fenced block, or the outermost
/// `{ ... }` span of the text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if candidate.starts_with('{') && candidate.ends_with('}') {
                return Some(candidate);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Lowercased words of at least `min_len` characters, minus common stopwords.
pub fn significant_words(text: &str, min_len: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "the", "and", "for", "with", "that", "this", "from", "into", "should", "must", "will",
        "have", "has", "are", "was", "were", "been", "being", "when", "then", "than", "each",
        "some", "such", "only", "also", "about", "using", "use", "make", "sure", "files", "file",
    ];

    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= min_len)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .collect();
    words.sort();
    words.dedup();
    words
}

/// Whether any keyword occurs as a whole word (or word prefix) in `text_lower`.
pub fn contains_word(text_lower: &str, keywords: &[&str]) -> bool {
    count_word_hits(text_lower, keywords) > 0
}

/// Number of distinct keywords that start some word in `text_lower`.
pub fn count_word_hits(text_lower: &str, keywords: &[&str]) -> usize {
    let words: Vec<&str> = text_lower
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    keywords
        .iter()
        .filter(|k| words.iter().any(|w| w.starts_with(*k)))
        .count()
}
