use crate::segment::TextChunk;

/// Text surrounding the first case-insensitive occurrence of `keyword`,
/// `window_chars` characters on each side. Chunks are joined one per line;
/// the whole text is returned when the keyword does not occur.
pub fn keyword_context(chunks: &[TextChunk], keyword: &str, window_chars: usize) -> String {
    let full_text = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let Some((start, end)) = find_case_insensitive(&full_text, keyword.trim()) else {
        return full_text;
    };
    let before = match window_chars {
        0 => start,
        n => full_text[..start]
            .char_indices()
            .rev()
            .nth(n - 1)
            .map(|(idx, _)| idx)
            .unwrap_or(0),
    };
    let after = full_text[end..]
        .char_indices()
        .nth(window_chars)
        .map(|(idx, _)| end + idx)
        .unwrap_or(full_text.len());
    full_text[before..after].trim().to_string()
}

/// Byte range of the first match of `needle` in `haystack`, comparing
/// lower-cased characters.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }
    haystack.char_indices().find_map(|(start, _)| {
        let mut folded: Vec<char> = Vec::with_capacity(needle.len());
        for (offset, ch) in haystack[start..].char_indices() {
            folded.extend(ch.to_lowercase());
            if folded == needle {
                return Some((start, start + offset + ch.len_utf8()));
            }
            if folded.len() >= needle.len() || !needle.starts_with(&folded) {
                return None;
            }
        }
        None
    })
}
