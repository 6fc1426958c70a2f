/// Largest char boundary at or before `max_bytes`.
#[inline]
fn safe_byte_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut idx = max_bytes;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate to at most `max_len` bytes (UTF-8 safe), appending a marker when cut.
pub fn truncate_with_marker(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let boundary = safe_byte_boundary(s, max_len);
        format!("{}...[truncated]", &s[..boundary])
    }
}

/// Last `max_chars` characters of `s`, trimmed.
pub fn tail_chars(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

/// Context window around the byte range `start..end` of `text`, at most `max_chars`
/// characters long. The window starts a little before the match so the reader sees
/// what led up to it. Newlines are flattened to spaces.
pub fn excerpt_around(text: &str, start: usize, end: usize, max_chars: usize) -> String {
    let start = safe_byte_boundary(text, start.min(text.len()));
    let end = safe_byte_boundary(text, end.min(text.len())).max(start);

    let lead = max_chars / 4;
    let before: Vec<char> = text[..start].chars().rev().take(lead).collect();

    before
        .into_iter()
        .rev()
        .chain(text[start..end].chars())
        .chain(text[end..].chars())
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
