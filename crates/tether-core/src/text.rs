//! UTF-8–safe truncation for log output.
//!
//! Tokens and event payloads are shortened before they reach a log line.
//! Slicing a `&str` at an arbitrary byte index panics inside a multi-byte
//! character, so these helpers snap to the previous char boundary.

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
#[inline]
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate `s` to `max_bytes` total, marking the cut with `suffix`.
///
/// Strings that already fit are returned unchanged.
pub fn truncate_with_suffix(s: &str, max_bytes: usize, suffix: &str) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let budget = max_bytes.saturating_sub(suffix.len());
    format!("{}{suffix}", truncate_str(s, budget))
}
