//! Small helpers shared across the client core.

/// Truncates a string to at most `max_bytes` bytes without breaking
/// a multi-byte UTF-8 codepoint at the end.
#[inline]
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Truncates a string to at most `max_chars` characters.
///
/// Unlike [`truncate_utf8_safe`], this counts Unicode codepoints
/// rather than bytes.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Case-insensitive wildcard match: `*` matches any run of characters,
/// `?` matches one. Used for ignore masks and redirect argument
/// filters.
pub fn mask_match(mask: &str, text: &str) -> bool {
    fn inner(mask: &[char], text: &[char]) -> bool {
        match mask.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => {
                (0..=text.len()).any(|skip| inner(rest, &text[skip..]))
            }
            Some(('?', rest)) => match text.split_first() {
                Some((_, text_rest)) => inner(rest, text_rest),
                None => false,
            },
            Some((c, rest)) => match text.split_first() {
                Some((t, text_rest)) => {
                    c.to_lowercase().eq(t.to_lowercase()) && inner(rest, text_rest)
                }
                None => false,
            },
        }
    }
    let mask: Vec<char> = mask.chars().collect();
    let text: Vec<char> = text.chars().collect();
    inner(&mask, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_utf8_safe() {
        assert_eq!(truncate_utf8_safe("hello world", 5), "hello");
        assert_eq!(truncate_utf8_safe("hello", 10), "hello");
        assert_eq!(truncate_utf8_safe("café", 4), "caf");
        assert_eq!(truncate_utf8_safe("日本語", 3), "日");
        assert_eq!(truncate_utf8_safe("hello", 0), "");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("日本語", 2), "日本");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_mask_match_literal() {
        assert!(mask_match("alice", "alice"));
        assert!(mask_match("ALICE", "alice"));
        assert!(!mask_match("alice", "bob"));
    }

    #[test]
    fn test_mask_match_star() {
        assert!(mask_match("*", "anything"));
        assert!(mask_match("*!*@*.example.org", "nick!user@host.example.org"));
        assert!(mask_match("al*", "alice"));
        assert!(!mask_match("al*", "bob"));
        assert!(mask_match("*ce", "alice"));
    }

    #[test]
    fn test_mask_match_question() {
        assert!(mask_match("a?ice", "alice"));
        assert!(!mask_match("a?ice", "aice"));
    }

    #[test]
    fn test_mask_match_empty() {
        assert!(mask_match("", ""));
        assert!(!mask_match("", "x"));
        assert!(mask_match("*", ""));
    }
}
