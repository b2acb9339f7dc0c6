//! IRCv3 message tags: the `Tag` type and escaping utilities.
//!
//! Tag values use the escape set from the message-tags spec: `;` as
//! `\:`, space as `\s`, backslash as `\\`, CR as `\r`, LF as `\n`.
//! A stray trailing backslash is dropped on unescape.
//!
//! # Reference
//! - IRCv3 message-tags: <https://ircv3.net/specs/extensions/message-tags>

use std::fmt::{Result as FmtResult, Write};

/// A single message tag: `key[=value]`, value stored unescaped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// Tag key, including any `+` client-tag prefix and vendor part.
    pub key: String,
    /// Unescaped tag value, if one was present.
    pub value: Option<String>,
}

impl Tag {
    /// Build a tag from a key and optional (unescaped) value.
    pub fn new(key: &str, value: Option<&str>) -> Self {
        Tag {
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }
}

/// Parse the raw tag string (the part between `@` and the first space)
/// into a list of tags with unescaped values.
pub fn parse_tag_string(raw: &str) -> Vec<Tag> {
    let mut tags = Vec::new();
    for item in raw.split(';') {
        if item.is_empty() {
            continue;
        }
        match item.find('=') {
            Some(eq) => tags.push(Tag {
                key: item[..eq].to_string(),
                value: Some(unescape_tag_value(&item[eq + 1..])),
            }),
            None => tags.push(Tag {
                key: item.to_string(),
                value: None,
            }),
        }
    }
    tags
}

/// Serialize a list of tags back to the wire form, without the leading `@`.
pub fn format_tag_string(tags: &[Tag]) -> String {
    let mut out = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        out.push_str(&tag.key);
        if let Some(ref value) = tag.value {
            out.push('=');
            let _ = escape_tag_value(&mut out, value);
        }
    }
    out
}

/// Escape a tag value for serialization.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Reverses the escaping applied by [`escape_tag_value`].
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip() {
        let value = "a;b c\\d\re\nf";
        let mut escaped = String::new();
        escape_tag_value(&mut escaped, value).unwrap();
        assert_eq!(escaped, "a\\:b\\sc\\\\d\\re\\nf");
        assert_eq!(unescape_tag_value(&escaped), value);
    }

    #[test]
    fn test_stray_backslash_dropped() {
        assert_eq!(unescape_tag_value("abc\\"), "abc");
    }

    #[test]
    fn test_unknown_escape_passes_through() {
        assert_eq!(unescape_tag_value("a\\bc"), "abc");
    }

    #[test]
    fn test_parse_tag_string() {
        let tags = parse_tag_string("time=2023-01-01T00:00:00Z;batch=ref1;+typing=active");
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].key, "time");
        assert_eq!(tags[0].value.as_deref(), Some("2023-01-01T00:00:00Z"));
        assert_eq!(tags[1].key, "batch");
        assert_eq!(tags[2].key, "+typing");
        assert_eq!(tags[2].value.as_deref(), Some("active"));
    }

    #[test]
    fn test_parse_valueless_tag() {
        let tags = parse_tag_string("msgid=abc;account");
        assert_eq!(tags[1].key, "account");
        assert_eq!(tags[1].value, None);
    }

    #[test]
    fn test_format_tag_string() {
        let tags = vec![
            Tag::new("time", Some("now")),
            Tag::new("flag", None),
            Tag::new("text", Some("a b")),
        ];
        assert_eq!(format_tag_string(&tags), "time=now;flag;text=a\\sb");
    }

    #[test]
    fn test_empty_items_skipped() {
        let tags = parse_tag_string("a=1;;b=2");
        assert_eq!(tags.len(), 2);
    }
}
