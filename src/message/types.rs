//! The owned IRC message type.

use std::fmt;
use std::str::FromStr;

use crate::error::MessageParseError;
use crate::prefix::Prefix;

use super::tags::{format_tag_string, Tag};

/// A parsed IRC message: `@tags :prefix COMMAND params... :trailing`.
///
/// Parameters are stored as an ordered list; the final parameter may
/// contain spaces (the "trailing" parameter). Whether the final
/// parameter was wire-encoded with a `:` marker is not preserved.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// IRCv3 message tags, values unescaped.
    pub tags: Vec<Tag>,
    /// Message source, if present.
    pub prefix: Option<Prefix>,
    /// Command name or three-digit numeric, as received.
    pub command: String,
    /// Ordered parameters, trailing included.
    pub params: Vec<String>,
}

impl Message {
    /// Build a message with no tags and no prefix.
    pub fn new(command: &str, params: &[&str]) -> Self {
        Message {
            tags: Vec::new(),
            prefix: None,
            command: command.to_string(),
            params: params.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// `PRIVMSG target :text`
    pub fn privmsg(target: &str, text: &str) -> Self {
        Message::new("PRIVMSG", &[target, text])
    }

    /// `NOTICE target :text`
    pub fn notice(target: &str, text: &str) -> Self {
        Message::new("NOTICE", &[target, text])
    }

    /// `PONG :payload`
    pub fn pong(payload: &str) -> Self {
        Message::new("PONG", &[payload])
    }

    /// Attach a tag, builder style.
    pub fn with_tag(mut self, key: &str, value: Option<&str>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Attach a prefix, builder style.
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Whether a tag with the given key is present.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }

    /// Value of a tag, if the tag is present and carries one.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .and_then(|t| t.value.as_deref())
    }

    /// Nick of the message source, if the prefix is a user prefix.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }

    /// Command in uppercase, for dispatch.
    pub fn command_upper(&self) -> String {
        self.command.to_ascii_uppercase()
    }

    /// Parameter at `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Serialize without tags and prefix (`COMMAND params :trailing`).
    pub fn to_wire_without_source(&self) -> String {
        let mut out = String::new();
        write_command_and_params(&mut out, &self.command, &self.params);
        out
    }
}

fn write_command_and_params(out: &mut String, command: &str, params: &[String]) {
    out.push_str(command);
    let last = params.len().saturating_sub(1);
    for (i, param) in params.iter().enumerate() {
        out.push(' ');
        if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
            out.push(':');
        }
        out.push_str(param);
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@{} ", format_tag_string(&self.tags))?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        let mut rest = String::new();
        write_command_and_params(&mut rest, &self.command, &self.params);
        f.write_str(&rest)
    }
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        super::parse::parse_message(s)
    }
}

impl Message {
    /// Parse a raw line (CRLF optional) into a message.
    pub fn parse(s: &str) -> Result<Self, MessageParseError> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_trailing_space() {
        let m = Message::privmsg("#chan", "hello world");
        assert_eq!(m.to_string(), "PRIVMSG #chan :hello world");
    }

    #[test]
    fn test_display_no_colon_for_plain_last_param() {
        let m = Message::new("JOIN", &["#chan"]);
        assert_eq!(m.to_string(), "JOIN #chan");
    }

    #[test]
    fn test_display_empty_trailing() {
        let m = Message::privmsg("#chan", "");
        assert_eq!(m.to_string(), "PRIVMSG #chan :");
    }

    #[test]
    fn test_display_with_tags_and_prefix() {
        let m = Message::privmsg("#c", "hi")
            .with_tag("time", Some("2023-01-01T00:00:00.000Z"))
            .with_prefix(Prefix::parse("nick!u@h"));
        assert_eq!(
            m.to_string(),
            "@time=2023-01-01T00:00:00.000Z :nick!u@h PRIVMSG #c :hi"
        );
    }

    #[test]
    fn test_tag_lookup() {
        let m = Message::privmsg("#c", "hi").with_tag("batch", Some("ref1"));
        assert!(m.has_tag("batch"));
        assert_eq!(m.tag_value("batch"), Some("ref1"));
        assert_eq!(m.tag_value("time"), None);
    }
}
