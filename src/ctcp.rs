//! CTCP framing inside PRIVMSG/NOTICE bodies.
//!
//! A CTCP message is delimited by `\x01` bytes: `\x01COMMAND [args]\x01`.
//! The closing delimiter is optional in the wild and tolerated here.
//!
//! # Reference
//! - <https://modern.ircdocs.horse/ctcp>

/// Delimiter byte for CTCP framing.
pub const CTCP_DELIM: char = '\u{1}';

/// A CTCP message extracted from a PRIVMSG/NOTICE body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctcp<'a> {
    /// CTCP command (e.g. `ACTION`, `VERSION`), as sent.
    pub command: &'a str,
    /// Arguments after the command, if any.
    pub args: Option<&'a str>,
}

impl<'a> Ctcp<'a> {
    /// Extract a CTCP message from a text body, if the body is CTCP-framed.
    pub fn parse(text: &'a str) -> Option<Self> {
        let inner = text.strip_prefix(CTCP_DELIM)?;
        let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }
        match inner.split_once(' ') {
            Some((command, args)) => Some(Ctcp {
                command,
                args: if args.is_empty() { None } else { Some(args) },
            }),
            None => Some(Ctcp {
                command: inner,
                args: None,
            }),
        }
    }

    /// True when this is an `ACTION` (a `/me` message).
    pub fn is_action(&self) -> bool {
        self.command.eq_ignore_ascii_case("ACTION")
    }
}

/// Frame a CTCP command for sending.
pub fn format_ctcp(command: &str, args: Option<&str>) -> String {
    match args {
        Some(args) => format!("{}{} {}{}", CTCP_DELIM, command, args, CTCP_DELIM),
        None => format!("{}{}{}", CTCP_DELIM, command, CTCP_DELIM),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        let ctcp = Ctcp::parse("\u{1}ACTION waves\u{1}").unwrap();
        assert_eq!(ctcp.command, "ACTION");
        assert_eq!(ctcp.args, Some("waves"));
        assert!(ctcp.is_action());
    }

    #[test]
    fn test_parse_no_args() {
        let ctcp = Ctcp::parse("\u{1}VERSION\u{1}").unwrap();
        assert_eq!(ctcp.command, "VERSION");
        assert_eq!(ctcp.args, None);
    }

    #[test]
    fn test_parse_missing_close_delim() {
        let ctcp = Ctcp::parse("\u{1}PING 12345").unwrap();
        assert_eq!(ctcp.command, "PING");
        assert_eq!(ctcp.args, Some("12345"));
    }

    #[test]
    fn test_plain_text_is_not_ctcp() {
        assert_eq!(Ctcp::parse("hello"), None);
        assert_eq!(Ctcp::parse(""), None);
    }

    #[test]
    fn test_format_roundtrip() {
        let framed = format_ctcp("ACTION", Some("waves"));
        let parsed = Ctcp::parse(&framed).unwrap();
        assert_eq!(parsed.command, "ACTION");
        assert_eq!(parsed.args, Some("waves"));
    }
}
