//! Nom-based IRC message parser.
//!
//! Strict on framing (the caller strips CRLF), tolerant on interior
//! whitespace: runs of spaces between parameters collapse.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::error::MessageParseError;
use crate::prefix::Prefix;

use super::tags::parse_tag_string;
use super::types::Message;

/// Parse IRCv3 message tags (the part after `@` and before the first space).
fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

/// Parse message prefix (the part after `:` and before the first space).
fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name (letters or digits).
fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

/// Parse parameters from the remaining input after the command.
///
/// Handles both regular space-separated parameters and the trailing
/// parameter (prefixed with `:`) which may contain spaces. Multiple
/// consecutive spaces are treated as a single separator.
fn parse_params(input: &str) -> Vec<&str> {
    let mut params: Vec<&str> = Vec::new();
    let mut rest = input;

    while let Some(b' ') = rest.as_bytes().first().copied() {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }

        if rest.is_empty() || rest.starts_with('\r') || rest.starts_with('\n') {
            break;
        }

        if let Some(b':') = rest.as_bytes().first().copied() {
            let after_colon = &rest[1..];
            let end = after_colon.find(['\r', '\n']).unwrap_or(after_colon.len());
            params.push(&after_colon[..end]);
            break;
        }

        let end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        let param = &rest[..end];
        if param.is_empty() {
            break;
        }
        params.push(param);
        rest = &rest[end..];
    }

    params
}

/// Parse a complete IRC message into an owned [`Message`].
pub(super) fn parse_message(input: &str) -> Result<Message, MessageParseError> {
    if input.trim_end_matches(['\r', '\n']).is_empty() {
        return Err(MessageParseError::EmptyMessage);
    }

    let (input, raw_tags) = opt(parse_tags)(input).map_err(|_: nom::Err<nom::error::Error<&str>>| {
        MessageParseError::InvalidCommand
    })?;
    let (input, _) = space0::<_, nom::error::Error<&str>>(input)
        .map_err(|_| MessageParseError::InvalidCommand)?;

    let (input, raw_prefix) = opt(parse_prefix)(input)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| MessageParseError::InvalidCommand)?;
    let (input, _) = space0::<_, nom::error::Error<&str>>(input)
        .map_err(|_| MessageParseError::InvalidCommand)?;

    let (input, command) =
        parse_command(input).map_err(|_: nom::Err<nom::error::Error<&str>>| {
            MessageParseError::InvalidCommand
        })?;

    let params = parse_params(input);

    Ok(Message {
        tags: raw_tags.map(parse_tag_string).unwrap_or_default(),
        prefix: raw_prefix.map(Prefix::parse),
        command: command.to_string(),
        params: params.into_iter().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::types::Message;
    use crate::prefix::Prefix;

    #[test]
    fn test_parse_simple_command() {
        let msg = Message::parse("PING").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
        assert!(msg.params.is_empty());
    }

    #[test]
    fn test_parse_command_with_params() {
        let msg = Message::parse("PRIVMSG #channel :Hello, world!").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn test_parse_with_prefix() {
        let msg = Message::parse(":nick!user@host PRIVMSG #channel :Hello").unwrap();
        assert_eq!(msg.source_nick(), Some("nick"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello"]);
    }

    #[test]
    fn test_parse_with_tags() {
        let msg = Message::parse("@time=2023-01-01T00:00:00Z :nick PRIVMSG #ch :Hi").unwrap();
        assert_eq!(msg.tag_value("time"), Some("2023-01-01T00:00:00Z"));
        assert_eq!(msg.source_nick(), Some("nick"));
        assert_eq!(msg.params, vec!["#ch", "Hi"]);
    }

    #[test]
    fn test_parse_escaped_tag_value() {
        let msg = Message::parse("@k=a\\sb\\:c PING").unwrap();
        assert_eq!(msg.tag_value("k"), Some("a b;c"));
    }

    #[test]
    fn test_parse_with_crlf() {
        let msg = Message::parse("PING :server\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["server"]);
    }

    #[test]
    fn test_parse_multiple_params() {
        let msg = Message::parse("USER guest 0 * :Real Name").unwrap();
        assert_eq!(msg.command, "USER");
        assert_eq!(msg.params, vec!["guest", "0", "*", "Real Name"]);
    }

    #[test]
    fn test_parse_numeric_response() {
        let msg = Message::parse(":server 001 nick :Welcome").unwrap();
        assert_eq!(msg.prefix, Some(Prefix::Server("server".into())));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["nick", "Welcome"]);
    }

    #[test]
    fn test_parse_empty_trailing() {
        let msg = Message::parse("PRIVMSG #channel :").unwrap();
        assert_eq!(msg.params, vec!["#channel", ""]);
    }

    #[test]
    fn test_parse_collapses_interior_spaces() {
        let msg = Message::parse("MODE  #chan   +o  alice").unwrap();
        assert_eq!(msg.params, vec!["#chan", "+o", "alice"]);
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(Message::parse("").is_err());
        assert!(Message::parse("\r\n").is_err());
    }

    #[test]
    fn test_roundtrip() {
        for raw in [
            "PRIVMSG #channel :Hello, world!",
            ":nick!user@host JOIN #channel",
            "@batch=ref1;time=2023-01-01T00:00:00Z :irc.example.org 001 nick :Welcome",
            "PING",
            "USER guest 0 * :Real Name",
        ] {
            let msg = Message::parse(raw).unwrap();
            assert_eq!(msg.to_string(), raw);
        }
    }
}
