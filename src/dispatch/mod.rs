//! The protocol dispatcher: per-command handlers updating the server
//! model and emitting display events.
//!
//! A table maps each command to `(decode_color, keep_trailing_spaces,
//! min_params, handler)`. Numerics without an entry fall through to
//! the default numeric handler, which prints the concatenated
//! parameters on the server buffer. Unknown named commands are logged
//! and dropped.

mod channel;
mod connection;
mod ircv3;
mod messaging;
mod numeric;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::message::Message;
use crate::session::Session;

/// Handler outcome: `Eat` stops downstream observers (no `irc_in2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Ok,
    Eat,
}

type Handler = fn(&mut Session, &Ctx<'_>) -> Flow;

/// Table row for one command.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    /// Whether color codes in the text survive decoding.
    pub decode_color: bool,
    /// Whether trailing spaces in the text are preserved.
    pub keep_trailing_spaces: bool,
    /// Minimum parameter count enforced before the handler runs.
    pub min_params: usize,
    handler: Handler,
}

/// Parsed per-message context handed to handlers.
pub struct Ctx<'a> {
    pub msg: &'a Message,
    /// Command, uppercased.
    pub command: String,
    /// Source nick, when the prefix is a user.
    pub nick: Option<String>,
    /// Source `user@host`, when known.
    pub address: Option<String>,
    /// Raw line, for signals and redirect capture.
    pub raw: &'a str,
    /// Wall-clock receipt time.
    pub now: DateTime<Utc>,
    /// Message date: the `time` tag when present, else `now`.
    pub date: DateTime<Utc>,
    /// Matched a soft-ignore entry.
    pub ignored: bool,
}

impl<'a> Ctx<'a> {
    pub fn new(msg: &'a Message, now: DateTime<Utc>, raw: &'a str, ignored: bool) -> Self {
        let date = msg
            .tag_value("time")
            .and_then(parse_server_time)
            .unwrap_or(now);
        Ctx {
            command: msg.command_upper(),
            nick: msg.source_nick().map(str::to_string),
            address: msg.prefix.as_ref().and_then(|p| p.address()),
            msg,
            raw,
            now,
            date,
            ignored,
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.msg.param(index)
    }

    /// Parameter or empty string; for params already gated by
    /// `min_params`.
    pub fn arg(&self, index: usize) -> &str {
        self.msg.param(index).unwrap_or("")
    }

    /// Whether the message source is this client.
    pub fn is_self(&self, session: &Session) -> bool {
        match (&self.nick, &session.state.nick) {
            (Some(from), Some(own)) => session.state.casemapping.eq(from, own),
            _ => false,
        }
    }
}

/// Parse an IRCv3 `time` tag (ISO 8601, UTC).
pub fn parse_server_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Tag keys with their own semantics; everything else is carried to
/// the display layer as `irc_tag_<key>[=<value>]`, commas in values
/// replaced so display-tag lists stay parseable.
const KNOWN_TAG_KEYS: &[&str] = &[
    "time",
    "account",
    "batch",
    "msgid",
    "label",
    "+typing",
    "draft/multiline-concat",
];

pub(crate) fn unknown_tag_display_tags(msg: &Message) -> Vec<String> {
    msg.tags
        .iter()
        .filter(|t| !KNOWN_TAG_KEYS.contains(&t.key.as_str()))
        .map(|t| match &t.value {
            Some(value) => format!("irc_tag_{}={}", t.key, value.replace(',', ";")),
            None => format!("irc_tag_{}", t.key),
        })
        .collect()
}

/// Dispatch one message through the handler table.
pub fn dispatch(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let spec = match lookup(&ctx.command) {
        Some(spec) => spec,
        None => {
            if ctx.command.len() == 3 && ctx.command.chars().all(|c| c.is_ascii_digit()) {
                return numeric::default_numeric(session, ctx);
            }
            debug!(command = %ctx.command, "unknown command dropped");
            return Flow::Ok;
        }
    };

    if ctx.msg.params.len() < spec.min_params {
        warn!(
            command = %ctx.command,
            got = ctx.msg.params.len(),
            expected = spec.min_params,
            "too few parameters"
        );
        return Flow::Ok;
    }

    // trailing spaces are part of the text only for commands that say
    // so; everyone else gets the stripped form
    if !spec.keep_trailing_spaces {
        if let Some(last) = ctx.msg.params.last() {
            if last.ends_with(' ') {
                let mut msg = ctx.msg.clone();
                if let Some(last) = msg.params.last_mut() {
                    *last = last.trim_end_matches(' ').to_string();
                }
                let stripped = Ctx {
                    msg: &msg,
                    command: ctx.command.clone(),
                    nick: ctx.nick.clone(),
                    address: ctx.address.clone(),
                    raw: ctx.raw.trim_end_matches(' '),
                    now: ctx.now,
                    date: ctx.date,
                    ignored: ctx.ignored,
                };
                return (spec.handler)(session, &stripped);
            }
        }
    }
    (spec.handler)(session, ctx)
}

const fn spec(
    decode_color: bool,
    keep_trailing_spaces: bool,
    min_params: usize,
    handler: Handler,
) -> CommandSpec {
    CommandSpec {
        decode_color,
        keep_trailing_spaces,
        min_params,
        handler,
    }
}

/// The command table.
pub fn lookup(command: &str) -> Option<CommandSpec> {
    Some(match command {
        // --- connection / registration ---
        "001" => spec(false, false, 1, connection::welcome),
        "005" => spec(false, false, 2, connection::isupport),
        "221" => spec(false, false, 2, connection::umode_is),
        "301" => spec(true, false, 1, connection::away_reply),
        "305" => spec(false, false, 0, connection::unaway),
        "306" => spec(false, false, 0, connection::now_away),
        "396" => spec(false, false, 2, connection::displayed_host),
        "432" | "433" | "437" => spec(false, false, 1, connection::nick_unavailable),
        "470" => spec(false, false, 3, connection::channel_forward),
        "PING" => spec(false, false, 1, connection::ping),
        "PONG" => spec(false, false, 0, connection::pong),
        "ERROR" => spec(true, false, 1, connection::server_error),
        "KILL" => spec(true, false, 1, connection::kill),

        // --- ircv3 ---
        "CAP" => spec(false, false, 2, ircv3::cap),
        "AUTHENTICATE" => spec(false, false, 1, ircv3::authenticate),
        "900" => spec(false, false, 1, ircv3::logged_in),
        "901" => spec(false, false, 1, ircv3::logged_out),
        "902" | "904" | "905" | "906" => spec(false, false, 1, ircv3::sasl_failure),
        "903" | "907" => spec(false, false, 1, ircv3::sasl_success),
        "908" => spec(false, false, 2, ircv3::sasl_mechs),
        "BATCH" => spec(false, false, 1, ircv3::batch),
        "ACCOUNT" => spec(false, false, 1, ircv3::account),
        "AWAY" => spec(true, false, 0, ircv3::away_notify),
        "CHGHOST" => spec(false, false, 2, ircv3::chghost),
        "SETNAME" => spec(false, false, 1, ircv3::setname),
        "INVITE" => spec(false, false, 2, ircv3::invite),
        "730" => spec(false, false, 2, ircv3::monitor_online),
        "731" => spec(false, false, 2, ircv3::monitor_offline),
        "732" => spec(false, false, 2, ircv3::monitor_list),
        "733" => spec(false, false, 1, ircv3::monitor_list_end),
        "734" => spec(false, false, 3, ircv3::monitor_full),
        "FAIL" => spec(false, false, 2, ircv3::standard_reply),
        "WARN" => spec(false, false, 2, ircv3::standard_reply),
        "NOTE" => spec(false, false, 2, ircv3::standard_reply),
        "TAGMSG" => spec(false, false, 1, ircv3::tagmsg),

        // --- channels ---
        "JOIN" => spec(false, false, 1, channel::join),
        "PART" => spec(true, false, 1, channel::part),
        "KICK" => spec(true, false, 2, channel::kick),
        "QUIT" => spec(true, false, 0, channel::quit),
        "NICK" => spec(false, false, 1, channel::nick_change),
        "MODE" => spec(false, false, 2, channel::mode),
        "TOPIC" => spec(true, true, 1, channel::topic_change),
        "324" => spec(false, false, 2, channel::channel_mode_is),
        "329" => spec(false, false, 3, channel::creation_time),
        "331" => spec(false, false, 2, channel::no_topic),
        "332" => spec(true, true, 2, channel::topic_reply),
        "333" => spec(false, false, 3, channel::topic_who_time),
        "341" => spec(false, false, 2, channel::inviting),
        "346" => spec(false, false, 3, channel::modelist_item_invite),
        "347" => spec(false, false, 2, channel::modelist_end_invite),
        "348" => spec(false, false, 3, channel::modelist_item_except),
        "349" => spec(false, false, 2, channel::modelist_end_except),
        "352" => spec(false, false, 7, channel::who_reply),
        "354" => spec(false, false, 2, channel::whox_reply),
        "315" => spec(false, false, 2, channel::who_end),
        "353" => spec(false, false, 3, channel::names_reply),
        "366" => spec(false, false, 2, channel::names_end),
        "367" => spec(false, false, 3, channel::modelist_item_ban),
        "368" => spec(false, false, 2, channel::modelist_end_ban),
        "728" => spec(false, false, 4, channel::modelist_item_quiet),
        "729" => spec(false, false, 3, channel::modelist_end_quiet),

        // --- messaging ---
        "PRIVMSG" => spec(true, true, 2, messaging::privmsg),
        "NOTICE" => spec(true, true, 2, messaging::notice),
        "WALLOPS" => spec(true, false, 1, messaging::wallops),

        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_commands() {
        assert!(lookup("PRIVMSG").is_some());
        assert!(lookup("001").is_some());
        assert!(lookup("BATCH").is_some());
        assert!(lookup("NOSUCH").is_none());
    }

    #[test]
    fn test_min_params_in_table() {
        assert_eq!(lookup("PRIVMSG").unwrap().min_params, 2);
        assert_eq!(lookup("KICK").unwrap().min_params, 2);
    }

    #[test]
    fn test_topic_keeps_trailing_spaces() {
        assert!(lookup("TOPIC").unwrap().keep_trailing_spaces);
        assert!(!lookup("JOIN").unwrap().keep_trailing_spaces);
    }

    #[test]
    fn test_parse_server_time() {
        let dt = parse_server_time("2023-01-01T12:30:00.000Z").unwrap();
        assert_eq!(dt.timestamp(), 1672576200);
        assert!(parse_server_time("not-a-date").is_none());
    }
}
