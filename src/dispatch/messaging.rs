//! PRIVMSG/NOTICE handling: STATUSMSG targets, CTCP framing,
//! echo-message dedup, query buffers.

use crate::ctcp::{format_ctcp, Ctcp};
use crate::event::{DisplayLine, Event, TypingState};
use crate::outqueue::Priority;
use crate::server::ChannelType;
use crate::session::Session;

use super::{Ctx, Flow};

/// Version string for CTCP VERSION replies.
const CTCP_VERSION_REPLY: &str = concat!("slirc-client ", env!("CARGO_PKG_VERSION"));

/// Whether this inbound message is the echo of one we sent; echoes of
/// already-displayed messages are suppressed, fresh ones recorded.
fn echo_suppressed(session: &mut Session, ctx: &Ctx<'_>) -> bool {
    if !session.caps.enabled("echo-message") || !ctx.is_self(session) {
        return false;
    }
    let key = ctx.msg.to_wire_without_source();
    if session.state.echo_msg_check_and_remove(&key) {
        true
    } else {
        session.state.echo_msg_record(&key, ctx.now);
        false
    }
}

/// PRIVMSG: channel/private messages and CTCP requests.
pub(super) fn privmsg(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let (status, target) = session.state.split_statusmsg(ctx.arg(0));
    let target = target.to_string();
    let text = ctx.arg(1).to_string();

    if echo_suppressed(session, ctx) {
        return Flow::Eat;
    }

    let is_channel = session.state.is_channel_name(&target);

    // a message ends any typing indicator from its author
    if let Some(channel) = session.state.find_channel_mut(if is_channel {
        &target
    } else {
        &nick
    }) {
        channel.set_typing(&nick, TypingState::Done);
    }

    if let Some(ctcp) = Ctcp::parse(&text).map(|c| (c.command.to_string(), c.args.map(str::to_string))) {
        return handle_ctcp_request(session, ctx, &nick, &target, is_channel, ctcp);
    }

    let carried = super::unknown_tag_display_tags(ctx.msg);
    if is_channel {
        if let Some(channel) = session.state.find_channel_mut(&target) {
            channel.record_speaker(&nick, ctx.now);
        }
        let shown = match status {
            Some(status) => format!("<{}> [to {}{}] {}", nick, status, target, text),
            None => format!("<{}> {}", nick, text),
        };
        let mut line = DisplayLine::channel(&target, shown).with_tag("irc_privmsg");
        line.tags.extend(carried);
        if ctx.ignored {
            line = line.with_tag("ignored");
        }
        session.display(line);
    } else {
        session.push_event(Event::Pv {
            nick: nick.clone(),
            text: text.clone(),
        });
        session.state.ensure_channel(&nick, ChannelType::Private);
        let mut line = DisplayLine::private(&nick, format!("<{}> {}", nick, text))
            .with_tag("irc_privmsg");
        line.tags.extend(carried);
        if ctx.ignored {
            line = line.with_tag("ignored");
        }
        session.display(line);
    }
    Flow::Ok
}

fn handle_ctcp_request(
    session: &mut Session,
    ctx: &Ctx<'_>,
    nick: &str,
    target: &str,
    is_channel: bool,
    (command, args): (String, Option<String>),
) -> Flow {
    let command_upper = command.to_ascii_uppercase();

    if command_upper == "ACTION" {
        let action = args.unwrap_or_default();
        if is_channel {
            if let Some(channel) = session.state.find_channel_mut(target) {
                channel.record_speaker(nick, ctx.now);
            }
            let mut line = DisplayLine::channel(target, format!("* {} {}", nick, action))
                .with_tag("irc_action");
            if ctx.ignored {
                line = line.with_tag("ignored");
            }
            session.display(line);
        } else {
            session.state.ensure_channel(nick, ChannelType::Private);
            session.display(
                DisplayLine::private(nick, format!("* {} {}", nick, action))
                    .with_tag("irc_action"),
            );
        }
        return Flow::Ok;
    }

    // requests are answered at low priority; replies never loop
    // because they travel as NOTICE
    if !ctx.ignored {
        match command_upper.as_str() {
            "VERSION" => {
                let reply = format_ctcp("VERSION", Some(CTCP_VERSION_REPLY));
                session.send(
                    Some(Priority::Low),
                    &format!("NOTICE {} :{}", nick, reply),
                    ctx.now,
                );
            }
            "PING" => {
                let reply = format_ctcp("PING", args.as_deref());
                session.send(
                    Some(Priority::Low),
                    &format!("NOTICE {} :{}", nick, reply),
                    ctx.now,
                );
            }
            "CLIENTINFO" => {
                let reply = format_ctcp("CLIENTINFO", Some("ACTION CLIENTINFO PING VERSION"));
                session.send(
                    Some(Priority::Low),
                    &format!("NOTICE {} :{}", nick, reply),
                    ctx.now,
                );
            }
            _ => {}
        }
    }

    session.display(DisplayLine::server(format!(
        "CTCP {} from {}{}",
        command_upper,
        nick,
        args.map(|a| format!(": {}", a)).unwrap_or_default()
    )));
    Flow::Ok
}

/// NOTICE: like PRIVMSG but never auto-replied; CTCP frames here are
/// replies to our own requests.
pub(super) fn notice(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let nick = match ctx.nick.clone() {
        Some(nick) => nick,
        // server notices before registration
        None => {
            let text = ctx.arg(1).to_string();
            session.display(DisplayLine::server(text));
            return Flow::Ok;
        }
    };
    let (_, target) = session.state.split_statusmsg(ctx.arg(0));
    let target = target.to_string();
    let text = ctx.arg(1).to_string();

    if echo_suppressed(session, ctx) {
        return Flow::Eat;
    }

    if let Some(ctcp) = Ctcp::parse(&text) {
        session.display(DisplayLine::server(format!(
            "CTCP reply from {}: {}{}",
            nick,
            ctcp.command,
            ctcp.args.map(|a| format!(" {}", a)).unwrap_or_default()
        )));
        return Flow::Ok;
    }

    let mut line = if session.state.is_channel_name(&target) {
        if let Some(channel) = session.state.find_channel_mut(&target) {
            channel.record_speaker(&nick, ctx.now);
        }
        DisplayLine::channel(&target, format!("-{}- {}", nick, text))
    } else {
        DisplayLine::server(format!("-{}- {}", nick, text))
    }
    .with_tag("irc_notice");
    line.tags.extend(super::unknown_tag_display_tags(ctx.msg));
    if ctx.ignored {
        line = line.with_tag("ignored");
    }
    session.display(line);
    Flow::Ok
}

/// WALLOPS: operator broadcast.
pub(super) fn wallops(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let from = ctx.nick.clone().unwrap_or_default();
    let mut line = DisplayLine::server(format!("wallops from {}: {}", from, ctx.arg(0)))
        .with_tag("irc_wallops");
    if ctx.ignored {
        line = line.with_tag("ignored");
    }
    session.display(line);
    Flow::Ok
}
