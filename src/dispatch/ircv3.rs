//! IRCv3 subsystem handlers: CAP, SASL, BATCH, account/away/chghost
//! notifications, MONITOR numerics, standard replies and TAGMSG.

use tracing::debug;

use crate::event::{DisplayLine, Event, TypingState};
use crate::outqueue::Priority;
use crate::session::Session;

use super::{Ctx, Flow};

/// CAP: LS/LIST/ACK/NAK/NEW/DEL negotiation.
pub(super) fn cap(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let subcmd = ctx.arg(1).to_ascii_uppercase();
    let cfg = session.cap_config();

    match subcmd.as_str() {
        "LS" => {
            let (more, caps) = if ctx.param(2) == Some("*") {
                (true, ctx.arg(3).to_string())
            } else {
                (false, ctx.arg(2).to_string())
            };
            session.display(DisplayLine::server(format!("server supports: {}", caps)));
            let actions = session.caps.on_ls(&caps, more, &cfg);
            for action in actions {
                session.apply_cap_action(action, ctx.now);
            }
        }
        "LIST" => {
            let caps = if ctx.param(2) == Some("*") {
                ctx.arg(3)
            } else {
                ctx.arg(2)
            };
            session.caps.on_list(caps);
            session.display(DisplayLine::server(format!("currently enabled: {}", caps)));
        }
        "ACK" => {
            let caps = ctx.arg(2).to_string();
            session.display(DisplayLine::server(format!("capabilities enabled: {}", caps)));
            let actions = session.caps.on_ack(&caps, &cfg);
            for action in actions {
                session.apply_cap_action(action, ctx.now);
            }
        }
        "NAK" => {
            let caps = ctx.arg(2).to_string();
            session.display(DisplayLine::server(format!("capabilities refused: {}", caps)));
            let actions = session.caps.on_nak(&caps);
            for action in actions {
                session.apply_cap_action(action, ctx.now);
            }
        }
        "NEW" => {
            let caps = ctx.arg(2).to_string();
            session.display(DisplayLine::server(format!("capabilities now available: {}", caps)));
            let actions = session.caps.on_new(&caps, &cfg);
            for action in actions {
                session.apply_cap_action(action, ctx.now);
            }
        }
        "DEL" => {
            let caps = ctx.arg(2).to_string();
            session.display(DisplayLine::server(format!("capabilities removed: {}", caps)));
            let actions = session.caps.on_del(&caps);
            for action in actions {
                session.apply_cap_action(action, ctx.now);
            }
        }
        _ => debug!(%subcmd, "unhandled CAP subcommand"),
    }
    Flow::Ok
}

/// AUTHENTICATE: drive the SASL mechanism with the server challenge.
pub(super) fn authenticate(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let challenge = ctx.arg(0).to_string();
    let Some(mut sasl) = session.sasl.take() else {
        debug!("AUTHENTICATE without active SASL session");
        return Flow::Ok;
    };

    let credentials = session.sasl_credentials();
    match sasl.respond(&credentials, &challenge) {
        Ok(responses) => {
            session.sasl = Some(sasl);
            for response in responses {
                session.send(
                    Some(Priority::Immediate),
                    &format!("AUTHENTICATE {}", response),
                    ctx.now,
                );
            }
        }
        Err(err) => {
            session.sasl = Some(sasl);
            session.display(DisplayLine::server(format!("sasl: {}", err)));
            session.abort_sasl(ctx.now, &err.to_string());
        }
    }
    Flow::Ok
}

/// 900: logged in as.
pub(super) fn logged_in(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    if let Some(text) = ctx.msg.params.last() {
        let text = text.clone();
        session.display(DisplayLine::server(text));
    }
    Flow::Ok
}

/// 901: logged out.
pub(super) fn logged_out(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    if let Some(text) = ctx.msg.params.last() {
        let text = text.clone();
        session.display(DisplayLine::server(text));
    }
    Flow::Ok
}

/// 903/907: SASL completed.
pub(super) fn sasl_success(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let text = ctx.msg.params.last().cloned().unwrap_or_default();
    session.display(DisplayLine::server(text.clone()));
    session.sasl_succeeded(ctx.now, &text);
    Flow::Ok
}

/// 902/904/905/906: SASL failed; the `sasl_fail` policy applies.
pub(super) fn sasl_failure(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let text = ctx.msg.params.last().cloned().unwrap_or_default();
    session.display(DisplayLine::server(text.clone()));
    session.sasl_failed(ctx.now, &text);
    Flow::Ok
}

/// 908: supported mechanisms list.
pub(super) fn sasl_mechs(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.display(DisplayLine::server(format!(
        "available SASL mechanisms: {}",
        ctx.arg(1)
    )));
    Flow::Ok
}

/// BATCH +ref/-ref.
pub(super) fn batch(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let reference = ctx.arg(0);
    if let Some(reference) = reference.strip_prefix('+') {
        if ctx.msg.params.len() < 2 {
            return Flow::Ok;
        }
        let reference = reference.to_string();
        let batch_type = ctx.arg(1).to_string();
        let parameters: Vec<String> = ctx.msg.params[2..].to_vec();
        let parent = ctx.msg.tag_value("batch").map(str::to_string);
        session.batches.open(
            &reference,
            parent.as_deref(),
            &batch_type,
            &parameters,
            &ctx.msg.tags,
            ctx.now,
        );
    } else if let Some(reference) = reference.strip_prefix('-') {
        let reference = reference.to_string();
        let replay = session.batches.close(&reference);
        session.replay_batch_messages(replay, ctx.now);
    }
    Flow::Ok
}

/// ACCOUNT: login state change (account-notify).
pub(super) fn account(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let account = match ctx.arg(0) {
        "*" => None,
        name => Some(name.to_string()),
    };
    let mapping = session.state.casemapping;
    for channel in &mut session.state.channels {
        if let Some(entry) = channel.find_nick_mut(mapping, &nick) {
            entry.account = account.clone();
        }
    }
    Flow::Ok
}

/// AWAY: away state change (away-notify).
pub(super) fn away_notify(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let away = !ctx.msg.params.is_empty() && !ctx.arg(0).is_empty();
    let mapping = session.state.casemapping;
    for channel in &mut session.state.channels {
        if let Some(entry) = channel.find_nick_mut(mapping, &nick) {
            entry.away = away;
        }
    }
    if let Some(query) = session.state.find_channel_mut(&nick) {
        query.away_message = if away {
            Some(ctx.arg(0).to_string())
        } else {
            None
        };
    }
    Flow::Ok
}

/// CHGHOST: user/host change.
pub(super) fn chghost(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let host = format!("{}@{}", ctx.arg(0), ctx.arg(1));
    let mapping = session.state.casemapping;
    for channel in &mut session.state.channels {
        if let Some(entry) = channel.find_nick_mut(mapping, &nick) {
            entry.host = Some(host.clone());
        }
    }
    if ctx.is_self(session) {
        session.state.host = Some(host);
    }
    Flow::Ok
}

/// SETNAME: realname change.
pub(super) fn setname(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let realname = ctx.arg(0).to_string();
    let mapping = session.state.casemapping;
    for channel in &mut session.state.channels {
        if let Some(entry) = channel.find_nick_mut(mapping, &nick) {
            entry.realname = Some(realname.clone());
        }
    }
    Flow::Ok
}

/// INVITE: we (or someone, with invite-notify) got invited.
pub(super) fn invite(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let from = ctx.nick.clone().unwrap_or_default();
    let target = ctx.arg(0).to_string();
    let channel = ctx.arg(1).to_string();
    let text = if session
        .state
        .nick
        .as_deref()
        .map(|own| session.state.casemapping.eq(own, &target))
        .unwrap_or(false)
    {
        format!("{} invites you to join {}", from, channel)
    } else {
        format!("{} invites {} to join {}", from, target, channel)
    };
    let mut line = DisplayLine::server(text);
    if ctx.ignored {
        line = line.with_tag("ignored");
    }
    session.display(line);
    Flow::Ok
}

/// 730: monitored nicks are online.
pub(super) fn monitor_online(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    monitor_update(session, ctx, true)
}

/// 731: monitored nicks are offline.
pub(super) fn monitor_offline(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    monitor_update(session, ctx, false)
}

fn monitor_update(session: &mut Session, ctx: &Ctx<'_>, online: bool) -> Flow {
    let mapping = session.state.casemapping;
    for target in ctx.arg(1).split(',').filter(|s| !s.is_empty()) {
        // targets are nick or nick!user@host
        let nick = target.split('!').next().unwrap_or(target).to_string();
        for entry in &mut session.state.notify {
            if mapping.eq(&entry.nick, &nick) {
                entry.is_on_server = Some(online);
            }
        }
        session.push_event(Event::MonitorState {
            nick: nick.clone(),
            online,
        });
        session.display(DisplayLine::server(format!(
            "{} is {}",
            nick,
            if online { "online" } else { "offline" }
        )));
    }
    Flow::Ok
}

/// 732: MONITOR list entries.
pub(super) fn monitor_list(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.display(DisplayLine::server(format!("monitored: {}", ctx.arg(1))));
    Flow::Ok
}

/// 733: end of MONITOR list.
pub(super) fn monitor_list_end(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let _ = ctx;
    session.display(DisplayLine::server("end of monitor list"));
    Flow::Ok
}

/// 734: MONITOR list is full.
pub(super) fn monitor_full(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.display(DisplayLine::server(format!(
        "monitor list is full ({} max), could not add: {}",
        ctx.arg(1),
        ctx.arg(2)
    )));
    Flow::Ok
}

/// FAIL/WARN/NOTE standardized replies.
pub(super) fn standard_reply(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let severity = match ctx.command.as_str() {
        "FAIL" => "failure",
        "WARN" => "warning",
        _ => "note",
    };
    session.display(DisplayLine::server(format!(
        "{} from {} ({}): {}",
        severity,
        ctx.arg(0),
        ctx.arg(1),
        ctx.msg.params[2..].join(" ")
    )));
    Flow::Ok
}

/// TAGMSG: tag-only message; `+typing` drives typing indicators.
pub(super) fn tagmsg(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let (_, target) = session.state.split_statusmsg(ctx.arg(0));
    let target = target.to_string();

    if let Some(state) = ctx
        .msg
        .tag_value("+typing")
        .or_else(|| ctx.msg.tag_value("typing"))
        .and_then(TypingState::parse)
    {
        if let Some(channel) = session.state.find_channel_mut(&target) {
            channel.set_typing(&nick, state);
        }
        session.push_event(Event::Typing {
            target,
            nick,
            state,
        });
    }
    Flow::Ok
}
