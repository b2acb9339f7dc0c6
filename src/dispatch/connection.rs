//! Registration, liveness and server-level numerics.

use chrono::Duration;
use tracing::debug;

use crate::event::{DisplayLine, Event};
use crate::outqueue::Priority;
use crate::session::Session;

use super::{Ctx, Flow};

/// 001: registration completed.
pub(super) fn welcome(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.state.nick = Some(ctx.arg(0).to_string());
    session.state.is_connected = true;
    session.state.disconnected = false;
    session.caps.registration_complete();
    session.reset_reconnect();

    // schedule the post-registration work for the ticker
    session.state.lag_next_check = Some(ctx.now);
    session.state.monitor_due = Some(ctx.now + Duration::seconds(5));
    if !session.opts.command.is_empty() {
        session.state.command_due = Some(ctx.now + Duration::seconds(session.opts.command_delay));
    }
    if !session.opts.autojoin.is_empty() {
        session.state.autojoin_due = Some(
            ctx.now
                + Duration::seconds(session.opts.command_delay + session.opts.autojoin_delay),
        );
    }
    if session.opts.away_check > 0 {
        session.state.away_check_due = Some(ctx.now);
    }

    let usermode = session.evaluate(&session.opts.usermode);
    if !usermode.is_empty() {
        let nick = ctx.arg(0).to_string();
        session.send(
            Some(Priority::High),
            &format!("MODE {} {}", nick, usermode),
            ctx.now,
        );
    }

    session.push_event(Event::Connected);
    if let Some(text) = ctx.msg.params.last() {
        let text = text.clone();
        session.display(DisplayLine::server(text));
    }
    Flow::Ok
}

/// 005: ISUPPORT tokens.
pub(super) fn isupport(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let mut tokens: Vec<&str> = ctx.msg.params[1..].iter().map(String::as_str).collect();
    if let Some(last) = tokens.last() {
        // the trailing "are supported by this server" text
        if last.contains(' ') {
            tokens.pop();
        }
    }
    let parsed = crate::isupport::Isupport::parse_params(&tokens);
    session.state.apply_isupport(&parsed);
    session.display(DisplayLine::server(ctx.msg.params[1..].join(" ")));
    Flow::Ok
}

/// 221: our user modes.
pub(super) fn umode_is(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let modes = ctx.arg(1).to_string();
    session.state.nick_modes = Some(modes.trim_start_matches('+').to_string());
    session.display(DisplayLine::server(format!("user mode is {}", modes)));
    Flow::Ok
}

/// 301: target is away.
pub(super) fn away_reply(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    // :server 301 me nick :message
    if ctx.msg.params.len() < 3 {
        return Flow::Ok;
    }
    let nick = ctx.arg(1).to_string();
    let message = ctx.arg(2).to_string();
    if let Some(channel) = session.state.find_channel_mut(&nick) {
        // away display repeats are suppressed per query buffer
        if channel.away_message.as_deref() == Some(message.as_str()) {
            return Flow::Ok;
        }
        channel.away_message = Some(message.clone());
    }
    session.display(DisplayLine::private(&nick, format!("{} is away: {}", nick, message)));
    Flow::Ok
}

/// 305: back from away.
pub(super) fn unaway(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.state.is_away = false;
    session.state.away_message = None;
    session.state.away_time = None;
    session.display(DisplayLine::server("you are no longer marked as away"));
    let _ = ctx;
    Flow::Ok
}

/// 306: marked away.
pub(super) fn now_away(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.state.is_away = true;
    session.state.away_time = Some(ctx.now);
    session.display(DisplayLine::server("you have been marked as away"));
    Flow::Ok
}

/// 396: displayed host changed.
pub(super) fn displayed_host(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.display(DisplayLine::server(format!(
        "{} {}",
        ctx.arg(1),
        ctx.msg.params.get(2).map(String::as_str).unwrap_or("is now your displayed host"),
    )));
    Flow::Ok
}

/// 432/433/437: nick rejected. Pre-registration we walk the
/// configured list, then generate alternates; exhaustion disconnects.
pub(super) fn nick_unavailable(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let rejected = ctx
        .msg
        .params
        .get(1)
        .cloned()
        .unwrap_or_else(|| ctx.arg(0).to_string());

    if session.state.is_connected {
        session.display(DisplayLine::server(format!(
            "nick \"{}\" is unavailable ({})",
            rejected, ctx.command
        )));
        return Flow::Ok;
    }

    let nicks = session.nick_list_evaluated();
    match session.state.next_nick(&nicks, session.opts.nicks_alternate) {
        Some(next) => {
            session.display(DisplayLine::server(format!(
                "nick \"{}\" is already in use, trying \"{}\"",
                rejected, next
            )));
            session.state.nick = Some(next.clone());
            session.send(Some(Priority::Immediate), &format!("NICK {}", next), ctx.now);
        }
        None => {
            session.display(DisplayLine::server(
                "all declared nicknames are already in use or invalid, closing connection",
            ));
            session.request_disconnect(true);
        }
    }
    Flow::Ok
}

/// 470: the server forwarded us to another channel.
pub(super) fn channel_forward(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let from = ctx.arg(1).to_string();
    let to = ctx.arg(2).to_string();

    let from_key = session.state.fold(&from);
    let to_key = session.state.fold(&to);
    if let Some(channel) = session.state.find_channel_mut(&from) {
        channel.name = to.clone();
    }
    // re-key the manual-join bookkeeping so the forwarded join keeps
    // its buffer-switch and key behavior
    if let Some(time) = session.state.join_manual.remove(&from_key) {
        session.state.join_manual.insert(to_key.clone(), time);
    }
    if let Some(key) = session.state.join_channel_key.remove(&from_key) {
        session.state.join_channel_key.insert(to_key.clone(), key);
    }
    if let Some(time) = session.state.join_noswitch.remove(&from_key) {
        session.state.join_noswitch.insert(to_key, time);
    }

    session.push_event(Event::ChannelForwarded {
        from: from.clone(),
        to: to.clone(),
    });
    session.display(DisplayLine::server(format!(
        "channel {} is forwarding to {}",
        from, to
    )));
    Flow::Ok
}

/// PING: reply immediately, bypassing flood control.
pub(super) fn ping(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let payload = ctx.arg(0).to_string();
    session.send(
        Some(Priority::Immediate),
        &format!("PONG :{}", payload),
        ctx.now,
    );
    Flow::Ok
}

/// PONG: lag sample when a lag check is outstanding.
pub(super) fn pong(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    if let Some(sent) = session.state.lag_check_time.take() {
        let lag_ms = (ctx.now - sent).num_milliseconds().max(0);
        session.state.lag_ms = lag_ms;
        session.state.lag_next_check =
            Some(ctx.now + Duration::seconds(crate::session::LAG_CHECK_INTERVAL_SECS));
        if session.state.lag_displayed_ms != lag_ms {
            session.state.lag_displayed_ms = lag_ms;
            session.push_event(Event::LagChanged { lag_ms });
        }
    } else {
        debug!("unsolicited PONG");
    }
    Flow::Ok
}

/// ERROR: the server is closing the link.
pub(super) fn server_error(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let text = ctx.msg.params.join(" ");
    session.display(DisplayLine::server(text));
    Flow::Ok
}

/// KILL: forced disconnect of a nick.
pub(super) fn kill(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let target = ctx.arg(0).to_string();
    let reason = ctx.msg.params.get(1).cloned().unwrap_or_default();
    let from = ctx.nick.clone().unwrap_or_else(|| "server".to_string());
    session.display(DisplayLine::server(format!(
        "{} was killed by {}: {}",
        target, from, reason
    )));
    Flow::Ok
}
