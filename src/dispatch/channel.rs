//! Channel lifecycle and roster handlers.

use chrono::{Duration, TimeZone, Utc};

use crate::event::{DisplayLine, Event};
use crate::mode::{parse_mode_changes, ModeClass};
use crate::outqueue::Priority;
use crate::server::{ChannelType, ModelistItem, Nick};
use crate::session::Session;

use super::{Ctx, Flow};

/// Display a channel line, tagging it for the smart filter when the
/// subject was not recently speaking there, and `ignored` on
/// soft-ignore matches.
fn display_filtered(
    session: &mut Session,
    channel: &str,
    subject: Option<&str>,
    kind: &str,
    text: String,
    ctx: &Ctx<'_>,
) {
    let mut line = DisplayLine::channel(channel, text).with_tag(kind);
    if let Some(subject) = subject {
        let recently = session
            .state
            .find_channel(channel)
            .map(|c| c.recently_speaking(subject, ctx.now))
            .unwrap_or(false);
        if !recently && !ctx.is_self(session) {
            line = line.with_tag("irc_smart_filter");
        }
    }
    if ctx.ignored {
        line = line.with_tag("ignored");
    }
    session.display(line);
}

/// JOIN: someone (maybe us) joined a channel.
pub(super) fn join(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let channel_name = ctx.arg(0).to_string();
    let is_self = ctx.is_self(session);
    let mapping = session.state.casemapping;

    if is_self {
        let channel = session
            .state
            .ensure_channel(&channel_name, ChannelType::Channel);
        channel.part = false;
        channel.cycle = false;
        channel.has_quit_server = false;
        channel.rejoin_due = None;
        channel.join_msg_received.clear();
        channel.clear_nicks();
    }

    let channel_exists = session.state.find_channel(&channel_name).is_some();
    if !channel_exists {
        // JOIN for a channel we are not in (desync); ignore the roster
        return Flow::Ok;
    }

    let mut entry = Nick::new(&nick);
    entry.host = ctx.address.clone();
    // extended-join carries account and realname
    if ctx.msg.params.len() >= 3 {
        entry.account = match ctx.arg(1) {
            "*" => None,
            account => Some(account.to_string()),
        };
        entry.realname = Some(ctx.arg(2).to_string());
    }
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.add_nick(mapping, entry);
    }

    let address = ctx.address.clone().unwrap_or_default();
    display_filtered(
        session,
        &channel_name,
        if is_self { None } else { Some(nick.as_str()) },
        "irc_join",
        format!("{} ({}) has joined {}", nick, address, channel_name),
        ctx,
    );
    Flow::Ok
}

/// PART: someone (maybe us) left a channel.
pub(super) fn part(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let channel_name = ctx.arg(0).to_string();
    let reason = ctx.msg.params.get(1).cloned().unwrap_or_default();
    let is_self = ctx.is_self(session);
    let mapping = session.state.casemapping;

    let mut cycle = false;
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.remove_nick(mapping, &nick);
        if is_self {
            channel.clear_nicks();
            channel.part = true;
            cycle = channel.cycle;
            channel.cycle = false;
        }
    }

    display_filtered(
        session,
        &channel_name,
        if is_self { None } else { Some(nick.as_str()) },
        "irc_part",
        if reason.is_empty() {
            format!("{} has left {}", nick, channel_name)
        } else {
            format!("{} has left {} ({})", nick, channel_name, reason)
        },
        ctx,
    );

    if cycle {
        let key = session
            .state
            .find_channel(&channel_name)
            .and_then(|c| c.key.clone())
            .or_else(|| {
                session
                    .state
                    .join_channel_key
                    .get(&session.state.fold(&channel_name))
                    .cloned()
            });
        let line = match key {
            Some(key) => format!("JOIN {} {}", channel_name, key),
            None => format!("JOIN {}", channel_name),
        };
        session.send(Some(Priority::High), &line, ctx.now);
    }
    Flow::Ok
}

/// KICK: removal from a channel; autorejoin applies to ourselves.
pub(super) fn kick(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let from = ctx.nick.clone().unwrap_or_default();
    let channel_name = ctx.arg(0).to_string();
    let target = ctx.arg(1).to_string();
    let reason = ctx.msg.params.get(2).cloned().unwrap_or_default();
    let mapping = session.state.casemapping;

    let target_is_self = session
        .state
        .nick
        .as_deref()
        .map(|own| mapping.eq(own, &target))
        .unwrap_or(false);

    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.remove_nick(mapping, &target);
        if target_is_self {
            channel.clear_nicks();
            channel.part = true;
            if session.opts.autorejoin {
                channel.rejoin_due =
                    Some(ctx.now + Duration::seconds(session.opts.autorejoin_delay.max(0)));
            }
        }
    }

    let mut line = DisplayLine::channel(
        &channel_name,
        if reason.is_empty() {
            format!("{} has kicked {}", from, target)
        } else {
            format!("{} has kicked {} ({})", from, target, reason)
        },
    )
    .with_tag("irc_kick");
    if ctx.ignored {
        line = line.with_tag("ignored");
    }
    session.display(line);
    Flow::Ok
}

/// QUIT: a nick left the server; remove it everywhere.
pub(super) fn quit(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(nick) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let reason = ctx.msg.params.first().cloned().unwrap_or_default();
    let mapping = session.state.casemapping;

    let mut affected: Vec<String> = Vec::new();
    for channel in &mut session.state.channels {
        if channel.remove_nick(mapping, &nick).is_some() {
            affected.push(channel.name.clone());
        }
    }
    if let Some(query) = session.state.find_channel_mut(&nick) {
        query.has_quit_server = true;
        affected.push(query.name.clone());
    }

    for channel in affected {
        display_filtered(
            session,
            &channel,
            Some(nick.as_str()),
            "irc_quit",
            if reason.is_empty() {
                format!("{} has quit", nick)
            } else {
                format!("{} has quit ({})", nick, reason)
            },
            ctx,
        );
    }
    Flow::Ok
}

/// NICK: rename in every roster; track our own nick.
pub(super) fn nick_change(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let Some(old) = ctx.nick.clone() else {
        return Flow::Ok;
    };
    let new = ctx.arg(0).to_string();
    let is_self = ctx.is_self(session);
    let mapping = session.state.casemapping;

    let mut affected: Vec<String> = Vec::new();
    for channel in &mut session.state.channels {
        if channel.rename_nick(mapping, &old, &new) {
            channel.rename_speaker(&old, &new);
            affected.push(channel.name.clone());
        }
    }
    // a query buffer with the old nick follows the rename
    if let Some(query) = session.state.find_channel_mut(&old) {
        if query.channel_type == ChannelType::Private {
            query.name = new.clone();
        }
    }

    if is_self {
        session.state.nick = Some(new.clone());
        session.push_event(Event::NickChanged {
            old: Some(old.clone()),
            new: new.clone(),
        });
    }

    for channel in affected {
        display_filtered(
            session,
            &channel,
            if is_self { None } else { Some(old.as_str()) },
            "irc_nick",
            if is_self {
                format!("you are now known as {}", new)
            } else {
                format!("{} is now known as {}", old, new)
            },
            ctx,
        );
    }
    Flow::Ok
}

/// MODE: channel or user mode change.
pub(super) fn mode(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let target = ctx.arg(0).to_string();
    let modes = ctx.arg(1).to_string();
    let args: Vec<&str> = ctx.msg.params[2..].iter().map(String::as_str).collect();

    if session.state.is_channel_name(&target) {
        apply_channel_mode(session, ctx, &target, &modes, &args);
        let from = ctx.nick.clone().unwrap_or_default();
        let mut all = vec![modes.clone()];
        all.extend(args.iter().map(|s| s.to_string()));
        display_filtered(
            session,
            &target,
            ctx.nick.as_deref(),
            "irc_mode",
            format!("mode {} [{}] by {}", target, all.join(" "), from),
            ctx,
        );
    } else {
        // user mode change on ourselves
        let own = session
            .state
            .nick
            .as_deref()
            .map(|own| session.state.casemapping.eq(own, &target))
            .unwrap_or(false);
        if own {
            apply_user_mode(session, &modes);
        }
        session.display(DisplayLine::server(format!(
            "user mode [{}] by {}",
            modes,
            ctx.nick.clone().unwrap_or_default()
        )));
    }
    Flow::Ok
}

fn apply_channel_mode(
    session: &mut Session,
    ctx: &Ctx<'_>,
    target: &str,
    modes: &str,
    args: &[&str],
) {
    let table = session.state.mode_table.clone();
    let changes = match parse_mode_changes(&table, modes, args) {
        Ok(changes) => changes,
        Err(err) => {
            tracing::debug!(%err, modes, "malformed MODE arguments");
            return;
        }
    };
    let mapping = session.state.casemapping;
    let prefix_chars = session.state.prefix_chars.clone();

    for change in changes {
        let prefix_char = session.state.prefix_char_for_mode(change.mode);
        let Some(channel) = session.state.find_channel_mut(target) else {
            return;
        };
        match table.classify(change.mode) {
            ModeClass::Prefix => {
                if let (Some(prefix), Some(nick)) = (prefix_char, change.arg.as_deref()) {
                    if let Some(entry) = channel.find_nick_mut(mapping, nick) {
                        if change.plus {
                            entry.add_prefix(prefix, &prefix_chars);
                        } else {
                            entry.remove_prefix(prefix);
                        }
                    }
                }
            }
            ModeClass::List => {
                let list = channel.modelist_mut(change.mode);
                if let Some(mask) = change.arg.as_deref() {
                    if change.plus {
                        if list.state == crate::server::ModelistState::Received {
                            list.items.push(ModelistItem {
                                mask: mask.to_string(),
                                setter: ctx.nick.clone(),
                                set_time: Some(ctx.date),
                            });
                        }
                    } else {
                        list.items.retain(|item| item.mask != mask);
                    }
                }
            }
            ModeClass::SetArg => {
                if change.mode == 'k' {
                    channel.key = if change.plus {
                        change.arg.clone()
                    } else {
                        None
                    };
                }
                update_modes_string(channel, change.plus, change.mode);
            }
            ModeClass::SetOnlyArg => {
                if change.mode == 'l' {
                    channel.limit = if change.plus {
                        change.arg.as_deref().and_then(|a| a.parse().ok()).unwrap_or(0)
                    } else {
                        0
                    };
                }
                update_modes_string(channel, change.plus, change.mode);
            }
            ModeClass::NoArg => update_modes_string(channel, change.plus, change.mode),
        }
    }
}

fn update_modes_string(channel: &mut crate::server::Channel, plus: bool, mode: char) {
    let mut modes: Vec<char> = channel
        .modes
        .as_deref()
        .unwrap_or("")
        .trim_start_matches('+')
        .chars()
        .collect();
    if plus {
        if !modes.contains(&mode) {
            modes.push(mode);
        }
    } else {
        modes.retain(|c| *c != mode);
    }
    channel.modes = if modes.is_empty() {
        None
    } else {
        Some(format!("+{}", modes.into_iter().collect::<String>()))
    };
}

fn apply_user_mode(session: &mut Session, modes: &str) {
    let mut current: Vec<char> = session
        .state
        .nick_modes
        .as_deref()
        .unwrap_or("")
        .chars()
        .collect();
    let mut plus = true;
    for c in modes.chars() {
        match c {
            '+' => plus = true,
            '-' => plus = false,
            c => {
                if plus {
                    if !current.contains(&c) {
                        current.push(c);
                    }
                } else {
                    current.retain(|m| *m != c);
                }
            }
        }
    }
    session.state.nick_modes = if current.is_empty() {
        None
    } else {
        Some(current.into_iter().collect())
    };
}

/// TOPIC: topic change.
pub(super) fn topic_change(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(0).to_string();
    let topic = ctx.msg.params.get(1).cloned();
    let from = ctx.nick.clone().unwrap_or_default();

    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.topic = topic.clone().filter(|t| !t.is_empty());
    }
    let text = match topic.as_deref() {
        Some("") | None => format!("{} has unset the topic for {}", from, channel_name),
        Some(topic) => format!("{} has changed the topic for {} to \"{}\"", from, channel_name, topic),
    };
    let mut line = DisplayLine::channel(&channel_name, text).with_tag("irc_topic");
    if ctx.ignored {
        line = line.with_tag("ignored");
    }
    session.display(line);
    Flow::Ok
}

/// One-shot display helper for post-join numerics (329/332/333/366):
/// the first reply after a join is shown, repeats are queries.
fn join_msg_once(session: &mut Session, channel_name: &str, key: &str) -> bool {
    match session.state.find_channel_mut(channel_name) {
        Some(channel) => channel.join_msg_received.insert(key.to_string()),
        None => true,
    }
}

/// 324: channel modes.
pub(super) fn channel_mode_is(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    let modes = ctx.arg(2).to_string();
    let args: Vec<&str> = ctx.msg.params[3..].iter().map(String::as_str).collect();
    apply_channel_mode(session, ctx, &channel_name, &modes, &args);
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        let mut stored: Vec<char> = modes.trim_start_matches('+').chars().collect();
        stored.retain(|c| *c != 'k' && *c != 'l');
        // key/limit live in their own fields
        channel.modes = Some(format!("+{}", stored.into_iter().collect::<String>()));
    }
    session.display(
        DisplayLine::channel(
            &channel_name,
            format!("mode {} {}", channel_name, modes),
        ),
    );
    Flow::Ok
}

/// 329: channel creation time, shown once per join.
pub(super) fn creation_time(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    if !join_msg_once(session, &channel_name, "329") {
        return Flow::Ok;
    }
    if let Ok(ts) = ctx.arg(2).parse::<i64>() {
        if let Some(date) = Utc.timestamp_opt(ts, 0).single() {
            session.display(DisplayLine::channel(
                &channel_name,
                format!("channel created on {}", date.format("%Y-%m-%d %H:%M:%S")),
            ));
        }
    }
    Flow::Ok
}

/// 331: no topic set.
pub(super) fn no_topic(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.topic = None;
    }
    session.display(DisplayLine::channel(
        &channel_name,
        format!("no topic set for {}", channel_name),
    ));
    Flow::Ok
}

/// 332: topic reply.
pub(super) fn topic_reply(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    let topic = ctx.arg(2).to_string();
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.topic = Some(topic.clone());
    }
    if join_msg_once(session, &channel_name, "332") {
        session.display(DisplayLine::channel(
            &channel_name,
            format!("topic for {} is \"{}\"", channel_name, topic),
        ));
    }
    Flow::Ok
}

/// 333: topic setter and time.
pub(super) fn topic_who_time(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    if !join_msg_once(session, &channel_name, "333") {
        return Flow::Ok;
    }
    let who = ctx.arg(2).split('!').next().unwrap_or("").to_string();
    let when = ctx
        .param(3)
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
    let text = match when {
        Some(when) => format!(
            "topic set by {} on {}",
            who,
            when.format("%Y-%m-%d %H:%M:%S")
        ),
        None => format!("topic set by {}", who),
    };
    session.display(DisplayLine::channel(&channel_name, text));
    Flow::Ok
}

/// 341: invite confirmation.
pub(super) fn inviting(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    session.display(DisplayLine::server(format!(
        "{} has been invited to {}",
        ctx.arg(1),
        ctx.arg(2)
    )));
    Flow::Ok
}

// --- modelists -------------------------------------------------------

fn modelist_item(session: &mut Session, ctx: &Ctx<'_>, mode: char, mask_index: usize) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    let mask = ctx.arg(mask_index).to_string();
    let setter = ctx
        .param(mask_index + 1)
        .map(|s| s.split('!').next().unwrap_or(s).to_string());
    let set_time = ctx
        .param(mask_index + 2)
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.modelist_mut(mode).push_item(ModelistItem {
            mask: mask.clone(),
            setter: setter.clone(),
            set_time,
        });
    }
    session.display(DisplayLine::channel(
        &channel_name,
        match setter {
            Some(setter) => format!("[{}] +{} {} (by {})", channel_name, mode, mask, setter),
            None => format!("[{}] +{} {}", channel_name, mode, mask),
        },
    ));
    Flow::Ok
}

fn modelist_end(session: &mut Session, ctx: &Ctx<'_>, mode: char, label: &str) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.modelist_mut(mode).finish();
    }
    session.display(DisplayLine::channel(
        &channel_name,
        format!("end of {} list for {}", label, channel_name),
    ));
    Flow::Ok
}

/// 346: invite list entry.
pub(super) fn modelist_item_invite(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_item(session, ctx, 'I', 2)
}

/// 347: end of invite list.
pub(super) fn modelist_end_invite(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_end(session, ctx, 'I', "invite")
}

/// 348: exception list entry.
pub(super) fn modelist_item_except(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_item(session, ctx, 'e', 2)
}

/// 349: end of exception list.
pub(super) fn modelist_end_except(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_end(session, ctx, 'e', "exception")
}

/// 367: ban list entry.
pub(super) fn modelist_item_ban(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_item(session, ctx, 'b', 2)
}

/// 368: end of ban list.
pub(super) fn modelist_end_ban(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_end(session, ctx, 'b', "ban")
}

/// 728: quiet list entry (`:server 728 me #chan q mask setter time`).
pub(super) fn modelist_item_quiet(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_item(session, ctx, 'q', 3)
}

/// 729: end of quiet list.
pub(super) fn modelist_end_quiet(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    modelist_end(session, ctx, 'q', "quiet")
}

// --- WHO / NAMES -----------------------------------------------------

/// 352: WHO reply; away flag from the `H`/`G` marker.
pub(super) fn who_reply(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    let host = format!("{}@{}", ctx.arg(2), ctx.arg(3));
    let nick = ctx.arg(5).to_string();
    let away = ctx.arg(6).contains('G');
    let mapping = session.state.casemapping;

    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        if let Some(entry) = channel.find_nick_mut(mapping, &nick) {
            entry.host = Some(host);
            entry.away = away;
        }
    }
    Flow::Ok
}

/// 354: WHOX reply in the away-check format `%cnfar`
/// (`:server 354 me #chan nick flags account :realname`).
pub(super) fn whox_reply(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    if ctx.msg.params.len() < 4 {
        return Flow::Ok;
    }
    let channel_name = ctx.arg(1).to_string();
    let nick = ctx.arg(2).to_string();
    let away = ctx.arg(3).contains('G');
    let account = ctx.param(4).filter(|a| *a != "0").map(str::to_string);
    let realname = ctx.param(5).map(str::to_string);
    let mapping = session.state.casemapping;

    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        if let Some(entry) = channel.find_nick_mut(mapping, &nick) {
            entry.away = away;
            if account.is_some() {
                entry.account = account;
            }
            if realname.is_some() {
                entry.realname = realname;
            }
        }
    }
    Flow::Ok
}

/// 315: end of WHO.
pub(super) fn who_end(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    if let Some(channel) = session.state.find_channel_mut(&channel_name) {
        channel.checking_away = channel.checking_away.saturating_sub(1);
    }
    Flow::Ok
}

/// 353: NAMES reply; prefixes (multi-prefix) and
/// `nick!user@host` (userhost-in-names) both unfold here.
pub(super) fn names_reply(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    // :server 353 me [=|*|@] #chan :names
    let channel_name = ctx.arg(ctx.msg.params.len() - 2).to_string();
    let names = ctx.arg(ctx.msg.params.len() - 1).to_string();
    let prefix_chars = session.state.prefix_chars.clone();
    let mapping = session.state.casemapping;

    if session.state.find_channel(&channel_name).is_none() {
        // NAMES for a channel we are not in: display only
        session.display(DisplayLine::server(format!(
            "nicks on {}: {}",
            channel_name, names
        )));
        return Flow::Ok;
    }

    for name in names.split_whitespace() {
        let mut rest = name;
        let mut prefixes = String::new();
        while let Some(c) = rest.chars().next() {
            if prefix_chars.contains(c) {
                prefixes.push(c);
                rest = &rest[c.len_utf8()..];
            } else {
                break;
            }
        }
        if rest.is_empty() {
            continue;
        }
        let (nick_name, host) = match rest.split_once('!') {
            Some((nick_name, host)) => (nick_name, Some(host.to_string())),
            None => (rest, None),
        };
        let mut entry = Nick::new(nick_name);
        entry.host = host;
        for prefix in prefixes.chars() {
            entry.add_prefix(prefix, &prefix_chars);
        }
        if let Some(channel) = session.state.find_channel_mut(&channel_name) {
            // keep away/account state from an earlier entry
            if let Some(existing) = channel.find_nick_mut(mapping, nick_name) {
                existing.prefixes = entry.prefixes;
                if entry.host.is_some() {
                    existing.host = entry.host;
                }
            } else {
                channel.add_nick(mapping, entry);
            }
        }
    }
    Flow::Ok
}

/// 366: end of NAMES.
pub(super) fn names_end(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let channel_name = ctx.arg(1).to_string();
    if !join_msg_once(session, &channel_name, "366") {
        return Flow::Ok;
    }
    if let Some(channel) = session.state.find_channel(&channel_name) {
        let total = channel.nick_count();
        let ops = channel
            .nicks()
            .iter()
            .filter(|n| n.display_prefix() == Some('@'))
            .count();
        session.display(DisplayLine::channel(
            &channel_name,
            format!("channel {}: {} nicks ({} ops)", channel_name, total, ops),
        ));
    }
    Flow::Ok
}
