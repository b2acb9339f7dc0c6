//! Command-aware outbound message splitting.
//!
//! A logical command may exceed the server's frame budget
//! (`msg_max_length`, default 512 bytes including CRLF). The splitter
//! produces one or more wire frames, each guaranteed to fit:
//!
//! - `PRIVMSG`/`NOTICE`: the text is split on UTF-8 character
//!   boundaries, preferring a whitespace boundary when one exists in
//!   the last 30% of the remaining budget. Prefix, command and target
//!   are repeated on every fragment.
//! - `JOIN`: the channel list (and key list, paired positionally) is
//!   split without ever separating a `(channel, key)` pair.
//! - `NAMES`/`WHO`/`WHOIS`/`WHOWAS`/`MONITOR`/`ISON`: the argument
//!   list is split by byte budget.
//! - With `draft/multiline` active, multi-line text becomes a
//!   `BATCH +ref draft/multiline target` bracket instead, one PRIVMSG
//!   per line tagged `batch=ref`, respecting the server-advertised
//!   `max-bytes`/`max-lines` limits.
//!
//! Concatenating the payloads of split PRIVMSG fragments yields the
//! original payload.

use super::types::Message;

/// Server-advertised limits for one `draft/multiline` batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultilineLimits {
    /// Maximum total payload bytes in one batch.
    pub max_bytes: usize,
    /// Maximum number of lines in one batch.
    pub max_lines: usize,
}

impl Default for MultilineLimits {
    fn default() -> Self {
        MultilineLimits {
            max_bytes: 4096,
            max_lines: 24,
        }
    }
}

impl MultilineLimits {
    /// Parse the CAP LS value of `draft/multiline`
    /// (e.g. `max-bytes=4096,max-lines=24`).
    pub fn parse(value: &str) -> Self {
        let mut limits = MultilineLimits::default();
        for item in value.split(',') {
            if let Some((key, val)) = item.split_once('=') {
                match key {
                    "max-bytes" => {
                        if let Ok(n) = val.parse() {
                            limits.max_bytes = n;
                        }
                    }
                    "max-lines" => {
                        if let Ok(n) = val.parse() {
                            limits.max_lines = n;
                        }
                    }
                    _ => {}
                }
            }
        }
        limits
    }
}

/// Inputs the splitter needs from the server state.
#[derive(Clone, Debug)]
pub struct SplitContext {
    /// Frame budget including the closing CRLF (default 512,
    /// overridden by ISUPPORT `LINELEN`).
    pub max_length: usize,
    /// Bytes the server will prepend when relaying our PRIVMSG/NOTICE
    /// (`:nick!user@host `), so echoed fragments also fit.
    pub overhead: usize,
}

impl Default for SplitContext {
    fn default() -> Self {
        SplitContext {
            max_length: 512,
            overhead: 0,
        }
    }
}

impl SplitContext {
    fn body_budget(&self) -> usize {
        // Room for the frame body once CRLF is accounted for.
        self.max_length.saturating_sub(2)
    }
}

/// Split a logical command into wire frames (without CRLF).
///
/// Commands with no splitting rule pass through as a single frame.
pub fn split_message(msg: &Message, ctx: &SplitContext) -> Vec<String> {
    let wire = msg.to_string();
    if wire.len() <= ctx.body_budget() && !has_split_rule(msg) {
        return vec![wire];
    }

    match msg.command_upper().as_str() {
        "PRIVMSG" | "NOTICE" if msg.params.len() >= 2 => split_text_command(msg, ctx),
        "JOIN" if !msg.params.is_empty() => split_join(msg, ctx),
        "NAMES" | "WHO" | "WHOIS" | "WHOWAS" if !msg.params.is_empty() => {
            split_comma_list(msg, ctx, msg.params.len() - 1)
        }
        "MONITOR" if msg.params.len() >= 2 => split_comma_list(msg, ctx, 1),
        "ISON" if !msg.params.is_empty() => split_space_list(msg, ctx),
        _ => vec![wire],
    }
}

fn has_split_rule(msg: &Message) -> bool {
    // Text commands always go through the splitter so the overhead
    // estimate applies even to short messages near the budget.
    matches!(msg.command_upper().as_str(), "PRIVMSG" | "NOTICE")
}

/// Split outbound multi-line text into a `draft/multiline` batch.
///
/// `command` is `PRIVMSG` or `NOTICE`; `text` may contain `\n`.
/// Returns the full bracket: `BATCH +ref`, the tagged fragments and
/// `BATCH -ref`. A new bracket is opened whenever `limits` would be
/// exceeded; follow-up brackets derive their reference from
/// `batch_ref` with a numeric suffix.
pub fn split_multiline(
    command: &str,
    target: &str,
    text: &str,
    limits: &MultilineLimits,
    batch_ref: &str,
    ctx: &SplitContext,
) -> Vec<String> {
    let per_frame = text_budget(command, target, ctx)
        // the batch tag rides on every fragment
        .saturating_sub("@batch=;draft/multiline-concat ".len() + batch_ref.len() + 2);
    let per_frame = per_frame.max(1);

    let mut frames = Vec::new();
    let mut bracket = 0usize;
    let mut open = false;
    let mut cur_ref = String::new();
    let mut lines_in_batch = 0usize;
    let mut bytes_in_batch = 0usize;

    let mut fragments: Vec<(String, bool)> = Vec::new();
    for line in text.split('\n') {
        let mut first = true;
        if line.is_empty() {
            fragments.push((String::new(), false));
            continue;
        }
        let mut rest = line;
        while !rest.is_empty() {
            let cut = split_point(rest, per_frame);
            fragments.push((rest[..cut].to_string(), !first));
            rest = &rest[cut..];
            first = false;
        }
    }

    for (fragment, concat) in fragments {
        let fragment_bytes = fragment.len().max(1);
        if open
            && (lines_in_batch + 1 > limits.max_lines
                || bytes_in_batch + fragment_bytes > limits.max_bytes)
        {
            frames.push(format!("BATCH -{}", cur_ref));
            open = false;
        }
        if !open {
            bracket += 1;
            cur_ref = if bracket == 1 {
                batch_ref.to_string()
            } else {
                format!("{}-{}", batch_ref, bracket)
            };
            frames.push(format!("BATCH +{} draft/multiline {}", cur_ref, target));
            open = true;
            lines_in_batch = 0;
            bytes_in_batch = 0;
        }
        let tags = if concat {
            format!("batch={};draft/multiline-concat", cur_ref)
        } else {
            format!("batch={}", cur_ref)
        };
        frames.push(format!("@{} {} {} :{}", tags, command, target, fragment));
        lines_in_batch += 1;
        bytes_in_batch += fragment_bytes;
    }

    if open {
        frames.push(format!("BATCH -{}", cur_ref));
    }
    frames
}

fn text_budget(command: &str, target: &str, ctx: &SplitContext) -> usize {
    // "COMMAND target :" plus the relay prefix the server will add.
    let fixed = command.len() + 1 + target.len() + 2 + ctx.overhead;
    ctx.body_budget().saturating_sub(fixed).max(1)
}

fn split_text_command(msg: &Message, ctx: &SplitContext) -> Vec<String> {
    let command = msg.command_upper();
    let target = &msg.params[0];
    let text = &msg.params[1];
    let budget = text_budget(&command, target, ctx);

    let mut frames = Vec::new();
    let mut rest = text.as_str();
    if rest.is_empty() {
        frames.push(rebuild(msg, &[target.clone(), String::new()]));
        return frames;
    }
    while !rest.is_empty() {
        let cut = split_point(rest, budget);
        frames.push(rebuild(msg, &[target.clone(), rest[..cut].to_string()]));
        rest = &rest[cut..];
    }
    frames
}

/// Largest cut point (in bytes) for one fragment of `text`.
///
/// Never cuts inside a UTF-8 code point. When the fragment would end
/// mid-text, a whitespace boundary in the last 30% of the budget wins;
/// the space stays with the left fragment so payload concatenation is
/// lossless.
fn split_point(text: &str, budget: usize) -> usize {
    if text.len() <= budget {
        return text.len();
    }

    let cut = crate::util::truncate_utf8_safe(text, budget).len();
    if cut == 0 {
        // budget smaller than one code point: take it anyway to make progress
        return text.chars().next().map(char::len_utf8).unwrap_or(1);
    }

    let window_start = budget.saturating_mul(7) / 10;
    if let Some(space_idx) = text[..cut]
        .char_indices()
        .filter(|(i, c)| c.is_whitespace() && *i >= window_start)
        .map(|(i, c)| i + c.len_utf8())
        .last()
    {
        return space_idx;
    }
    cut
}

fn rebuild(msg: &Message, params: &[String]) -> String {
    let rebuilt = Message {
        tags: msg.tags.clone(),
        prefix: msg.prefix.clone(),
        command: msg.command.clone(),
        params: params.to_vec(),
    };
    rebuilt.to_string()
}

fn split_join(msg: &Message, ctx: &SplitContext) -> Vec<String> {
    let channels: Vec<&str> = msg.params[0].split(',').collect();
    let keys: Vec<&str> = msg
        .param(1)
        .map(|k| k.split(',').collect())
        .unwrap_or_default();
    let budget = ctx.body_budget();

    let mut frames = Vec::new();
    let mut chan_acc: Vec<&str> = Vec::new();
    let mut key_acc: Vec<&str> = Vec::new();

    let flush = |chan_acc: &mut Vec<&str>, key_acc: &mut Vec<&str>, frames: &mut Vec<String>| {
        if chan_acc.is_empty() {
            return;
        }
        let mut frame = format!("JOIN {}", chan_acc.join(","));
        if !key_acc.is_empty() {
            frame.push(' ');
            frame.push_str(&key_acc.join(","));
        }
        frames.push(frame);
        chan_acc.clear();
        key_acc.clear();
    };

    for (i, chan) in channels.iter().enumerate() {
        let key = keys.get(i).copied();
        let projected = "JOIN ".len()
            + chan_acc.iter().map(|c| c.len() + 1).sum::<usize>()
            + chan.len()
            + if !keys.is_empty() {
                1 + key_acc.iter().map(|k| k.len() + 1).sum::<usize>()
                    + key.map(str::len).unwrap_or(0)
            } else {
                0
            };
        if !chan_acc.is_empty() && projected > budget {
            flush(&mut chan_acc, &mut key_acc, &mut frames);
        }
        chan_acc.push(chan);
        if let Some(k) = key {
            key_acc.push(k);
        }
    }
    flush(&mut chan_acc, &mut key_acc, &mut frames);
    frames
}

fn split_comma_list(msg: &Message, ctx: &SplitContext, list_index: usize) -> Vec<String> {
    let budget = ctx.body_budget();
    let fixed: usize = msg.command.len()
        + msg
            .params
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != list_index)
            .map(|(_, p)| p.len() + 1)
            .sum::<usize>()
        + 1;

    let items: Vec<&str> = msg.params[list_index].split(',').collect();
    let mut frames = Vec::new();
    let mut acc: Vec<&str> = Vec::new();

    for item in items {
        let projected = fixed + acc.iter().map(|s| s.len() + 1).sum::<usize>() + item.len();
        if !acc.is_empty() && projected > budget {
            let mut params = msg.params.clone();
            params[list_index] = acc.join(",");
            frames.push(rebuild(msg, &params));
            acc.clear();
        }
        acc.push(item);
    }
    if !acc.is_empty() {
        let mut params = msg.params.clone();
        params[list_index] = acc.join(",");
        frames.push(rebuild(msg, &params));
    }
    frames
}

fn split_space_list(msg: &Message, ctx: &SplitContext) -> Vec<String> {
    let budget = ctx.body_budget();
    let fixed = msg.command.len() + 2;
    let joined = msg.params.join(" ");
    let items: Vec<&str> = joined.split_whitespace().collect();

    let mut frames = Vec::new();
    let mut acc: Vec<&str> = Vec::new();
    for item in items {
        let projected = fixed + acc.iter().map(|s| s.len() + 1).sum::<usize>() + item.len();
        if !acc.is_empty() && projected > budget {
            frames.push(format!("{} :{}", msg.command, acc.join(" ")));
            acc.clear();
        }
        acc.push(item);
    }
    if !acc.is_empty() {
        frames.push(format!("{} :{}", msg.command, acc.join(" ")));
    }
    frames
}
