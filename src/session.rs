//! The per-server protocol session: a sans-IO core tying together the
//! capability, SASL, batch, redirect and out-queue engines around the
//! server model.
//!
//! The session performs no I/O. The caller (the Tokio layer, or a
//! test) feeds it decoded inbound lines and clock readings, and takes
//! back wire frames to write plus events for the UI:
//!
//! ```text
//! inbound:  receive_line() -> redirect intercept -> batch intercept
//!           -> dispatcher -> model update + events
//! outbound: send() -> splitter -> priority enqueue -> drain pass
//!           -> take_outgoing() -> socket
//! ```
//!
//! Drain passes run on every send and on each anti-flood tick;
//! `tick()` is the 1 Hz maintenance pass.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::batch::BatchEngine;
use crate::caps::{CapAction, CapConfig, CapEngine};
use crate::dispatch;
use crate::event::{DisplayLine, Event};
use crate::ignore::{IgnoreList, IgnorePolicy};
use crate::message::split::{split_message, split_multiline, MultilineLimits, SplitContext};
use crate::message::tags::Tag;
use crate::message::Message;
use crate::options::{NoEval, OptionEvaluator, ServerOptions};
use crate::outqueue::{OutQueue, Priority, QueuedMessage};
use crate::redirect::RedirectEngine;
use crate::sasl::{SaslCredentials, SaslFailPolicy, SaslSession};
use crate::server::ServerState;

/// Seconds between lag-check PINGs.
pub(crate) const LAG_CHECK_INTERVAL_SECS: i64 = 60;

/// Hard cap on one unterminated inbound line (tags included).
pub const MAX_IRC_LINE_LEN: usize = 8191;

/// Actions `tick()` asks the connection layer to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// The reconnect delay elapsed: dial again.
    Reconnect,
}

/// How the session wants the connection closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisconnectRequest {
    /// Schedule a reconnect afterwards.
    pub reconnect: bool,
}

/// Line-rewriting hook on the receive and send pipelines.
///
/// Inbound, the chain runs after the raw-in signal and before the
/// redirect/batch interceptors, so held batch lines are captured in
/// their rewritten form; outbound it runs right before a frame leaves
/// the queue. Returning `None` drops the line.
pub trait Modifier: Send {
    fn modify_in(&mut self, _server: &str, _command: &str, line: String) -> Option<String> {
        Some(line)
    }

    fn modify_out(&mut self, _server: &str, _command: &str, line: String) -> Option<String> {
        Some(line)
    }
}

/// Shutdown snapshot for an external orchestrator (upgrade/resume).
#[derive(Clone, Debug)]
pub struct ServerSnapshot {
    pub name: String,
    pub nick: Option<String>,
    pub is_connected: bool,
    pub channels: Vec<(String, Vec<String>)>,
    pub open_batches: Vec<String>,
    pub pending_redirects: Vec<String>,
}

/// Sans-IO protocol core for one server.
pub struct Session {
    pub opts: ServerOptions,
    pub state: ServerState,
    pub caps: CapEngine,
    pub batches: BatchEngine,
    pub redirects: RedirectEngine,
    pub ignore: IgnoreList,
    pub(crate) sasl: Option<SaslSession>,
    evaluator: Box<dyn OptionEvaluator>,
    cap_config: CapConfig,
    outq: OutQueue,
    wire_out: Vec<String>,
    events: Vec<Event>,
    disconnect_request: Option<DisconnectRequest>,
    monitor_sent: bool,
    recv_buffer: Vec<u8>,
    modifiers: Vec<Box<dyn Modifier>>,
}

impl Session {
    pub fn new(opts: ServerOptions) -> Self {
        Self::with_evaluator(opts, Box::new(NoEval))
    }

    /// Build a session with an external `${var}` evaluator.
    pub fn with_evaluator(opts: ServerOptions, evaluator: Box<dyn OptionEvaluator>) -> Self {
        let state = ServerState::new(&opts);
        let sasl_configured = !opts.sasl_username.is_empty();
        let cap_config = CapConfig::parse(&opts.capabilities, sasl_configured);
        Session {
            opts,
            state,
            caps: CapEngine::new(),
            batches: BatchEngine::new(),
            redirects: RedirectEngine::new(),
            ignore: IgnoreList::new(IgnorePolicy::Soft),
            sasl: None,
            evaluator,
            cap_config,
            outq: OutQueue::new(),
            wire_out: Vec::new(),
            events: Vec::new(),
            disconnect_request: None,
            monitor_sent: false,
            recv_buffer: Vec::new(),
            modifiers: Vec::new(),
        }
    }

    /// Register a line modifier; chains run in registration order.
    pub fn add_modifier(&mut self, modifier: Box<dyn Modifier>) {
        self.modifiers.push(modifier);
    }

    /// Evaluate an option value through the external evaluator.
    pub fn evaluate(&self, value: &str) -> String {
        self.evaluator.evaluate(value)
    }

    pub(crate) fn cap_config(&self) -> CapConfig {
        self.cap_config.clone()
    }

    /// SASL credentials from the (evaluated) options.
    pub(crate) fn sasl_credentials(&self) -> SaslCredentials {
        SaslCredentials {
            username: self.evaluate(&self.opts.sasl_username),
            password: self.evaluate(&self.opts.sasl_password),
            key_pem: if self.opts.sasl_key.is_empty() {
                None
            } else {
                Some(self.opts.sasl_key.clone())
            },
        }
    }

    // ------------------------------------------------------------------
    // events
    // ------------------------------------------------------------------

    pub(crate) fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub(crate) fn display(&mut self, line: DisplayLine) {
        self.events.push(Event::Display(line));
    }

    /// Take the events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Take the wire frames ready to write.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.wire_out)
    }

    /// The connection layer consumes a pending disconnect wish
    /// (SASL failure policy, nick exhaustion).
    pub fn take_disconnect_request(&mut self) -> Option<DisconnectRequest> {
        self.disconnect_request.take()
    }

    pub(crate) fn request_disconnect(&mut self, reconnect: bool) {
        self.disconnect_request = Some(DisconnectRequest { reconnect });
    }

    // ------------------------------------------------------------------
    // connection lifecycle
    // ------------------------------------------------------------------

    /// The socket is up: run the login sequence
    /// (PASS, CAP LS 302, NICK, USER).
    pub fn on_socket_connected(&mut self, now: DateTime<Utc>, tls: bool) {
        self.state.tls_connected = tls;
        self.state.disconnected = false;
        self.state.nick_first_tried = Some(0);
        self.state.nick_alternate_number = None;
        self.caps.clear();
        let sasl_configured = !self.opts.sasl_username.is_empty();
        self.cap_config = CapConfig::parse(&self.opts.capabilities, sasl_configured);

        let password = self.evaluate(&self.opts.password);
        if !password.is_empty() {
            self.send(Some(Priority::Immediate), &format!("PASS {}", password), now);
        }
        self.send(Some(Priority::Immediate), "CAP LS 302", now);

        let nicks = self.nick_list_evaluated();
        let nick = nicks.first().cloned().unwrap_or_else(|| "nick".to_string());
        self.state.nick = Some(nick.clone());
        let username = self.evaluate(&self.opts.username);
        let username = if username.is_empty() { nick.clone() } else { username };
        let realname = self.evaluate(&self.opts.realname);
        let realname = if realname.is_empty() { nick.clone() } else { realname };
        self.send(Some(Priority::Immediate), &format!("NICK {}", nick), now);
        self.send(
            Some(Priority::Immediate),
            &format!("USER {} 0 * :{}", username, realname),
            now,
        );
    }

    pub(crate) fn nick_list_evaluated(&self) -> Vec<String> {
        self.evaluate(&self.opts.nicks)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The socket closed. Resets connection-scoped state and, unless
    /// `manual` or autoreconnect is off, schedules the growing-backoff
    /// reconnect.
    pub fn on_disconnected(&mut self, now: DateTime<Utc>, reason: &str, manual: bool) {
        self.state.reset_connection_state();
        self.caps.clear();
        self.batches.clear();
        self.redirects.clear();
        self.outq.clear();
        self.sasl = None;
        self.monitor_sent = false;
        self.state.disconnected = manual;

        if !manual && self.opts.autoreconnect {
            self.schedule_reconnect(now);
        } else {
            self.state.reconnect_start = None;
        }
        self.push_event(Event::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Growing backoff: start at `autoreconnect_delay`, multiply by
    /// the growth factor on each retry, cap at the configured maximum.
    pub fn schedule_reconnect(&mut self, now: DateTime<Utc>) {
        if self.state.reconnect_delay == 0 {
            self.state.reconnect_delay = self.opts.autoreconnect_delay.max(1);
        } else {
            self.state.reconnect_delay = self
                .state
                .reconnect_delay
                .saturating_mul(self.opts.autoreconnect_delay_growing.max(1));
        }
        if self.opts.autoreconnect_delay_max > 0
            && self.state.reconnect_delay > self.opts.autoreconnect_delay_max
        {
            self.state.reconnect_delay = self.opts.autoreconnect_delay_max;
        }
        self.state.reconnect_start = Some(now);
    }

    /// Registration succeeded: the backoff resets.
    pub(crate) fn reset_reconnect(&mut self) {
        self.state.reconnect_delay = 0;
        self.state.reconnect_start = None;
    }

    // ------------------------------------------------------------------
    // inbound pipeline
    // ------------------------------------------------------------------

    /// Feed raw socket bytes: frames lines on CR/LF, decodes each and
    /// runs the line pipeline. A bare CR discards the buffered prefix;
    /// a bare LF terminates a line.
    pub fn receive_bytes(&mut self, now: DateTime<Utc>, data: &[u8]) {
        self.recv_buffer.extend_from_slice(data);
        if self.recv_buffer.len() > MAX_IRC_LINE_LEN
            && !self.recv_buffer.iter().any(|&b| b == b'\r' || b == b'\n')
        {
            warn!(
                length = self.recv_buffer.len(),
                "discarding unterminated line beyond {} bytes", MAX_IRC_LINE_LEN
            );
            self.recv_buffer.clear();
            return;
        }
        loop {
            let Some(pos) = self
                .recv_buffer
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
            else {
                break;
            };
            if self.recv_buffer[pos] == b'\r' && pos + 1 == self.recv_buffer.len() {
                // CR at the buffer end: wait to see whether LF follows
                break;
            }
            let terminator = self.recv_buffer[pos];
            let mut line: Vec<u8> = self.recv_buffer.drain(..=pos).collect();
            line.pop();
            if terminator == b'\r' {
                if self.recv_buffer.first() == Some(&b'\n') {
                    self.recv_buffer.remove(0);
                } else {
                    // bare CR: sanitize by discarding the buffered prefix
                    debug!("discarding line with bare CR");
                    continue;
                }
            }
            if line.is_empty() {
                continue;
            }
            let decoded = self.decode_inbound(&line);
            self.receive_line(now, &decoded);
        }
    }

    /// Decode one framed line per the `charset_message` scope. Valid
    /// UTF-8 passes through; anything else falls back to Windows-1252
    /// for the configured portion of the message.
    fn decode_inbound(&self, line: &[u8]) -> String {
        if let Ok(s) = std::str::from_utf8(line) {
            return s.to_string();
        }
        let decode = |bytes: &[u8]| -> String {
            let (decoded, _, _) = encoding::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        };
        match self.opts.charset_message {
            crate::options::CharsetScope::Message => decode(line),
            crate::options::CharsetScope::Channel => {
                let split = byte_offset_after_command(line);
                format!(
                    "{}{}",
                    String::from_utf8_lossy(&line[..split]),
                    decode(&line[split..])
                )
            }
            crate::options::CharsetScope::Text => {
                let split = line
                    .windows(2)
                    .position(|w| w == b" :")
                    .map(|i| i + 2)
                    .unwrap_or_else(|| byte_offset_after_command(line));
                format!(
                    "{}{}",
                    String::from_utf8_lossy(&line[..split]),
                    decode(&line[split..])
                )
            }
        }
    }

    /// Feed one decoded inbound line (CRLF stripped).
    pub fn receive_line(&mut self, now: DateTime<Utc>, raw: &str) {
        if raw.is_empty() {
            return;
        }

        let mut msg = match Message::parse(raw) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, raw, "dropping malformed inbound line");
                return;
            }
        };
        let mut command = msg.command_upper();

        self.push_event(Event::RawIn {
            command: command.clone(),
            raw: raw.to_string(),
        });

        // modifier chain: hooks may rewrite or drop the line
        let mut line = raw.to_string();
        if !self.modifiers.is_empty() {
            let server = self.state.name.clone();
            let mut modifiers = std::mem::take(&mut self.modifiers);
            let mut dropped = false;
            for modifier in &mut modifiers {
                match modifier.modify_in(&server, &command, line) {
                    Some(next) => line = next,
                    None => {
                        line = String::new();
                        dropped = true;
                        break;
                    }
                }
            }
            self.modifiers = modifiers;
            if dropped {
                return;
            }
            if line != raw {
                match Message::parse(&line) {
                    Ok(rewritten) => {
                        msg = rewritten;
                        command = msg.command_upper();
                    }
                    Err(err) => {
                        warn!(%err, "modifier produced an unparsable line");
                        return;
                    }
                }
            }
        }

        // redirects capture before anything is displayed
        let (eaten, completions) = self.redirects.intercept(&msg, &line);
        for completion in completions {
            self.push_event(Event::Redirect(completion));
        }
        if eaten {
            return;
        }

        // batch interception: hold tagged lines while their batch is open
        if command != "BATCH" && self.caps.enabled("batch") {
            if let Some(reference) = msg.tag_value("batch") {
                let reference = reference.to_string();
                if self.batches.add_message(&reference, &line) {
                    return;
                }
            }
        }

        let line = line;
        self.dispatch_message(msg, now, &line);
    }

    /// Dispatch one message (fresh or replayed from a batch).
    pub(crate) fn dispatch_message(&mut self, msg: Message, now: DateTime<Utc>, raw: &str) {
        let command = msg.command_upper();

        let ignored = match msg.source_nick() {
            Some(nick) => {
                let source = match msg.prefix.as_ref().and_then(|p| p.address()) {
                    Some(addr) => format!("{}!{}", nick, addr),
                    None => nick.to_string(),
                };
                let channel = msg
                    .param(0)
                    .filter(|t| self.state.is_channel_name(t))
                    .map(str::to_string);
                self.ignore
                    .matches(&source, &self.state.name, channel.as_deref())
            }
            None => false,
        };
        if ignored && self.ignore.policy() == IgnorePolicy::Hard {
            // hard ignore: drop before display; raw-in already fired
            return;
        }
        self.push_event(Event::In {
            command: command.clone(),
            raw: raw.to_string(),
        });

        let ctx = dispatch::Ctx::new(&msg, now, raw, ignored);
        let flow = dispatch::dispatch(self, &ctx);

        if flow != dispatch::Flow::Eat {
            self.push_event(Event::In2 {
                command,
                raw: raw.to_string(),
            });
        }
    }

    /// Replay messages released by a closed batch.
    pub(crate) fn replay_batch_messages(&mut self, messages: Vec<Message>, now: DateTime<Utc>) {
        for msg in messages {
            let raw = msg.to_string();
            self.push_event(Event::RawIn {
                command: msg.command_upper(),
                raw: raw.clone(),
            });
            self.dispatch_message(msg, now, &raw);
        }
    }

    // ------------------------------------------------------------------
    // outbound pipeline
    // ------------------------------------------------------------------

    fn split_context(&self) -> SplitContext {
        SplitContext {
            max_length: if self.opts.split_msg_max_length > 0 {
                self.opts
                    .split_msg_max_length
                    .min(self.state.msg_max_length)
            } else {
                self.state.msg_max_length
            },
            overhead: self.state.split_overhead(),
        }
    }

    /// Send a logical command line. Embedded newlines produce a
    /// `draft/multiline` batch when the capability is enabled, or one
    /// frame per line otherwise. Returns the enqueued wire frames.
    pub fn send(
        &mut self,
        priority: Option<Priority>,
        text: &str,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        self.send_with_tags(priority, &[], text, now)
    }

    /// [`Session::send`] with tags re-emitted in the outbound signal.
    pub fn send_with_tags(
        &mut self,
        priority: Option<Priority>,
        tags: &[Tag],
        text: &str,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        // before 001, everything is effectively immediate
        let priority = if !self.state.is_connected {
            Priority::Immediate
        } else {
            priority.unwrap_or(Priority::High)
        };

        self.push_event(Event::Out1 {
            raw: text.to_string(),
        });

        let ctx = self.split_context();
        let mut frames = Vec::new();
        if text.contains('\n') {
            frames.extend(self.split_multiline_text(text, &ctx));
        } else {
            match Message::parse(text) {
                Ok(msg) => frames.extend(split_message(&msg, &ctx)),
                Err(err) => {
                    debug!(%err, text, "sending unparsable command line as-is");
                    frames.push(text.to_string());
                }
            }
        }

        for frame in &frames {
            self.record_join_intent(frame, now);
            let mut queued = QueuedMessage::new(frame);
            queued.tags = tags.to_vec();
            self.outq.push(priority, queued);
        }
        self.drain_pass(now);
        frames
    }

    /// Remember outbound JOINs (folded channel -> time, and any key)
    /// so 470 forwards and autorejoin keep working.
    fn record_join_intent(&mut self, frame: &str, now: DateTime<Utc>) {
        let Some(rest) = frame.strip_prefix("JOIN ") else {
            return;
        };
        let mut parts = rest.split_whitespace();
        let channels: Vec<&str> = parts.next().unwrap_or("").split(',').collect();
        let keys: Vec<&str> = parts
            .next()
            .map(|k| k.split(',').collect())
            .unwrap_or_default();
        for (i, channel) in channels.iter().enumerate() {
            if channel.is_empty() {
                continue;
            }
            let folded = self.state.fold(channel);
            self.state.join_manual.insert(folded.clone(), now);
            if let Some(key) = keys.get(i) {
                self.state
                    .join_channel_key
                    .insert(folded, key.to_string());
            }
        }
    }

    fn split_multiline_text(&mut self, text: &str, ctx: &SplitContext) -> Vec<String> {
        let parsed = Message::parse(text.replace('\n', " ").as_str()).ok();
        let (command, target) = match &parsed {
            Some(msg) if matches!(msg.command_upper().as_str(), "PRIVMSG" | "NOTICE") => {
                (msg.command_upper(), msg.param(0).unwrap_or("").to_string())
            }
            _ => {
                // not a text command: send line by line
                return text
                    .split('\n')
                    .filter(|l| !l.is_empty())
                    .flat_map(|line| match Message::parse(line) {
                        Ok(msg) => split_message(&msg, ctx),
                        Err(_) => vec![line.to_string()],
                    })
                    .collect();
            }
        };

        if self.caps.enabled("draft/multiline") {
            let limits = self
                .caps
                .ls_value("draft/multiline")
                .map(MultilineLimits::parse)
                .unwrap_or_default();
            let reference = crate::batch::generate_batch_ref();
            let body = text
                .split_once(':')
                .map(|(_, body)| body)
                .unwrap_or(text)
                .to_string();
            split_multiline(&command, &target, &body, &limits, &reference, ctx)
        } else {
            let body_start = text.find(':').map(|i| i + 1).unwrap_or(0);
            text[body_start..]
                .split('\n')
                .map(|line| format!("{} {} :{}", command, target, line))
                .flat_map(|line| match Message::parse(&line) {
                    Ok(msg) => split_message(&msg, ctx),
                    Err(_) => vec![line],
                })
                .collect()
        }
    }

    /// One anti-flood drain pass: immediate fully, then one high/low
    /// frame; everything when flood control is off.
    pub fn drain_pass(&mut self, now: DateTime<Utc>) {
        let anti_flood = self.opts.anti_flood > 0;
        let echo = self.caps.enabled("echo-message");
        for mut queued in self.outq.drain(anti_flood) {
            // outbound modifier chain
            if !self.modifiers.is_empty() {
                let server = self.state.name.clone();
                let command = queued
                    .message
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_ascii_uppercase();
                let mut modifiers = std::mem::take(&mut self.modifiers);
                let mut dropped = false;
                let mut line = queued.message.clone();
                for modifier in &mut modifiers {
                    match modifier.modify_out(&server, &command, line) {
                        Some(next) => line = next,
                        None => {
                            line = String::new();
                            dropped = true;
                            break;
                        }
                    }
                }
                self.modifiers = modifiers;
                if dropped {
                    continue;
                }
                if line != queued.message {
                    queued.modified = true;
                    queued.message = line;
                }
            }

            self.redirects.arm(&queued.message, now);
            if echo {
                if let Ok(msg) = Message::parse(&queued.message) {
                    if matches!(msg.command_upper().as_str(), "PRIVMSG" | "NOTICE" | "TAGMSG") {
                        self.state
                            .echo_msg_record(&msg.to_wire_without_source(), now);
                    }
                }
            }
            self.push_event(Event::Out {
                raw: queued.message.clone(),
            });
            if !queued.tags.is_empty() {
                self.push_event(Event::OutTags {
                    raw: queued.message.clone(),
                    tags: crate::message::tags::format_tag_string(&queued.tags),
                });
            }
            self.wire_out.push(queued.message);
        }
    }

    /// Frames still waiting in the out-queues.
    pub fn queued_len(&self) -> usize {
        self.outq.len()
    }

    // ------------------------------------------------------------------
    // periodic maintenance (1 Hz)
    // ------------------------------------------------------------------

    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<TickAction> {
        let mut actions = Vec::new();

        // reconnect trigger
        if !self.state.is_connected && !self.state.disconnected {
            if let Some(start) = self.state.reconnect_start {
                if now - start >= Duration::seconds(self.state.reconnect_delay) {
                    self.state.reconnect_start = None;
                    actions.push(TickAction::Reconnect);
                }
            }
        }

        if self.state.is_connected {
            self.tick_lag(now);
            self.tick_monitor(now);
            self.tick_away_check(now);
            self.tick_deferred(now);
        }

        // SASL deadline
        if let Some(sasl) = &self.sasl {
            if sasl.timed_out(now) {
                self.abort_sasl(now, "timeout");
            }
        }

        for completion in self.redirects.check_timeouts(now) {
            self.push_event(Event::Redirect(completion));
        }
        self.state.purge_ttl_tables(now);
        let purged = self.batches.purge_stale(now);
        if purged > 0 {
            debug!(purged, "collected stale batches");
        }

        // flood pacing: a tick is also a drain opportunity
        if !self.outq.is_empty() {
            self.drain_pass(now);
        }

        actions
    }

    fn tick_lag(&mut self, now: DateTime<Utc>) {
        if self.state.lag_check_time.is_some() {
            return;
        }
        let due = match self.state.lag_next_check {
            Some(due) => now >= due,
            None => true,
        };
        if due {
            self.state.lag_check_time = Some(now);
            let payload = now.timestamp_millis();
            self.send(Some(Priority::Immediate), &format!("PING :{}", payload), now);
        }
    }

    fn tick_monitor(&mut self, now: DateTime<Utc>) {
        if self.monitor_sent || self.state.notify.is_empty() {
            return;
        }
        let due = self
            .state
            .monitor_due
            .map(|due| now >= due)
            .unwrap_or(false);
        if !due {
            return;
        }
        self.monitor_sent = true;
        self.state.monitor_due = None;
        if self.state.monitor_limit.is_some() {
            let nicks: Vec<String> = self.state.notify.iter().map(|n| n.nick.clone()).collect();
            self.send(
                Some(Priority::Low),
                &format!("MONITOR + {}", nicks.join(",")),
                now,
            );
        } else {
            let nicks: Vec<String> = self.state.notify.iter().map(|n| n.nick.clone()).collect();
            self.send(Some(Priority::Low), &format!("ISON :{}", nicks.join(" ")), now);
        }
    }

    fn tick_away_check(&mut self, now: DateTime<Utc>) {
        if self.opts.away_check <= 0 {
            return;
        }
        let due = self
            .state
            .away_check_due
            .map(|due| now >= due)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.state.away_check_due =
            Some(now + Duration::seconds(self.opts.away_check * 60));
        let max = self.opts.away_check_max_nicks;
        let channels: Vec<String> = self
            .state
            .channels
            .iter()
            .filter(|c| {
                matches!(c.channel_type, crate::server::ChannelType::Channel)
                    && !c.part
                    && (max == 0 || c.nick_count() <= max)
            })
            .map(|c| c.name.clone())
            .collect();
        for channel in channels {
            // WHOX gives away + account in one reply where supported
            self.send(Some(Priority::Low), &format!("WHO {} %cnfar", channel), now);
        }
    }

    fn tick_deferred(&mut self, now: DateTime<Utc>) {
        if let Some(due) = self.state.command_due {
            if now >= due {
                self.state.command_due = None;
                let command = self.evaluate(&self.opts.command);
                for line in command.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                    self.send(Some(Priority::High), line, now);
                }
            }
        }
        if let Some(due) = self.state.autojoin_due {
            if now >= due {
                self.state.autojoin_due = None;
                let autojoin = self.evaluate(&self.opts.autojoin);
                if !autojoin.is_empty() {
                    self.send(Some(Priority::High), &format!("JOIN {}", autojoin), now);
                }
            }
        }
        // autorejoin after kick
        let mut rejoins: Vec<String> = Vec::new();
        for channel in &mut self.state.channels {
            if let Some(due) = channel.rejoin_due {
                if now >= due {
                    channel.rejoin_due = None;
                    rejoins.push(channel.name.clone());
                }
            }
        }
        for name in rejoins {
            // the parsed +k key survives the 60-second join bookkeeping
            let key = self
                .state
                .find_channel(&name)
                .and_then(|c| c.key.clone())
                .or_else(|| {
                    self.state
                        .join_channel_key
                        .get(&self.state.fold(&name))
                        .cloned()
                });
            let line = match key {
                Some(key) => format!("JOIN {} {}", name, key),
                None => format!("JOIN {}", name),
            };
            self.send(Some(Priority::High), &line, now);
        }
    }

    // ------------------------------------------------------------------
    // SASL plumbing shared by dispatch handlers
    // ------------------------------------------------------------------

    pub(crate) fn start_sasl(&mut self, now: DateTime<Utc>) {
        let mechanism = crate::sasl::SaslMechanism::parse(&self.opts.sasl_mechanism)
            .unwrap_or(crate::sasl::SaslMechanism::Plain);
        let credentials = self.sasl_credentials();
        match SaslSession::start(mechanism, &credentials, now, self.opts.sasl_timeout) {
            Ok(session) => {
                self.sasl = Some(session);
                self.send(
                    Some(Priority::Immediate),
                    &format!("AUTHENTICATE {}", mechanism.as_str()),
                    now,
                );
            }
            Err(err) => {
                warn!(%err, "cannot start SASL");
                self.display(DisplayLine::server(format!("sasl: {}", err)));
                self.sasl_failed(now, &err.to_string());
            }
        }
    }

    pub(crate) fn abort_sasl(&mut self, now: DateTime<Utc>, reason: &str) {
        if self.sasl.is_some() {
            self.send(Some(Priority::Immediate), "AUTHENTICATE *", now);
        }
        self.sasl_failed(now, reason);
    }

    /// Apply the `sasl_fail` policy and close the CAP bracket.
    pub(crate) fn sasl_failed(&mut self, now: DateTime<Utc>, reason: &str) {
        if let Some(sasl) = &mut self.sasl {
            sasl.finish();
        }
        self.sasl = None;
        self.push_event(Event::SaslOutcome {
            success: false,
            message: reason.to_string(),
        });
        match self.opts.sasl_fail {
            SaslFailPolicy::Continue => {
                for action in self.caps.sasl_finished() {
                    self.apply_cap_action(action, now);
                }
            }
            SaslFailPolicy::Reconnect => self.request_disconnect(true),
            SaslFailPolicy::Disconnect => self.request_disconnect(false),
        }
    }

    pub(crate) fn sasl_succeeded(&mut self, now: DateTime<Utc>, message: &str) {
        if let Some(sasl) = &mut self.sasl {
            sasl.finish();
        }
        self.sasl = None;
        self.push_event(Event::SaslOutcome {
            success: true,
            message: message.to_string(),
        });
        for action in self.caps.sasl_finished() {
            self.apply_cap_action(action, now);
        }
    }

    pub(crate) fn apply_cap_action(&mut self, action: CapAction, now: DateTime<Utc>) {
        match action {
            CapAction::Request(caps) => {
                self.send(Some(Priority::Immediate), &format!("CAP REQ :{}", caps), now);
            }
            CapAction::End => {
                self.send(Some(Priority::Immediate), "CAP END", now);
            }
            CapAction::StartSasl => self.start_sasl(now),
        }
    }

    // ------------------------------------------------------------------
    // snapshot
    // ------------------------------------------------------------------

    /// State snapshot for upgrade/resume.
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            name: self.state.name.clone(),
            nick: self.state.nick.clone(),
            is_connected: self.state.is_connected,
            channels: self
                .state
                .channels
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        c.nicks().iter().map(|n| n.name.clone()).collect(),
                    )
                })
                .collect(),
            open_batches: self.batches.iter().map(|b| b.reference.clone()).collect(),
            pending_redirects: self.redirects.pending_patterns(),
        }
    }
}

/// Byte offset just past the command token (skipping tags and prefix),
/// for scoped charset decoding.
fn byte_offset_after_command(line: &[u8]) -> usize {
    let mut pos = 0;
    let skip_token = |line: &[u8], mut pos: usize| -> usize {
        while pos < line.len() && line[pos] != b' ' {
            pos += 1;
        }
        while pos < line.len() && line[pos] == b' ' {
            pos += 1;
        }
        pos
    };
    if line.first() == Some(&b'@') {
        pos = skip_token(line, pos);
    }
    if line.get(pos) == Some(&b':') {
        pos = skip_token(line, pos);
    }
    skip_token(line, pos)
}
