//! Command/response redirection: transient capture of the multi-line
//! server response to one outbound command.
//!
//! A caller creates a redirect from a named pattern (plus an optional
//! argument filter and timeout), then sends the command. The out-queue
//! arms the oldest unarmed matching redirect against the outgoing
//! command; from then on, inbound messages whose command is in the
//! pattern's start/stop/error sets (and which match the argument
//! filter) are captured instead of displayed. The stop set closes the
//! capture and the collected lines are handed back; the error set
//! closes it with an error state; a deadline closes it with `Timeout`.
//!
//! The receive pipeline consults this engine before the dispatcher.

use chrono::{DateTime, Duration, Utc};

use crate::message::Message;
use crate::util::mask_match;

/// A built-in capture pattern.
#[derive(Clone, Copy, Debug)]
pub struct RedirectPattern {
    /// Pattern name, as given by callers.
    pub name: &'static str,
    /// Outbound command this pattern answers.
    pub command: &'static str,
    /// Default timeout in seconds.
    pub default_timeout: i64,
    /// Commands that start (and continue) the capture. Empty means the
    /// first stop/error match completes the capture immediately.
    pub cmd_start: &'static [&'static str],
    /// Commands that close the capture successfully.
    pub cmd_stop: &'static [&'static str],
    /// Commands that close the capture with an error.
    pub cmd_error: &'static [&'static str],
}

/// Built-in patterns for the common query commands.
pub const PATTERNS: &[RedirectPattern] = &[
    RedirectPattern {
        name: "ison",
        command: "ISON",
        default_timeout: 30,
        cmd_start: &[],
        cmd_stop: &["303"],
        cmd_error: &["401"],
    },
    RedirectPattern {
        name: "list",
        command: "LIST",
        default_timeout: 90,
        cmd_start: &["321", "322"],
        cmd_stop: &["323"],
        cmd_error: &["416"],
    },
    RedirectPattern {
        name: "mode_channel",
        command: "MODE",
        default_timeout: 30,
        cmd_start: &[],
        cmd_stop: &["324"],
        cmd_error: &["403", "442", "479"],
    },
    RedirectPattern {
        name: "mode_user",
        command: "MODE",
        default_timeout: 30,
        cmd_start: &[],
        cmd_stop: &["221"],
        cmd_error: &["403", "501", "502"],
    },
    RedirectPattern {
        name: "names",
        command: "NAMES",
        default_timeout: 30,
        cmd_start: &["353"],
        cmd_stop: &["366"],
        cmd_error: &["403"],
    },
    RedirectPattern {
        name: "ping",
        command: "PING",
        default_timeout: 60,
        cmd_start: &[],
        cmd_stop: &["PONG"],
        cmd_error: &["402"],
    },
    RedirectPattern {
        name: "time",
        command: "TIME",
        default_timeout: 60,
        cmd_start: &[],
        cmd_stop: &["391"],
        cmd_error: &["402"],
    },
    RedirectPattern {
        name: "topic",
        command: "TOPIC",
        default_timeout: 30,
        cmd_start: &["332", "333"],
        cmd_stop: &["331", "333"],
        cmd_error: &["403", "442"],
    },
    RedirectPattern {
        name: "userhost",
        command: "USERHOST",
        default_timeout: 30,
        cmd_start: &[],
        cmd_stop: &["302"],
        cmd_error: &["401"],
    },
    RedirectPattern {
        name: "who",
        command: "WHO",
        default_timeout: 90,
        cmd_start: &["352", "354"],
        cmd_stop: &["315"],
        cmd_error: &["401"],
    },
    RedirectPattern {
        name: "whois",
        command: "WHOIS",
        default_timeout: 60,
        cmd_start: &[
            "223", "264", "275", "276", "301", "307", "310", "311", "312", "313", "317",
            "319", "320", "326", "327", "330", "335", "338", "378", "379", "671",
        ],
        cmd_stop: &["318"],
        cmd_error: &["401", "402", "431", "461"],
    },
    RedirectPattern {
        name: "whowas",
        command: "WHOWAS",
        default_timeout: 60,
        cmd_start: &["314", "312"],
        cmd_stop: &["369"],
        cmd_error: &["406", "431"],
    },
];

/// Look up a built-in pattern by name.
pub fn find_pattern(name: &str) -> Option<&'static RedirectPattern> {
    PATTERNS.iter().find(|p| p.name == name)
}

/// Redirect lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectState {
    /// Created or armed, no matching response yet.
    Pending,
    /// Capture in progress.
    Active,
    /// Closed by a stop command.
    Done,
    /// Closed by an error command.
    Error,
    /// Closed by the deadline.
    Timeout,
}

/// One live redirect.
#[derive(Clone, Debug)]
pub struct Redirect {
    /// Caller correlation id.
    pub id: u64,
    /// Pattern name.
    pub pattern: String,
    /// Outbound command word this redirect waits for.
    pub command: String,
    /// Optional mask matched against response arguments
    /// (`*` wildcards allowed).
    pub arg_pattern: Option<String>,
    /// Seconds from arming to the deadline.
    pub timeout_secs: i64,
    /// Set when the outbound command is sent.
    pub start_time: Option<DateTime<Utc>>,
    /// Current state.
    pub state: RedirectState,
    /// Captured raw lines, in arrival order.
    pub lines: Vec<String>,
    cmd_start: Vec<String>,
    cmd_stop: Vec<String>,
    cmd_error: Vec<String>,
}

/// Delivered when a redirect closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectCompletion {
    pub id: u64,
    pub pattern: String,
    pub state: CompletionState,
    pub lines: Vec<String>,
}

/// Terminal redirect states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    Done,
    Error,
    Timeout,
}

/// Per-server redirect table.
#[derive(Clone, Debug, Default)]
pub struct RedirectEngine {
    redirects: Vec<Redirect>,
    next_id: u64,
}

impl RedirectEngine {
    pub fn new() -> Self {
        RedirectEngine::default()
    }

    /// Create a redirect from a built-in pattern. Returns the caller
    /// correlation id, or `None` for an unknown pattern.
    pub fn create(
        &mut self,
        pattern_name: &str,
        arg_pattern: Option<&str>,
        timeout_secs: Option<i64>,
    ) -> Option<u64> {
        let pattern = find_pattern(pattern_name)?;
        self.next_id += 1;
        let id = self.next_id;
        self.redirects.push(Redirect {
            id,
            pattern: pattern.name.to_string(),
            command: pattern.command.to_string(),
            arg_pattern: arg_pattern.map(str::to_string),
            timeout_secs: timeout_secs.unwrap_or(pattern.default_timeout).max(1),
            start_time: None,
            state: RedirectState::Pending,
            lines: Vec::new(),
            cmd_start: pattern.cmd_start.iter().map(|s| s.to_string()).collect(),
            cmd_stop: pattern.cmd_stop.iter().map(|s| s.to_string()).collect(),
            cmd_error: pattern.cmd_error.iter().map(|s| s.to_string()).collect(),
        });
        Some(id)
    }

    /// Number of redirects not yet completed.
    pub fn len(&self) -> usize {
        self.redirects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redirects.is_empty()
    }

    /// Pattern names of pending redirects (snapshot support).
    pub fn pending_patterns(&self) -> Vec<String> {
        self.redirects.iter().map(|r| r.pattern.clone()).collect()
    }

    /// Drop all redirects (connection closed).
    pub fn clear(&mut self) {
        self.redirects.clear();
    }

    /// Bind the oldest unarmed matching redirect to an outgoing
    /// command line. Called by the out-queue on every send.
    pub fn arm(&mut self, outbound: &str, now: DateTime<Utc>) {
        let command_word = outbound
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if let Some(redirect) = self
            .redirects
            .iter_mut()
            .find(|r| r.start_time.is_none() && r.command == command_word)
        {
            redirect.start_time = Some(now);
        }
    }

    /// Consult the engine for one inbound message, before dispatch.
    /// Returns whether the message was eaten, plus any completions.
    pub fn intercept(&mut self, msg: &Message, raw: &str) -> (bool, Vec<RedirectCompletion>) {
        let command = msg.command_upper();
        let mut eaten = false;
        let mut completions = Vec::new();

        for redirect in &mut self.redirects {
            if redirect.start_time.is_none()
                || !matches!(redirect.state, RedirectState::Pending | RedirectState::Active)
            {
                continue;
            }

            let in_start = redirect.cmd_start.iter().any(|c| *c == command);
            let in_stop = redirect.cmd_stop.iter().any(|c| *c == command);
            let in_error = redirect.cmd_error.iter().any(|c| *c == command);
            if !in_start && !in_stop && !in_error {
                continue;
            }
            if !arg_matches(redirect.arg_pattern.as_deref(), msg) {
                continue;
            }

            redirect.lines.push(raw.to_string());
            eaten = true;
            if in_error {
                redirect.state = RedirectState::Error;
                completions.push(completion_of(redirect, CompletionState::Error));
            } else if in_stop {
                redirect.state = RedirectState::Done;
                completions.push(completion_of(redirect, CompletionState::Done));
            } else {
                redirect.state = RedirectState::Active;
            }
            // one message feeds at most one redirect
            break;
        }

        self.redirects.retain(|r| {
            !matches!(r.state, RedirectState::Done | RedirectState::Error)
        });
        (eaten, completions)
    }

    /// Close overdue redirects. Lines captured so far are delivered
    /// with state `Timeout`.
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) -> Vec<RedirectCompletion> {
        let mut completions = Vec::new();
        for redirect in &mut self.redirects {
            if let Some(started) = redirect.start_time {
                if matches!(redirect.state, RedirectState::Pending | RedirectState::Active)
                    && now - started >= Duration::seconds(redirect.timeout_secs)
                {
                    redirect.state = RedirectState::Timeout;
                    completions.push(completion_of(redirect, CompletionState::Timeout));
                }
            }
        }
        self.redirects
            .retain(|r| !matches!(r.state, RedirectState::Timeout));
        completions
    }
}

fn completion_of(redirect: &Redirect, state: CompletionState) -> RedirectCompletion {
    RedirectCompletion {
        id: redirect.id,
        pattern: redirect.pattern.clone(),
        state,
        lines: redirect.lines.clone(),
    }
}

/// Match the redirect's argument mask against the response arguments.
/// Numerics carry the client nick first, so the subject is searched in
/// every parameter.
fn arg_matches(pattern: Option<&str>, msg: &Message) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    msg.params.iter().any(|p| {
        p.split(',')
            .any(|item| mask_match(pattern, item))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(raw: &str) -> Message {
        Message::parse(raw).unwrap()
    }

    #[test]
    fn test_whois_capture_flow() {
        let mut engine = RedirectEngine::new();
        let id = engine.create("whois", Some("alice"), None).unwrap();
        let now = Utc::now();
        engine.arm("WHOIS alice", now);

        let lines = [
            ":irc 311 me alice ident host * :Alice",
            ":irc 312 me alice irc.example.org :Server",
            ":irc 319 me alice :#chan1 #chan2",
        ];
        for raw in lines {
            let (eaten, completions) = engine.intercept(&msg(raw), raw);
            assert!(eaten, "expected {} to be captured", raw);
            assert!(completions.is_empty());
        }

        let stop = ":irc 318 me alice :End of /WHOIS list.";
        let (eaten, completions) = engine.intercept(&msg(stop), stop);
        assert!(eaten);
        assert_eq!(completions.len(), 1);
        let done = &completions[0];
        assert_eq!(done.id, id);
        assert_eq!(done.state, CompletionState::Done);
        assert_eq!(done.lines.len(), 4);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_unrelated_messages_pass_through() {
        let mut engine = RedirectEngine::new();
        engine.create("whois", Some("alice"), None).unwrap();
        engine.arm("WHOIS alice", Utc::now());

        let raw = ":bob!u@h PRIVMSG #c :hello";
        let (eaten, _) = engine.intercept(&msg(raw), raw);
        assert!(!eaten);

        // whois reply about someone else also passes
        let other = ":irc 311 me bob ident host * :Bob";
        let (eaten, _) = engine.intercept(&msg(other), other);
        assert!(!eaten);
    }

    #[test]
    fn test_unarmed_redirect_captures_nothing() {
        let mut engine = RedirectEngine::new();
        engine.create("whois", None, None).unwrap();
        let raw = ":irc 311 me alice ident host * :Alice";
        let (eaten, _) = engine.intercept(&msg(raw), raw);
        assert!(!eaten);
    }

    #[test]
    fn test_arm_matches_command_word() {
        let mut engine = RedirectEngine::new();
        engine.create("whois", None, None).unwrap();
        engine.arm("PRIVMSG #c :hi", Utc::now());
        let raw = ":irc 311 me alice ident host * :Alice";
        let (eaten, _) = engine.intercept(&msg(raw), raw);
        assert!(!eaten, "PRIVMSG must not arm a WHOIS redirect");

        engine.arm("WHOIS alice", Utc::now());
        let (eaten, _) = engine.intercept(&msg(raw), raw);
        assert!(eaten);
    }

    #[test]
    fn test_error_completion() {
        let mut engine = RedirectEngine::new();
        let id = engine.create("whois", Some("ghost"), None).unwrap();
        engine.arm("WHOIS ghost", Utc::now());
        let raw = ":irc 401 me ghost :No such nick";
        let (eaten, completions) = engine.intercept(&msg(raw), raw);
        assert!(eaten);
        assert_eq!(completions[0].id, id);
        assert_eq!(completions[0].state, CompletionState::Error);
    }

    #[test]
    fn test_empty_start_set_completes_on_stop() {
        let mut engine = RedirectEngine::new();
        engine.create("ison", None, None).unwrap();
        engine.arm("ISON alice bob", Utc::now());
        let raw = ":irc 303 me :alice";
        let (eaten, completions) = engine.intercept(&msg(raw), raw);
        assert!(eaten);
        assert_eq!(completions[0].state, CompletionState::Done);
        assert_eq!(completions[0].lines, vec![raw.to_string()]);
    }

    #[test]
    fn test_timeout_delivers_partial_capture() {
        let mut engine = RedirectEngine::new();
        let id = engine.create("whois", None, Some(5)).unwrap();
        let start = Utc::now();
        engine.arm("WHOIS alice", start);
        let raw = ":irc 311 me alice ident host * :Alice";
        let _ = engine.intercept(&msg(raw), raw);

        assert!(engine.check_timeouts(start + Duration::seconds(4)).is_empty());
        let completions = engine.check_timeouts(start + Duration::seconds(5));
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].id, id);
        assert_eq!(completions[0].state, CompletionState::Timeout);
        assert_eq!(completions[0].lines.len(), 1);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_wildcard_arg_pattern() {
        let mut engine = RedirectEngine::new();
        engine.create("whois", Some("al*"), None).unwrap();
        engine.arm("WHOIS alice", Utc::now());
        let raw = ":irc 311 me alice ident host * :Alice";
        let (eaten, _) = engine.intercept(&msg(raw), raw);
        assert!(eaten);
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        let mut engine = RedirectEngine::new();
        assert!(engine.create("bogus", None, None).is_none());
    }
}
