//! Events emitted by the protocol core to the surrounding UI.
//!
//! For every inbound message the core emits `RawIn` and, unless the
//! message is soft-ignored, `In`; after dispatch `In2` follows. The
//! outbound mirror is `Out1` (once per logical command), `Out` (per
//! wire frame) and `OutTags` (with resolved tags). Lifecycle and model
//! changes ride the remaining variants.

use crate::redirect::RedirectCompletion;

/// Where a display line belongs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The server buffer.
    Server,
    /// A channel buffer.
    Channel(String),
    /// A private (query) buffer.
    Private(String),
}

/// A line for the UI, with its display tags (`irc_join`,
/// `irc_smart_filter`, `ignored`, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayLine {
    pub target: Target,
    pub tags: Vec<String>,
    pub text: String,
}

impl DisplayLine {
    pub fn server(text: impl Into<String>) -> Self {
        DisplayLine {
            target: Target::Server,
            tags: Vec::new(),
            text: text.into(),
        }
    }

    pub fn channel(channel: &str, text: impl Into<String>) -> Self {
        DisplayLine {
            target: Target::Channel(channel.to_string()),
            tags: Vec::new(),
            text: text.into(),
        }
    }

    pub fn private(nick: &str, text: impl Into<String>) -> Self {
        DisplayLine {
            target: Target::Private(nick.to_string()),
            tags: Vec::new(),
            text: text.into(),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Typing notification states (`+typing` client tag).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingState {
    Active,
    Paused,
    Done,
}

impl TypingState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Events delivered from the core, in order of occurrence.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// Raw inbound line, always emitted.
    RawIn { command: String, raw: String },
    /// Inbound line, skipped for hard-ignored messages.
    In { command: String, raw: String },
    /// Inbound line after dispatch.
    In2 { command: String, raw: String },
    /// Logical outbound command, before splitting.
    Out1 { raw: String },
    /// One outbound wire frame.
    Out { raw: String },
    /// One outbound wire frame with its resolved tags.
    OutTags { raw: String, tags: String },
    /// Dialing has begun.
    Connecting { address: String },
    /// Registration completed (001 received).
    Connected,
    /// Connection closed.
    Disconnected { reason: String },
    /// Lag estimate changed.
    LagChanged { lag_ms: i64 },
    /// A private message opened or updated a query.
    Pv { nick: String, text: String },
    /// Our nick changed (by us or the server).
    NickChanged { old: Option<String>, new: String },
    /// Channel buffer renamed by a 470 forward.
    ChannelForwarded { from: String, to: String },
    /// A line for the UI.
    Display(DisplayLine),
    /// A redirect completed.
    Redirect(RedirectCompletion),
    /// SASL finished.
    SaslOutcome { success: bool, message: String },
    /// A monitored nick went online/offline (MONITOR 730/731).
    MonitorState { nick: String, online: bool },
    /// Typing state change in a channel or query.
    Typing {
        target: String,
        nick: String,
        state: TypingState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_line_builders() {
        let line = DisplayLine::channel("#c", "hello").with_tag("irc_join");
        assert_eq!(line.target, Target::Channel("#c".to_string()));
        assert!(line.has_tag("irc_join"));
        assert!(!line.has_tag("ignored"));
    }

    #[test]
    fn test_typing_state_parse() {
        assert_eq!(TypingState::parse("active"), Some(TypingState::Active));
        assert_eq!(TypingState::parse("paused"), Some(TypingState::Paused));
        assert_eq!(TypingState::parse("done"), Some(TypingState::Done));
        assert_eq!(TypingState::parse("typing"), None);
    }
}
