//! Channel model: roster, modes, modelists, smart-filter tracking.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::casemap::CaseMapping;
use crate::event::TypingState;

use super::nick::Nick;

/// Seconds a nick stays "recently speaking" for the smart filter.
pub const SMART_FILTER_WINDOW_SECS: i64 = 600;

/// Channel or private (query) buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelType {
    Channel,
    Private,
}

/// Progress of one modelist download (numerics 367/368 etc.).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelistState {
    #[default]
    Empty,
    Receiving,
    Received,
}

/// One mask entry of a modelist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelistItem {
    pub mask: String,
    pub setter: Option<String>,
    pub set_time: Option<DateTime<Utc>>,
}

/// Per-channel mask list for one list mode (b/e/I/q).
#[derive(Clone, Debug)]
pub struct Modelist {
    pub mode: char,
    pub state: ModelistState,
    pub items: Vec<ModelistItem>,
}

impl Modelist {
    pub fn new(mode: char) -> Self {
        Modelist {
            mode,
            state: ModelistState::Empty,
            items: Vec::new(),
        }
    }

    /// A fresh numeric stream restarts the list.
    pub fn push_item(&mut self, item: ModelistItem) {
        if self.state != ModelistState::Receiving {
            self.items.clear();
            self.state = ModelistState::Receiving;
        }
        self.items.push(item);
    }

    pub fn finish(&mut self) {
        if self.state != ModelistState::Receiving {
            self.items.clear();
        }
        self.state = ModelistState::Received;
    }
}

/// One joined channel (or query buffer).
#[derive(Clone, Debug)]
pub struct Channel {
    pub name: String,
    pub channel_type: ChannelType,
    pub topic: Option<String>,
    /// Raw channel modes (without arguments), e.g. `+nt`.
    pub modes: Option<String>,
    /// Parsed `+l` limit.
    pub limit: usize,
    /// Parsed `+k` key.
    pub key: Option<String>,
    /// Locally departed but buffer kept.
    pub part: bool,
    /// A rejoin is wanted after the next PART.
    pub cycle: bool,
    /// Away message of the remote nick (private buffers).
    pub away_message: Option<String>,
    /// Remote nick quit while we were disconnected.
    pub has_quit_server: bool,
    /// One-shot welcome numerics already displayed after this join.
    pub join_msg_received: HashSet<String>,
    /// WHOX away-check round counter.
    pub checking_away: u32,
    /// Pending autorejoin after a kick.
    pub rejoin_due: Option<DateTime<Utc>>,
    nicks: Vec<Nick>,
    /// Recently speaking nicks, for the smart filter.
    speaking: Vec<(String, DateTime<Utc>)>,
    /// Live typing states per nick.
    typing: HashMap<String, TypingState>,
    modelists: Vec<Modelist>,
}

impl Channel {
    pub fn new(name: &str, channel_type: ChannelType) -> Self {
        Channel {
            name: name.to_string(),
            channel_type,
            topic: None,
            modes: None,
            limit: 0,
            key: None,
            part: false,
            cycle: false,
            away_message: None,
            has_quit_server: false,
            join_msg_received: HashSet::new(),
            checking_away: 0,
            rejoin_due: None,
            nicks: Vec::new(),
            speaking: Vec::new(),
            typing: HashMap::new(),
            modelists: Vec::new(),
        }
    }

    pub fn nicks(&self) -> &[Nick] {
        &self.nicks
    }

    pub fn nick_count(&self) -> usize {
        self.nicks.len()
    }

    pub fn find_nick(&self, mapping: CaseMapping, name: &str) -> Option<&Nick> {
        self.nicks.iter().find(|n| mapping.eq(&n.name, name))
    }

    pub fn find_nick_mut(&mut self, mapping: CaseMapping, name: &str) -> Option<&mut Nick> {
        self.nicks.iter_mut().find(|n| mapping.eq(&n.name, name))
    }

    /// Insert or replace a roster entry.
    pub fn add_nick(&mut self, mapping: CaseMapping, nick: Nick) {
        match self.nicks.iter_mut().find(|n| mapping.eq(&n.name, &nick.name)) {
            Some(existing) => *existing = nick,
            None => self.nicks.push(nick),
        }
    }

    pub fn remove_nick(&mut self, mapping: CaseMapping, name: &str) -> Option<Nick> {
        let pos = self.nicks.iter().position(|n| mapping.eq(&n.name, name))?;
        self.typing.remove(name);
        Some(self.nicks.remove(pos))
    }

    pub fn rename_nick(&mut self, mapping: CaseMapping, old: &str, new: &str) -> bool {
        if let Some(nick) = self.find_nick_mut(mapping, old) {
            nick.name = new.to_string();
            true
        } else {
            false
        }
    }

    pub fn clear_nicks(&mut self) {
        self.nicks.clear();
        self.typing.clear();
    }

    /// Record a message from `nick` for the smart filter.
    pub fn record_speaker(&mut self, nick: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.speaking.iter_mut().find(|(n, _)| n == nick) {
            entry.1 = now;
        } else {
            self.speaking.push((nick.to_string(), now));
        }
    }

    /// Whether `nick` spoke within the smart-filter window.
    pub fn recently_speaking(&self, nick: &str, now: DateTime<Utc>) -> bool {
        self.speaking.iter().any(|(n, t)| {
            n == nick && now - *t < Duration::seconds(SMART_FILTER_WINDOW_SECS)
        })
    }

    /// Rename a smart-filter entry when its nick changes.
    pub fn rename_speaker(&mut self, old: &str, new: &str) {
        for entry in &mut self.speaking {
            if entry.0 == old {
                entry.0 = new.to_string();
            }
        }
    }

    /// Drop expired smart-filter entries.
    pub fn purge_speakers(&mut self, now: DateTime<Utc>) {
        self.speaking
            .retain(|(_, t)| now - *t < Duration::seconds(SMART_FILTER_WINDOW_SECS));
    }

    pub fn set_typing(&mut self, nick: &str, state: TypingState) {
        match state {
            TypingState::Done => {
                self.typing.remove(nick);
            }
            state => {
                self.typing.insert(nick.to_string(), state);
            }
        }
    }

    pub fn typing_nicks(&self) -> impl Iterator<Item = (&str, TypingState)> {
        self.typing.iter().map(|(n, s)| (n.as_str(), *s))
    }

    /// The modelist for a list mode, created on first use.
    pub fn modelist_mut(&mut self, mode: char) -> &mut Modelist {
        if let Some(pos) = self.modelists.iter().position(|m| m.mode == mode) {
            return &mut self.modelists[pos];
        }
        self.modelists.push(Modelist::new(mode));
        self.modelists.last_mut().expect("just pushed")
    }

    pub fn modelist(&self, mode: char) -> Option<&Modelist> {
        self.modelists.iter().find(|m| m.mode == mode)
    }
}
