//! Per-server model: identity, discovered limits, channels, notify
//! list and the TTL-bounded bookkeeping tables.

pub mod channel;
pub mod nick;
pub mod notify;

pub use self::channel::{Channel, ChannelType, Modelist, ModelistItem, ModelistState};
pub use self::nick::Nick;
pub use self::notify::NotifyEntry;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::casemap::CaseMapping;
use crate::isupport::Isupport;
use crate::mode::ModeTable;
use crate::options::ServerOptions;
use crate::util::truncate_chars;

/// TTL for `echo_msg_recv` entries.
pub const ECHO_MSG_TTL_SECS: i64 = 300;
/// TTL for manual-join bookkeeping.
pub const JOIN_TTL_SECS: i64 = 60;

/// Runtime state of one server connection.
#[derive(Clone, Debug)]
pub struct ServerState {
    /// Server name (option key, not the address).
    pub name: String,

    // --- identity ---
    /// Our current nick, once known.
    pub nick: Option<String>,
    /// Our user modes, e.g. `+i`.
    pub nick_modes: Option<String>,
    /// Our `user@host` as seen by the server, when known.
    pub host: Option<String>,
    /// Index of the first nick tried this connection.
    pub nick_first_tried: Option<usize>,
    /// `None` while walking the `nicks` list; `Some(n)` once
    /// generating alternates.
    pub nick_alternate_number: Option<u32>,

    // --- connection ---
    pub is_connected: bool,
    pub tls_connected: bool,
    /// Manually disconnected: no automatic reconnect.
    pub disconnected: bool,
    pub index_current_address: usize,
    pub addresses_count: usize,
    pub reconnect_delay: i64,
    pub reconnect_start: Option<DateTime<Utc>>,

    // --- discovered limits / 005 ---
    pub casemapping: CaseMapping,
    pub utf8mapping: Option<String>,
    pub utf8only: bool,
    pub chantypes: String,
    pub mode_table: ModeTable,
    /// Prefix chars aligned one-to-one with `mode_table.prefix_modes`.
    pub prefix_chars: String,
    /// Frame budget including CRLF.
    pub msg_max_length: usize,
    pub nick_max_length: Option<usize>,
    pub user_max_length: Option<usize>,
    pub host_max_length: Option<usize>,
    /// MONITOR capacity (`Some(0)` = unlimited, `None` = unsupported).
    pub monitor_limit: Option<usize>,
    pub clienttagdeny: Vec<String>,
    pub statusmsg: String,
    /// Raw accumulated 005 token stream.
    pub isupport: String,

    // --- lag ---
    pub lag_ms: i64,
    pub lag_displayed_ms: i64,
    /// Outstanding lag PING send time.
    pub lag_check_time: Option<DateTime<Utc>>,
    pub lag_next_check: Option<DateTime<Utc>>,

    // --- away ---
    pub is_away: bool,
    pub away_message: Option<String>,
    pub away_time: Option<DateTime<Utc>>,

    // --- model ---
    pub channels: Vec<Channel>,
    pub notify: Vec<NotifyEntry>,

    // --- deferred work after 001 ---
    pub command_due: Option<DateTime<Utc>>,
    pub autojoin_due: Option<DateTime<Utc>>,
    pub monitor_due: Option<DateTime<Utc>>,
    pub away_check_due: Option<DateTime<Utc>>,

    // --- TTL tables ---
    /// Raw echoed messages we sent, for echo-message dedup.
    pub echo_msg_recv: HashMap<String, DateTime<Utc>>,
    /// Folded channel name -> manual-join time (buffer switching).
    pub join_manual: HashMap<String, DateTime<Utc>>,
    /// Folded channel name -> join key (key memory for autorejoin).
    pub join_channel_key: HashMap<String, String>,
    /// Folded channel name -> joins that must not switch buffers.
    pub join_noswitch: HashMap<String, DateTime<Utc>>,
}

impl ServerState {
    pub fn new(opts: &ServerOptions) -> Self {
        ServerState {
            name: opts.name.clone(),
            nick: None,
            nick_modes: None,
            host: None,
            nick_first_tried: None,
            nick_alternate_number: None,
            is_connected: false,
            tls_connected: false,
            disconnected: false,
            index_current_address: 0,
            addresses_count: 0,
            reconnect_delay: 0,
            reconnect_start: None,
            casemapping: CaseMapping::Rfc1459,
            utf8mapping: None,
            utf8only: false,
            chantypes: opts.default_chantypes.clone(),
            mode_table: ModeTable::default(),
            prefix_chars: "@+".to_string(),
            msg_max_length: if opts.split_msg_max_length > 0 {
                opts.split_msg_max_length
            } else {
                512
            },
            nick_max_length: None,
            user_max_length: None,
            host_max_length: None,
            monitor_limit: None,
            clienttagdeny: Vec::new(),
            statusmsg: String::new(),
            isupport: String::new(),
            lag_ms: 0,
            lag_displayed_ms: 0,
            lag_check_time: None,
            lag_next_check: None,
            is_away: false,
            away_message: None,
            away_time: None,
            channels: Vec::new(),
            notify: NotifyEntry::parse_option(&opts.notify),
            command_due: None,
            autojoin_due: None,
            monitor_due: None,
            away_check_due: None,
            echo_msg_recv: HashMap::new(),
            join_manual: HashMap::new(),
            join_channel_key: HashMap::new(),
            join_noswitch: HashMap::new(),
        }
    }

    /// Fold a name under the server casemapping.
    pub fn fold(&self, s: &str) -> String {
        self.casemapping.fold(s)
    }

    /// Whether `name` starts with a channel type char.
    pub fn is_channel_name(&self, name: &str) -> bool {
        name.chars()
            .next()
            .map(|c| self.chantypes.contains(c))
            .unwrap_or(false)
    }

    /// Strip STATUSMSG prefix chars (`@#chan` -> (`@`, `#chan`)).
    pub fn split_statusmsg<'a>(&self, target: &'a str) -> (Option<char>, &'a str) {
        match target.chars().next() {
            Some(c) if self.statusmsg.contains(c) && target.len() > 1 => {
                (Some(c), &target[c.len_utf8()..])
            }
            _ => (None, target),
        }
    }

    pub fn find_channel(&self, name: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| self.casemapping.eq(&c.name, name))
    }

    pub fn find_channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        let mapping = self.casemapping;
        self.channels
            .iter_mut()
            .find(|c| mapping.eq(&c.name, name))
    }

    /// Get or create a channel entry.
    pub fn ensure_channel(&mut self, name: &str, channel_type: ChannelType) -> &mut Channel {
        let mapping = self.casemapping;
        if let Some(pos) = self
            .channels
            .iter()
            .position(|c| mapping.eq(&c.name, name))
        {
            return &mut self.channels[pos];
        }
        self.channels.push(Channel::new(name, channel_type));
        self.channels.last_mut().expect("just pushed")
    }

    pub fn remove_channel(&mut self, name: &str) -> bool {
        let mapping = self.casemapping;
        let before = self.channels.len();
        self.channels.retain(|c| !mapping.eq(&c.name, name));
        before != self.channels.len()
    }

    /// Maximum nick length the server allows (9 until 005 says more).
    pub fn nick_max(&self) -> usize {
        self.nick_max_length.unwrap_or(9)
    }

    /// Relay-prefix overhead estimate for the splitter:
    /// `:nick!user@host `.
    pub fn split_overhead(&self) -> usize {
        let nick = self.nick.as_deref().map(str::len).unwrap_or(self.nick_max());
        match &self.host {
            Some(host) => 2 + nick + 1 + host.len(),
            None => 2 + nick + 1 + self.user_max_length.unwrap_or(10)
                + 1
                + self.host_max_length.unwrap_or(63),
        }
    }

    /// Apply one 005 reply to the discovered limits.
    pub fn apply_isupport(&mut self, isupport: &Isupport<'_>) {
        for entry in isupport.iter() {
            if !self.isupport.is_empty() {
                self.isupport.push(' ');
            }
            self.isupport.push_str(entry.key);
            if let Some(value) = entry.value {
                self.isupport.push('=');
                self.isupport.push_str(value);
            }
        }

        if let Some(mapping) = isupport.casemapping().and_then(CaseMapping::parse) {
            self.casemapping = mapping;
        }
        if let Some(chantypes) = isupport.chantypes() {
            self.chantypes = chantypes.to_string();
        }
        if let Some(statusmsg) = isupport.statusmsg() {
            self.statusmsg = statusmsg.to_string();
        }
        if let Some(deny) = isupport.clienttagdeny() {
            self.clienttagdeny = deny.split(',').map(str::to_string).collect();
        }
        if let Some(mapping) = isupport.utf8mapping() {
            self.utf8mapping = Some(mapping.to_string());
        }
        if isupport.utf8only() {
            self.utf8only = true;
        }
        if let Some(len) = isupport.nicklen() {
            self.nick_max_length = Some(len);
        }
        if let Some(len) = isupport.userlen() {
            self.user_max_length = Some(len);
        }
        if let Some(len) = isupport.hostlen() {
            self.host_max_length = Some(len);
        }
        if let Some(len) = isupport.linelen() {
            self.msg_max_length = len;
        }
        if let Some(limit) = isupport.monitor() {
            self.monitor_limit = Some(limit);
        }
        if let Some(chanmodes) = isupport.chanmodes() {
            self.mode_table.list_modes = chanmodes.a.to_string();
            self.mode_table.set_arg_modes = chanmodes.b.to_string();
            self.mode_table.set_only_arg_modes = chanmodes.c.to_string();
            self.mode_table.no_arg_modes = chanmodes.d.to_string();
        }
        if let Some(prefix) = isupport.prefix() {
            self.set_prefix(prefix.modes, prefix.prefixes);
        }
    }

    /// Install a new prefix-mode mapping; per-nick prefix sets shed
    /// chars that no longer exist.
    pub fn set_prefix(&mut self, modes: &str, chars: &str) {
        if modes.len() != chars.len() {
            return;
        }
        let changed = self.prefix_chars != chars;
        self.mode_table.prefix_modes = modes.to_string();
        self.prefix_chars = chars.to_string();
        if changed {
            for channel in &mut self.channels {
                let known = self.prefix_chars.clone();
                for nick in channel.nicks().to_vec() {
                    if let Some(n) = channel.find_nick_mut(self.casemapping, &nick.name) {
                        n.retain_known_prefixes(&known);
                    }
                }
            }
        }
    }

    /// Prefix char for a prefix mode letter (`o` -> `@`).
    pub fn prefix_char_for_mode(&self, mode: char) -> Option<char> {
        let pos = self.mode_table.prefix_modes.chars().position(|m| m == mode)?;
        self.prefix_chars.chars().nth(pos)
    }

    /// Prefix mode letter for a prefix char (`@` -> `o`).
    pub fn prefix_mode_for_char(&self, prefix: char) -> Option<char> {
        let pos = self.prefix_chars.chars().position(|c| c == prefix)?;
        self.mode_table.prefix_modes.chars().nth(pos)
    }

    /// Next nick to try after 432/433/437, walking the configured list
    /// first, then generating alternates: append `_` while under 9
    /// chars, then overwrite the tail with a counter 1..=99.
    pub fn next_nick(&mut self, nicks: &[String], alternate_enabled: bool) -> Option<String> {
        if nicks.is_empty() {
            return None;
        }

        if self.nick_alternate_number.is_none() {
            let current_index = self
                .nick
                .as_ref()
                .and_then(|n| nicks.iter().position(|x| x == n));
            let next_index = match current_index {
                Some(i) => (i + 1) % nicks.len(),
                None => 0,
            };
            let first_tried = *self.nick_first_tried.get_or_insert(0);
            if current_index.is_none() || next_index != first_tried {
                return Some(nicks[next_index].clone());
            }

            // the whole list failed
            if !alternate_enabled {
                return None;
            }
            self.nick_alternate_number = Some(0);
            let base = nicks[0].clone();
            if base.chars().count() < 9 {
                return Some(format!("{}_", base));
            }
            return self.numbered_alternate(&base);
        }

        let current = self.nick.clone().unwrap_or_else(|| nicks[0].clone());
        if current.chars().count() < 9 {
            return Some(format!("{}_", current));
        }
        self.numbered_alternate(&current)
    }

    fn numbered_alternate(&mut self, base: &str) -> Option<String> {
        let number = self.nick_alternate_number.unwrap_or(0) + 1;
        if number > 99 {
            return None;
        }
        self.nick_alternate_number = Some(number);

        let stem = truncate_chars(base, 9);
        let digits = number.to_string();
        let stem_chars: Vec<char> = stem.chars().collect();
        if digits.len() > stem_chars.len() {
            return None;
        }
        let keep = stem_chars.len() - digits.len();
        let mut nick: String = stem_chars[..keep].iter().collect();
        nick.push_str(&digits);
        Some(nick)
    }

    /// Record an outbound message for echo-message dedup. Returns true
    /// if the raw text was already present (an echo arrived).
    pub fn echo_msg_check_and_remove(&mut self, raw: &str) -> bool {
        self.echo_msg_recv.remove(raw).is_some()
    }

    pub fn echo_msg_record(&mut self, raw: &str, now: DateTime<Utc>) {
        self.echo_msg_recv.insert(raw.to_string(), now);
    }

    /// Drop expired TTL-table entries and stale smart-filter records.
    pub fn purge_ttl_tables(&mut self, now: DateTime<Utc>) {
        let echo_ttl = Duration::seconds(ECHO_MSG_TTL_SECS);
        self.echo_msg_recv.retain(|_, t| now - *t < echo_ttl);
        let join_ttl = Duration::seconds(JOIN_TTL_SECS);
        self.join_manual.retain(|_, t| now - *t < join_ttl);
        self.join_noswitch.retain(|_, t| now - *t < join_ttl);
        // key memory lives as long as the manual-join entries that set it
        let manual: Vec<String> = self.join_manual.keys().cloned().collect();
        self.join_channel_key
            .retain(|chan, _| manual.iter().any(|m| m == chan));
        for channel in &mut self.channels {
            channel.purge_speakers(now);
        }
    }

    /// Reset state owned by a live connection (socket closed).
    pub fn reset_connection_state(&mut self) {
        self.is_connected = false;
        self.tls_connected = false;
        self.nick_modes = None;
        self.host = None;
        self.nick_first_tried = None;
        self.nick_alternate_number = None;
        self.lag_ms = 0;
        self.lag_displayed_ms = 0;
        self.lag_check_time = None;
        self.lag_next_check = None;
        self.command_due = None;
        self.autojoin_due = None;
        self.monitor_due = None;
        self.away_check_due = None;
        self.isupport.clear();
        for channel in &mut self.channels {
            channel.clear_nicks();
            channel.has_quit_server = true;
        }
        for entry in &mut self.notify {
            entry.is_on_server = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ServerState {
        let opts = ServerOptions {
            name: "libera".to_string(),
            nicks: "alice,alice_,alice2".to_string(),
            ..ServerOptions::default()
        };
        ServerState::new(&opts)
    }

    fn nick_list() -> Vec<String> {
        vec![
            "alice".to_string(),
            "alice_".to_string(),
            "alice2".to_string(),
        ]
    }

    #[test]
    fn test_channel_lookup_casemapped() {
        let mut state = state();
        state.ensure_channel("#Rust", ChannelType::Channel);
        assert!(state.find_channel("#rust").is_some());
        assert!(state.remove_channel("#RUST"));
        assert!(state.find_channel("#rust").is_none());
    }

    #[test]
    fn test_is_channel_name() {
        let state = state();
        assert!(state.is_channel_name("#rust"));
        assert!(state.is_channel_name("&local"));
        assert!(!state.is_channel_name("alice"));
    }

    #[test]
    fn test_split_statusmsg() {
        let mut state = state();
        state.statusmsg = "@+".to_string();
        assert_eq!(state.split_statusmsg("@#chan"), (Some('@'), "#chan"));
        assert_eq!(state.split_statusmsg("#chan"), (None, "#chan"));
        // bare "@" is not a statusmsg target
        assert_eq!(state.split_statusmsg("@"), (None, "@"));
    }

    #[test]
    fn test_next_nick_walks_list() {
        let mut state = state();
        state.nick = Some("alice".to_string());
        state.nick_first_tried = Some(0);
        assert_eq!(state.next_nick(&nick_list(), true).as_deref(), Some("alice_"));
        state.nick = Some("alice_".to_string());
        assert_eq!(state.next_nick(&nick_list(), true).as_deref(), Some("alice2"));
    }

    #[test]
    fn test_next_nick_alternates_after_list() {
        let mut state = state();
        state.nick_first_tried = Some(0);
        state.nick = Some("alice2".to_string());
        // wraps to index 0 == first tried: list exhausted, alternates begin
        assert_eq!(state.next_nick(&nick_list(), true).as_deref(), Some("alice_"));
        state.nick = Some("alice_".to_string());
        // keeps appending to the current nick while short
        assert_eq!(
            state.next_nick(&nick_list(), true).as_deref(),
            Some("alice__")
        );
    }

    #[test]
    fn test_next_nick_numbered_when_long() {
        let mut state = state();
        state.nick_first_tried = Some(0);
        state.nick_alternate_number = Some(0);
        state.nick = Some("abcdefghi".to_string());
        assert_eq!(
            state.next_nick(&nick_list(), true).as_deref(),
            Some("abcdefgh1")
        );
        state.nick = Some("abcdefgh1".to_string());
        assert_eq!(
            state.next_nick(&nick_list(), true).as_deref(),
            Some("abcdefgh2")
        );
    }

    #[test]
    fn test_next_nick_exhaustion() {
        let mut state = state();
        state.nick_first_tried = Some(0);
        state.nick_alternate_number = Some(99);
        state.nick = Some("abcdefgh9".to_string());
        assert_eq!(state.next_nick(&nick_list(), true), None);
    }

    #[test]
    fn test_next_nick_alternates_disabled() {
        let mut state = state();
        state.nick_first_tried = Some(0);
        state.nick = Some("alice2".to_string());
        assert_eq!(state.next_nick(&nick_list(), false), None);
    }

    #[test]
    fn test_apply_isupport_updates_limits() {
        let mut state = state();
        let isupport = Isupport::parse_params(&[
            "CASEMAPPING=ascii",
            "PREFIX=(qov)~@+",
            "CHANMODES=beIq,k,l,imnpst",
            "NICKLEN=30",
            "LINELEN=1024",
            "STATUSMSG=@+",
            "MONITOR=100",
        ]);
        state.apply_isupport(&isupport);
        assert_eq!(state.casemapping, CaseMapping::Ascii);
        assert_eq!(state.prefix_chars, "~@+");
        assert_eq!(state.mode_table.prefix_modes, "qov");
        assert_eq!(state.mode_table.list_modes, "beIq");
        assert_eq!(state.nick_max_length, Some(30));
        assert_eq!(state.msg_max_length, 1024);
        assert_eq!(state.monitor_limit, Some(100));
        assert!(state.isupport.contains("NICKLEN=30"));
    }

    #[test]
    fn test_prefix_mappings() {
        let mut state = state();
        state.set_prefix("qov", "~@+");
        assert_eq!(state.prefix_char_for_mode('o'), Some('@'));
        assert_eq!(state.prefix_mode_for_char('~'), Some('q'));
        assert_eq!(state.prefix_char_for_mode('x'), None);
    }

    #[test]
    fn test_prefix_change_drops_unknown_prefixes() {
        let mut state = state();
        state.set_prefix("qov", "~@+");
        let chan = state.ensure_channel("#c", ChannelType::Channel);
        let mut nick = Nick::new("alice");
        nick.add_prefix('~', "~@+");
        nick.add_prefix('+', "~@+");
        chan.add_nick(CaseMapping::Rfc1459, nick);

        state.set_prefix("ov", "@+");
        let nick = state
            .find_channel("#c")
            .unwrap()
            .find_nick(CaseMapping::Rfc1459, "alice")
            .unwrap();
        assert_eq!(nick.prefixes, "+");
    }

    #[test]
    fn test_echo_msg_roundtrip() {
        let mut state = state();
        let now = Utc::now();
        state.echo_msg_record("PRIVMSG #c :hi", now);
        assert!(state.echo_msg_check_and_remove("PRIVMSG #c :hi"));
        assert!(!state.echo_msg_check_and_remove("PRIVMSG #c :hi"));
    }

    #[test]
    fn test_ttl_purge() {
        let mut state = state();
        let now = Utc::now();
        state.echo_msg_record("old", now - Duration::seconds(ECHO_MSG_TTL_SECS + 1));
        state.echo_msg_record("fresh", now);
        state
            .join_manual
            .insert("#old".to_string(), now - Duration::seconds(JOIN_TTL_SECS + 1));
        state
            .join_channel_key
            .insert("#old".to_string(), "key".to_string());
        state.purge_ttl_tables(now);
        assert_eq!(state.echo_msg_recv.len(), 1);
        assert!(state.join_manual.is_empty());
        assert!(state.join_channel_key.is_empty());
    }

    #[test]
    fn test_reset_connection_state() {
        let mut state = state();
        state.is_connected = true;
        state.nick_modes = Some("+i".to_string());
        state.host = Some("u@h".to_string());
        let chan = state.ensure_channel("#c", ChannelType::Channel);
        chan.add_nick(CaseMapping::Rfc1459, Nick::new("alice"));
        state.reset_connection_state();
        assert!(!state.is_connected);
        assert!(state.nick_modes.is_none());
        assert!(state.host.is_none());
        let chan = state.find_channel("#c").unwrap();
        assert_eq!(chan.nick_count(), 0);
        assert!(chan.has_quit_server);
    }
}
