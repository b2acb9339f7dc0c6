//! Notify list entries (presence tracking via MONITOR/ISON).

/// One monitored nick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyEntry {
    pub nick: String,
    /// Also watch away status changes.
    pub check_away: bool,
    /// `None` until the server tells us (730/731).
    pub is_on_server: Option<bool>,
    pub away_message: Option<String>,
}

impl NotifyEntry {
    pub fn new(nick: &str, check_away: bool) -> Self {
        NotifyEntry {
            nick: nick.to_string(),
            check_away,
            is_on_server: None,
            away_message: None,
        }
    }

    /// Parse the `notify` option: comma-separated nicks, each
    /// optionally marked `nick!away`.
    pub fn parse_option(option: &str) -> Vec<NotifyEntry> {
        option
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| match item.split_once('!') {
                Some((nick, flags)) => NotifyEntry::new(nick, flags.contains("away")),
                None => NotifyEntry::new(item, false),
            })
            .collect()
    }
}
