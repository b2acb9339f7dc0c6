//! User-configured ignore patterns.
//!
//! Each entry matches a source mask (`nick!user@host` with wildcards)
//! optionally restricted to a server and channel. A matching message
//! is either tagged `ignored` (soft) or dropped before display (hard),
//! per the list-wide policy; raw-in signals fire regardless so
//! external consumers still see all traffic.

use crate::util::mask_match;

/// How matches are applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IgnorePolicy {
    /// Tag the display line with `ignored`, let the UI decide.
    #[default]
    Soft,
    /// Drop the display line entirely.
    Hard,
}

/// One ignore entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoreEntry {
    /// Mask matched against `nick!user@host` (falls back to the nick
    /// when the address is unknown).
    pub mask: String,
    /// Server name restriction, `*` for all.
    pub server: String,
    /// Channel restriction, `*` for all.
    pub channel: String,
}

/// The ignore list for one core.
#[derive(Clone, Debug, Default)]
pub struct IgnoreList {
    entries: Vec<IgnoreEntry>,
    policy: IgnorePolicy,
}

impl IgnoreList {
    pub fn new(policy: IgnorePolicy) -> Self {
        IgnoreList {
            entries: Vec::new(),
            policy,
        }
    }

    pub fn policy(&self) -> IgnorePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: IgnorePolicy) {
        self.policy = policy;
    }

    pub fn add(&mut self, mask: &str, server: &str, channel: &str) {
        let entry = IgnoreEntry {
            mask: mask.to_string(),
            server: if server.is_empty() { "*".to_string() } else { server.to_string() },
            channel: if channel.is_empty() { "*".to_string() } else { channel.to_string() },
        };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, mask: &str, server: &str, channel: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| {
            !(e.mask == mask
                && (server.is_empty() || e.server == server)
                && (channel.is_empty() || e.channel == channel))
        });
        before != self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a message source is ignored in the given context.
    pub fn matches(&self, source: &str, server: &str, channel: Option<&str>) -> bool {
        self.entries.iter().any(|e| {
            mask_match(&e.server, server)
                && channel.map_or(e.channel == "*", |c| mask_match(&e.channel, c))
                && mask_match(&e.mask, source)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_against_full_source() {
        let mut list = IgnoreList::default();
        list.add("*!*@spam.example.org", "*", "*");
        assert!(list.matches("troll!u@spam.example.org", "libera", Some("#rust")));
        assert!(!list.matches("alice!u@home.example.org", "libera", Some("#rust")));
    }

    #[test]
    fn test_channel_scoped() {
        let mut list = IgnoreList::default();
        list.add("troll*", "*", "#rust");
        assert!(list.matches("troll99", "libera", Some("#rust")));
        assert!(!list.matches("troll99", "libera", Some("#python")));
        // no channel context: only wildcard-channel entries apply
        assert!(!list.matches("troll99", "libera", None));
    }

    #[test]
    fn test_server_scoped() {
        let mut list = IgnoreList::default();
        list.add("bob", "libera", "*");
        assert!(list.matches("bob", "libera", Some("#x")));
        assert!(!list.matches("bob", "oftc", Some("#x")));
    }

    #[test]
    fn test_remove() {
        let mut list = IgnoreList::default();
        list.add("bob", "*", "*");
        assert!(list.remove("bob", "", ""));
        assert!(list.is_empty());
        assert!(!list.remove("bob", "", ""));
    }

    #[test]
    fn test_duplicate_not_added() {
        let mut list = IgnoreList::default();
        list.add("bob", "*", "*");
        list.add("bob", "*", "*");
        assert!(list.remove("bob", "", ""));
        assert!(list.is_empty());
    }
}
