//! IRC message prefix (message source) parsing.
//!
//! A prefix is either a server name or `nick[!user][@host]`. The
//! distinction matters for display and for the per-command handlers,
//! which mostly care about the nick part.

use std::fmt;

/// The source of an IRC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prefix {
    /// A server name (contains a `.` and no `!`/`@` separators).
    Server(String),
    /// A user source: `nick[!user][@host]`.
    User {
        /// Nickname.
        nick: String,
        /// Ident / username, if present.
        user: Option<String>,
        /// Host, if present.
        host: Option<String>,
    },
}

impl Prefix {
    /// Parse a prefix string (without the leading `:`).
    pub fn parse(s: &str) -> Self {
        let (rest, host) = match s.find('@') {
            Some(at) => (&s[..at], Some(s[at + 1..].to_string())),
            None => (s, None),
        };
        let (nick, user) = match rest.find('!') {
            Some(bang) => (&rest[..bang], Some(rest[bang + 1..].to_string())),
            None => (rest, None),
        };

        // A dot with no user/host separators means a server origin.
        if user.is_none() && host.is_none() && nick.contains('.') {
            return Prefix::Server(nick.to_string());
        }

        Prefix::User {
            nick: nick.to_string(),
            user,
            host,
        }
    }

    /// The nick part, if this is a user prefix.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::Server(_) => None,
            Prefix::User { nick, .. } => Some(nick),
        }
    }

    /// The `user@host` address part, if known.
    pub fn address(&self) -> Option<String> {
        match self {
            Prefix::Server(_) => None,
            Prefix::User { user, host, .. } => match (user, host) {
                (Some(u), Some(h)) => Some(format!("{}@{}", u, h)),
                (None, Some(h)) => Some(h.clone()),
                _ => None,
            },
        }
    }

    /// The host part, if known.
    pub fn host(&self) -> Option<&str> {
        match self {
            Prefix::Server(_) => None,
            Prefix::User { host, .. } => host.as_deref(),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => f.write_str(name),
            Prefix::User { nick, user, host } => {
                f.write_str(nick)?;
                if let Some(u) = user {
                    write!(f, "!{}", u)?;
                }
                if let Some(h) = host {
                    write!(f, "@{}", h)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_user() {
        let p = Prefix::parse("alice!ident@host.example.org");
        assert_eq!(
            p,
            Prefix::User {
                nick: "alice".to_string(),
                user: Some("ident".to_string()),
                host: Some("host.example.org".to_string()),
            }
        );
        assert_eq!(p.nick(), Some("alice"));
        assert_eq!(p.address().as_deref(), Some("ident@host.example.org"));
    }

    #[test]
    fn test_parse_server() {
        let p = Prefix::parse("irc.example.org");
        assert_eq!(p, Prefix::Server("irc.example.org".to_string()));
        assert_eq!(p.nick(), None);
    }

    #[test]
    fn test_parse_bare_nick() {
        let p = Prefix::parse("alice");
        assert_eq!(p.nick(), Some("alice"));
        assert_eq!(p.address(), None);
    }

    #[test]
    fn test_roundtrip_display() {
        for s in ["alice!u@h", "alice@h", "alice", "irc.example.org"] {
            assert_eq!(Prefix::parse(s).to_string(), s);
        }
    }
}
