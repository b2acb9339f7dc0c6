//! Typed server options.
//!
//! The surrounding application owns option storage; the core reads a
//! plain struct of typed values. String options may contain `${var}`
//! references resolved through an [`OptionEvaluator`] right before
//! use (addresses, passwords, fingerprints and autojoin are evaluated;
//! everything else is taken literally).

use crate::sasl::SaslFailPolicy;

/// Resolves `${var}` references in option values. The identity
/// resolver [`NoEval`] is used when the application has no evaluator.
pub trait OptionEvaluator: Send {
    fn evaluate(&self, value: &str) -> String;
}

/// Identity evaluator: values pass through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEval;

impl OptionEvaluator for NoEval {
    fn evaluate(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Where inbound charset decoding applies (`charset_message` option).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CharsetScope {
    /// Decode the whole message.
    #[default]
    Message,
    /// Decode from the channel name onward.
    Channel,
    /// Decode only the text part.
    Text,
}

impl CharsetScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(Self::Message),
            "channel" => Some(Self::Channel),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Typed option values for one server.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Unique server name.
    pub name: String,
    /// Comma-separated `host[:port]` list; `fake:` prefix creates a
    /// no-socket test server.
    pub addresses: String,
    /// Named proxy reference, empty for none.
    pub proxy: String,
    pub ipv6: bool,
    pub tls: bool,
    pub tls_cert: String,
    pub tls_password: String,
    pub tls_priorities: String,
    pub tls_dhkey_size: u32,
    /// Hex fingerprint pin(s), comma-separated; empty disables pinning.
    pub tls_fingerprint: String,
    pub tls_verify: bool,
    /// Server password (PASS).
    pub password: String,
    /// Capability list: names, `*`, `!name` exclusions.
    pub capabilities: String,
    pub sasl_mechanism: String,
    pub sasl_username: String,
    pub sasl_password: String,
    /// Path contents (PEM) of the ECDSA key file.
    pub sasl_key: String,
    pub sasl_timeout: i64,
    pub sasl_fail: SaslFailPolicy,
    pub autoconnect: bool,
    pub autoreconnect: bool,
    pub autoreconnect_delay: i64,
    /// Backoff growth factor.
    pub autoreconnect_delay_growing: i64,
    /// Backoff cap in seconds, 0 for none.
    pub autoreconnect_delay_max: i64,
    /// Comma-separated nick list.
    pub nicks: String,
    pub nicks_alternate: bool,
    pub username: String,
    pub realname: String,
    pub local_hostname: String,
    /// User mode set right after registration.
    pub usermode: String,
    /// Command sent after registration (`command_delay` seconds later).
    pub command: String,
    pub command_delay: i64,
    /// Comma-separated channels (with matching keys after a space).
    pub autojoin: String,
    pub autojoin_delay: i64,
    /// Keep the autojoin option in sync with joins/parts.
    pub autojoin_dynamic: bool,
    pub autorejoin: bool,
    pub autorejoin_delay: i64,
    pub connection_timeout: i64,
    /// Milliseconds between queue drains; 0 disables flood control.
    pub anti_flood: i64,
    /// Minutes between away checks; 0 disables.
    pub away_check: i64,
    /// Skip away checks on channels above this size; 0 for no limit.
    pub away_check_max_nicks: usize,
    pub msg_kick: String,
    pub msg_part: String,
    pub msg_quit: String,
    /// Notify list: comma-separated nicks.
    pub notify: String,
    /// Outbound split budget; 0 uses the server's message length.
    pub split_msg_max_length: usize,
    pub charset_message: CharsetScope,
    /// Channel type characters assumed before 005.
    pub default_chantypes: String,
    /// Mode letter the network sets on registered nicks.
    pub registered_mode: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            name: String::new(),
            addresses: String::new(),
            proxy: String::new(),
            ipv6: true,
            tls: false,
            tls_cert: String::new(),
            tls_password: String::new(),
            tls_priorities: "NORMAL".to_string(),
            tls_dhkey_size: 2048,
            tls_fingerprint: String::new(),
            tls_verify: true,
            password: String::new(),
            capabilities: "*".to_string(),
            sasl_mechanism: "plain".to_string(),
            sasl_username: String::new(),
            sasl_password: String::new(),
            sasl_key: String::new(),
            sasl_timeout: 15,
            sasl_fail: SaslFailPolicy::Continue,
            autoconnect: false,
            autoreconnect: true,
            autoreconnect_delay: 10,
            autoreconnect_delay_growing: 2,
            autoreconnect_delay_max: 600,
            nicks: String::new(),
            nicks_alternate: true,
            username: String::new(),
            realname: String::new(),
            local_hostname: String::new(),
            usermode: String::new(),
            command: String::new(),
            command_delay: 0,
            autojoin: String::new(),
            autojoin_delay: 0,
            autojoin_dynamic: false,
            autorejoin: false,
            autorejoin_delay: 30,
            connection_timeout: 60,
            anti_flood: 2000,
            away_check: 0,
            away_check_max_nicks: 25,
            msg_kick: String::new(),
            msg_part: String::new(),
            msg_quit: String::new(),
            notify: String::new(),
            split_msg_max_length: 512,
            charset_message: CharsetScope::Message,
            default_chantypes: "#&".to_string(),
            registered_mode: "r".to_string(),
        }
    }
}

/// One parsed server address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    /// `fake:` address: no socket, all sends discarded.
    pub fake: bool,
}

impl ServerOptions {
    /// Parse the (already evaluated) `addresses` value.
    pub fn parse_addresses(addresses: &str, tls: bool) -> Vec<ServerAddress> {
        let default_port = if tls { 6697 } else { 6667 };
        addresses
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| {
                let (fake, item) = match item.strip_prefix("fake:") {
                    Some(rest) => (true, rest),
                    None => (false, item),
                };
                match item.rsplit_once(':') {
                    Some((host, port)) => ServerAddress {
                        host: host.to_string(),
                        port: port.parse().unwrap_or(default_port),
                        fake,
                    },
                    None => ServerAddress {
                        host: item.to_string(),
                        port: default_port,
                        fake,
                    },
                }
            })
            .collect()
    }

    /// The configured nick list, in order.
    pub fn nick_list(&self) -> Vec<String> {
        self.nicks
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Channels (and keys) from the evaluated `autojoin` value:
    /// `#a,#b,#c key_a key_b`.
    pub fn parse_autojoin(autojoin: &str) -> Vec<(String, Option<String>)> {
        let mut parts = autojoin.splitn(2, ' ');
        let channels: Vec<&str> = parts
            .next()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .collect();
        let keys: Vec<&str> = parts
            .next()
            .unwrap_or("")
            .split_whitespace()
            .flat_map(|chunk| chunk.split(','))
            .collect();
        channels
            .iter()
            .enumerate()
            .map(|(i, chan)| {
                (
                    chan.to_string(),
                    keys.get(i).map(|k| k.to_string()),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        let addrs = ServerOptions::parse_addresses("irc.example.org:7000, backup.example.org", false);
        assert_eq!(
            addrs,
            vec![
                ServerAddress {
                    host: "irc.example.org".to_string(),
                    port: 7000,
                    fake: false,
                },
                ServerAddress {
                    host: "backup.example.org".to_string(),
                    port: 6667,
                    fake: false,
                },
            ]
        );
    }

    #[test]
    fn test_default_port_follows_tls() {
        let addrs = ServerOptions::parse_addresses("irc.example.org", true);
        assert_eq!(addrs[0].port, 6697);
    }

    #[test]
    fn test_fake_address() {
        let addrs = ServerOptions::parse_addresses("fake:testhost", false);
        assert!(addrs[0].fake);
        assert_eq!(addrs[0].host, "testhost");
    }

    #[test]
    fn test_nick_list() {
        let opts = ServerOptions {
            nicks: "alice, alice_,alice2".to_string(),
            ..ServerOptions::default()
        };
        assert_eq!(opts.nick_list(), vec!["alice", "alice_", "alice2"]);
    }

    #[test]
    fn test_parse_autojoin_with_keys() {
        let autojoin = ServerOptions::parse_autojoin("#secret,#open key1");
        assert_eq!(
            autojoin,
            vec![
                ("#secret".to_string(), Some("key1".to_string())),
                ("#open".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_charset_scope_parse() {
        assert_eq!(CharsetScope::parse("message"), Some(CharsetScope::Message));
        assert_eq!(CharsetScope::parse("channel"), Some(CharsetScope::Channel));
        assert_eq!(CharsetScope::parse("text"), Some(CharsetScope::Text));
        assert_eq!(CharsetScope::parse("bogus"), None);
    }

    #[test]
    fn test_noeval_identity() {
        assert_eq!(NoEval.evaluate("${irc.server.name}"), "${irc.server.name}");
    }
}
