//! ISUPPORT (numeric 005) token parsing.
//!
//! Servers advertise features as `KEY` or `KEY=VALUE` tokens in 005
//! replies. The parser yields borrowed entries; the typed accessors
//! cover the keys the client model consumes.
//!
//! # Reference
//! - <https://modern.ircdocs.horse/#rplisupport-005>

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsupportEntry<'a> {
    pub key: &'a str,
    pub value: Option<&'a str>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Isupport<'a> {
    entries: Vec<IsupportEntry<'a>>,
}

impl<'a> Isupport<'a> {
    /// Parse the token parameters of one 005 reply. The caller passes
    /// the params between the client nick and the trailing
    /// "are supported by this server" text.
    pub fn parse_params(params: &[&'a str]) -> Self {
        let mut entries = Vec::with_capacity(params.len());
        for &p in params {
            if p.starts_with(':') {
                break;
            }
            if p.is_empty() {
                continue;
            }
            let (k, v) = if let Some(eq) = p.find('=') {
                (&p[..eq], Some(&p[eq + 1..]))
            } else {
                (p, None)
            };

            entries.push(IsupportEntry { key: k, value: v });
        }
        Isupport { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &IsupportEntry<'a>> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<Option<&'a str>> {
        self.entries
            .iter()
            .rfind(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value)
    }

    pub fn casemapping(&self) -> Option<&'a str> {
        self.get("CASEMAPPING").flatten()
    }

    pub fn chantypes(&self) -> Option<&'a str> {
        self.get("CHANTYPES").flatten()
    }

    pub fn statusmsg(&self) -> Option<&'a str> {
        self.get("STATUSMSG").flatten()
    }

    pub fn clienttagdeny(&self) -> Option<&'a str> {
        self.get("CLIENTTAGDENY").flatten()
    }

    pub fn utf8mapping(&self) -> Option<&'a str> {
        self.get("UTF8MAPPING").flatten()
    }

    /// UTF8ONLY has no value; presence is the signal.
    pub fn utf8only(&self) -> bool {
        self.get("UTF8ONLY").is_some()
    }

    pub fn prefix(&self) -> Option<PrefixSpec<'a>> {
        self.get("PREFIX").flatten().and_then(PrefixSpec::parse)
    }

    pub fn chanmodes(&self) -> Option<ChanModes<'a>> {
        self.get("CHANMODES").flatten().and_then(ChanModes::parse)
    }

    pub fn nicklen(&self) -> Option<usize> {
        self.get_number("NICKLEN")
    }

    pub fn userlen(&self) -> Option<usize> {
        self.get_number("USERLEN")
    }

    pub fn hostlen(&self) -> Option<usize> {
        self.get_number("HOSTLEN")
    }

    pub fn linelen(&self) -> Option<usize> {
        self.get_number("LINELEN")
    }

    /// MONITOR limit: `None` when unsupported, `Some(0)` when unlimited.
    pub fn monitor(&self) -> Option<usize> {
        match self.get("MONITOR") {
            Some(Some(v)) => v.parse().ok(),
            Some(None) => Some(0),
            None => None,
        }
    }

    fn get_number(&self, key: &str) -> Option<usize> {
        self.get(key).flatten().and_then(|v| v.parse().ok())
    }
}

/// Parsed `PREFIX=(modes)chars` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefixSpec<'a> {
    pub modes: &'a str,
    pub prefixes: &'a str,
}

impl<'a> PrefixSpec<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        if let Some(open) = s.find('(') {
            if let Some(close) = s[open + 1..].find(')') {
                let close = open + 1 + close;
                let modes = &s[open + 1..close];
                let prefixes = &s[close + 1..];
                if modes.len() == prefixes.len() && !modes.is_empty() {
                    return Some(PrefixSpec { modes, prefixes });
                }
            }
        } else if !s.is_empty() {
            return Some(PrefixSpec {
                modes: "",
                prefixes: s,
            });
        }
        None
    }
}

/// Parsed `CHANMODES=A,B,C,D` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChanModes<'a> {
    pub a: &'a str,
    pub b: &'a str,
    pub c: &'a str,
    pub d: &'a str,
}

impl<'a> ChanModes<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let (a, b, c, d) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        Some(ChanModes { a, b, c, d })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        let isupport = Isupport::parse_params(&[
            "CASEMAPPING=rfc1459",
            "CHANTYPES=#&",
            "NICKLEN=30",
            "UTF8ONLY",
            "PREFIX=(ov)@+",
        ]);
        assert_eq!(isupport.casemapping(), Some("rfc1459"));
        assert_eq!(isupport.chantypes(), Some("#&"));
        assert_eq!(isupport.nicklen(), Some(30));
        assert!(isupport.utf8only());
        let prefix = isupport.prefix().unwrap();
        assert_eq!(prefix.modes, "ov");
        assert_eq!(prefix.prefixes, "@+");
    }

    #[test]
    fn test_prefix_length_mismatch_rejected() {
        assert_eq!(PrefixSpec::parse("(ovh)@+"), None);
    }

    #[test]
    fn test_chanmodes() {
        let cm = ChanModes::parse("beI,k,l,imnpst").unwrap();
        assert_eq!(cm.a, "beI");
        assert_eq!(cm.b, "k");
        assert_eq!(cm.c, "l");
        assert_eq!(cm.d, "imnpst");
        assert_eq!(ChanModes::parse("a,b"), None);
    }

    #[test]
    fn test_monitor_values() {
        let limited = Isupport::parse_params(&["MONITOR=100"]);
        assert_eq!(limited.monitor(), Some(100));
        let unlimited = Isupport::parse_params(&["MONITOR"]);
        assert_eq!(unlimited.monitor(), Some(0));
        let unsupported = Isupport::parse_params(&["NICKLEN=9"]);
        assert_eq!(unsupported.monitor(), None);
    }

    #[test]
    fn test_last_token_wins() {
        let isupport = Isupport::parse_params(&["NICKLEN=9", "NICKLEN=30"]);
        assert_eq!(isupport.nicklen(), Some(30));
    }

    #[test]
    fn test_clienttagdeny() {
        let isupport = Isupport::parse_params(&["CLIENTTAGDENY=*,-typing"]);
        assert_eq!(isupport.clienttagdeny(), Some("*,-typing"));
    }
}
