//! Server-scoped casemapping for nick and channel name comparisons.
//!
//! IRC servers advertise their case-insensitivity rule through the
//! `CASEMAPPING` ISUPPORT token. Under `rfc1459` the characters
//! `[]\~` are the uppercase forms of `{}|^`; `strict-rfc1459` excludes
//! the `~`/`^` pair; `ascii` folds only `A-Z`.
//!
//! # Reference
//! - RFC 1459 section 2.2
//! - Modern IRC documentation: <https://modern.ircdocs.horse/#casemapping-parameter>

/// Case-insensitivity rule advertised by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaseMapping {
    /// `A-Z [ ] \ ~` fold to `a-z { } | ^`.
    #[default]
    Rfc1459,
    /// `A-Z [ ] \` fold to `a-z { } |` (no `~`/`^` pair).
    StrictRfc1459,
    /// Only `A-Z` fold to `a-z`.
    Ascii,
}

impl CaseMapping {
    /// Parse a `CASEMAPPING` ISUPPORT value. Unknown values map to `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rfc1459" => Some(Self::Rfc1459),
            "strict-rfc1459" => Some(Self::StrictRfc1459),
            "ascii" => Some(Self::Ascii),
            _ => None,
        }
    }

    /// The token value this mapping was parsed from.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rfc1459 => "rfc1459",
            Self::StrictRfc1459 => "strict-rfc1459",
            Self::Ascii => "ascii",
        }
    }

    /// Fold one character to its lowercase equivalent under this mapping.
    pub fn fold_char(&self, c: char) -> char {
        match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' if *self != Self::Ascii => '{',
            ']' if *self != Self::Ascii => '}',
            '\\' if *self != Self::Ascii => '|',
            '~' if *self == Self::Rfc1459 => '^',
            _ => c,
        }
    }

    /// Fold a whole string. The fold is idempotent.
    pub fn fold(&self, s: &str) -> String {
        s.chars().map(|c| self.fold_char(c)).collect()
    }

    /// Case-insensitive equality under this mapping.
    pub fn eq(&self, a: &str, b: &str) -> bool {
        let mut ca = a.chars();
        let mut cb = b.chars();
        loop {
            match (ca.next(), cb.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if self.fold_char(x) != self.fold_char(y) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1459_fold() {
        let m = CaseMapping::Rfc1459;
        assert_eq!(m.fold("Nick[o]\\X~"), "nick{o}|x^");
        assert!(m.eq("[]\\~", "{}|^"));
    }

    #[test]
    fn test_strict_excludes_tilde() {
        let m = CaseMapping::StrictRfc1459;
        assert!(m.eq("[]", "{}"));
        assert!(!m.eq("~", "^"));
    }

    #[test]
    fn test_ascii_folds_letters_only() {
        let m = CaseMapping::Ascii;
        assert!(m.eq("NickName", "nickname"));
        assert!(!m.eq("[", "{"));
        assert!(!m.eq("\\", "|"));
    }

    #[test]
    fn test_fold_idempotent() {
        for m in [
            CaseMapping::Rfc1459,
            CaseMapping::StrictRfc1459,
            CaseMapping::Ascii,
        ] {
            let s = "WeIrD[Nick]\\with~Stuff^123";
            assert_eq!(m.fold(&m.fold(s)), m.fold(s));
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(CaseMapping::parse("rfc1459"), Some(CaseMapping::Rfc1459));
        assert_eq!(CaseMapping::parse("ascii"), Some(CaseMapping::Ascii));
        assert_eq!(
            CaseMapping::parse("strict-rfc1459"),
            Some(CaseMapping::StrictRfc1459)
        );
        assert_eq!(CaseMapping::parse("unicode"), None);
    }

    #[test]
    fn test_eq_length_mismatch() {
        assert!(!CaseMapping::Rfc1459.eq("abc", "abcd"));
    }
}
