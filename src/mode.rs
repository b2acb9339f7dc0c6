//! Channel and user mode parsing with server-scoped argument classes.
//!
//! Argument consumption follows the server's `CHANMODES` classification
//! discovered via ISUPPORT: type A modes (lists) always take an
//! argument when setting or unsetting but may be queried bare; type B
//! always take one; type C only when setting; type D never. Prefix
//! modes (from `PREFIX`) always take a nick argument.

use crate::error::ModeParseError;

/// Argument class of a mode letter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeClass {
    /// Type A: list mode (b/e/I/q), argument is a mask.
    List,
    /// Type B: always has an argument (k).
    SetArg,
    /// Type C: argument only when set (l).
    SetOnlyArg,
    /// Type D: never has an argument (i/m/n/...).
    NoArg,
    /// Prefix mode (o/v/...), argument is a nick.
    Prefix,
}

/// Per-server mode classification table, built from ISUPPORT
/// `CHANMODES` and `PREFIX`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeTable {
    /// Type A mode letters.
    pub list_modes: String,
    /// Type B mode letters.
    pub set_arg_modes: String,
    /// Type C mode letters.
    pub set_only_arg_modes: String,
    /// Type D mode letters.
    pub no_arg_modes: String,
    /// Prefix mode letters, rank order (highest first).
    pub prefix_modes: String,
}

impl Default for ModeTable {
    fn default() -> Self {
        // RFC 1459 baseline, used until 005 says otherwise.
        ModeTable {
            list_modes: "beI".to_string(),
            set_arg_modes: "k".to_string(),
            set_only_arg_modes: "l".to_string(),
            no_arg_modes: "imnpst".to_string(),
            prefix_modes: "ov".to_string(),
        }
    }
}

impl ModeTable {
    /// Classify a mode letter. Letters in no class are treated as
    /// argument-less.
    pub fn classify(&self, mode: char) -> ModeClass {
        if self.prefix_modes.contains(mode) {
            ModeClass::Prefix
        } else if self.list_modes.contains(mode) {
            ModeClass::List
        } else if self.set_arg_modes.contains(mode) {
            ModeClass::SetArg
        } else if self.set_only_arg_modes.contains(mode) {
            ModeClass::SetOnlyArg
        } else {
            ModeClass::NoArg
        }
    }
}

/// One parsed mode change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub plus: bool,
    /// The mode letter.
    pub mode: char,
    /// Consumed argument, if the class requires one.
    pub arg: Option<String>,
}

/// Parse a mode string plus its argument tokens into a change list.
///
/// `MODE #chan +ov-k alice bob secret` parses as `+o alice`,
/// `+v bob`, `-k secret`.
pub fn parse_mode_changes(
    table: &ModeTable,
    modes: &str,
    args: &[&str],
) -> Result<Vec<ModeChange>, ModeParseError> {
    let mut changes = Vec::new();
    let mut plus = true;
    let mut args = args.iter();

    for c in modes.chars() {
        match c {
            '+' => plus = true,
            '-' => plus = false,
            _ => {
                let takes_arg = match table.classify(c) {
                    ModeClass::Prefix | ModeClass::SetArg => true,
                    ModeClass::List => true,
                    ModeClass::SetOnlyArg => plus,
                    ModeClass::NoArg => false,
                };
                let arg = if takes_arg {
                    match args.next() {
                        Some(arg) => Some(arg.to_string()),
                        // bare list mode is a query, everything else is malformed
                        None if table.classify(c) == ModeClass::List => None,
                        None => return Err(ModeParseError::MissingArgument { mode: c }),
                    }
                } else {
                    None
                };
                changes.push(ModeChange { plus, mode: c, arg });
            }
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_modes_consume_args_in_order() {
        let table = ModeTable::default();
        let changes = parse_mode_changes(&table, "+ov-k", &["alice", "bob", "secret"]).unwrap();
        assert_eq!(
            changes,
            vec![
                ModeChange {
                    plus: true,
                    mode: 'o',
                    arg: Some("alice".to_string())
                },
                ModeChange {
                    plus: true,
                    mode: 'v',
                    arg: Some("bob".to_string())
                },
                ModeChange {
                    plus: false,
                    mode: 'k',
                    arg: Some("secret".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_limit_arg_only_when_set() {
        let table = ModeTable::default();
        let set = parse_mode_changes(&table, "+l", &["50"]).unwrap();
        assert_eq!(set[0].arg.as_deref(), Some("50"));
        let unset = parse_mode_changes(&table, "-l", &[]).unwrap();
        assert_eq!(unset[0].arg, None);
    }

    #[test]
    fn test_ban_query_without_arg() {
        let table = ModeTable::default();
        let changes = parse_mode_changes(&table, "+b", &[]).unwrap();
        assert_eq!(changes[0].arg, None);
    }

    #[test]
    fn test_key_without_arg_is_error() {
        let table = ModeTable::default();
        assert_eq!(
            parse_mode_changes(&table, "+k", &[]),
            Err(ModeParseError::MissingArgument { mode: 'k' })
        );
    }

    #[test]
    fn test_no_sign_defaults_to_plus() {
        let table = ModeTable::default();
        let changes = parse_mode_changes(&table, "i", &[]).unwrap();
        assert!(changes[0].plus);
        assert_eq!(changes[0].mode, 'i');
    }

    #[test]
    fn test_unknown_mode_takes_no_arg() {
        let table = ModeTable::default();
        let changes = parse_mode_changes(&table, "+z", &[]).unwrap();
        assert_eq!(changes[0].arg, None);
    }

    #[test]
    fn test_classify_with_custom_table() {
        let table = ModeTable {
            list_modes: "beIq".to_string(),
            set_arg_modes: "kf".to_string(),
            set_only_arg_modes: "lj".to_string(),
            no_arg_modes: "imnpst".to_string(),
            prefix_modes: "qaohv".to_string(),
        };
        // 'q' is both a prefix mode and a list mode on some networks;
        // prefix classification wins for argument purposes
        assert_eq!(table.classify('q'), ModeClass::Prefix);
        assert_eq!(table.classify('f'), ModeClass::SetArg);
        assert_eq!(table.classify('j'), ModeClass::SetOnlyArg);
    }
}
