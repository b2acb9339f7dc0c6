//! mIRC formatting codes: detection and stripping.
//!
//! Message bodies may carry formatting control characters (bold
//! `0x02`, color `0x03`, hex color `0x04`, reset `0x0f`, reverse
//! `0x16`, italics `0x1d`, strikethrough `0x1e`, underline `0x1f`).
//! Handlers whose table entry clears `decode_color` strip them before
//! display.

/// Extension methods for IRC-formatted strings.
pub trait FormattedStringExt {
    /// Whether the string contains formatting control characters.
    fn is_formatted(&self) -> bool;
    /// Remove all formatting control characters (and color digit
    /// arguments).
    fn strip_formatting(&self) -> String;
}

const BOLD: char = '\u{2}';
const COLOR: char = '\u{3}';
const HEX_COLOR: char = '\u{4}';
const RESET: char = '\u{f}';
const REVERSE: char = '\u{16}';
const ITALICS: char = '\u{1d}';
const STRIKE: char = '\u{1e}';
const UNDERLINE: char = '\u{1f}';

impl FormattedStringExt for str {
    fn is_formatted(&self) -> bool {
        self.chars().any(|c| {
            matches!(
                c,
                BOLD | COLOR | HEX_COLOR | RESET | REVERSE | ITALICS | STRIKE | UNDERLINE
            )
        })
    }

    fn strip_formatting(&self) -> String {
        let mut out = String::with_capacity(self.len());
        let mut chars = self.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                BOLD | RESET | REVERSE | ITALICS | STRIKE | UNDERLINE => {}
                COLOR => {
                    // up to two digits, optionally ",NN" for background
                    for _ in 0..2 {
                        if chars.peek().map_or(false, |c| c.is_ascii_digit()) {
                            chars.next();
                        }
                    }
                    if chars.peek() == Some(&',') {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        if lookahead.peek().map_or(false, |c| c.is_ascii_digit()) {
                            chars.next();
                            for _ in 0..2 {
                                if chars.peek().map_or(false, |c| c.is_ascii_digit()) {
                                    chars.next();
                                }
                            }
                        }
                    }
                }
                HEX_COLOR => {
                    for _ in 0..6 {
                        if chars.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
                            chars.next();
                        }
                    }
                }
                c => out.push(c),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        assert!(!"hello world".is_formatted());
        assert_eq!("hello world".strip_formatting(), "hello world");
    }

    #[test]
    fn test_strip_bold_and_reset() {
        let s = "\u{2}bold\u{f} normal";
        assert!(s.is_formatted());
        assert_eq!(s.strip_formatting(), "bold normal");
    }

    #[test]
    fn test_strip_color_with_args() {
        assert_eq!("\u{3}04red".strip_formatting(), "red");
        assert_eq!("\u{3}04,01red-on-black".strip_formatting(), "red-on-black");
        // a comma not followed by digits stays
        assert_eq!("\u{3}04,x".strip_formatting(), ",x");
    }

    #[test]
    fn test_strip_bare_color_code() {
        assert_eq!("a\u{3}b".strip_formatting(), "ab");
    }

    #[test]
    fn test_strip_hex_color() {
        assert_eq!("\u{4}ff0000red".strip_formatting(), "red");
    }

    #[test]
    fn test_mixed_formatting() {
        let s = "\u{2}\u{1d}\u{1f}all\u{f} the \u{16}styles\u{1e}";
        assert_eq!(s.strip_formatting(), "all the styles");
    }
}
