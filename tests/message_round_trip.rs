//! Integration tests for message parsing and serialization
//!
//! These tests verify that messages can be parsed from strings and then
//! serialized back to equivalent strings, ensuring round-trip
//! compatibility, and that the outbound splitter honors its boundary
//! guarantees.

use slirc_client::message::split::{split_message, SplitContext};
use slirc_client::{CaseMapping, Message, Prefix, Tag};

fn round_trip(original: &str) {
    let message: Message = original.parse().expect("Failed to parse message");
    let serialized = message.to_string();
    let reparsed: Message = serialized.parse().expect("Failed to reparse message");
    assert_eq!(message, reparsed);
}

#[test]
fn test_message_round_trip_simple() {
    round_trip("PING :irc.example.com");
}

#[test]
fn test_message_round_trip_with_prefix() {
    round_trip(":nick!user@host PRIVMSG #channel :Hello, world!");
}

#[test]
fn test_message_round_trip_with_tags() {
    round_trip(
        "@time=2023-01-01T00:00:00.000Z;msgid=abc123 :nick!user@host PRIVMSG #channel :Tagged message",
    );
}

#[test]
fn test_message_round_trip_numeric_response() {
    round_trip(":server 001 nickname :Welcome to the IRC Network");
}

#[test]
fn test_message_round_trip_complex_tags() {
    round_trip(
        "@batch=abc123;msgid=def456;time=2023-01-01T12:00:00Z;+custom=value :nick BATCH +abc123 chathistory #channel",
    );
}

#[test]
fn test_message_construction_and_parsing() {
    let message = Message::privmsg("#test", "Integration test message")
        .with_tag("time", Some("2023-01-01T00:00:00Z"))
        .with_tag("msgid", Some("test123"))
        .with_prefix(Prefix::parse("testbot!test@example.com"));

    let serialized = message.to_string();
    let parsed: Message = serialized
        .parse()
        .expect("Failed to parse constructed message");
    assert_eq!(message, parsed);
    assert_eq!(parsed.params, vec!["#test", "Integration test message"]);
}

#[test]
fn test_tag_value_escapes_round_trip() {
    let message = Message::privmsg("#c", "x").with_tag("val", Some("a b;c\\d\re\nf"));
    let serialized = message.to_string();
    assert!(serialized.contains("\\s"));
    assert!(serialized.contains("\\:"));
    let reparsed: Message = serialized.parse().unwrap();
    assert_eq!(reparsed.tag_value("val"), Some("a b;c\\d\re\nf"));
}

#[test]
fn test_tags_from_wire_are_unescaped() {
    let msg: Message = "@key=semi\\:colon\\sand\\\\slash PING".parse().unwrap();
    assert_eq!(msg.tag_value("key"), Some("semi;colon and\\slash"));
}

#[test]
fn test_exact_budget_line_not_split() {
    let ctx = SplitContext {
        max_length: 512,
        overhead: 0,
    };
    let fixed = "PRIVMSG #chan :".len();
    let text = "x".repeat(510 - fixed);
    let frames = split_message(&Message::privmsg("#chan", &text), &ctx);
    assert_eq!(frames.len(), 1);
    // exactly max_length - 2 bytes before CRLF
    assert_eq!(frames[0].len(), 510);
}

#[test]
fn test_split_payloads_concatenate_to_original() {
    let ctx = SplitContext {
        max_length: 100,
        overhead: 30,
    };
    let text = "the quick brown fox jumps over the lazy dog ".repeat(10);
    let frames = split_message(&Message::privmsg("#chan", &text), &ctx);
    assert!(frames.len() > 1);
    let mut joined = String::new();
    for frame in &frames {
        assert!(frame.len() <= 98);
        let msg: Message = frame.parse().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params[0], "#chan");
        joined.push_str(&msg.params[1]);
    }
    assert_eq!(joined, text);
}

#[test]
fn test_split_utf8_never_broken() {
    let ctx = SplitContext {
        max_length: 48,
        overhead: 0,
    };
    let text = "ウィーチャットのようなクライアントです".repeat(4);
    let frames = split_message(&Message::privmsg("#c", &text), &ctx);
    let mut joined = String::new();
    for frame in frames {
        // would panic on a broken code point
        let msg: Message = frame.parse().unwrap();
        joined.push_str(&msg.params[1]);
    }
    assert_eq!(joined, text);
}

#[test]
fn test_casemap_fold_laws() {
    for mapping in [
        CaseMapping::Rfc1459,
        CaseMapping::StrictRfc1459,
        CaseMapping::Ascii,
    ] {
        for s in ["Nick[One]", "other\\Nick", "UPPER~lower^", "{braces}"] {
            assert_eq!(mapping.fold(&mapping.fold(s)), mapping.fold(s));
        }
    }
}

#[test]
fn test_rfc1459_fold_equivalences() {
    let mapping = CaseMapping::Rfc1459;
    assert!(mapping.eq("nick[a]", "NICK{A}"));
    assert!(mapping.eq("back\\slash", "BACK|SLASH"));
    assert!(mapping.eq("tilde~", "TILDE^"));
    assert!(!CaseMapping::Ascii.eq("nick[a]", "NICK{A}"));
}

#[test]
fn test_tag_type_equality() {
    assert_eq!(Tag::new("time", Some("x")), Tag::new("time", Some("x")));
    assert_ne!(Tag::new("time", Some("x")), Tag::new("time", None));
}
