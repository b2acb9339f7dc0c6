//! End-to-end session scenarios: nick collision fallback, SASL PLAIN
//! handshake, redirect capture and reconnect backoff, driven through
//! the sans-IO session with a scripted server.

use chrono::{Duration, Utc};
use slirc_client::{
    CompletionState, Event, Priority, ServerOptions, Session, TickAction,
};

fn feed(session: &mut Session, line: &str) {
    let now = Utc::now();
    session.receive_bytes(now, format!("{}\r\n", line).as_bytes());
}

fn outgoing(session: &mut Session) -> Vec<String> {
    session.take_outgoing()
}

#[test]
fn test_scenario_nick_collision_walks_list() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice,alice_,alice2".to_string(),
        capabilities: String::new(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();

    session.on_socket_connected(now, false);
    let frames = outgoing(&mut session);
    assert!(frames.contains(&"NICK alice".to_string()));

    feed(&mut session, ":irc 433 * alice :Nickname is already in use");
    assert_eq!(outgoing(&mut session), vec!["NICK alice_"]);

    feed(&mut session, ":irc 433 * alice_ :Nickname is already in use");
    assert_eq!(outgoing(&mut session), vec!["NICK alice2"]);

    feed(&mut session, ":irc 001 alice2 :Welcome");
    assert_eq!(session.state.nick.as_deref(), Some("alice2"));
    assert!(session.state.is_connected);
}

#[test]
fn test_scenario_nick_exhaustion_generates_alternates_then_disconnects() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        capabilities: String::new(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    session.on_socket_connected(Utc::now(), false);
    let _ = outgoing(&mut session);

    // the single-entry list is exhausted right away; underscores grow
    // the nick to 9 chars, then digits replace the tail
    let mut tried = vec!["alice".to_string()];
    for _ in 0..110 {
        let current = tried.last().unwrap().clone();
        feed(
            &mut session,
            &format!(":irc 433 * {} :Nickname is already in use", current),
        );
        let frames = outgoing(&mut session);
        match frames.iter().find(|f| f.starts_with("NICK ")) {
            Some(frame) => tried.push(frame.trim_start_matches("NICK ").to_string()),
            None => break,
        }
        if session.take_disconnect_request().is_some() {
            break;
        }
    }
    assert!(tried.contains(&"alice_".to_string()));
    assert!(tried.contains(&"alice____".to_string()));
    assert!(tried.contains(&"alice___1".to_string()));
    // every generated nick respects the 9-char limit
    assert!(tried.iter().all(|n| n.chars().count() <= 9));
}

#[test]
fn test_scenario_cap_sasl_plain() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        capabilities: "sasl".to_string(),
        sasl_mechanism: "plain".to_string(),
        sasl_username: "u".to_string(),
        sasl_password: "p".to_string(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();

    session.on_socket_connected(now, false);
    let frames = outgoing(&mut session);
    assert!(frames.contains(&"CAP LS 302".to_string()));

    feed(&mut session, ":irc CAP * LS :sasl");
    assert_eq!(outgoing(&mut session), vec!["CAP REQ :sasl"]);

    feed(&mut session, ":irc CAP * ACK :sasl");
    assert_eq!(outgoing(&mut session), vec!["AUTHENTICATE PLAIN"]);

    feed(&mut session, "AUTHENTICATE +");
    assert_eq!(outgoing(&mut session), vec!["AUTHENTICATE dQB1AHA="]);

    feed(&mut session, ":irc 903 alice :SASL authentication successful");
    assert_eq!(outgoing(&mut session), vec!["CAP END"]);
    let events = session.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SaslOutcome { success: true, .. })));

    feed(&mut session, ":irc 001 alice :Welcome");
    assert!(session.state.is_connected);
}

#[test]
fn test_scenario_sasl_failure_policy_continue() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        capabilities: "sasl".to_string(),
        sasl_username: "u".to_string(),
        sasl_password: "wrong".to_string(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc CAP * LS :sasl");
    feed(&mut session, ":irc CAP * ACK :sasl");
    let _ = outgoing(&mut session);

    feed(&mut session, ":irc 904 alice :SASL authentication failed");
    // continue: CAP END still closes the bracket, no disconnect
    assert_eq!(outgoing(&mut session), vec!["CAP END"]);
    assert!(session.take_disconnect_request().is_none());
}

#[test]
fn test_scenario_sasl_failure_policy_reconnect() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        capabilities: "sasl".to_string(),
        sasl_username: "u".to_string(),
        sasl_password: "wrong".to_string(),
        sasl_fail: slirc_client::SaslFailPolicy::Reconnect,
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    session.on_socket_connected(Utc::now(), false);
    feed(&mut session, ":irc CAP * LS :sasl");
    feed(&mut session, ":irc CAP * ACK :sasl");
    feed(&mut session, ":irc 904 alice :SASL authentication failed");
    let request = session.take_disconnect_request().expect("disconnect requested");
    assert!(request.reconnect);
}

#[test]
fn test_scenario_whois_redirect_capture() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "me".to_string(),
        capabilities: String::new(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc 001 me :Welcome");
    let _ = outgoing(&mut session);
    let _ = session.take_events();

    session
        .redirects
        .create("whois", Some("alice"), None)
        .expect("whois pattern exists");
    session.send(Some(Priority::High), "WHOIS alice", now);
    assert_eq!(outgoing(&mut session), vec!["WHOIS alice"]);

    feed(&mut session, ":irc 311 me alice ident host * :Alice");
    feed(&mut session, ":irc 312 me alice irc.example.org :Server info");
    feed(&mut session, ":irc 319 me alice :#chan1 #chan2");
    feed(&mut session, ":irc 318 me alice :End of /WHOIS list.");

    let events = session.take_events();
    // all four lines suppressed from display
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::Display(_))));
    let completion = events
        .iter()
        .find_map(|e| match e {
            Event::Redirect(c) => Some(c),
            _ => None,
        })
        .expect("redirect completion");
    assert_eq!(completion.state, CompletionState::Done);
    assert_eq!(completion.lines.len(), 4);
    assert!(completion.lines[0].contains("311"));
    assert!(completion.lines[3].contains("318"));
    // raw-in signals still fired for captured lines
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::RawIn { .. }))
            .count(),
        4
    );
}

#[test]
fn test_scenario_reconnect_backoff_sequence() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        autoreconnect: true,
        autoreconnect_delay: 10,
        autoreconnect_delay_growing: 2,
        autoreconnect_delay_max: 120,
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let mut now = Utc::now();

    // three refused attempts: delays 10, 20, 40
    for expected in [10i64, 20, 40] {
        session.on_disconnected(now, "connection refused", false);
        assert_eq!(session.state.reconnect_delay, expected);
        assert!(session
            .tick(now + Duration::seconds(expected - 1))
            .is_empty());
        now = now + Duration::seconds(expected);
        assert_eq!(session.tick(now), vec![TickAction::Reconnect]);
    }

    // a successful registration resets the delay
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc 001 alice :Welcome");
    assert_eq!(session.state.reconnect_delay, 0);
}

#[test]
fn test_scenario_ping_answered_immediately() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        anti_flood: 2000,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc CAP * LS :");
    feed(&mut session, ":irc 001 alice :Welcome");
    let _ = outgoing(&mut session);

    // queue a couple of user messages, then a server PING arrives
    session.send(None, "PRIVMSG #a :one", now);
    session.send(None, "PRIVMSG #a :two", now);
    let _ = outgoing(&mut session);
    feed(&mut session, "PING :token-1234");
    let frames = outgoing(&mut session);
    // the PONG leaves on the very next drain, without flushing the
    // high queue wholesale
    assert!(frames.contains(&"PONG :token-1234".to_string()));
}

#[test]
fn test_trailing_spaces_stripped_unless_table_keeps_them() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc 001 alice :Welcome");
    feed(&mut session, ":alice!u@h JOIN #c");
    feed(&mut session, ":bob!u@h JOIN #c");
    let _ = session.take_events();

    // PART reasons lose their trailing spaces before the handler runs
    feed(&mut session, ":bob!u@h PART #c :bye  ");
    let events = session.take_events();
    let part_line = events
        .iter()
        .find_map(|e| match e {
            Event::Display(line) if line.has_tag("irc_part") => Some(line.text.clone()),
            _ => None,
        })
        .expect("part display");
    assert!(part_line.ends_with("(bye)"), "got {:?}", part_line);

    // TOPIC keeps trailing spaces: they are part of the topic text
    feed(&mut session, ":bob!u@h JOIN #c");
    feed(&mut session, ":bob!u@h TOPIC #c :padded  ");
    assert_eq!(
        session
            .state
            .find_channel("#c")
            .unwrap()
            .topic
            .as_deref(),
        Some("padded  ")
    );
}

#[test]
fn test_scenario_channel_forward_470() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc 001 alice :Welcome");
    feed(&mut session, ":alice!u@h JOIN #linux");
    assert!(session.state.find_channel("#linux").is_some());

    feed(
        &mut session,
        ":irc 470 alice #linux ##linux :Forwarding to another channel",
    );
    assert!(session.state.find_channel("##linux").is_some());
    let events = session.take_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ChannelForwarded { from, to } if from == "#linux" && to == "##linux"
    )));
}

#[test]
fn test_scenario_snapshot_round_trip_fields() {
    let opts = ServerOptions {
        name: "srv".to_string(),
        nicks: "alice".to_string(),
        anti_flood: 0,
        ..ServerOptions::default()
    };
    let mut session = Session::new(opts);
    let now = Utc::now();
    session.on_socket_connected(now, false);
    feed(&mut session, ":irc 001 alice :Welcome");
    feed(&mut session, ":alice!u@h JOIN #c");
    feed(&mut session, ":bob!u@h JOIN #c");
    feed(&mut session, ":irc CAP * LS :"); // no-op

    let snapshot = session.snapshot();
    assert_eq!(snapshot.name, "srv");
    assert_eq!(snapshot.nick.as_deref(), Some("alice"));
    assert!(snapshot.is_connected);
    assert_eq!(snapshot.channels.len(), 1);
    assert_eq!(snapshot.channels[0].0, "#c");
    assert_eq!(snapshot.channels[0].1.len(), 2);
}
