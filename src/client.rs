//! Tokio event-loop glue: one spawned task per server joining the
//! connection manager, the transport and the sans-IO [`Session`].
//!
//! The [`Client`] handle sends commands over an mpsc channel; parsed
//! protocol events come back on the returned receiver.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::conn;
use crate::event::Event;
use crate::options::ServerOptions;
use crate::outqueue::Priority;
use crate::session::{Session, TickAction};
use crate::transport::{Transport, RECV_CHUNK};

/// Commands from the application to the connection task.
#[derive(Debug)]
enum Cmd {
    /// Send a raw command line.
    Line {
        priority: Option<Priority>,
        line: String,
    },
    /// Leave a channel; `msg_part` supplies the default reason.
    Part {
        channel: String,
        reason: Option<String>,
    },
    /// Kick a nick; `msg_kick` supplies the default reason.
    Kick {
        channel: String,
        nick: String,
        reason: Option<String>,
    },
    /// Create a redirect before sending its command.
    Redirect {
        pattern: String,
        arg: Option<String>,
        timeout: Option<i64>,
    },
    /// Connect now (used when `autoconnect` is off).
    Connect,
    /// Close the connection; reconnect follows the `autoreconnect`
    /// option.
    Disconnect { reason: String },
    /// Send QUIT and stop the task.
    Quit { reason: Option<String> },
}

/// Handle to one server connection task.
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::Sender<Cmd>,
    name: String,
}

impl Client {
    /// Spawn the connection task. When `autoconnect` is set the dial
    /// starts immediately, otherwise wait for [`Client::connect`].
    pub fn start(opts: ServerOptions) -> (Client, mpsc::Receiver<Event>) {
        Self::start_with_proxies(opts, Box::new(conn::NoProxies))
    }

    /// [`Client::start`] with a proxy registry resolving the `proxy`
    /// option.
    pub fn start_with_proxies(
        opts: ServerOptions,
        proxies: Box<dyn conn::ProxyResolver>,
    ) -> (Client, mpsc::Receiver<Event>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (ev_tx, ev_rx) = mpsc::channel(256);
        let name = opts.name.clone();
        tokio::spawn(main_loop(opts, proxies, cmd_rx, ev_tx));
        (Client { cmd_tx, name }, ev_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send_cmd(&self, cmd: Cmd) {
        if self.cmd_tx.try_send(cmd).is_err() {
            warn!(server = %self.name, "connection task is gone or backlogged");
        }
    }

    /// Send a raw command line with the default (high) priority.
    pub fn send_line(&self, line: &str) {
        self.send_cmd(Cmd::Line {
            priority: None,
            line: line.to_string(),
        });
    }

    /// Send a raw command line with an explicit priority.
    pub fn send_line_with_priority(&self, priority: Priority, line: &str) {
        self.send_cmd(Cmd::Line {
            priority: Some(priority),
            line: line.to_string(),
        });
    }

    pub fn privmsg(&self, target: &str, text: &str) {
        self.send_line(&format!("PRIVMSG {} :{}", target, text));
    }

    pub fn join(&self, channels: &str) {
        self.send_line(&format!("JOIN {}", channels));
    }

    /// Leave a channel. Without a reason the evaluated `msg_part`
    /// option applies.
    pub fn part(&self, channel: &str, reason: Option<&str>) {
        self.send_cmd(Cmd::Part {
            channel: channel.to_string(),
            reason: reason.map(str::to_string),
        });
    }

    /// Kick a nick from a channel. Without a reason the evaluated
    /// `msg_kick` option applies.
    pub fn kick(&self, channel: &str, nick: &str, reason: Option<&str>) {
        self.send_cmd(Cmd::Kick {
            channel: channel.to_string(),
            nick: nick.to_string(),
            reason: reason.map(str::to_string),
        });
    }

    pub fn nick(&self, nick: &str) {
        self.send_line(&format!("NICK {}", nick));
    }

    pub fn away(&self, message: Option<&str>) {
        match message {
            Some(message) => self.send_line(&format!("AWAY :{}", message)),
            None => self.send_line("AWAY"),
        }
    }

    /// Arm a redirect, then send the command it captures.
    pub fn redirect(&self, pattern: &str, arg: Option<&str>, timeout: Option<i64>) {
        self.send_cmd(Cmd::Redirect {
            pattern: pattern.to_string(),
            arg: arg.map(str::to_string),
            timeout,
        });
    }

    pub fn connect(&self) {
        self.send_cmd(Cmd::Connect);
    }

    pub fn disconnect(&self, reason: &str) {
        self.send_cmd(Cmd::Disconnect {
            reason: reason.to_string(),
        });
    }

    /// Send QUIT and stop the connection task.
    pub fn quit(&self, reason: Option<String>) {
        self.send_cmd(Cmd::Quit { reason });
    }
}

async fn read_some(
    transport: &mut Option<Transport>,
    buf: &mut [u8],
) -> std::io::Result<Option<usize>> {
    match transport {
        Some(transport) => transport.read_chunk(buf).await,
        None => std::future::pending().await,
    }
}

async fn main_loop(
    opts: ServerOptions,
    proxies: Box<dyn conn::ProxyResolver>,
    mut cmd_rx: mpsc::Receiver<Cmd>,
    ev_tx: mpsc::Sender<Event>,
) {
    let autoconnect = opts.autoconnect;
    let mut session = Session::new(opts);
    let mut transport: Option<Transport> = None;
    let mut connect_started: Option<chrono::DateTime<Utc>> = None;
    let mut buf = vec![0u8; RECV_CHUNK];

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let flood_ms = session.opts.anti_flood.max(200) as u64;
    let mut flood_timer = tokio::time::interval(Duration::from_millis(flood_ms));

    if autoconnect {
        transport = try_connect(&mut session, proxies.as_ref()).await;
        connect_started = transport.is_some().then(Utc::now);
    }

    loop {
        flush(&mut session, &mut transport, &ev_tx).await;
        if let Some(request) = session.take_disconnect_request() {
            transport = None;
            session.on_disconnected(Utc::now(), "disconnect requested", !request.reconnect);
            flush(&mut session, &mut transport, &ev_tx).await;
        }

        tokio::select! {
            read = read_some(&mut transport, &mut buf) => {
                let now = Utc::now();
                match read {
                    Ok(Some(n)) => session.receive_bytes(now, &buf[..n]),
                    Ok(None) => {
                        transport = None;
                        connect_started = None;
                        session.on_disconnected(now, "connection closed by peer", false);
                    }
                    Err(e) => {
                        transport = None;
                        connect_started = None;
                        session.on_disconnected(now, &format!("read error: {}", e), false);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                let now = Utc::now();
                match cmd {
                    Some(Cmd::Line { priority, line }) => {
                        session.send(priority, &line, now);
                    }
                    Some(Cmd::Part { channel, reason }) => {
                        let reason = reason.or_else(|| {
                            let msg = session.evaluate(&session.opts.msg_part);
                            (!msg.is_empty()).then_some(msg)
                        });
                        let line = match reason {
                            Some(reason) => format!("PART {} :{}", channel, reason),
                            None => format!("PART {}", channel),
                        };
                        session.send(None, &line, now);
                    }
                    Some(Cmd::Kick { channel, nick, reason }) => {
                        let reason = reason.or_else(|| {
                            let msg = session.evaluate(&session.opts.msg_kick);
                            (!msg.is_empty()).then_some(msg)
                        });
                        let line = match reason {
                            Some(reason) => format!("KICK {} {} :{}", channel, nick, reason),
                            None => format!("KICK {} {}", channel, nick),
                        };
                        session.send(None, &line, now);
                    }
                    Some(Cmd::Redirect { pattern, arg, timeout }) => {
                        if session.redirects.create(&pattern, arg.as_deref(), timeout).is_none() {
                            warn!(%pattern, "unknown redirect pattern");
                        }
                    }
                    Some(Cmd::Connect) => {
                        if transport.is_none() {
                            transport = try_connect(&mut session, proxies.as_ref()).await;
                            connect_started = transport.is_some().then(Utc::now);
                        }
                    }
                    Some(Cmd::Disconnect { reason }) => {
                        transport = None;
                        connect_started = None;
                        session.on_disconnected(now, &reason, true);
                    }
                    Some(Cmd::Quit { reason }) => {
                        let line = match reason.or_else(|| {
                            let msg = session.evaluate(&session.opts.msg_quit);
                            (!msg.is_empty()).then_some(msg)
                        }) {
                            Some(reason) => format!("QUIT :{}", reason),
                            None => "QUIT".to_string(),
                        };
                        session.send(Some(Priority::Immediate), &line, now);
                        flush(&mut session, &mut transport, &ev_tx).await;
                        session.on_disconnected(now, "quit", true);
                        flush(&mut session, &mut transport, &ev_tx).await;
                        break;
                    }
                    None => break,
                }
            }

            _ = ticker.tick() => {
                let now = Utc::now();
                // connection watchdog: no 001 within connection_timeout
                if let Some(started) = connect_started {
                    if transport.is_some()
                        && !session.state.is_connected
                        && now - started
                            >= chrono::Duration::seconds(session.opts.connection_timeout.max(1))
                    {
                        transport = None;
                        connect_started = None;
                        session.on_disconnected(now, "connection timeout (no welcome)", false);
                    }
                    if session.state.is_connected {
                        connect_started = None;
                    }
                }
                for action in session.tick(now) {
                    match action {
                        TickAction::Reconnect => {
                            if transport.is_none() {
                                transport = try_connect(&mut session, proxies.as_ref()).await;
                                connect_started = transport.is_some().then(Utc::now);
                            }
                        }
                    }
                }
            }

            _ = flood_timer.tick() => {
                if session.queued_len() > 0 {
                    session.drain_pass(Utc::now());
                }
            }
        }
    }
    debug!(server = %session.state.name, "connection task finished");
}

/// One dial attempt at the current address; failures rotate the
/// address (when the endpoint is unreachable) and schedule the
/// growing-backoff reconnect.
async fn try_connect(
    session: &mut Session,
    proxies: &dyn conn::ProxyResolver,
) -> Option<Transport> {
    let now = Utc::now();
    let addresses = ServerOptions::parse_addresses(
        &session.evaluate(&session.opts.addresses),
        session.opts.tls,
    );
    let address = match conn::current_address(&mut session.state, &addresses) {
        Some(address) => address.clone(),
        None => {
            warn!(server = %session.state.name, "no addresses configured");
            return None;
        }
    };

    session.push_event(Event::Connecting {
        address: format!("{}:{}", address.host, address.port),
    });

    let proxy = if session.opts.proxy.is_empty() {
        None
    } else {
        let resolved = proxies.resolve(&session.opts.proxy);
        if resolved.is_none() {
            warn!(proxy = %session.opts.proxy, "proxy not found in registry");
        }
        resolved
    };

    let fingerprint = session.evaluate(&session.opts.tls_fingerprint);
    match conn::connect_once(&session.opts, &address, proxy, &fingerprint).await {
        Ok(transport) => {
            session.on_socket_connected(now, transport.is_tls());
            Some(transport)
        }
        Err(error) => {
            warn!(server = %session.state.name, %error, "connection failed");
            if conn::should_rotate(&error) {
                conn::rotate_address(&mut session.state);
            }
            session.schedule_reconnect(now);
            session.push_event(Event::Disconnected {
                reason: error.to_string(),
            });
            None
        }
    }
}

/// Write pending frames and forward pending events.
async fn flush(
    session: &mut Session,
    transport: &mut Option<Transport>,
    ev_tx: &mpsc::Sender<Event>,
) {
    for frame in session.take_outgoing() {
        if let Some(transport) = transport.as_mut() {
            if let Err(e) = transport.write_frame(&frame).await {
                warn!("write error: {}", e);
            }
        }
    }
    for event in session.take_events() {
        if ev_tx.send(event).await.is_err() {
            // receiver dropped; events are discarded from here on
            return;
        }
    }
}
