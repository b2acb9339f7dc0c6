//! # slirc-client
//!
//! The client-side IRC protocol core: per-server state, IRCv3
//! capability negotiation, SASL, batches, message tags, redirects and
//! a reconnecting anti-flood send pipeline.
//!
//! ## Features
//!
//! - IRC message parsing with tags, prefixes, commands, and parameters
//! - Command-aware outbound splitting (PRIVMSG text, JOIN pairs,
//!   `draft/multiline` batches)
//! - Capability negotiation (CAP LS 302 through NEW/DEL) and SASL
//!   (PLAIN, EXTERNAL, SCRAM-SHA-{1,256,512}, ECDSA-NIST256P-CHALLENGE)
//! - Batch assembly with nesting and multiline reconstruction
//! - Redirection: programmatic capture of command responses
//! - Priority out-queues with anti-flood pacing
//! - Optional Tokio connection layer with TLS and fingerprint pinning
//!
//! ## Design
//!
//! The protocol core is sans-IO: [`Session`] consumes decoded inbound
//! bytes plus a caller-supplied clock and produces wire frames and
//! [`Event`]s. The Tokio layer (`transport`, `conn`, `client`, behind
//! the default `tokio` feature) drives it against real sockets.
//!
//! ## Quick Start
//!
//! ### Driving a session by hand
//!
//! ```rust
//! use chrono::Utc;
//! use slirc_client::{Session, ServerOptions};
//!
//! let opts = ServerOptions {
//!     name: "example".to_string(),
//!     addresses: "irc.example.org".to_string(),
//!     nicks: "mynick".to_string(),
//!     ..ServerOptions::default()
//! };
//! let mut session = Session::new(opts);
//! let now = Utc::now();
//!
//! session.on_socket_connected(now, false);
//! // frames to write: CAP LS 302, NICK, USER
//! let frames = session.take_outgoing();
//! assert!(frames.iter().any(|f| f == "CAP LS 302"));
//!
//! session.receive_bytes(now, b":irc.example.org CAP * LS :\r\n");
//! session.receive_bytes(now, b":irc.example.org 001 mynick :Welcome\r\n");
//! assert!(session.state.is_connected);
//! ```
//!
//! ### Parsing IRC messages
//!
//! ```rust
//! use slirc_client::Message;
//!
//! let raw = "@time=2023-01-01T12:00:00Z :nick!user@host PRIVMSG #channel :Hello!";
//! let message: Message = raw.parse().expect("valid IRC message");
//! assert_eq!(message.command, "PRIVMSG");
//! assert_eq!(message.tag_value("time"), Some("2023-01-01T12:00:00Z"));
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod batch;
pub mod caps;
pub mod casemap;
pub mod colors;
pub mod ctcp;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod ignore;
pub mod isupport;
pub mod message;
pub mod mode;
pub mod options;
pub mod outqueue;
pub mod prefix;
pub mod redirect;
pub mod sasl;
pub mod server;
pub mod session;
pub mod util;

#[cfg(feature = "tokio")]
pub mod client;
#[cfg(feature = "tokio")]
pub mod conn;
#[cfg(feature = "tokio")]
pub mod transport;

pub use self::batch::{Batch, BatchEngine};
pub use self::caps::{CapAction, CapConfig, CapEngine, SUPPORTED_CAPS};
pub use self::casemap::CaseMapping;
pub use self::colors::FormattedStringExt;
pub use self::ctcp::Ctcp;
pub use self::error::{MessageParseError, ModeParseError, ProtocolError};
pub use self::event::{DisplayLine, Event, Target, TypingState};
pub use self::ignore::{IgnoreList, IgnorePolicy};
pub use self::isupport::{ChanModes, Isupport, IsupportEntry, PrefixSpec};
pub use self::message::{Message, MultilineLimits, SplitContext, Tag};
pub use self::mode::{ModeChange, ModeClass, ModeTable};
pub use self::options::{CharsetScope, NoEval, OptionEvaluator, ServerAddress, ServerOptions};
pub use self::outqueue::{OutQueue, Priority};
pub use self::prefix::Prefix;
pub use self::redirect::{CompletionState, RedirectCompletion, RedirectEngine};
pub use self::sasl::{SaslFailPolicy, SaslMechanism, SaslSession};
pub use self::server::{Channel, ChannelType, Nick, NotifyEntry, ServerState};
pub use self::session::{Modifier, ServerSnapshot, Session, TickAction};

#[cfg(feature = "tokio")]
pub use self::client::Client;
#[cfg(feature = "tokio")]
pub use self::transport::Transport;
