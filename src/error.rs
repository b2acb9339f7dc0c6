//! Error types for the IRC client core.
//!
//! This module defines error types for protocol-level errors,
//! message parsing failures, mode parsing and connection setup.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 decoding error.
    #[error("decode error: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// Message exceeded maximum allowed length.
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    /// Illegal control character in message.
    #[error("illegal control character: {0:?}")]
    IllegalControlChar(char),

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw message string.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },

    /// SASL authentication failed or was aborted.
    #[error("sasl error: {0}")]
    Sasl(#[from] crate::sasl::SaslError),
}

/// Errors encountered when parsing IRC messages.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Command was invalid or missing.
    #[error("invalid command")]
    InvalidCommand,

    /// Not enough arguments for command.
    #[error("not enough arguments for {command}: expected {expected}, got {got}")]
    NotEnoughArguments {
        /// The command that was short on arguments.
        command: String,
        /// Expected number of arguments.
        expected: usize,
        /// Actual number of arguments.
        got: usize,
    },

    /// An argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid message prefix.
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Failed to parse a mode string.
    #[error("invalid mode string: {string}")]
    InvalidModeString {
        /// The raw mode string.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: ModeParseError,
    },

    /// Parsing failed at a given position.
    #[error("parsing failed at position {position}: {context}")]
    ParseContext {
        /// Character position where parsing failed.
        position: usize,
        /// Description of what was being parsed.
        context: String,
    },
}

/// Errors encountered when parsing mode strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModeParseError {
    /// A mode letter that requires an argument had none left to consume.
    #[error("mode '{mode}' requires an argument")]
    MissingArgument {
        /// The mode letter.
        mode: char,
    },

    /// Mode string did not start with '+' or '-' where one was required.
    #[error("missing mode modifier")]
    MissingModeModifier,
}

/// Errors raised while establishing a connection.
#[cfg(feature = "tokio")]
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// Address could not be resolved.
    #[error("address not found: {0}")]
    AddressNotFound(String),

    /// Resolution produced no usable IP address.
    #[error("no IP address for {0}")]
    IpNotFound(String),

    /// TCP connection refused or failed.
    #[error("connection failed: {0}")]
    ConnectionRefused(#[source] std::io::Error),

    /// Proxy connection failed.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// TLS initialization failed.
    #[error("TLS init error: {0}")]
    TlsInit(String),

    /// TLS handshake failed (bad certificate, pin mismatch, ...).
    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    /// The connection attempt timed out.
    #[error("connection timed out")]
    Timeout,

    /// Generic socket error.
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),
}
