//! SASL authentication over IRC `AUTHENTICATE` exchanges.
//!
//! Supported mechanisms: PLAIN, EXTERNAL, SCRAM-SHA-{1,256,512} and
//! ECDSA-NIST256P-CHALLENGE. Each mechanism is a state machine driven
//! by the server's `AUTHENTICATE` payloads; [`SaslSession`] wraps the
//! mechanism, applies the 400-byte response chunking, and tracks the
//! attempt deadline.
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>
//! - RFC 4616 (PLAIN), RFC 5802/7677 (SCRAM)

mod ecdsa;
mod scram;

pub use self::ecdsa::EcdsaClient;
pub use self::scram::{ScramAlgorithm, ScramClient, ScramError};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Maximum length of a single `AUTHENTICATE` payload chunk.
pub const SASL_CHUNK_SIZE: usize = 400;

/// Default attempt deadline, overridable with the `sasl_timeout` option.
pub const DEFAULT_SASL_TIMEOUT_SECS: i64 = 15;

/// Supported SASL authentication mechanisms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SaslMechanism {
    /// PLAIN (RFC 4616): username/password in one response.
    Plain,
    /// EXTERNAL: TLS client certificate, empty response.
    External,
    /// SCRAM-SHA-1 (RFC 5802).
    ScramSha1,
    /// SCRAM-SHA-256 (RFC 7677).
    ScramSha256,
    /// SCRAM-SHA-512.
    ScramSha512,
    /// ECDSA-NIST256P-CHALLENGE: sign the server challenge with a
    /// configured private key.
    EcdsaNist256pChallenge,
}

impl SaslMechanism {
    /// Parse a mechanism name (the `sasl_mechanism` option value).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "EXTERNAL" => Some(Self::External),
            "SCRAM-SHA-1" => Some(Self::ScramSha1),
            "SCRAM-SHA-256" => Some(Self::ScramSha256),
            "SCRAM-SHA-512" => Some(Self::ScramSha512),
            "ECDSA-NIST256P-CHALLENGE" => Some(Self::EcdsaNist256pChallenge),
            _ => None,
        }
    }

    /// Canonical mechanism name as sent in `AUTHENTICATE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
            Self::EcdsaNist256pChallenge => "ECDSA-NIST256P-CHALLENGE",
        }
    }

    fn scram_algorithm(&self) -> Option<ScramAlgorithm> {
        match self {
            Self::ScramSha1 => Some(ScramAlgorithm::Sha1),
            Self::ScramSha256 => Some(ScramAlgorithm::Sha256),
            Self::ScramSha512 => Some(ScramAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy applied when authentication fails (`sasl_fail` option).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaslFailPolicy {
    /// Keep the connection, register without authentication.
    #[default]
    Continue,
    /// Drop the connection and schedule a reconnect.
    Reconnect,
    /// Drop the connection and stay down.
    Disconnect,
}

impl SaslFailPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "continue" => Some(Self::Continue),
            "reconnect" => Some(Self::Reconnect),
            "disconnect" => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// Errors raised by the SASL engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SaslError {
    /// Payload was not valid base64.
    #[error("invalid base64 in AUTHENTICATE payload")]
    InvalidBase64(#[from] base64::DecodeError),

    /// SCRAM exchange failed.
    #[error("scram: {0}")]
    Scram(#[from] ScramError),

    /// The configured private key could not be used.
    #[error("ecdsa key error: {0}")]
    Key(String),

    /// The configured mechanism needs credentials that are missing.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// The attempt exceeded `sasl_timeout`.
    #[error("sasl timeout")]
    Timeout,
}

/// Credentials gathered from server options before starting SASL.
#[derive(Clone, Debug, Default)]
pub struct SaslCredentials {
    /// `sasl_username` (authcid).
    pub username: String,
    /// `sasl_password`.
    pub password: String,
    /// `sasl_key` file contents (PEM), for ECDSA.
    pub key_pem: Option<String>,
}

/// Encode credentials for the PLAIN mechanism:
/// `base64(authzid NUL authcid NUL password)` with an empty authzid.
pub fn encode_plain(username: &str, password: &str) -> String {
    let payload = format!("\0{}\0{}", username, password);
    BASE64.encode(payload.as_bytes())
}

/// PLAIN with an explicit authorization identity. The session uses
/// the account name for both identities, as servers expect from
/// clients authenticating as themselves.
pub fn encode_plain_with_authzid(authzid: &str, authcid: &str, password: &str) -> String {
    let payload = format!("{}\0{}\0{}", authzid, authcid, password);
    BASE64.encode(payload.as_bytes())
}

/// Encode an EXTERNAL response: `+` or the authorization identity.
pub fn encode_external(authzid: Option<&str>) -> String {
    match authzid {
        Some(id) if !id.is_empty() => BASE64.encode(id.as_bytes()),
        _ => "+".to_owned(),
    }
}

/// Decode a base64 `AUTHENTICATE` payload; `+` decodes to empty.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if encoded == "+" {
        return Ok(Vec::new());
    }
    BASE64.decode(encoded)
}

/// Split an encoded response into `AUTHENTICATE` chunks.
///
/// Responses longer than 400 bytes are split; a response whose final
/// chunk is exactly 400 bytes is terminated with an extra `+` line.
/// An empty response is a single `+`.
pub fn chunk_payload(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return vec!["+".to_string()];
    }
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK_SIZE)
        // base64 is always ASCII
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    if encoded.len() % SASL_CHUNK_SIZE == 0 {
        chunks.push("+".to_string());
    }
    chunks
}

enum MechanismState {
    Plain,
    External,
    Scram(ScramClient),
    Ecdsa(EcdsaClient),
}

/// One SASL authentication attempt.
///
/// Created when the `sasl` capability is acknowledged; consumed by the
/// dispatcher on each server `AUTHENTICATE` line and on the 90x
/// numerics. Success or failure must call [`SaslSession::finish`] so
/// cached secrets are wiped.
pub struct SaslSession {
    mechanism: SaslMechanism,
    state: MechanismState,
    deadline: DateTime<Utc>,
    done: bool,
}

impl SaslSession {
    /// Start an attempt. Returns the session; the caller sends
    /// `AUTHENTICATE <mechanism>`.
    pub fn start(
        mechanism: SaslMechanism,
        credentials: &SaslCredentials,
        now: DateTime<Utc>,
        timeout_secs: i64,
    ) -> Result<Self, SaslError> {
        let state = match mechanism {
            SaslMechanism::Plain => {
                if credentials.username.is_empty() {
                    return Err(SaslError::MissingCredential("sasl_username"));
                }
                MechanismState::Plain
            }
            SaslMechanism::External => MechanismState::External,
            SaslMechanism::ScramSha1 | SaslMechanism::ScramSha256 | SaslMechanism::ScramSha512 => {
                let algo = mechanism.scram_algorithm().unwrap_or(ScramAlgorithm::Sha256);
                MechanismState::Scram(ScramClient::new(
                    algo,
                    &credentials.username,
                    &credentials.password,
                ))
            }
            SaslMechanism::EcdsaNist256pChallenge => {
                let pem = credentials
                    .key_pem
                    .as_deref()
                    .ok_or(SaslError::MissingCredential("sasl_key"))?;
                MechanismState::Ecdsa(EcdsaClient::from_pem(&credentials.username, pem)?)
            }
        };
        Ok(SaslSession {
            mechanism,
            state,
            deadline: now + Duration::seconds(timeout_secs.max(1)),
            done: false,
        })
    }

    /// The mechanism of this attempt.
    pub fn mechanism(&self) -> SaslMechanism {
        self.mechanism
    }

    /// Whether the attempt passed its deadline.
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        !self.done && now >= self.deadline
    }

    /// Handle a server `AUTHENTICATE` payload. Returns the
    /// `AUTHENTICATE` response lines to send, already chunked.
    pub fn respond(
        &mut self,
        credentials: &SaslCredentials,
        challenge: &str,
    ) -> Result<Vec<String>, SaslError> {
        match &mut self.state {
            MechanismState::Plain => Ok(chunk_payload(&encode_plain_with_authzid(
                &credentials.username,
                &credentials.username,
                &credentials.password,
            ))),
            MechanismState::External => Ok(vec![encode_external(None)]),
            MechanismState::Scram(client) => {
                if challenge == "+" && !client.started() {
                    Ok(chunk_payload(&client.client_first_message()))
                } else if !client.final_sent() {
                    Ok(chunk_payload(&client.process_server_first(challenge)?))
                } else {
                    client.verify_server_final(challenge)?;
                    Ok(vec!["+".to_string()])
                }
            }
            MechanismState::Ecdsa(client) => {
                if challenge == "+" {
                    Ok(chunk_payload(&client.first_message()))
                } else {
                    Ok(chunk_payload(&client.sign_challenge(challenge)?))
                }
            }
        }
    }

    /// Terminate the attempt (success, failure or abort): wipe cached
    /// SCRAM secrets.
    pub fn finish(&mut self) {
        self.done = true;
        if let MechanismState::Scram(client) = &mut self.state {
            client.wipe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain() {
        let encoded = encode_plain("u", "p");
        let decoded = BASE64.decode(&encoded).unwrap();
        assert_eq!(decoded, b"\0u\0p");
    }

    #[test]
    fn test_encode_plain_with_authzid() {
        let encoded = encode_plain_with_authzid("u", "u", "p");
        let decoded = BASE64.decode(&encoded).unwrap();
        assert_eq!(decoded, b"u\0u\0p");
        assert_eq!(encoded, "dQB1AHA=");
    }

    #[test]
    fn test_encode_external() {
        assert_eq!(encode_external(None), "+");
        let with_id = encode_external(Some("me"));
        assert_eq!(BASE64.decode(&with_id).unwrap(), b"me");
    }

    #[test]
    fn test_chunk_short() {
        assert_eq!(chunk_payload("abc"), vec!["abc"]);
    }

    #[test]
    fn test_chunk_empty_is_plus() {
        assert_eq!(chunk_payload(""), vec!["+"]);
    }

    #[test]
    fn test_chunk_exact_multiple_appends_plus() {
        let payload = "a".repeat(400);
        let chunks = chunk_payload(&payload);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 400);
        assert_eq!(chunks[1], "+");
    }

    #[test]
    fn test_chunk_long() {
        let payload = "a".repeat(500);
        let chunks = chunk_payload(&payload);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 400);
        assert_eq!(chunks[1].len(), 100);
    }

    #[test]
    fn test_mechanism_parse() {
        assert_eq!(SaslMechanism::parse("plain"), Some(SaslMechanism::Plain));
        assert_eq!(
            SaslMechanism::parse("SCRAM-SHA-512"),
            Some(SaslMechanism::ScramSha512)
        );
        assert_eq!(
            SaslMechanism::parse("ecdsa-nist256p-challenge"),
            Some(SaslMechanism::EcdsaNist256pChallenge)
        );
        assert_eq!(SaslMechanism::parse("GSSAPI"), None);
    }

    #[test]
    fn test_fail_policy_parse() {
        assert_eq!(
            SaslFailPolicy::parse("continue"),
            Some(SaslFailPolicy::Continue)
        );
        assert_eq!(
            SaslFailPolicy::parse("reconnect"),
            Some(SaslFailPolicy::Reconnect)
        );
        assert_eq!(
            SaslFailPolicy::parse("disconnect"),
            Some(SaslFailPolicy::Disconnect)
        );
        assert_eq!(SaslFailPolicy::parse("retry"), None);
    }

    #[test]
    fn test_plain_session_flow() {
        let creds = SaslCredentials {
            username: "u".to_string(),
            password: "p".to_string(),
            key_pem: None,
        };
        let now = Utc::now();
        let mut session = SaslSession::start(SaslMechanism::Plain, &creds, now, 15).unwrap();
        let lines = session.respond(&creds, "+").unwrap();
        assert_eq!(lines, vec!["dQB1AHA="]);
        assert!(!session.timed_out(now + Duration::seconds(14)));
        assert!(session.timed_out(now + Duration::seconds(15)));
        session.finish();
        assert!(!session.timed_out(now + Duration::seconds(60)));
    }

    #[test]
    fn test_plain_requires_username() {
        let creds = SaslCredentials::default();
        assert!(matches!(
            SaslSession::start(SaslMechanism::Plain, &creds, Utc::now(), 15),
            Err(SaslError::MissingCredential("sasl_username"))
        ));
    }

    #[test]
    fn test_ecdsa_requires_key() {
        let creds = SaslCredentials {
            username: "u".to_string(),
            password: String::new(),
            key_pem: None,
        };
        assert!(matches!(
            SaslSession::start(SaslMechanism::EcdsaNist256pChallenge, &creds, Utc::now(), 15),
            Err(SaslError::MissingCredential("sasl_key"))
        ));
    }
}
