//! SCRAM SASL mechanisms (RFC 5802 / RFC 7677).
//!
//! Challenge-response authentication over `AUTHENTICATE` exchanges:
//!
//! 1. Client sends `client-first-message`: `n,,n=user,r=nonce`
//! 2. Server sends `server-first-message`: `r=nonce+server,s=salt,i=iterations`
//! 3. Client sends `client-final-message`: `c=biws,r=nonce+server,p=proof`
//! 4. Server sends `server-final-message`: `v=verifier`
//!
//! The salted password and auth message are cached between steps and
//! wiped once the attempt completes, either way.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::decode_base64;

/// Hash family backing a SCRAM exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScramAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

/// Errors that can occur during SCRAM authentication.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ScramError {
    /// Base64 decoding failed.
    #[error("invalid base64 encoding")]
    InvalidEncoding,
    /// Server nonce doesn't extend the client nonce.
    #[error("server nonce doesn't match client nonce")]
    NonceMismatch,
    /// Missing nonce in server message.
    #[error("missing nonce in server message")]
    MissingNonce,
    /// Missing salt in server message.
    #[error("missing salt in server message")]
    MissingSalt,
    /// Missing or invalid iteration count.
    #[error("missing or invalid iteration count")]
    BadIterations,
    /// Server signature verification failed.
    #[error("server verification failed")]
    ServerVerificationFailed,
    /// The exchange was driven out of order.
    #[error("unexpected scram state")]
    OutOfOrder,
    /// Low-level crypto failure (bad key length).
    #[error("crypto failure")]
    Crypto,
}

/// SCRAM client state machine with full proof computation.
pub struct ScramClient {
    algorithm: ScramAlgorithm,
    username: String,
    password: String,
    client_nonce: String,
    /// client-first-message-bare, kept for the auth message.
    client_first_bare: Option<String>,
    /// Cached between client-final and server-final.
    salted_password: Option<Vec<u8>>,
    auth_message: Option<String>,
    started: bool,
    final_sent: bool,
}

impl ScramClient {
    pub fn new(algorithm: ScramAlgorithm, username: &str, password: &str) -> Self {
        ScramClient {
            algorithm,
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: generate_nonce(),
            client_first_bare: None,
            salted_password: None,
            auth_message: None,
            started: false,
            final_sent: false,
        }
    }

    /// Whether the client-first message was already produced.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Whether the client-final message was already produced.
    pub fn final_sent(&self) -> bool {
        self.final_sent
    }

    /// Produce the base64 client-first-message.
    pub fn client_first_message(&mut self) -> String {
        self.started = true;
        let bare = format!("n={},r={}", saslname(&self.username), self.client_nonce);
        let full = format!("n,,{}", bare);
        self.client_first_bare = Some(bare);
        BASE64.encode(full.as_bytes())
    }

    /// Consume the base64 server-first-message, produce the base64
    /// client-final-message with the proof.
    pub fn process_server_first(&mut self, server_first_b64: &str) -> Result<String, ScramError> {
        let bare = self
            .client_first_bare
            .clone()
            .ok_or(ScramError::OutOfOrder)?;
        let decoded =
            decode_base64(server_first_b64).map_err(|_| ScramError::InvalidEncoding)?;
        let server_first =
            String::from_utf8(decoded).map_err(|_| ScramError::InvalidEncoding)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations: Option<u32> = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(decode_base64(value).map_err(|_| ScramError::InvalidEncoding)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(value.parse().map_err(|_| ScramError::BadIterations)?);
            }
        }
        let nonce = nonce.ok_or(ScramError::MissingNonce)?;
        let salt = salt.ok_or(ScramError::MissingSalt)?;
        let iterations = iterations.ok_or(ScramError::BadIterations)?;
        if iterations == 0 {
            return Err(ScramError::BadIterations);
        }
        if !nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let salted = hi(self.algorithm, self.password.as_bytes(), &salt, iterations)?;
        let client_key = hmac(self.algorithm, &salted, b"Client Key")?;
        let stored_key = hash(self.algorithm, &client_key);

        // c=biws is base64("n,,"), the gs2 header without channel binding
        let client_final_without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!("{},{},{}", bare, server_first, client_final_without_proof);
        let client_signature = hmac(self.algorithm, &stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.salted_password = Some(salted);
        self.auth_message = Some(auth_message);
        self.final_sent = true;

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(proof));
        Ok(BASE64.encode(client_final.as_bytes()))
    }

    /// Verify the base64 server-final-message (`v=verifier`).
    pub fn verify_server_final(&mut self, server_final_b64: &str) -> Result<(), ScramError> {
        let salted = self.salted_password.take().ok_or(ScramError::OutOfOrder)?;
        let auth_message = self.auth_message.take().ok_or(ScramError::OutOfOrder)?;

        let decoded =
            decode_base64(server_final_b64).map_err(|_| ScramError::InvalidEncoding)?;
        let server_final =
            String::from_utf8(decoded).map_err(|_| ScramError::InvalidEncoding)?;
        let verifier = server_final
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or(ScramError::ServerVerificationFailed)?;
        let verifier = decode_base64(verifier).map_err(|_| ScramError::InvalidEncoding)?;

        let server_key = hmac(self.algorithm, &salted, b"Server Key")?;
        let server_signature = hmac(self.algorithm, &server_key, auth_message.as_bytes())?;

        self.wipe();
        if server_signature == verifier {
            Ok(())
        } else {
            Err(ScramError::ServerVerificationFailed)
        }
    }

    /// Clear cached secrets.
    pub fn wipe(&mut self) {
        self.password.clear();
        self.client_first_bare = None;
        self.salted_password = None;
        self.auth_message = None;
    }
}

fn hi(
    algorithm: ScramAlgorithm,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, ScramError> {
    match algorithm {
        ScramAlgorithm::Sha1 => {
            let mut out = vec![0u8; 20];
            pbkdf2::pbkdf2::<Hmac<Sha1>>(password, salt, iterations, &mut out)
                .map_err(|_| ScramError::Crypto)?;
            Ok(out)
        }
        ScramAlgorithm::Sha256 => {
            let mut out = vec![0u8; 32];
            pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
                .map_err(|_| ScramError::Crypto)?;
            Ok(out)
        }
        ScramAlgorithm::Sha512 => {
            let mut out = vec![0u8; 64];
            pbkdf2::pbkdf2::<Hmac<Sha512>>(password, salt, iterations, &mut out)
                .map_err(|_| ScramError::Crypto)?;
            Ok(out)
        }
    }
}

fn hmac(algorithm: ScramAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
    match algorithm {
        ScramAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| ScramError::Crypto)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        ScramAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| ScramError::Crypto)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        ScramAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(|_| ScramError::Crypto)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

fn hash(algorithm: ScramAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        ScramAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        ScramAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        ScramAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// Random printable nonce, comma-free as RFC 5802 requires.
fn generate_nonce() -> String {
    let mut bytes = [0u8; 18];
    if getrandom::getrandom(&mut bytes).is_err() {
        // extremely unlikely; fall back to a time-derived value
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        return format!("{}{}", now.as_nanos(), std::process::id());
    }
    BASE64.encode(bytes)
}

/// Escape `=` and `,` in a SCRAM username (RFC 5802 saslname).
fn saslname(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_first_for(client: &ScramClient, salt: &[u8], iterations: u32) -> String {
        let server_first = format!(
            "r={}srvnonce,s={},i={}",
            client.client_nonce,
            BASE64.encode(salt),
            iterations
        );
        BASE64.encode(server_first.as_bytes())
    }

    #[test]
    fn test_client_first_message_shape() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "user", "pencil");
        let first = client.client_first_message();
        let decoded = String::from_utf8(BASE64.decode(first).unwrap()).unwrap();
        assert!(decoded.starts_with("n,,n=user,r="));
        assert!(client.started());
    }

    #[test]
    fn test_username_escaping() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "we=ird,name", "pw");
        let first = client.client_first_message();
        let decoded = String::from_utf8(BASE64.decode(first).unwrap()).unwrap();
        assert!(decoded.contains("n=we=3Dird=2Cname"));
    }

    #[test]
    fn test_full_exchange_against_reference_server() {
        // Simulate the server side with the same primitives and check
        // that the client proof verifies.
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "user", "pencil");
        let first_b64 = client.client_first_message();
        let first = String::from_utf8(BASE64.decode(first_b64).unwrap()).unwrap();
        let bare = first.strip_prefix("n,,").unwrap().to_string();

        let salt = b"saltsalt";
        let iterations = 4096;
        let server_first_b64 = server_first_for(&client, salt, iterations);
        let server_first =
            String::from_utf8(BASE64.decode(&server_first_b64).unwrap()).unwrap();

        let final_b64 = client.process_server_first(&server_first_b64).unwrap();
        let client_final = String::from_utf8(BASE64.decode(final_b64).unwrap()).unwrap();
        let (without_proof, proof_b64) = client_final.rsplit_once(",p=").unwrap();
        let proof = BASE64.decode(proof_b64).unwrap();

        // Server-side recomputation
        let salted = hi(ScramAlgorithm::Sha256, b"pencil", salt, iterations).unwrap();
        let client_key = hmac(ScramAlgorithm::Sha256, &salted, b"Client Key").unwrap();
        let stored_key = hash(ScramAlgorithm::Sha256, &client_key);
        let auth_message = format!("{},{},{}", bare, server_first, without_proof);
        let signature =
            hmac(ScramAlgorithm::Sha256, &stored_key, auth_message.as_bytes()).unwrap();
        let recovered_key: Vec<u8> = proof
            .iter()
            .zip(signature.iter())
            .map(|(p, s)| p ^ s)
            .collect();
        assert_eq!(hash(ScramAlgorithm::Sha256, &recovered_key), stored_key);

        // Server-final verifies on the client
        let server_key = hmac(ScramAlgorithm::Sha256, &salted, b"Server Key").unwrap();
        let server_signature =
            hmac(ScramAlgorithm::Sha256, &server_key, auth_message.as_bytes()).unwrap();
        let server_final = format!("v={}", BASE64.encode(server_signature));
        client
            .verify_server_final(&BASE64.encode(server_final.as_bytes()))
            .unwrap();
    }

    #[test]
    fn test_bad_verifier_rejected() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha1, "user", "pw");
        let _ = client.client_first_message();
        let server_first_b64 = server_first_for(&client, b"salt", 1000);
        let _ = client.process_server_first(&server_first_b64).unwrap();
        let bogus = BASE64.encode(format!("v={}", BASE64.encode(b"nope")).as_bytes());
        assert_eq!(
            client.verify_server_final(&bogus),
            Err(ScramError::ServerVerificationFailed)
        );
    }

    #[test]
    fn test_nonce_mismatch_rejected() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "user", "pw");
        let _ = client.client_first_message();
        let server_first = format!("r=evilnonce,s={},i=4096", BASE64.encode(b"salt"));
        let result = client.process_server_first(&BASE64.encode(server_first.as_bytes()));
        assert_eq!(result, Err(ScramError::NonceMismatch));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "user", "pw");
        let _ = client.client_first_message();
        let server_first = format!("r={}x,s={},i=0", client.client_nonce, BASE64.encode(b"s"));
        let result = client.process_server_first(&BASE64.encode(server_first.as_bytes()));
        assert_eq!(result, Err(ScramError::BadIterations));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "user", "pw");
        let result = client.process_server_first(&BASE64.encode(b"r=x,s=cw==,i=1"));
        assert_eq!(result, Err(ScramError::OutOfOrder));
    }

    #[test]
    fn test_wipe_clears_cache() {
        let mut client = ScramClient::new(ScramAlgorithm::Sha256, "user", "pw");
        let _ = client.client_first_message();
        let server_first_b64 = server_first_for(&client, b"salt", 1000);
        let _ = client.process_server_first(&server_first_b64).unwrap();
        client.wipe();
        assert!(client.salted_password.is_none());
        assert!(client.auth_message.is_none());
        assert!(client.password.is_empty());
    }
}
