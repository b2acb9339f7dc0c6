//! ECDSA-NIST256P-CHALLENGE SASL mechanism.
//!
//! The server sends a random challenge; the client answers with an
//! ECDSA (P-256) signature made with the private key configured in the
//! `sasl_key` option. Exchange:
//!
//! 1. Server: `AUTHENTICATE +` — client replies with its account name.
//! 2. Server: base64 challenge — client replies with the base64 DER
//!    signature of the decoded challenge.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;

use super::{decode_base64, SaslError};

/// ECDSA challenge signer for one authentication attempt.
pub struct EcdsaClient {
    username: String,
    signing_key: SigningKey,
}

impl EcdsaClient {
    /// Load the signing key from PEM (PKCS#8 or SEC1).
    pub fn from_pem(username: &str, pem: &str) -> Result<Self, SaslError> {
        let signing_key = match SigningKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(_) => p256::SecretKey::from_sec1_pem(pem)
                .map(SigningKey::from)
                .map_err(|e| SaslError::Key(e.to_string()))?,
        };
        Ok(EcdsaClient {
            username: username.to_string(),
            signing_key,
        })
    }

    /// First response: the account name being authenticated.
    pub fn first_message(&self) -> String {
        BASE64.encode(self.username.as_bytes())
    }

    /// Sign the decoded challenge; returns the base64 DER signature.
    pub fn sign_challenge(&self, challenge_b64: &str) -> Result<String, SaslError> {
        let challenge = decode_base64(challenge_b64)?;
        if challenge.is_empty() {
            return Err(SaslError::Key("empty challenge".to_string()));
        }
        let signature: Signature = self.signing_key.sign(&challenge);
        Ok(BASE64.encode(signature.to_der().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;
    use p256::pkcs8::EncodePrivateKey;

    fn test_key_pem() -> String {
        let key = SigningKey::from_slice(&[7u8; 32]).unwrap();
        key.to_pkcs8_pem(Default::default()).unwrap().to_string()
    }

    #[test]
    fn test_from_pem_and_first_message() {
        let client = EcdsaClient::from_pem("alice", &test_key_pem()).unwrap();
        assert_eq!(
            BASE64.decode(client.first_message()).unwrap(),
            b"alice"
        );
    }

    #[test]
    fn test_signature_verifies() {
        let pem = test_key_pem();
        let client = EcdsaClient::from_pem("alice", &pem).unwrap();
        let challenge = BASE64.encode(b"random-server-challenge");
        let sig_b64 = client.sign_challenge(&challenge).unwrap();

        let verifying = VerifyingKey::from(&client.signing_key);
        let signature =
            Signature::from_der(&BASE64.decode(sig_b64).unwrap()).unwrap();
        assert!(verifying
            .verify(b"random-server-challenge", &signature)
            .is_ok());
    }

    #[test]
    fn test_bad_pem_rejected() {
        assert!(EcdsaClient::from_pem("alice", "not a key").is_err());
    }

    #[test]
    fn test_empty_challenge_rejected() {
        let client = EcdsaClient::from_pem("alice", &test_key_pem()).unwrap();
        assert!(client.sign_challenge("+").is_err());
    }
}
