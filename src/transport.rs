//! Socket transport: plain TCP, TLS, or a fake no-socket stream for
//! `fake:` test servers.
//!
//! The transport hands raw byte chunks to the session, which owns the
//! per-server unterminated buffer and line framing. Writes take one
//! frame (without CRLF) and append the terminator.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::warn;

/// Read buffer size for one `recv`.
pub const RECV_CHUNK: usize = 4096;

#[allow(clippy::large_enum_variant)]
pub enum Transport {
    Tcp {
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
    },
    Tls {
        reader: ReadHalf<TlsStream<TcpStream>>,
        writer: WriteHalf<TlsStream<TcpStream>>,
    },
    /// `fake:` server: reads pend forever, writes are discarded.
    Fake,
}

impl Transport {
    pub fn tcp(stream: TcpStream) -> Self {
        if let Err(e) = Self::enable_keepalive(&stream) {
            warn!("failed to enable TCP keepalive: {}", e);
        }

        let (reader, writer) = stream.into_split();
        Self::Tcp { reader, writer }
    }

    fn enable_keepalive(stream: &TcpStream) -> Result<()> {
        use socket2::{SockRef, TcpKeepalive};
        use std::time::Duration;

        let sock = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(120))
            .with_interval(Duration::from_secs(30));

        sock.set_tcp_keepalive(&keepalive)?;
        Ok(())
    }

    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::Tls { reader, writer }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    pub fn is_fake(&self) -> bool {
        matches!(self, Self::Fake)
    }

    /// Read one chunk of raw bytes. `Ok(None)` means the peer closed
    /// the connection.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<Option<usize>> {
        let n = match self {
            Self::Tcp { reader, .. } => reader.read(buf).await?,
            Self::Tls { reader, .. } => reader.read(buf).await?,
            // no socket: block until the connection is dropped
            Self::Fake => return std::future::pending().await,
        };
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(n))
        }
    }

    /// Write one frame, appending CRLF.
    pub async fn write_frame(&mut self, frame: &str) -> std::io::Result<()> {
        let mut data = Vec::with_capacity(frame.len() + 2);
        data.extend_from_slice(frame.as_bytes());
        data.extend_from_slice(b"\r\n");
        match self {
            Self::Tcp { writer, .. } => {
                writer.write_all(&data).await?;
                writer.flush().await
            }
            Self::Tls { writer, .. } => {
                writer.write_all(&data).await?;
                writer.flush().await
            }
            Self::Fake => Ok(()),
        }
    }
}

/// Build a rustls client config honoring `tls_verify` and fingerprint
/// pinning.
pub fn tls_client_config(
    verify: bool,
    fingerprints: Vec<String>,
) -> Arc<tokio_rustls::rustls::ClientConfig> {
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    if !verify || !fingerprints.is_empty() {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedVerifier { fingerprints }))
            .with_no_client_auth();
        return Arc::new(config);
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

/// Certificate verifier used with `tls_verify off` or fingerprint
/// pins. With pins configured, the leaf digest must match one of
/// them; the algorithm follows the hex length (40/64/128 for
/// SHA-1/SHA-256/SHA-512). Expiration checks are skipped when a pin
/// is set.
#[derive(Debug)]
struct PinnedVerifier {
    fingerprints: Vec<String>,
}

impl PinnedVerifier {
    fn pin_matches(&self, cert_der: &[u8]) -> bool {
        use sha1::{Digest as _, Sha1};
        use sha2::{Sha256, Sha512};

        self.fingerprints.iter().any(|pin| {
            let pin = pin.trim().to_ascii_lowercase();
            let digest = match pin.len() {
                40 => hex_encode(&Sha1::digest(cert_der)),
                64 => hex_encode(&Sha256::digest(cert_der)),
                128 => hex_encode(&Sha512::digest(cert_der)),
                _ => return false,
            };
            digest == pin
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &tokio_rustls::rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> Result<tokio_rustls::rustls::client::danger::ServerCertVerified, tokio_rustls::rustls::Error>
    {
        if self.fingerprints.is_empty() || self.pin_matches(end_entity.as_ref()) {
            Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
        } else {
            Err(tokio_rustls::rustls::Error::General(
                "certificate fingerprint does not match any configured pin".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<tokio_rustls::rustls::client::danger::HandshakeSignatureValid, tokio_rustls::rustls::Error>
    {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<tokio_rustls::rustls::client::danger::HandshakeSignatureValid, tokio_rustls::rustls::Error>
    {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        use tokio_rustls::rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ED25519,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
        ]
    }
}
