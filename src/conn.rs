//! Connection establishment: address rotation, optional proxy, TCP
//! dial with timeout, TLS handshake with verification or fingerprint
//! pinning, and `fake:` no-socket servers.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::error::ConnectError;
use crate::options::{ServerAddress, ServerOptions};
use crate::server::ServerState;
use crate::transport::{tls_client_config, Transport};

/// A resolved proxy endpoint (HTTP CONNECT).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

/// Resolves the `proxy` option name into a proxy endpoint; the
/// registry itself lives in the surrounding application.
pub trait ProxyResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<ProxyConfig>;
}

/// Registry that knows no proxies.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProxies;

impl ProxyResolver for NoProxies {
    fn resolve(&self, _name: &str) -> Option<ProxyConfig> {
        None
    }
}

/// Pick the address to dial and account for the attempt.
/// `index_current_address` stays within the list; a full rotation
/// wraps back to index 0.
pub fn current_address<'a>(
    state: &mut ServerState,
    addresses: &'a [ServerAddress],
) -> Option<&'a ServerAddress> {
    if addresses.is_empty() {
        return None;
    }
    state.addresses_count = addresses.len();
    if state.index_current_address >= addresses.len() {
        state.index_current_address = 0;
    }
    addresses.get(state.index_current_address)
}

/// Rotate to the next address after an unreachable endpoint.
pub fn rotate_address(state: &mut ServerState) {
    if state.addresses_count > 0 {
        state.index_current_address =
            (state.index_current_address + 1) % state.addresses_count;
    }
}

/// One connection attempt to `address`.
pub async fn connect_once(
    opts: &ServerOptions,
    address: &ServerAddress,
    proxy: Option<ProxyConfig>,
    fingerprint: &str,
) -> Result<Transport, ConnectError> {
    if address.fake {
        // no socket; sends are discarded and the connection is
        // treated as successful
        info!(host = %address.host, "fake server connected (1.2.3.4)");
        return Ok(Transport::Fake);
    }

    let timeout = Duration::from_secs(opts.connection_timeout.max(1) as u64);
    let stream = match proxy {
        Some(proxy) => connect_via_proxy(&proxy, address, timeout).await?,
        None => dial_tcp(&address.host, address.port, timeout).await?,
    };

    if !opts.tls {
        return Ok(Transport::tcp(stream));
    }

    let fingerprints: Vec<String> = fingerprint
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let config = tls_client_config(opts.tls_verify, fingerprints);
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(address.host.clone())
        .map_err(|e| ConnectError::TlsInit(e.to_string()))?;

    let handshake = connector.connect(server_name, stream);
    let tls_stream = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(|e| ConnectError::TlsHandshake(e.to_string()))?;
    Ok(Transport::tls(tls_stream))
}

async fn dial_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let target = format!("{}:{}", host, port);
    debug!(%target, "dialing");
    let connect = TcpStream::connect(&target);
    match tokio::time::timeout(timeout, connect).await {
        Err(_) => Err(ConnectError::Timeout),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ConnectError::AddressNotFound(host.to_string()))
        }
        Ok(Err(e)) => Err(ConnectError::ConnectionRefused(e)),
        Ok(Ok(stream)) => Ok(stream),
    }
}

/// HTTP CONNECT through the proxy, then hand back the tunneled stream.
async fn connect_via_proxy(
    proxy: &ProxyConfig,
    address: &ServerAddress,
    timeout: Duration,
) -> Result<TcpStream, ConnectError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = dial_tcp(&proxy.host, proxy.port, timeout).await?;
    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = address.host,
        port = address.port,
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ConnectError::Proxy(e.to_string()))?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        let read = tokio::time::timeout(timeout, stream.read(&mut byte))
            .await
            .map_err(|_| ConnectError::Timeout)?
            .map_err(|e| ConnectError::Proxy(e.to_string()))?;
        if read == 0 {
            return Err(ConnectError::Proxy("proxy closed the connection".to_string()));
        }
        response.push(byte[0]);
        if response.len() > 4096 {
            return Err(ConnectError::Proxy("oversized proxy response".to_string()));
        }
    }
    let status = String::from_utf8_lossy(&response);
    let ok = status
        .lines()
        .next()
        .map(|l| l.contains(" 200 "))
        .unwrap_or(false);
    if !ok {
        return Err(ConnectError::Proxy(
            status.lines().next().unwrap_or("bad proxy status").to_string(),
        ));
    }
    Ok(stream)
}

/// Whether a failure means the endpoint is unreachable and the
/// address index should rotate (handshake timing problems retry the
/// same endpoint).
pub fn should_rotate(error: &ConnectError) -> bool {
    !matches!(error, ConnectError::TlsHandshake(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ServerOptions;

    fn addresses() -> Vec<ServerAddress> {
        ServerOptions::parse_addresses("a.example.org,b.example.org,c.example.org", false)
    }

    #[test]
    fn test_address_rotation_wraps() {
        let opts = ServerOptions::default();
        let mut state = ServerState::new(&opts);
        let addrs = addresses();

        assert_eq!(current_address(&mut state, &addrs).unwrap().host, "a.example.org");
        rotate_address(&mut state);
        assert_eq!(current_address(&mut state, &addrs).unwrap().host, "b.example.org");
        rotate_address(&mut state);
        rotate_address(&mut state);
        // three failures on a three-entry list wrap back to index 0
        assert_eq!(current_address(&mut state, &addrs).unwrap().host, "a.example.org");
        assert!(state.index_current_address < addrs.len());
    }

    #[test]
    fn test_empty_address_list() {
        let opts = ServerOptions::default();
        let mut state = ServerState::new(&opts);
        assert!(current_address(&mut state, &[]).is_none());
    }

    #[test]
    fn test_should_rotate() {
        assert!(should_rotate(&ConnectError::Timeout));
        assert!(should_rotate(&ConnectError::AddressNotFound("x".to_string())));
        assert!(!should_rotate(&ConnectError::TlsHandshake("pin".to_string())));
    }

    #[tokio::test]
    async fn test_fake_address_connects_without_socket() {
        let opts = ServerOptions::default();
        let addrs = ServerOptions::parse_addresses("fake:testserver", false);
        let transport = connect_once(&opts, &addrs[0], None, "").await.unwrap();
        assert!(transport.is_fake());
    }
}
