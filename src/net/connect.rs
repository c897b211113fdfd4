//! HTTP CONNECT handshake and TLS upgrade.
//!
//! # Responsibilities
//! - Open the plaintext TCP connection to the proxy
//! - Send `CONNECT host:port` (with `Proxy-Authorization` when configured)
//! - Wait for the proxy's 2xx acknowledgment
//! - Wrap the tunneled socket in a TLS client session

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::SocketConfig;
use crate::error::ConnectError;
use crate::net::connection::ConnectionSettings;
use crate::net::endpoint::{TargetEndpoint, TunnelEndpoint};
use crate::net::tls::server_name;
use crate::resilience::timeouts::with_connect_timeout;

/// Upper bound on the proxy's CONNECT response head.
const MAX_CONNECT_RESPONSE: usize = 16 * 1024;

/// CONNECT through the proxy, then TLS to the target, bounded by the connect timeout.
pub async fn establish(settings: &ConnectionSettings) -> Result<TlsStream<TcpStream>, ConnectError> {
    with_connect_timeout(settings.connect_timeout, async {
        let tunneled = open_tunnel(&settings.tunnel, &settings.target, &settings.socket).await?;
        upgrade_tls(&settings.connector, &settings.target, tunneled).await
    })
    .await
}

/// Build the CONNECT request sent to the proxy.
pub fn connect_request(tunnel: &TunnelEndpoint, target: &TargetEndpoint) -> String {
    let authority = target.authority();
    match &tunnel.credentials {
        Some(creds) => format!(
            "CONNECT {} HTTP/1.1\r\nHost: {}\r\nProxy-Authorization: {}\r\n\r\n",
            authority,
            authority,
            creds.basic_header()
        ),
        None => format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", authority, authority),
    }
}

/// Open a TCP connection to the proxy and establish a CONNECT tunnel.
pub async fn open_tunnel(
    tunnel: &TunnelEndpoint,
    target: &TargetEndpoint,
    socket: &SocketConfig,
) -> Result<TcpStream, ConnectError> {
    let mut stream = TcpStream::connect(tunnel.address())
        .await
        .map_err(|e| ConnectError::Proxy(format!("{}: {}", tunnel.address(), e)))?;

    apply_socket_options(&stream, socket);

    stream
        .write_all(connect_request(tunnel, target).as_bytes())
        .await
        .map_err(|e| ConnectError::Proxy(format!("failed to send CONNECT: {}", e)))?;

    let status = read_connect_response(&mut stream).await?;
    if !(200..300).contains(&status) {
        return Err(ConnectError::Rejected { status });
    }

    tracing::debug!(proxy = %tunnel.address(), endpoint = %target.authority(), "CONNECT tunnel established");
    Ok(stream)
}

/// Run the TLS client handshake over an established tunnel.
pub async fn upgrade_tls(
    connector: &TlsConnector,
    target: &TargetEndpoint,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, ConnectError> {
    let name = server_name(&target.host).map_err(|e| ConnectError::Tls(e.to_string()))?;
    connector
        .connect(name, stream)
        .await
        .map_err(|e| ConnectError::Tls(e.to_string()))
}

fn apply_socket_options(stream: &TcpStream, socket: &SocketConfig) {
    if socket.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
        }
    }
    if socket.keepalive {
        let socket_ref = socket2::SockRef::from(stream);
        if let Err(e) = socket_ref.set_keepalive(true) {
            tracing::warn!(error = %e, "Failed to set SO_KEEPALIVE");
        }
    }
}

/// Read the proxy's response head and return its status code.
async fn read_connect_response(stream: &mut TcpStream) -> Result<u16, ConnectError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ConnectError::Proxy(format!("failed to read CONNECT response: {}", e)))?;
        if n == 0 {
            return Err(ConnectError::Proxy("proxy closed during CONNECT".into()));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                if len != buf.len() {
                    return Err(ConnectError::Protocol(
                        "unexpected bytes after CONNECT response".into(),
                    ));
                }
                return Ok(response.code.unwrap_or(0));
            }
            Ok(httparse::Status::Partial) if buf.len() < MAX_CONNECT_RESPONSE => continue,
            Ok(httparse::Status::Partial) => {
                return Err(ConnectError::Protocol("CONNECT response too large".into()))
            }
            Err(e) => {
                return Err(ConnectError::Protocol(format!("invalid CONNECT response: {}", e)))
            }
        }
    }
}
