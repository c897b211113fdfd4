//! Shared utilities for integration and load testing.
//!
//! `start_env` brings up two local servers:
//! - a CONNECT proxy that records every handshake and pipes bytes to the target
//! - a TLS target (self-signed `localhost` cert) that serves HTTP/1.1 requests
//!   sequentially on each connection, so pipelined requests work

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use persistent_tunnel::TunnelConfig;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

/// Payload served by the compression endpoints.
pub const PAYLOAD: &str = "The quick brown fox jumps over the lazy dog. \
    Pack my box with five dozen liquor jugs. How vexingly quick daft zebras jump!";

/// What the proxy saw.
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub connects: AtomicUsize,
    pub authorities: Mutex<Vec<String>>,
    pub auth_headers: Mutex<Vec<Option<String>>>,
}

impl ProxyStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// What the target saw.
#[derive(Debug, Default)]
pub struct TargetStats {
    pub connections: AtomicUsize,
    pub requests: AtomicUsize,
}

pub struct TestEnv {
    pub proxy_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub proxy: Arc<ProxyStats>,
    pub target: Arc<TargetStats>,
}

impl TestEnv {
    pub fn tunnel_url(&self) -> String {
        format!("http://{}", self.proxy_addr)
    }

    pub fn tunnel_url_with_auth(&self, user: &str, pass: &str) -> String {
        format!("http://{}:{}@{}", user, pass, self.proxy_addr)
    }

    pub fn target_url(&self) -> String {
        format!("https://localhost:{}", self.target_addr.port())
    }

    /// Config pointing at this env, with fast reconnects for tests.
    pub fn config(&self) -> TunnelConfig {
        let mut config = TunnelConfig::new(self.tunnel_url(), self.target_url());
        config.pool.size = 1;
        config.tls.insecure_skip_verify = true;
        config.reconnect.base_delay_ms = 10;
        config.reconnect.max_delay_ms = 50;
        config.reconnect.max_attempts = Some(3);
        config.timeouts.connect_ms = 2_000;
        config.timeouts.request_ms = 5_000;
        config
    }
}

/// Start the proxy and the TLS target. `required_auth` makes the proxy answer
/// 407 unless `Proxy-Authorization` matches exactly.
pub async fn start_env(required_auth: Option<&str>) -> TestEnv {
    let target = Arc::new(TargetStats::default());
    let target_addr = start_tls_target(Arc::clone(&target)).await;

    let proxy = Arc::new(ProxyStats::default());
    let proxy_addr =
        start_connect_proxy(target_addr, Arc::clone(&proxy), required_auth.map(String::from)).await;

    TestEnv {
        proxy_addr,
        target_addr,
        proxy,
        target,
    }
}

async fn start_connect_proxy(
    target_addr: SocketAddr,
    stats: Arc<ProxyStats>,
    required_auth: Option<String>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let stats = Arc::clone(&stats);
            let required_auth = required_auth.clone();
            tokio::spawn(async move {
                let _ = handle_connect(socket, target_addr, stats, required_auth).await;
            });
        }
    });

    addr
}

async fn handle_connect(
    mut client: TcpStream,
    target_addr: SocketAddr,
    stats: Arc<ProxyStats>,
    required_auth: Option<String>,
) -> std::io::Result<()> {
    let head = read_head(&mut client).await?;

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);
    if !matches!(request.parse(&head), Ok(httparse::Status::Complete(_)))
        || request.method != Some("CONNECT")
    {
        client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await?;
        return Ok(());
    }

    let authority = request.path.unwrap_or_default().to_string();
    let auth = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("proxy-authorization"))
        .map(|h| String::from_utf8_lossy(h.value).to_string());

    stats.connects.fetch_add(1, Ordering::SeqCst);
    stats.authorities.lock().unwrap().push(authority);
    stats.auth_headers.lock().unwrap().push(auth.clone());

    if let Some(required) = required_auth {
        if auth.as_deref() != Some(required.as_str()) {
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
                .await?;
            return Ok(());
        }
    }

    let mut upstream = TcpStream::connect(target_addr).await?;
    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    Ok(())
}

/// Read up to and including the blank line ending a request head.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        head.push(byte[0]);
    }
    Ok(head)
}

fn tls_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = certified.cert.der().clone();
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(certified.key_pair.serialize_der().into());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

async fn start_tls_target(stats: Arc<TargetStats>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tls_acceptor();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(socket).await {
                    stats.connections.fetch_add(1, Ordering::SeqCst);
                    let _ = serve_target(tls, stats).await;
                }
            });
        }
    });

    addr
}

struct IncomingRequest {
    method: String,
    path: String,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<IncomingRequest> {
    let head = read_head(stream).await?;

    let mut raw = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut raw);
    request
        .parse(&head)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let target = request.path.unwrap_or("/").to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.clone(), String::new()),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;

    Ok(IncomingRequest {
        method: request.method.unwrap_or("GET").to_string(),
        path,
        query,
        headers,
        body,
    })
}

async fn serve_target<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    stats: Arc<TargetStats>,
) -> std::io::Result<()> {
    loop {
        let request = read_request(&mut stream).await?;
        stats.requests.fetch_add(1, Ordering::SeqCst);

        if request.method == "HEAD" {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                echo_body(&request).to_string().len()
            );
            stream.write_all(head.as_bytes()).await?;
            stream.flush().await?;
            continue;
        }

        match request.path.as_str() {
            // Drop the connection without answering.
            "/close" => return Ok(()),
            "/delay" => {
                let ms = request
                    .query
                    .get("ms")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let body = echo_body(&request).to_string();
                write_response(&mut stream, 200, &[("Content-Type", "application/json")], body.as_bytes())
                    .await?;
            }
            "/plain" => {
                write_response(&mut stream, 200, &[("Content-Type", "text/plain")], PAYLOAD.as_bytes())
                    .await?;
            }
            "/gzip" => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(PAYLOAD.as_bytes())?;
                let body = encoder.finish()?;
                write_response(&mut stream, 200, &[("Content-Encoding", "gzip")], &body).await?;
            }
            "/deflate" => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(PAYLOAD.as_bytes())?;
                let body = encoder.finish()?;
                write_response(&mut stream, 200, &[("Content-Encoding", "deflate")], &body).await?;
            }
            "/br" => {
                let mut body = Vec::new();
                {
                    let mut encoder = brotli::CompressorWriter::new(&mut body, 4096, 5, 22);
                    encoder.write_all(PAYLOAD.as_bytes())?;
                }
                write_response(&mut stream, 200, &[("Content-Encoding", "br")], &body).await?;
            }
            "/chunked" => {
                let mut out = Vec::new();
                out.extend_from_slice(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
                for piece in PAYLOAD.as_bytes().chunks(17) {
                    out.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
                    out.extend_from_slice(piece);
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b"0\r\n\r\n");
                stream.write_all(&out).await?;
                stream.flush().await?;
            }
            "/bad-json" => {
                write_response(
                    &mut stream,
                    200,
                    &[("Content-Type", "application/json; charset=utf-8")],
                    b"{\"unterminated\": ",
                )
                .await?;
            }
            "/headers" => {
                write_response(
                    &mut stream,
                    200,
                    &[
                        ("X-Count", "42"),
                        ("X-Ratio", "1.5"),
                        ("X-Flag", "true"),
                        ("X-Name", "alpha"),
                        ("X-Expr", "1+1"),
                    ],
                    b"ok",
                )
                .await?;
            }
            // Close-delimited body, then a bare TCP close without close_notify.
            "/until-close" => {
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nstreamed-body")
                    .await?;
                stream.flush().await?;
                return Ok(());
            }
            "/close-after" => {
                let body = echo_body(&request).to_string();
                write_response(
                    &mut stream,
                    200,
                    &[("Content-Type", "application/json"), ("Connection", "close")],
                    body.as_bytes(),
                )
                .await?;
                return Ok(());
            }
            "/missing" => {
                write_response(&mut stream, 404, &[("Content-Type", "text/plain")], b"not here").await?;
            }
            _ => {
                let body = echo_body(&request).to_string();
                write_response(&mut stream, 200, &[("Content-Type", "application/json")], body.as_bytes())
                    .await?;
            }
        }
    }
}

fn echo_body(request: &IncomingRequest) -> serde_json::Value {
    json!({
        "method": request.method,
        "path": request.path,
        "args": request.query,
        "headers": request.headers,
        "body": String::from_utf8_lossy(&request.body),
    })
}

async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    headers: &[(&str, &str)],
    body: &[u8],
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Unknown",
    };
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    stream.write_all(&bytes).await?;
    stream.flush().await
}
