//! TLS client configuration for the tunneled connection.

use rustls::pki_types::{CertificateDer, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::error::{TunnelError, TunnelResult};

/// Build a TLS connector from configuration.
///
/// Verification uses the webpki roots plus `ca_file` unless
/// `insecure_skip_verify` is set.
pub fn build_tls_connector(config: &TlsConfig) -> TunnelResult<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TunnelError::Config(format!("TLS protocol setup failed: {}", e)))?;

    let mut client_crypto = if config.insecure_skip_verify {
        tracing::warn!("Server certificate verification disabled for tunneled connections");
        builder
            .dangerous()
            .with_custom_certificate_verifier(SkipVerification::new())
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = &config.ca_file {
            for cert in load_certs(Path::new(path))? {
                roots
                    .add(cert)
                    .map_err(|e| TunnelError::Config(format!("Invalid CA cert: {}", e)))?;
            }
        }

        builder.with_root_certificates(roots).with_no_client_auth()
    };

    client_crypto.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(client_crypto)))
}

/// SNI / verification name for the target host.
pub fn server_name(host: &str) -> TunnelResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TunnelError::InvalidUrl(format!("invalid TLS server name {}: {}", host, e)))
}

fn load_certs(path: &Path) -> TunnelResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| TunnelError::Config(format!("Failed to open CA file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TunnelError::Config(format!("Failed to parse CA file: {}", e)))
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
