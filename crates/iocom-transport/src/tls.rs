//! TLS transport over TCP.
//!
//! Built on `tokio-rustls` over a plain `TcpStream` — IOCOM links are TCP,
//! not QUIC.
//!
//! Self-signed certificates are for local testing only; production
//! deployments should pass real certificate/key files to
//! [`TlsAcceptor::bind`].

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor as RustlsAcceptor, TlsConnector as RustlsConnector};

use crate::error::TransportError;
use crate::link::{Acceptor, Connector, Link};

/// Listens for inbound TCP connections and wraps each in a TLS server
/// handshake.
pub struct TlsAcceptor {
    listener: TcpListener,
    acceptor: RustlsAcceptor,
}

impl TlsAcceptor {
    /// Binds to `address`, using the certificate/key at `cert_path`/
    /// `key_path` if given, or a freshly generated self-signed certificate
    /// for `localhost` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be bound, or
    /// [`TransportError::Tls`] if the certificate/key cannot be loaded or
    /// parsed.
    pub async fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(address, "TLS transport bound");
        let config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_server_config(cert, key)?,
            _ => self_signed_server_config()?,
        };
        Ok(Self { listener, acceptor: RustlsAcceptor::from(Arc::new(config)) })
    }
}

#[async_trait]
impl Acceptor for TlsAcceptor {
    async fn accept(&self) -> Result<(Box<dyn Link>, String), TransportError> {
        let (tcp, addr) = self.listener.accept().await?;
        tcp.set_nodelay(true)?;
        let stream = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransportError::Tls(format!("handshake failed: {e}")))?;
        Ok((Box::new(stream), addr.to_string()))
    }
}

fn load_server_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig, TransportError> {
    let cert_pem = fs::read(cert_path)
        .map_err(|e| TransportError::Tls(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem = fs::read(key_path)
        .map_err(|e| TransportError::Tls(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("failed to parse certificates: {e}")))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| TransportError::Tls(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| TransportError::Tls("no private key found".to_string()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(format!("invalid TLS config: {e}")))
}

fn self_signed_server_config() -> Result<rustls::ServerConfig, TransportError> {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| TransportError::Tls(format!("failed to generate self-signed cert: {e}")))?;
    let cert_der = generated.cert.der().clone();
    let key_der = generated.key_pair.serialize_der();
    let key = PrivatePkcs8KeyDer::from(key_der);

    tracing::warn!("using self-signed TLS certificate - not for production use");

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .map_err(|e| TransportError::Tls(format!("invalid TLS config: {e}")))
}

/// Dials a single configured TLS peer.
pub struct TlsConnector {
    address: String,
    server_name: String,
    connector: RustlsConnector,
}

impl TlsConnector {
    /// Connector that verifies the peer against `ca_cert_path` (PEM).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the CA certificate cannot be read
    /// or parsed.
    pub fn with_ca(
        address: impl Into<String>,
        server_name: impl Into<String>,
        ca_cert_path: &str,
    ) -> Result<Self, TransportError> {
        let ca_pem = fs::read(ca_cert_path)
            .map_err(|e| TransportError::Tls(format!("failed to read CA '{ca_cert_path}': {e}")))?;
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &ca_pem[..]) {
            let cert = cert.map_err(|e| TransportError::Tls(format!("invalid CA cert: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| TransportError::Tls(format!("failed to trust CA cert: {e}")))?;
        }
        let config =
            rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        Ok(Self {
            address: address.into(),
            server_name: server_name.into(),
            connector: RustlsConnector::from(Arc::new(config)),
        })
    }

    /// Connector that accepts any certificate, for local testing against a
    /// self-signed server.
    #[must_use]
    pub fn insecure(address: impl Into<String>, server_name: impl Into<String>) -> Self {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        Self {
            address: address.into(),
            server_name: server_name.into(),
            connector: RustlsConnector::from(Arc::new(config)),
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError> {
        let tcp = TcpStream::connect(&self.address).await?;
        tcp.set_nodelay(true)?;
        let server_name = ServerName::try_from(self.server_name.clone())
            .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;
        let stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Tls(format!("handshake failed: {e}")))?;
        Ok(Box::new(stream))
    }
}

/// Accepts any server certificate. Only used via [`TlsConnector::insecure`].
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
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
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
