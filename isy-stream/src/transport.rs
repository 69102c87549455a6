//! Secure channel to the controller.
//!
//! [`Connector`] is the seam between the lifecycle controller and the network:
//! production code uses [`TlsConnector`], tests plug in in-memory transports.
//!
//! # Trust model
//!
//! Controllers ship with self-signed certificates bound to no particular host
//! name. [`TlsConnector`] therefore accepts any server certificate: the peer
//! certificate is still retrieved (and exposed on [`ConnectionInfo`]) and the
//! handshake signatures are verified against it, but neither the chain nor the
//! host name is checked. Anyone able to intercept traffic between this client
//! and the controller can impersonate the controller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{StreamConfig, TlsVersion};
use crate::error::{Result, StreamError};
use crate::session::Endpoint;

/// A bidirectional byte stream the event channel runs over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed transport handed out by connectors.
pub type BoxedTransport = Box<dyn Transport>;

/// Details of an established channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub address: String,
    pub port: u16,
    /// Negotiated protocol, e.g. `TLSv1_2`
    pub protocol: Option<String>,
    /// DER of the controller's end-entity certificate
    pub peer_certificate: Option<Vec<u8>>,
}

/// An open channel and what is known about it.
pub struct Connected {
    pub stream: BoxedTransport,
    pub info: ConnectionInfo,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected").field("info", &self.info).finish()
    }
}

/// Opens channels to the controller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connected>;
}

/// Connector for the controller's TLS event port.
#[derive(Clone)]
pub struct TlsConnector {
    connector: tokio_rustls::TlsConnector,
    version: TlsVersion,
    connect_timeout: Duration,
}

impl TlsConnector {
    pub fn new(version: TlsVersion, connect_timeout: Duration) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[version.protocol_version()])?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ControllerCertVerifier { provider }))
            .with_no_client_auth();

        Ok(Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            version,
            connect_timeout,
        })
    }

    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::new(config.tls_version, config.connect_timeout)
    }

    pub fn version(&self) -> TlsVersion {
        self.version
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connected> {
        let addr = format!("{}:{}", endpoint.address, endpoint.port);

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| StreamError::ConnectFailure(format!("Timed out connecting to {}", addr)))?
            .map_err(|e| StreamError::ConnectFailure(format!("{}: {}", addr, e)))?;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(endpoint.address.clone()).map_err(|e| {
            StreamError::ConnectFailure(format!("Invalid server name '{}': {}", endpoint.address, e))
        })?;

        let tls = tokio::time::timeout(self.connect_timeout, self.connector.connect(server_name, tcp))
            .await
            .map_err(|_| StreamError::ConnectFailure(format!("TLS handshake with {} timed out", addr)))?
            .map_err(|e| StreamError::ConnectFailure(format!("TLS handshake with {} failed: {}", addr, e)))?;

        let (_, session) = tls.get_ref();
        let peer_certificate = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.as_ref().to_vec());
        let protocol = session.protocol_version().map(|v| format!("{:?}", v));

        match &peer_certificate {
            Some(der) => tracing::debug!(
                "Retrieved {} byte peer certificate from {} (host name not verified)",
                der.len(),
                addr
            ),
            None => tracing::warn!("Controller at {} presented no certificate", addr),
        }
        tracing::info!("Connected to event stream at {} using {:?}", addr, protocol);

        Ok(Connected {
            stream: Box::new(tls),
            info: ConnectionInfo {
                address: endpoint.address.clone(),
                port: endpoint.port,
                protocol,
                peer_certificate,
            },
        })
    }
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct ControllerCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for ControllerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_connector_builds_for_each_profile() {
        for version in [TlsVersion::Tls12, TlsVersion::Tls13] {
            let connector = TlsConnector::new(version, Duration::from_secs(1)).unwrap();
            assert_eq!(connector.version(), version);
        }
    }

    #[test]
    fn test_verifier_accepts_any_certificate() {
        let verifier = ControllerCertVerifier {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        };
        let cert = CertificateDer::from(vec![0u8; 16]);
        let name = ServerName::try_from("192.168.1.20").unwrap();

        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind then drop a listener so the port is very likely closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = StreamConfig::new("127.0.0.1", "admin", "admin")
            .with_port(port)
            .with_connect_timeout(Duration::from_secs(2));
        let connector = TlsConnector::from_config(&config).unwrap();

        let result = connector.connect(&Endpoint::from_config(&config)).await;
        assert!(matches!(result, Err(StreamError::ConnectFailure(_))));
    }
}
