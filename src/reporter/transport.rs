//! Pre-flight check of broker candidates.
//!
//! A failing TLS broker makes the MQTT client fail with a generic connection
//! error. Each `ssl://` candidate is therefore dialed and handshaked once up
//! front, so a bad one is logged on its own and skipped.

use crate::error::ConfigError;
use crate::structures::BrokerCandidate;
use async_trait::async_trait;
use futures::future::join_all;
use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the client TLS config shared by the probe and the MQTT session.
///
/// Without a CA file the bundled webpki roots are trusted. A CA file that
/// can't be read or holds no certificate is a configuration error, also when
/// verification is skipped.
pub fn client_config(
    ca_file: Option<&Path>,
    insecure: bool,
) -> Result<Arc<ClientConfig>, ConfigError> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| ConfigError::Invalid {
                    name: "cafile",
                    reason: e.to_string(),
                })?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let config = if insecure {
        warn!("Broker certificate verification is disabled");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification))
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let ca_err = |source| ConfigError::CaFile {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(ca_err)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ca_err)?;

    if certs.is_empty() {
        return Err(ConfigError::EmptyCaFile(path.to_path_buf()));
    }
    Ok(certs)
}

/// Accepts any server certificate.
#[derive(Debug)]
struct SkipVerification;

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

/// Connect, negotiate, then drop the connection.
#[async_trait]
pub trait HandshakeProbe: Send + Sync {
    async fn probe(&self, broker: &BrokerCandidate) -> io::Result<()>;
}

#[derive(Clone)]
pub struct TlsProbe {
    connector: TlsConnector,
    timeout: Duration,
}

impl TlsProbe {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
            timeout: PROBE_TIMEOUT,
        }
    }

    async fn handshake(&self, broker: &BrokerCandidate) -> io::Result<()> {
        let name = ServerName::try_from(broker.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = TcpStream::connect((broker.host.as_str(), broker.port)).await?;
        let _tls = self.connector.connect(name, stream).await?;
        Ok(())
    }
}

#[async_trait]
impl HandshakeProbe for TlsProbe {
    async fn probe(&self, broker: &BrokerCandidate) -> io::Result<()> {
        time::timeout(self.timeout, self.handshake(broker))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out"))?
    }
}

/// Filters broker urls down to the candidates worth publishing to, keeping
/// their configured order.
#[derive(Clone)]
pub struct TransportSelector {
    probe: Arc<dyn HandshakeProbe>,
}

impl TransportSelector {
    pub fn new(probe: Arc<dyn HandshakeProbe>) -> Self {
        Self { probe }
    }

    pub async fn select(&self, urls: &[String]) -> Vec<BrokerCandidate> {
        let parsed = urls.iter().filter_map(|url| {
            match BrokerCandidate::try_from(url.as_str()) {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!("Error parsing broker url (ignored): {}", e);
                    None
                }
            }
        });

        let checks = parsed.map(|b| async move {
            if !b.scheme.is_encrypted() {
                return Some(b);
            }
            match self.probe.probe(&b).await {
                Ok(()) => {
                    debug!("Tls handshake with {} ok", b);
                    Some(b)
                }
                Err(e) => {
                    warn!("Ignoring broker {}: {}", b, e);
                    None
                }
            }
        });

        join_all(checks).await.into_iter().flatten().collect()
    }
}
