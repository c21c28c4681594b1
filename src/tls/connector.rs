//! TLS client connector.
//!
//! [`TlsConnector`] holds a shared rustls `ClientConfig` and mints one
//! `ClientConnection` per request; the transport then drives that connection
//! over its non-blocking socket. Build one with [`TlsConnectorBuilder`].

use super::error::TlsError;

#[cfg(feature = "tls")]
use crate::tracing_compat::{debug, warn};
#[cfg(feature = "tls")]
use rustls::pki_types::{CertificateDer, ServerName};
#[cfg(feature = "tls")]
use rustls::{ClientConfig, ClientConnection, RootCertStore};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Client-side TLS connector.
///
/// Configure once and share between requests; cloning is cheap.
///
/// # Example
///
/// ```ignore
/// let connector = TlsConnector::builder()
///     .with_webpki_roots()
///     .build()?;
/// let conn = connector.client_connection("example.com")?;
/// ```
#[derive(Clone)]
pub struct TlsConnector {
    #[cfg(feature = "tls")]
    config: Arc<ClientConfig>,
    #[cfg(not(feature = "tls"))]
    _marker: std::marker::PhantomData<()>,
}

impl TlsConnector {
    /// Create a connector from a raw rustls `ClientConfig`.
    #[cfg(feature = "tls")]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Create a builder for constructing a `TlsConnector`.
    pub fn builder() -> TlsConnectorBuilder {
        TlsConnectorBuilder::new()
    }

    /// The shared rustls configuration.
    #[cfg(feature = "tls")]
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Starts a client session for `server_name` (host name or IP literal).
    #[cfg(feature = "tls")]
    pub fn client_connection(&self, server_name: &str) -> Result<ClientConnection, TlsError> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| TlsError::InvalidDnsName(server_name.to_owned()))?;
        ClientConnection::new(Arc::clone(&self.config), name).map_err(TlsError::from)
    }

    /// Validate a host name for use as SNI.
    #[cfg(feature = "tls")]
    pub fn validate_domain(domain: &str) -> Result<(), TlsError> {
        ServerName::try_from(domain)
            .map(|_| ())
            .map_err(|_| TlsError::InvalidDnsName(domain.to_owned()))
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

/// Builder for [`TlsConnector`].
#[derive(Debug)]
pub struct TlsConnectorBuilder {
    #[cfg(feature = "tls")]
    root_certs: RootCertStore,
    verify_peer: bool,
    alpn_protocols: Vec<Vec<u8>>,
    error: Option<String>,
}

impl Default for TlsConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsConnectorBuilder {
    /// Create a new builder with no trusted roots and verification on.
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "tls")]
            root_certs: RootCertStore::empty(),
            verify_peer: true,
            alpn_protocols: Vec::new(),
            error: None,
        }
    }

    /// Trust the Mozilla root set.
    #[cfg(all(feature = "tls", feature = "tls-webpki-roots"))]
    pub fn with_webpki_roots(mut self) -> Self {
        self.root_certs
            .extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        self
    }

    /// Trust the Mozilla root set (no-op without `tls-webpki-roots`).
    #[cfg(not(all(feature = "tls", feature = "tls-webpki-roots")))]
    pub fn with_webpki_roots(self) -> Self {
        #[cfg(feature = "tls")]
        warn!("with_webpki_roots called without the tls-webpki-roots feature");
        self
    }

    /// Trust one DER-encoded root certificate.
    ///
    /// An unparseable certificate is reported by [`build`](Self::build).
    #[cfg(feature = "tls")]
    pub fn add_root_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        let cert = CertificateDer::from(der.into());
        if let Err(err) = self.root_certs.add(cert) {
            self.error.get_or_insert(format!("invalid root certificate: {err}"));
        }
        self
    }

    /// Trust every certificate in a PEM bundle.
    #[cfg(feature = "tls")]
    pub fn add_pem_roots(mut self, pem: &[u8]) -> Self {
        let mut reader = std::io::BufReader::new(pem);
        let mut found = 0usize;
        for cert in rustls_pemfile::certs(&mut reader) {
            match cert {
                Ok(cert) => {
                    found += 1;
                    if let Err(err) = self.root_certs.add(cert) {
                        self.error.get_or_insert(format!("invalid root certificate: {err}"));
                    }
                }
                Err(err) => {
                    self.error.get_or_insert(format!("invalid PEM: {err}"));
                }
            }
        }
        if found == 0 {
            self.error.get_or_insert_with(|| "no certificates in PEM input".to_owned());
        }
        self
    }

    /// Trust every certificate in a PEM file.
    #[cfg(feature = "tls")]
    pub fn add_pem_file(mut self, path: impl AsRef<std::path::Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(pem) => self.add_pem_roots(&pem),
            Err(err) => {
                self.error
                    .get_or_insert(format!("cannot read {}: {err}", path.display()));
                self
            }
        }
    }

    /// Whether the peer certificate chain and host name are verified.
    ///
    /// With `false` any certificate is accepted; handshake signatures are
    /// still checked.
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Offer these ALPN protocols.
    pub fn alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Offer `http/1.1` through ALPN.
    pub fn alpn_http(self) -> Self {
        self.alpn_protocols(vec![b"http/1.1".to_vec()])
    }

    /// Build the `TlsConnector`.
    ///
    /// # Errors
    ///
    /// Returns an error if a root certificate could not be loaded or the
    /// protocol configuration is rejected.
    #[cfg(feature = "tls")]
    pub fn build(self) -> Result<TlsConnector, TlsError> {
        use rustls::crypto::ring::default_provider;

        if let Some(msg) = self.error {
            return Err(TlsError::Configuration(msg));
        }

        let provider = Arc::new(default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Configuration(e.to_string()))?;

        let mut config = if self.verify_peer {
            if self.root_certs.is_empty() {
                warn!("building TlsConnector with no root certificates");
            }
            builder
                .with_root_certificates(self.root_certs)
                .with_no_client_auth()
        } else {
            warn!("TLS peer verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyServerCert::new(
                    provider,
                )))
                .with_no_client_auth()
        };

        if !self.alpn_protocols.is_empty() {
            config.alpn_protocols = self.alpn_protocols;
        }

        debug!(
            verify_peer = self.verify_peer,
            alpn = ?config.alpn_protocols,
            "TlsConnector built"
        );

        Ok(TlsConnector {
            config: Arc::new(config),
        })
    }

    /// Build the `TlsConnector` (stub when TLS is disabled).
    #[cfg(not(feature = "tls"))]
    pub fn build(self) -> Result<TlsConnector, TlsError> {
        Err(TlsError::Unsupported)
    }
}

#[cfg(feature = "tls")]
mod danger {
    use rustls::DigitallySignedStruct;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use std::sync::Arc;

    /// Accepts any certificate chain; still verifies handshake signatures.
    #[derive(Debug)]
    pub(super) struct AcceptAnyServerCert {
        provider: Arc<CryptoProvider>,
    }

    impl AcceptAnyServerCert {
        pub(super) fn new(provider: Arc<CryptoProvider>) -> Self {
            Self { provider }
        }
    }

    impl ServerCertVerifier for AcceptAnyServerCert {
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
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[cfg(all(test, feature = "tls"))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let builder = TlsConnectorBuilder::new();
        assert!(builder.root_certs.is_empty());
        assert!(builder.verify_peer);
        assert!(builder.alpn_protocols.is_empty());
    }

    #[test]
    fn test_build_without_verification() {
        let connector = TlsConnectorBuilder::new()
            .verify_peer(false)
            .alpn_http()
            .build()
            .unwrap();
        assert_eq!(connector.config().alpn_protocols, vec![b"http/1.1".to_vec()]);
        assert!(connector.client_connection("localhost").is_ok());
    }

    #[test]
    fn test_invalid_root_is_reported_at_build() {
        let err = TlsConnectorBuilder::new()
            .add_root_certificate(vec![0u8, 1, 2, 3])
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::Configuration(_)));
    }

    #[test]
    fn test_pem_without_certificates_is_rejected() {
        let err = TlsConnectorBuilder::new()
            .add_pem_roots(b"not a pem bundle")
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::Configuration(_)));
    }

    #[test]
    fn test_missing_pem_file_is_rejected() {
        let err = TlsConnectorBuilder::new()
            .add_pem_file("/nonexistent/evfetch-ca.pem")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_server_name_validation() {
        assert!(TlsConnector::validate_domain("example.com").is_ok());
        assert!(TlsConnector::validate_domain("127.0.0.1").is_ok());
        assert!(TlsConnector::validate_domain("not a host").is_err());

        let connector = TlsConnectorBuilder::new().verify_peer(false).build().unwrap();
        let err = connector.client_connection("bad name!").unwrap_err();
        assert!(matches!(err, TlsError::InvalidDnsName(_)));
    }

    #[test]
    fn test_self_signed_root_is_accepted() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let connector = TlsConnectorBuilder::new()
            .add_root_certificate(cert.cert.der().to_vec())
            .build()
            .unwrap();
        assert!(connector.client_connection("localhost").is_ok());
    }
}
