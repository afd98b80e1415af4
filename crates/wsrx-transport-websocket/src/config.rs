//! WebSocket transport configuration

use std::sync::Arc;
use std::time::Duration;
use wsrx_transport::{TransportError, TransportResult};

/// Default largest payload carried by a single outbound message (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// WebSocket-specific configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Writes larger than this are split over several binary messages
    pub max_frame_size: usize,

    /// Skip server certificate verification for wss:// (INSECURE)
    pub insecure_skip_verify: bool,

    /// Extra DER encoded roots trusted for wss://, in addition to the
    /// bundled web PKI roots
    pub root_certs: Vec<Vec<u8>>,

    /// Limit for the TCP + TLS + WebSocket handshake when dialing.
    /// `None` waits as long as the OS does.
    pub connect_timeout: Option<Duration>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            insecure_skip_verify: false,
            root_certs: Vec::new(),
            connect_timeout: None,
        }
    }
}

impl WebSocketConfig {
    /// Set the outbound message size limit
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Bound the dial handshake
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Trust an additional DER encoded root certificate
    pub fn with_root_cert(mut self, der: Vec<u8>) -> Self {
        self.root_certs.push(der);
        self
    }

    /// Disable server certificate verification (INSECURE)
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if self.max_frame_size == 0 {
            return Err(TransportError::ConfigurationError(
                "max_frame_size must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(TransportError::ConfigurationError(
                "connect_timeout must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the rustls client configuration used for wss:// URLs
    pub(crate) fn build_tls_config(&self) -> TransportResult<Arc<rustls::ClientConfig>> {
        ensure_crypto_provider();

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for cert_der in &self.root_certs {
            roots
                .add(rustls::pki_types::CertificateDer::from(cert_der.clone()))
                .map_err(|e| TransportError::TlsError(format!("Invalid root cert: {}", e)))?;
        }

        let client_crypto = if self.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        Ok(Arc::new(client_crypto))
    }
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
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
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(!config.insecure_skip_verify);
        assert!(config.connect_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_frame_size_is_rejected() {
        let config = WebSocketConfig::default().with_max_frame_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_connect_timeout_is_rejected() {
        let config = WebSocketConfig::default().with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_config_builds_in_both_modes() {
        assert!(WebSocketConfig::default().build_tls_config().is_ok());
        assert!(WebSocketConfig::default()
            .with_insecure_skip_verify()
            .build_tls_config()
            .is_ok());
    }

    #[test]
    fn test_invalid_root_cert_is_rejected() {
        let config = WebSocketConfig::default().with_root_cert(vec![0, 1, 2, 3]);
        assert!(matches!(
            config.build_tls_config(),
            Err(TransportError::TlsError(_))
        ));
    }
}
