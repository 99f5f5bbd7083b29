//! Transport selection for `mqtt`, `mqtts`, `ws` and `wss` brokers
//!
//! WebSocket framing is not supported: `ws` falls back to plain TCP and
//! `wss` to TLS over TCP, both with a warning. Certificate verification is
//! on by default; `accept_invalid_certs` switches in a verifier that
//! accepts any server certificate and is reported on every connect.

use std::sync::Arc;

use rumqttc::tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rumqttc::tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use rumqttc::{TlsConfiguration, Transport};
use tracing::{info, warn};

use super::config::{BrokerSettings, Protocol};
use super::error::BridgeError;

pub fn transport(settings: &BrokerSettings) -> Result<Transport, BridgeError> {
    match settings.protocol {
        Protocol::Mqtt => Ok(Transport::Tcp),
        Protocol::Ws => {
            warn!("WebSocket transport not supported, using TCP");
            Ok(Transport::Tcp)
        }
        Protocol::Mqtts | Protocol::Wss => {
            if settings.protocol == Protocol::Wss {
                warn!("WebSocket transport not supported, using TLS over TCP");
            }
            tls_transport(settings)
        }
    }
}

fn tls_transport(settings: &BrokerSettings) -> Result<Transport, BridgeError> {
    if settings.accept_invalid_certs {
        warn!(
            "TLS certificate verification disabled for {}: any server certificate is accepted",
            settings.host
        );
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
        return Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(config),
        )));
    }

    match &settings.ca_file {
        Some(path) => {
            let ca = std::fs::read(path).map_err(|e| {
                BridgeError::Connect(format!("cannot read CA file {}: {}", path.display(), e))
            })?;
            info!("Using CA bundle {}", path.display());
            Ok(Transport::tls(ca, None, None))
        }
        None => Ok(Transport::tls_with_default_config()),
    }
}

/// Verifier that skips every certificate check.
#[derive(Debug)]
struct AcceptAnyServerCert;

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
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
