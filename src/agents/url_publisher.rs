//! TcpPort → Url: infers the scheme for an open port and publishes the
//! canonical URL.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::events::{Event, Topic};
use crate::session::Session;

use super::Agent;

pub struct UrlPublisher;

impl Agent for UrlPublisher {
    fn id(&self) -> &'static str {
        "agent:url_publisher"
    }

    fn register(&self, session: &Arc<Session>) -> Result<()> {
        let connector = TlsConnector::from(Arc::new(insecure_client_config()));
        let handler_session = Arc::clone(session);

        session.bus.subscribe(Topic::TcpPort, move |event| {
            let session = Arc::clone(&handler_session);
            let connector = connector.clone();
            async move {
                let Event::TcpPort { port, host } = event else {
                    return;
                };
                debug!("received new open port on {}: {}", host, port);

                let timeout = Duration::from_millis(session.options.http_timeout);
                let scheme = if is_tls(&connector, &host, port, timeout).await {
                    "https"
                } else {
                    "http"
                };
                session
                    .bus
                    .publish(Event::Url(host_and_port_to_url(&host, port, scheme)));
            }
        });
        Ok(())
    }
}

/// Canonical URL form: the scheme's default port is omitted, any other port
/// is appended.
pub fn host_and_port_to_url(host: &str, port: u16, scheme: &str) -> String {
    if (scheme == "http" && port == 80) || (scheme == "https" && port == 443) {
        format!("{}://{}", scheme, host)
    } else {
        format!("{}://{}:{}", scheme, host, port)
    }
}

/// 80 and 443 are decided without a probe; any other port gets a raw TLS
/// dial with certificate verification disabled. Probe failure means http.
async fn is_tls(connector: &TlsConnector, host: &str, port: u16, timeout: Duration) -> bool {
    if port == 80 {
        return false;
    }
    if port == 443 {
        return true;
    }

    let Ok(server_name) = ServerName::try_from(host.to_string()) else {
        return false;
    };
    let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        _ => return false,
    };
    matches!(
        tokio::time::timeout(timeout, connector.connect(server_name, stream)).await,
        Ok(Ok(_))
    )
}

/// Client config that accepts any server certificate; the probe only cares
/// whether a TLS handshake completes.
fn insecure_client_config() -> ClientConfig {
    static PROVIDER_INSTALLED: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(
            rustls::crypto::aws_lc_rs::default_provider(),
        );
    });

    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}

#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
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
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_are_omitted() {
        assert_eq!(host_and_port_to_url("h", 80, "http"), "http://h");
        assert_eq!(host_and_port_to_url("h", 443, "https"), "https://h");
    }

    #[test]
    fn other_ports_are_included() {
        assert_eq!(host_and_port_to_url("h", 8080, "http"), "http://h:8080");
        assert_eq!(host_and_port_to_url("h", 8443, "https"), "https://h:8443");
        assert_eq!(host_and_port_to_url("h", 443, "http"), "http://h:443");
    }

    #[tokio::test]
    async fn well_known_ports_skip_the_probe() {
        let connector = TlsConnector::from(Arc::new(insecure_client_config()));
        // No listener exists on these; the answer must come without dialing.
        assert!(!is_tls(&connector, "127.0.0.1", 80, Duration::from_millis(50)).await);
        assert!(is_tls(&connector, "127.0.0.1", 443, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn plaintext_listener_is_not_tls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and hold the connection open without speaking TLS.
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(2)).await;
                drop(socket);
            }
        });

        let connector = TlsConnector::from(Arc::new(insecure_client_config()));
        assert!(!is_tls(&connector, "127.0.0.1", port, Duration::from_millis(300)).await);
    }
}
