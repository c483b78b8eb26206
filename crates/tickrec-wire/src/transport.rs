//! TLS transport.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::error::{WireError, WireResult};

pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens authenticated TLS streams to the API host.
pub struct WireTransport;

impl WireTransport {
    /// Connect over TCP and complete a TLS handshake.
    ///
    /// The server certificate is validated against the bundled web PKI roots
    /// and the configured host name.
    pub async fn connect(config: &TransportConfig) -> WireResult<TlsStream> {
        let address = config.address();
        info!(%address, "Connecting to API");

        let tcp = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Self::timed_out(config))??;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| WireError::InvalidServerName(format!("{}: {e}", config.host)))?;
        let connector = TlsConnector::from(Arc::new(Self::client_config()?));

        let stream = timeout(config.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| Self::timed_out(config))?
            .map_err(|e| WireError::Tls(e.to_string()))?;

        debug!(%address, "TLS handshake complete");
        Ok(stream)
    }

    fn client_config() -> WireResult<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| WireError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(config)
    }

    fn timed_out(config: &TransportConfig) -> WireError {
        WireError::ConnectTimeout {
            host: config.host.clone(),
            port: config.port,
            timeout_ms: config.connect_timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::TlsAcceptor;

    /// Accept one TLS handshake with a self-signed certificate for `names`.
    async fn self_signed_server(names: &[&str]) -> u16 {
        let certified = rcgen::generate_simple_self_signed(
            names.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
        )
        .unwrap();
        let cert: CertificateDer<'static> = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((tcp, _)) = listener.accept().await {
                let _ = acceptor.accept(tcp).await;
            }
        });
        port
    }

    #[test]
    fn test_client_config_builds() {
        assert!(WireTransport::client_config().is_ok());
    }

    #[test]
    fn test_address() {
        let config = TransportConfig::new("demo.ctraderapi.com", 5035);
        assert_eq!(config.address(), "demo.ctraderapi.com:5035");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TransportConfig::new("127.0.0.1", port);
        let err = WireTransport::connect(&config).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[tokio::test]
    async fn test_untrusted_certificate_is_tls_error() {
        let port = self_signed_server(&["127.0.0.1"]).await;

        let config = TransportConfig::new("127.0.0.1", port);
        let err = WireTransport::connect(&config).await.unwrap_err();
        assert!(matches!(err, WireError::Tls(_)), "unexpected error: {err:?}");
    }
}
