//! The underlying socket: plain TCP, TLS from the first byte, or a
//! STARTTLS upgrade of an existing plain stream.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Result, SmtpError};

/// A connected SMTP socket.
pub(crate) enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Connection::Plain"),
            Self::Tls(_) => f.write_str("Connection::Tls"),
        }
    }
}

impl Connection {
    /// Opens a plaintext connection.
    pub(crate) async fn open_plain(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::Plain(stream))
    }

    /// Opens a connection that is TLS from the first byte (`ssl`
    /// encryption).
    pub(crate) async fn open_tls(
        host: &str,
        port: u16,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        wrap_tls(stream, host, accept_invalid_certs).await
    }

    /// Upgrades a plain connection after a successful STARTTLS exchange.
    pub(crate) async fn upgrade(
        self,
        host: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        match self {
            Self::Plain(stream) => wrap_tls(stream, host, accept_invalid_certs).await,
            Self::Tls(_) => Err(SmtpError::Tls("connection is already TLS".to_string())),
        }
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    /// Reads into `buf`, treating EOF as a dropped connection.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(SmtpError::ConnectionClosed);
        }
        Ok(n)
    }
}

async fn wrap_tls(
    stream: TcpStream,
    host: &str,
    accept_invalid_certs: bool,
) -> Result<Connection> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        roots
            .add(cert)
            .map_err(|e| SmtpError::Tls(format!("failed to add root certificate: {e}")))?;
    }
    if !native.errors.is_empty() {
        tracing::warn!(errors = ?native.errors, "some system root certificates failed to load");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| SmtpError::Tls(format!("invalid server name '{host}': {e}")))?;

    let tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .map_err(|e| SmtpError::Tls(e.to_string()))?;

    Ok(Connection::Tls(Box::new(tls)))
}

/// Accepts any certificate. Only reachable through the
/// `accept_invalid_certs` knob, which exists for test rigs with
/// self-signed certificates.
#[derive(Debug)]
struct NoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        vec![
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA256,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            tokio_rustls::rustls::SignatureScheme::ED25519,
        ]
    }
}
