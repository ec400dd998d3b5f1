//! TLS support for MySQL connections (the `tls` feature).
//!
//! MySQL's TLS upgrade is mid-stream: the client sends an abbreviated
//! handshake-response-shaped `SSLRequest` packet (see
//! [`crate::protocol::handshake::build_ssl_request`]), then performs a
//! regular TLS handshake on the same socket, then sends the *real*
//! handshake response encrypted. [`TlsStream`] is the `Read + Write`
//! wrapper `connection::MySqlConnection::connect` swaps in for the raw
//! transport once that handshake completes — from then on the rest of
//! the protocol (everything in `facade`/`socket`) is unaware TLS is
//! involved at all.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::sync::Arc;

use crate::config::{SslMode, TlsConfig};
use crate::error::{Error, TlsError};

fn tls_error(message: impl Into<String>) -> Error {
    Error::Tls(TlsError {
        message: message.into(),
        source: None,
    })
}

/// Whether the server's initial handshake advertised `CLIENT_SSL`.
pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & crate::protocol::capabilities::CLIENT_SSL != 0
}

/// Decide whether to perform the TLS upgrade given the configured mode
/// and what the server actually offers.
pub fn should_upgrade(ssl_mode: SslMode, server_caps: u32) -> Result<bool, Error> {
    let supported = server_supports_ssl(server_caps);
    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(supported),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if supported {
                Ok(true)
            } else {
                Err(tls_error("SSL required but the server does not support it"))
            }
        }
    }
}

/// Reject configurations that can't possibly succeed before paying for
/// a TCP round trip: `VerifyCa`/`VerifyIdentity` without a CA bundle or
/// an explicit opt-out, and a client cert without its key.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<(), Error> {
    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => Ok(()),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.ca_cert_path.is_none() && !tls_config.danger_skip_verify {
                return Err(tls_error(
                    "CA certificate required for VerifyCa/VerifyIdentity mode; \
                     set ca_cert_path or danger_skip_verify",
                ));
            }
            if tls_config.client_cert_path.is_some() && tls_config.client_key_path.is_none() {
                return Err(tls_error(
                    "client certificate provided without client key",
                ));
            }
            Ok(())
        }
    }
}

/// A TLS-wrapped byte stream, usable anywhere a raw socket was.
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> TlsStream<S> {
    /// Perform the TLS handshake over `stream` and return the wrapper,
    /// ready to carry the rest of the MySQL protocol.
    pub fn handshake(
        mut stream: S,
        tls_config: &TlsConfig,
        server_name: &str,
        ssl_mode: SslMode,
    ) -> Result<Self, Error> {
        let config = build_client_config(tls_config, ssl_mode)?;
        let sni_name = tls_config.server_name.as_deref().unwrap_or(server_name);
        let name = sni_name
            .to_string()
            .try_into()
            .map_err(|e| tls_error(format!("invalid server name '{sni_name}': {e}")))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(config), name)
            .map_err(|e| tls_error(format!("failed to create TLS connection: {e}")))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
            }
            if conn.wants_read() {
                conn.read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }

        Ok(Self { conn, stream })
    }

    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Access the underlying transport, e.g. to adjust socket-level
    /// read/write timeouts without disturbing the TLS session.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if self.conn.wants_read() {
                let n = self.conn.read_tls(&mut self.stream)?;
                if n == 0 {
                    return Ok(0);
                }
                self.conn
                    .process_new_packets()
                    .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
            } else {
                return Ok(0);
            }
        }
    }
}

impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

fn build_client_config(
    tls_config: &TlsConfig,
    ssl_mode: SslMode,
) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match ssl_mode {
        SslMode::Disable => Err(tls_error("TLS requested with SslMode::Disable")),
        SslMode::Preferred | SslMode::Required => {
            if tls_config.danger_skip_verify {
                build_no_verify_config(&provider)
            } else {
                build_webpki_config(&provider, tls_config)
            }
        }
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.danger_skip_verify {
                build_no_verify_config(&provider)
            } else if let Some(ca_path) = &tls_config.ca_cert_path {
                build_custom_ca_config(&provider, tls_config, ca_path)
            } else {
                build_webpki_config(&provider, tls_config)
            }
        }
    }
}

fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
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
            ]
        }
    }

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();

    Ok(config)
}

fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::RootCertStore;

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {e}")))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
    ca_path: &str,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::RootCertStore;
    use std::fs::File;
    use std::io::BufReader;

    let ca_file = File::open(ca_path)
        .map_err(|e| tls_error(format!("failed to open CA certificate '{ca_path}': {e}")))?;
    let mut reader = BufReader::new(ca_file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("failed to parse CA certificate: {e}")))?;

    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates found in CA file '{ca_path}'"
        )));
    }

    let mut root_store = RootCertStore::empty();
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| tls_error(format!("failed to add CA certificate: {e}")))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {e}")))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use std::fs::File;
    use std::io::BufReader;

    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };

    let cert_file = File::open(cert_path)
        .map_err(|e| tls_error(format!("failed to open client cert '{cert_path}': {e}")))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("failed to parse client certificate: {e}")))?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates found in client cert file '{cert_path}'"
        )));
    }

    let key_file = File::open(key_path)
        .map_err(|e| tls_error(format!("failed to open client key '{key_path}': {e}")))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| tls_error(format!("failed to parse client key: {e}")))?
        .ok_or_else(|| tls_error(format!("no private key found in '{key_path}'")))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("failed to configure client auth: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_upgrade_disable_never_tries() {
        assert!(!should_upgrade(SslMode::Disable, u32::MAX).unwrap());
    }

    #[test]
    fn should_upgrade_preferred_follows_server() {
        assert!(!should_upgrade(SslMode::Preferred, 0).unwrap());
        assert!(
            should_upgrade(SslMode::Preferred, crate::protocol::capabilities::CLIENT_SSL).unwrap()
        );
    }

    #[test]
    fn should_upgrade_required_errors_without_server_support() {
        assert!(should_upgrade(SslMode::Required, 0).is_err());
    }

    #[test]
    fn validate_tls_config_requires_ca_for_verify_modes() {
        let cfg = TlsConfig::new();
        assert!(validate_tls_config(SslMode::VerifyCa, &cfg).is_err());
        assert!(validate_tls_config(SslMode::Required, &cfg).is_ok());
    }

    #[test]
    fn validate_tls_config_accepts_danger_skip_verify() {
        let cfg = TlsConfig::new().danger_skip_verify(true);
        assert!(validate_tls_config(SslMode::VerifyIdentity, &cfg).is_ok());
    }

    #[test]
    fn validate_tls_config_rejects_cert_without_key() {
        let cfg = TlsConfig::new()
            .ca_cert("/tmp/ca.pem")
            .client_identity("/tmp/cert.pem", "");
        let mut cfg = cfg;
        cfg.client_key_path = None;
        assert!(validate_tls_config(SslMode::VerifyCa, &cfg).is_err());
    }
}
