//! The authentication state machine: decides what to send next given
//! the plugin in play and whatever the server just sent back.
//!
//! This module is pure decision logic — no socket I/O. `connection`
//! and `async_connection` drive the exchange; they call here to decide
//! what the next outbound packet should be, and call `protocol::handshake`
//! / `auth` to actually build it.

use crate::auth::{self, caching_sha2, plugins};
use crate::error::{AuthError, AuthErrorKind, Error};

/// What the connection orchestrator should do after looking at the
/// server's response to an auth packet.
#[derive(Debug)]
pub enum AuthAction {
    /// Authentication succeeded (an OK packet arrived).
    Done,
    /// Send this payload as the next packet and keep going.
    Reply(Vec<u8>),
    /// `caching_sha2_password` full auth: ask the server for its RSA
    /// public key by sending a single `0x02` byte.
    RequestPublicKey,
    /// The server sent its RSA public key (PEM); encrypt the password
    /// against it and send the result.
    EncryptWithRsaKey { public_key_pem: Vec<u8> },
}

/// Compute the initial auth response to place in the handshake
/// response packet, for the plugin the server's initial handshake
/// announced.
pub fn initial_response(plugin_name: &str, password: &str, nonce: &[u8]) -> Result<Vec<u8>, Error> {
    match plugin_name {
        plugins::MYSQL_NATIVE_PASSWORD => Ok(auth::mysql_native_password(password, nonce)),
        plugins::CACHING_SHA2_PASSWORD => Ok(auth::caching_sha2_password(password, nonce)),
        _ => Err(unsupported_plugin(plugin_name)),
    }
}

/// Compute the auth response after the server sent an `AuthSwitchRequest`
/// naming a different plugin and a fresh nonce.
pub fn switch_response(plugin_name: &str, password: &str, nonce: &[u8]) -> Result<Vec<u8>, Error> {
    initial_response(plugin_name, password, nonce)
}

/// Interpret an `AuthMoreData` packet (`0x01` marker byte already
/// stripped) received while `caching_sha2_password` is in play.
///
/// The single status byte that follows means fast-auth success
/// (`0x03`, next packet will be OK) or full-auth required (`0x04`,
/// the client must either have TLS or go through the RSA exchange).
/// Anything else that shows up (a PEM blob, requested via
/// [`AuthAction::RequestPublicKey`]) is the server's public key.
pub fn handle_more_data(payload: &[u8], is_tls: bool) -> Result<AuthAction, Error> {
    match payload.first() {
        Some(&caching_sha2::FAST_AUTH_SUCCESS) => Ok(AuthAction::Reply(Vec::new())),
        Some(&caching_sha2::PERFORM_FULL_AUTH) => {
            if is_tls {
                // Over TLS the cleartext password (plus NUL) can go straight through.
                Ok(AuthAction::Reply(Vec::new()))
            } else {
                Ok(AuthAction::RequestPublicKey)
            }
        }
        _ => Ok(AuthAction::EncryptWithRsaKey {
            public_key_pem: payload.to_vec(),
        }),
    }
}

/// Encrypt `password` against the server's RSA public key for
/// `caching_sha2_password` full auth (OAEP/SHA1 padding, the scheme
/// MySQL 8.0.5+ servers expect).
pub fn encrypt_full_auth_password(
    password: &str,
    nonce: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>, Error> {
    auth::sha256_password_rsa(password, nonce, public_key_pem, true).map_err(|message| {
        Error::Auth(AuthError {
            kind: AuthErrorKind::RsaHandshake,
            message,
        })
    })
}

/// The cleartext-over-TLS password payload (password + NUL, no XOR) for
/// `caching_sha2_password` full auth when the connection is already
/// secured.
pub fn cleartext_password_payload(password: &str) -> Vec<u8> {
    let mut bytes = password.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

pub fn unsupported_plugin(plugin_name: &str) -> Error {
    Error::Auth(AuthError {
        kind: AuthErrorKind::UnsupportedPlugin,
        message: format!("unsupported authentication plugin: {plugin_name}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_response_dispatches_by_plugin() {
        let nonce = [0u8; 20];
        assert_eq!(
            initial_response(plugins::MYSQL_NATIVE_PASSWORD, "secret", &nonce).unwrap(),
            auth::mysql_native_password("secret", &nonce)
        );
        assert_eq!(
            initial_response(plugins::CACHING_SHA2_PASSWORD, "secret", &nonce).unwrap(),
            auth::caching_sha2_password("secret", &nonce)
        );
    }

    #[test]
    fn initial_response_rejects_unknown_plugin() {
        let err = initial_response("sha256_password", "secret", &[0u8; 20]).unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn handle_more_data_fast_auth_success() {
        let action = handle_more_data(&[caching_sha2::FAST_AUTH_SUCCESS], false).unwrap();
        assert!(matches!(action, AuthAction::Reply(ref v) if v.is_empty()));
    }

    #[test]
    fn handle_more_data_full_auth_without_tls_requests_key() {
        let action = handle_more_data(&[caching_sha2::PERFORM_FULL_AUTH], false).unwrap();
        assert!(matches!(action, AuthAction::RequestPublicKey));
    }

    #[test]
    fn handle_more_data_full_auth_with_tls_sends_cleartext() {
        let action = handle_more_data(&[caching_sha2::PERFORM_FULL_AUTH], true).unwrap();
        assert!(matches!(action, AuthAction::Reply(ref v) if v.is_empty()));
    }

    #[test]
    fn handle_more_data_public_key_payload() {
        let pem = b"-----BEGIN PUBLIC KEY-----\nABC\n-----END PUBLIC KEY-----".to_vec();
        let action = handle_more_data(&pem, false).unwrap();
        match action {
            AuthAction::EncryptWithRsaKey { public_key_pem } => assert_eq!(public_key_pem, pem),
            _ => panic!("expected EncryptWithRsaKey"),
        }
    }

    #[test]
    fn cleartext_password_payload_has_nul_terminator() {
        let payload = cleartext_password_payload("secret");
        assert_eq!(payload.last(), Some(&0));
        assert_eq!(&payload[..payload.len() - 1], b"secret");
    }
}
