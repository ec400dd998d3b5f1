//! Error types for `mysql_wire`.
//!
//! The shape here is the one the protocol layer actually needs: one
//! variant per failure domain (`Connection`, `Protocol`, `Auth`,
//! `Query`, `Tls`), each carrying a `kind` sub-enum, a human message,
//! and an optional boxed source. `Error::Query` additionally carries
//! the server's sqlstate/vendor code so callers can classify it into
//! the `SQLException` taxonomy via [`Error::classify`].

use std::fmt;

/// The crate's result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all `mysql_wire` operations.
#[derive(Debug)]
#[allow(clippy::result_large_err)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout, auth).
    Connection(ConnectionError),
    /// A packet was malformed or arrived out of the expected sequence.
    Protocol(ProtocolError),
    /// Authentication-plugin failure distinct from a server `ERR` (e.g.
    /// an auth-switch to a plugin this crate doesn't implement).
    Auth(AuthError),
    /// Query execution errors, decoded from a server `ERR` packet or
    /// raised locally (bad parameter, conversion failure).
    Query(QueryError),
    /// TLS handshake/configuration errors.
    Tls(TlsError),
    /// Use of a statement/result set/connection after it was closed.
    Closed(&'static str),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the TCP connection.
    Connect,
    /// Connection was actively refused.
    Refused,
    /// Connection was closed unexpectedly.
    Disconnected,
    /// Connection or command timed out.
    Timeout,
    /// Authentication failed (surfaces as `SQLInvalidAuthorization`).
    Authentication,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    /// Raw bytes of the offending packet, when available, for diagnostics.
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Server requested a plugin this crate does not implement.
    UnsupportedPlugin,
    /// RSA public key retrieval/encryption failed during full auth.
    RsaHandshake,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    /// 5-character SQLSTATE from the server `ERR` packet, when present.
    pub sqlstate: Option<String>,
    /// Vendor (MySQL) error code from the server `ERR` packet.
    pub vendor_code: Option<u16>,
    pub sql: Option<String>,
    pub params: Option<Vec<crate::value::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL.
    Syntax,
    /// Constraint violation (unique, foreign key, etc.).
    Constraint,
    /// Table or column not found.
    NotFound,
    /// Permission denied.
    Permission,
    /// Query timeout.
    Timeout,
    /// Caller passed a bad parameter (index out of range, wrong batch shape).
    BadParameter,
    /// A getter's requested type didn't match the column's declared type.
    Conversion,
    /// Other execution error.
    Execution,
}

#[derive(Debug)]
pub struct TlsError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// The `SQLException` taxonomy from distilled spec §6/§7, derived from
/// an [`Error`] via [`Error::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlExceptionClass {
    Transient,
    NonTransient,
    InvalidAuthorization,
    IntegrityConstraintViolation,
    TransactionRollback,
    Timeout,
    Syntax,
}

impl Error {
    /// Classify this error into the `SQLException` taxonomy (distilled
    /// spec §7's error-kind table, §6's subclass list).
    pub fn classify(&self) -> SqlExceptionClass {
        match self {
            Error::Connection(e) => match e.kind {
                ConnectionErrorKind::Authentication => SqlExceptionClass::InvalidAuthorization,
                ConnectionErrorKind::Timeout => SqlExceptionClass::Timeout,
                _ => SqlExceptionClass::Transient,
            },
            Error::Protocol(_) => SqlExceptionClass::NonTransient,
            Error::Auth(_) => SqlExceptionClass::NonTransient,
            Error::Tls(_) => SqlExceptionClass::NonTransient,
            Error::Closed(_) => SqlExceptionClass::NonTransient,
            Error::Query(e) => {
                if e.kind == QueryErrorKind::Timeout {
                    return SqlExceptionClass::Timeout;
                }
                if e.kind == QueryErrorKind::Syntax {
                    return SqlExceptionClass::Syntax;
                }
                if e.kind == QueryErrorKind::Constraint {
                    return SqlExceptionClass::IntegrityConstraintViolation;
                }
                match e.sqlstate.as_deref() {
                    Some(s) if s.starts_with("40") => SqlExceptionClass::TransactionRollback,
                    Some(s) if s.starts_with("08") => SqlExceptionClass::Transient,
                    _ => SqlExceptionClass::NonTransient,
                }
            }
        }
    }

    /// The SQLSTATE carried by a server `ERR` packet, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error: {}", e.message),
            Error::Protocol(e) => write!(f, "protocol error: {}", e.message),
            Error::Auth(e) => write!(f, "authentication error: {}", e.message),
            Error::Query(e) => {
                if let Some(sql) = &e.sql {
                    write!(f, "query error: {} (sql: {})", e.message, sql)
                } else {
                    write!(f, "query error: {}", e.message)
                }
            }
            Error::Tls(e) => write!(f, "tls error: {}", e.message),
            Error::Closed(what) => write!(f, "{} used after close", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e.source.as_ref().map(|s| s.as_ref() as _),
            Error::Protocol(e) => e.source.as_ref().map(|s| s.as_ref() as _),
            Error::Tls(e) => e.source.as_ref().map(|s| s.as_ref() as _),
            Error::Auth(_) | Error::Query(_) | Error::Closed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_deadlock_rollback() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Execution,
            message: "Deadlock found".into(),
            sqlstate: Some("40001".into()),
            vendor_code: Some(1213),
            sql: None,
            params: None,
        });
        assert_eq!(err.classify(), SqlExceptionClass::TransactionRollback);
    }

    #[test]
    fn classifies_transient_connection_loss() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Execution,
            message: "server gone away".into(),
            sqlstate: Some("08S01".into()),
            vendor_code: None,
            sql: None,
            params: None,
        });
        assert_eq!(err.classify(), SqlExceptionClass::Transient);
    }

    #[test]
    fn classifies_auth_failure() {
        let err = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Authentication,
            message: "access denied".into(),
            source: None,
        });
        assert_eq!(err.classify(), SqlExceptionClass::InvalidAuthorization);
    }

    #[test]
    fn display_includes_sql() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            message: "you have an error in your SQL syntax".into(),
            sqlstate: Some("42000".into()),
            vendor_code: Some(1064),
            sql: Some("SELECT 1 FROOM t".into()),
            params: None,
        });
        let msg = err.to_string();
        assert!(msg.contains("SELECT 1 FROOM t"));
    }
}
