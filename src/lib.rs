//! `mysql_wire`: a from-scratch client implementation of the MySQL
//! client/server wire protocol — packet framing, the handshake and
//! pluggable authentication, text and binary query protocols, and the
//! prepared-statement lifecycle, behind a typed connection API.
//!
//! No `mysql_common`, no `mysql-async`, no C client library bindings:
//! every packet this crate sends or parses is encoded/decoded by the
//! `protocol` module directly.
//!
//! # Layout
//!
//! - [`socket`] — framed byte transport (packet chunking/reassembly).
//! - [`protocol`] — packet header/type/OK/ERR/EOF types, readers, writers,
//!   and the binary (prepared-statement) codec.
//! - [`auth`] — `mysql_native_password` / `caching_sha2_password` / RSA
//!   full-auth scramble algorithms.
//! - [`facade`] — the shared "read n column defs, then rows until
//!   EOF/OK" protocol choreography used by both query paths.
//! - [`connection`] / [`async_connection`] — the connection orchestrator,
//!   sync and async.
//! - [`client_prepared`] / [`server_prepared`] — the two prepared-statement
//!   strategies.
//! - [`result_set`] — the scrollable cursor over a decoded result set.
//! - [`types`] — field type codes, column metadata, text/binary codecs.
//! - [`value`] / [`row`] — the dynamic value and row types.
//! - [`config`] — `MySqlConfig`, constructed programmatically.
//! - [`telemetry`] — pure SQL-to-span-attribute functions.
//! - [`error`] — the crate's `Error` type and `SQLException` taxonomy.

pub mod async_connection;
pub mod auth;
pub mod auth_phase;
pub mod client_prepared;
pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod result_set;
pub mod row;
pub mod server_prepared;
pub mod socket;
pub mod telemetry;
pub mod text_statement;
pub mod types;
pub mod value;

#[cfg(feature = "tls")]
pub mod tls;

pub use async_connection::MySqlAsyncConnection;
pub use config::{DatabaseTerm, MySqlConfig, SslMode, TlsConfig};
pub use connection::MySqlConnection;
pub use error::{Error, Result, SqlExceptionClass};
pub use row::Row;
pub use value::Value;
