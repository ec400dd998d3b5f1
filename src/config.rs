//! MySQL connection configuration.
//!
//! Provides connection parameters for establishing MySQL connections
//! including authentication, SSL, and connection options. Configuration
//! is constructed programmatically (via the builder below); parsing
//! connection URLs is out of scope.

use std::collections::HashMap;
use std::time::Duration;

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    #[default]
    Disable,
    /// Prefer SSL if available, fall back to non-SSL
    Preferred,
    /// Require SSL connection
    Required,
    /// Require SSL and verify server certificate
    VerifyCa,
    /// Require SSL and verify server certificate matches hostname
    VerifyIdentity,
}

impl SslMode {
    /// Check if SSL should be attempted.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Check if SSL is required.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Which term the caller uses for MySQL's single-level database
/// namespace; distinguishes `set_catalog` from `set_schema` even
/// though both send `COM_INIT_DB` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseTerm {
    #[default]
    Schema,
    Catalog,
}

/// TLS configuration for connections with `ssl_mode.should_try_ssl()`.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM-encoded CA certificate bundle path, for `VerifyCa`/`VerifyIdentity`.
    pub ca_cert_path: Option<String>,
    /// PEM-encoded client certificate path, for mutual TLS.
    pub client_cert_path: Option<String>,
    /// PEM-encoded client key path, for mutual TLS.
    pub client_key_path: Option<String>,
    /// Hostname to verify the server certificate against under
    /// `VerifyIdentity`, when it differs from `MySqlConfig::host` (a
    /// connection through a proxy or tunnel, for instance).
    pub server_name: Option<String>,
    /// Skip certificate verification entirely. Only ever meaningful
    /// together with `SslMode::Required` (`VerifyCa`/`VerifyIdentity`
    /// imply verification by definition); exists for connecting to
    /// servers with self-signed certificates in development.
    pub danger_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_identity(
        mut self,
        cert_path: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn danger_skip_verify(mut self, enabled: bool) -> Self {
        self.danger_skip_verify = enabled;
        self
    }
}

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name to connect to (optional at connect time)
    pub database: Option<String>,
    /// Character set (default: utf8mb4)
    pub charset: u8,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Socket read timeout for subsequent commands (after connect).
    pub read_timeout: Option<Duration>,
    /// Socket write timeout for subsequent commands (after connect).
    pub write_timeout: Option<Duration>,
    /// SSL mode
    pub ssl_mode: SslMode,
    /// TLS configuration, consulted when `ssl_mode.should_try_ssl()`.
    pub tls_config: TlsConfig,
    /// Whether the client is allowed to request the server's RSA public
    /// key in the clear during `caching_sha2_password` full auth, when
    /// not already running over TLS.
    pub allow_public_key_retrieval: bool,
    /// Enable compression (CLIENT_COMPRESS capability)
    pub compression: bool,
    /// Additional client capability flag bits to request, beyond the
    /// crate's own defaults (e.g. vendor extensions).
    pub capabilities_extra: u32,
    /// Additional connection attributes
    pub attributes: HashMap<String, String>,
    /// Local infile handling (disabled by default for security)
    pub local_infile: bool,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
    /// Which term the caller uses for `set_catalog`/`set_schema`.
    pub database_term: DatabaseTerm,
    /// Whether metadata queries should report stored functions among
    /// "procedures" (mirrors the JDBC driver's
    /// `getProceduresReturnsFunctions` connection property; consumed by
    /// callers building `DatabaseMetaData`-shaped queries, out of scope
    /// for this crate's own surface).
    pub get_procedures_returns_functions: bool,
    /// Session variables to set immediately after connecting, applied
    /// via one `SET` statement per entry.
    pub server_variables: HashMap<String, String>,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: crate::protocol::charset::UTF8MB4_0900_AI_CI,
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            write_timeout: None,
            ssl_mode: SslMode::default(),
            tls_config: TlsConfig::default(),
            allow_public_key_retrieval: false,
            compression: false,
            capabilities_extra: 0,
            attributes: HashMap::new(),
            local_infile: false,
            max_packet_size: 64 * 1024 * 1024, // 64MB
            database_term: DatabaseTerm::default(),
            get_procedures_returns_functions: false,
            server_variables: HashMap::new(),
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn tls_config(mut self, tls_config: TlsConfig) -> Self {
        self.tls_config = tls_config;
        self
    }

    pub fn allow_public_key_retrieval(mut self, enabled: bool) -> Self {
        self.allow_public_key_retrieval = enabled;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// OR additional client capability flag bits into the negotiated set.
    pub fn capabilities_extra(mut self, flags: u32) -> Self {
        self.capabilities_extra = flags;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Enable or disable local infile handling.
    ///
    /// # Security Warning
    /// Enabling local infile can be a security risk. Only enable if you
    /// trust the server and understand the implications.
    pub fn local_infile(mut self, enabled: bool) -> Self {
        self.local_infile = enabled;
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn database_term(mut self, term: DatabaseTerm) -> Self {
        self.database_term = term;
        self
    }

    pub fn get_procedures_returns_functions(mut self, enabled: bool) -> Self {
        self.get_procedures_returns_functions = enabled;
        self
    }

    pub fn server_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.server_variables.insert(key.into(), value.into());
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build capability flags based on configuration.
    pub fn capability_flags(&self) -> u32 {
        use crate::protocol::capabilities::{
            CLIENT_COMPRESS, CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_LOCAL_FILES,
            CLIENT_SSL, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS | self.capabilities_extra;

        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }

        if self.ssl_mode.should_try_ssl() {
            flags |= CLIENT_SSL;
        }

        if self.compression {
            flags |= CLIENT_COMPRESS;
        }

        if self.local_infile {
            flags |= CLIENT_LOCAL_FILES;
        }

        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = MySqlConfig::new()
            .host("db.example.com")
            .port(3307)
            .user("myuser")
            .password("secret")
            .database("testdb")
            .connect_timeout(Duration::from_secs(10))
            .ssl_mode(SslMode::Required)
            .compression(true)
            .attribute("program_name", "myapp");

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 3307);
        assert_eq!(config.user, "myuser");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.database, Some("testdb".to_string()));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ssl_mode, SslMode::Required);
        assert!(config.compression);
        assert_eq!(
            config.attributes.get("program_name"),
            Some(&"myapp".to_string())
        );
    }

    #[test]
    fn test_socket_addr() {
        let config = MySqlConfig::new().host("db.example.com").port(3307);
        assert_eq!(config.socket_addr(), "db.example.com:3307");
    }

    #[test]
    fn test_ssl_mode_properties() {
        assert!(!SslMode::Disable.should_try_ssl());
        assert!(!SslMode::Disable.is_required());

        assert!(SslMode::Preferred.should_try_ssl());
        assert!(!SslMode::Preferred.is_required());

        assert!(SslMode::Required.should_try_ssl());
        assert!(SslMode::Required.is_required());

        assert!(SslMode::VerifyCa.should_try_ssl());
        assert!(SslMode::VerifyCa.is_required());

        assert!(SslMode::VerifyIdentity.should_try_ssl());
        assert!(SslMode::VerifyIdentity.is_required());
    }

    #[test]
    fn test_capability_flags() {
        use crate::protocol::capabilities::*;

        let config = MySqlConfig::new().database("test").compression(true);
        let flags = config.capability_flags();

        assert!(flags & CLIENT_CONNECT_WITH_DB != 0);
        assert!(flags & CLIENT_COMPRESS != 0);
        assert!(flags & CLIENT_PROTOCOL_41 != 0);
        assert!(flags & CLIENT_SECURE_CONNECTION != 0);
    }

    #[test]
    fn test_capabilities_extra_bits_are_included() {
        let config = MySqlConfig::new().capabilities_extra(1 << 29);
        assert!(config.capability_flags() & (1 << 29) != 0);
    }

    #[test]
    fn test_default_config() {
        let config = MySqlConfig::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.ssl_mode, SslMode::Disable);
        assert!(!config.compression);
        assert!(!config.local_infile);
        assert_eq!(config.database_term, DatabaseTerm::Schema);
        assert!(!config.allow_public_key_retrieval);
    }

    #[test]
    fn test_database_term_builder() {
        let config = MySqlConfig::new().database_term(DatabaseTerm::Catalog);
        assert_eq!(config.database_term, DatabaseTerm::Catalog);
    }
}
