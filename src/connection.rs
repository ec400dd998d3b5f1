//! The synchronous connection orchestrator: `connect()` performs the
//! TCP dial, the initial handshake, the optional mid-stream TLS
//! upgrade, and the pluggable authentication exchange; everything
//! after that is one `&mut self` command at a time over a
//! [`ProtocolFacade`].
//!
//! Authentication drives the `caching_sha2_password` full-auth path to
//! completion, RSA included: when the server asks for full auth and the
//! connection isn't already under TLS, this requests the server's RSA
//! public key, encrypts the password against it, and sends the result —
//! rather than refusing and pointing the caller at TLS.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::auth::{self, caching_sha2};
use crate::auth_phase::{self, AuthAction};
use crate::client_prepared::{self, ClientPreparedStatement};
use crate::config::MySqlConfig;
use crate::error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, QueryErrorKind,
};
use crate::facade::ProtocolFacade;
use crate::protocol::handshake::{self, HandshakeResponseFields};
use crate::protocol::{self, Command, OkPacket, PacketReader, PacketType, PacketWriter, server_status};
use crate::result_set::ResultSet;
use crate::server_prepared::{ServerPreparedStatement, StmtExecuteOutcome};
use crate::socket::PacketSocket;
use crate::telemetry;
use crate::text_statement::{self, QueryOutcome};
use crate::types;
use crate::value::Value;

#[cfg(feature = "tls")]
use crate::tls::TlsStream;

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

fn connect_error(kind: ConnectionErrorKind, message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: message.into(),
        source: None,
    })
}

fn io_connect_error(kind: ConnectionErrorKind, context: &str, e: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    })
}

fn query_error_from_payload(payload: &[u8], sql: Option<&str>) -> Error {
    let mut reader = PacketReader::new(payload);
    match reader.parse_err_packet() {
        Some(err) => Error::Query(QueryError {
            kind: QueryErrorKind::Execution,
            message: err.error_message,
            sqlstate: Some(err.sql_state),
            vendor_code: Some(err.error_code),
            sql: sql.map(str::to_string),
            params: None,
        }),
        None => protocol_error("malformed error packet"),
    }
}

/// The byte-stream transport a connection speaks over: a raw TCP socket
/// until (and unless) the handshake negotiates a TLS upgrade, after
/// which every remaining packet on the connection's lifetime flows
/// through the encrypted wrapper instead.
pub enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    fn tcp_stream(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.get_ref(),
        }
    }

    fn set_timeouts(&self, dur: Option<Duration>) {
        let stream = self.tcp_stream();
        let _ = stream.set_read_timeout(dur);
        let _ = stream.set_write_timeout(dur);
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// `SET SESSION TRANSACTION ISOLATION LEVEL` values. There is
/// deliberately no `TRANSACTION_NONE` variant — MySQL has no
/// equivalent, and a caller simply cannot ask for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub(crate) const fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A live MySQL connection: one command in flight at a time, enforced
/// by `&mut self`. Generic over the transport so tests can drive the
/// whole command surface against an in-memory `Cursor` the way every
/// other module in this crate does; `connect()` always produces a
/// `MySqlConnection<Transport>` (aliased as plain `MySqlConnection`).
pub struct MySqlConnection<S: Read + Write = Transport> {
    facade: ProtocolFacade<S>,
    config: MySqlConfig,
    connection_id: u32,
    autocommit: bool,
    poisoned: bool,
}

impl MySqlConnection<Transport> {
    /// Dial `config.socket_addr()`, perform the initial handshake, the
    /// TLS upgrade if negotiated, and authenticate.
    pub fn connect(config: MySqlConfig) -> Result<Self, Error> {
        let addr = config
            .socket_addr()
            .to_socket_addrs()
            .map_err(|e| io_connect_error(ConnectionErrorKind::Connect, "failed to resolve address", e))?
            .next()
            .ok_or_else(|| connect_error(ConnectionErrorKind::Connect, "address resolved to no candidates"))?;

        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(|e| io_connect_error(ConnectionErrorKind::Connect, "failed to connect", e))?;
        let _ = stream.set_nodelay(true);
        stream.set_read_timeout(config.read_timeout.or(Some(config.connect_timeout))).ok();
        stream.set_write_timeout(config.write_timeout.or(Some(config.connect_timeout))).ok();

        let mut handshake_socket = PacketSocket::new(stream);
        let (payload, _) = handshake_socket.receive()?;
        let initial = handshake::parse_initial_handshake(&payload)
            .ok_or_else(|| protocol_error("malformed or unsupported initial handshake packet"))?;

        let mut client_caps = config.capability_flags() & initial.capabilities;
        let mut nonce = initial.auth_plugin_data.clone();
        let mut plugin_name = initial.auth_plugin_name.clone();

        let (mut socket, is_tls) = Self::maybe_upgrade_tls(handshake_socket, &config, initial.capabilities, &mut client_caps)?;

        let password = config.password.as_deref().unwrap_or("");
        let auth_response = auth_phase::initial_response(&plugin_name, password, &nonce)?;

        let attributes = config.attributes.clone();
        let response_fields = HandshakeResponseFields {
            client_capabilities: client_caps,
            max_packet_size: config.max_packet_size,
            charset: config.charset,
            username: &config.user,
            auth_response: &auth_response,
            database: config.database.as_deref(),
            auth_plugin_name: &plugin_name,
            attributes: &attributes,
        };
        let response = handshake::build_handshake_response(&response_fields);
        socket.send(&response)?;

        let status_flags = Self::drive_auth(&mut socket, &config, password, &mut plugin_name, &mut nonce, is_tls)?;

        let facade = ProtocolFacade::new(socket, client_caps, initial.server_version.clone());
        let mut conn = Self {
            facade,
            config,
            connection_id: initial.connection_id,
            autocommit: status_flags & server_status::SERVER_STATUS_AUTOCOMMIT != 0,
            poisoned: false,
        };

        for (key, value) in conn.config.server_variables.clone() {
            conn.execute(&format!("SET SESSION {key} = {value}"), &[])?;
        }

        Ok(conn)
    }

    #[cfg(feature = "tls")]
    fn maybe_upgrade_tls(
        mut handshake_socket: PacketSocket<TcpStream>,
        config: &MySqlConfig,
        server_caps: u32,
        client_caps: &mut u32,
    ) -> Result<(PacketSocket<Transport>, bool), Error> {
        use crate::tls;

        if !tls::should_upgrade(config.ssl_mode, server_caps)? {
            return Ok((PacketSocket::new(Transport::Plain(handshake_socket.into_transport())), false));
        }
        tls::validate_tls_config(config.ssl_mode, &config.tls_config)?;

        let ssl_request = handshake::build_ssl_request(*client_caps, config.max_packet_size, config.charset);
        handshake_socket.send(&ssl_request)?;
        let next_sequence_id = handshake_socket.sequence_id();

        let raw = handshake_socket.into_transport();
        let tls_stream = TlsStream::handshake(raw, &config.tls_config, &config.host, config.ssl_mode)?;

        let mut socket = PacketSocket::new(Transport::Tls(Box::new(tls_stream)));
        socket.set_sequence_id(next_sequence_id);
        *client_caps |= protocol::capabilities::CLIENT_SSL;
        Ok((socket, true))
    }

    #[cfg(not(feature = "tls"))]
    fn maybe_upgrade_tls(
        handshake_socket: PacketSocket<TcpStream>,
        config: &MySqlConfig,
        _server_caps: u32,
        _client_caps: &mut u32,
    ) -> Result<(PacketSocket<Transport>, bool), Error> {
        if config.ssl_mode.should_try_ssl() {
            return Err(connect_error(
                ConnectionErrorKind::Connect,
                "SSL requested but this build was compiled without the `tls` feature",
            ));
        }
        Ok((PacketSocket::new(Transport::Plain(handshake_socket.into_transport())), false))
    }

    /// Drive the post-handshake-response auth exchange to completion,
    /// following `AuthSwitchRequest`s and `AuthMoreData` packets.
    /// Returns the final OK packet's status flags.
    fn drive_auth(
        socket: &mut PacketSocket<Transport>,
        config: &MySqlConfig,
        password: &str,
        plugin_name: &mut String,
        nonce: &mut Vec<u8>,
        is_tls: bool,
    ) -> Result<u16, Error> {
        loop {
            let (payload, _) = socket.receive()?;
            let Some(&first) = payload.first() else {
                return Err(protocol_error("empty packet during authentication"));
            };

            match first {
                0x00 => {
                    let mut reader = PacketReader::new(&payload);
                    let ok = reader
                        .parse_ok_packet()
                        .ok_or_else(|| protocol_error("malformed OK packet"))?;
                    return Ok(ok.status_flags);
                }
                0xFF => {
                    let mut reader = PacketReader::new(&payload);
                    let err = reader
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("malformed error packet"))?;
                    return Err(connect_error(
                        ConnectionErrorKind::Authentication,
                        format!("{} ({})", err.error_message, err.sql_state),
                    ));
                }
                0xFE => {
                    let switch = handshake::parse_auth_switch_request(&payload[1..])
                        .ok_or_else(|| protocol_error("malformed AuthSwitchRequest"))?;
                    *plugin_name = switch.plugin_name;
                    *nonce = switch.auth_data;
                    let response = auth_phase::switch_response(plugin_name, password, nonce)?;
                    socket.send(&response)?;
                }
                0x01 => {
                    let status_byte = payload.get(1).copied();
                    let action = auth_phase::handle_more_data(&payload[1..], is_tls)?;
                    match action {
                        AuthAction::Reply(bytes) if !bytes.is_empty() => socket.send(&bytes)?,
                        AuthAction::Reply(_) => {
                            if status_byte == Some(caching_sha2::PERFORM_FULL_AUTH) && is_tls {
                                let cleartext = auth_phase::cleartext_password_payload(password);
                                socket.send(&cleartext)?;
                            }
                            // FAST_AUTH_SUCCESS: nothing to send, loop back for the OK.
                        }
                        AuthAction::RequestPublicKey => {
                            if !config.allow_public_key_retrieval {
                                return Err(connect_error(
                                    ConnectionErrorKind::Authentication,
                                    "server requested full authentication and allow_public_key_retrieval is disabled",
                                ));
                            }
                            socket.send(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
                        }
                        AuthAction::EncryptWithRsaKey { public_key_pem } => {
                            let encrypted =
                                auth_phase::encrypt_full_auth_password(password, nonce, &public_key_pem)?;
                            socket.send(&encrypted)?;
                        }
                        AuthAction::Done => {}
                    }
                }
                _ => return Err(protocol_error("unexpected packet during authentication")),
            }
        }
    }

    /// Reach in and adjust the raw socket's read/write timeouts,
    /// bypassing the connection's own configured defaults. Used by
    /// [`Self::is_valid`] to bound a liveness check without otherwise
    /// disturbing the connection's steady-state timeout configuration.
    fn set_socket_timeouts(&mut self, dur: Option<Duration>) {
        self.facade.socket_mut().transport_mut().set_timeouts(dur);
    }
}

impl<S: Read + Write> MySqlConnection<S> {
    fn ensure_alive(&self) -> Result<(), Error> {
        if self.poisoned {
            Err(Error::Closed("MySqlConnection"))
        } else {
            Ok(())
        }
    }

    /// Mark the connection poisoned on protocol violations or transport
    /// failures (never on an ordinary server `ERR`, which leaves the
    /// connection perfectly usable for the next command).
    fn guard<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if matches!(result, Err(Error::Protocol(_)) | Err(Error::Connection(_))) {
            self.poisoned = true;
        }
        result
    }

    fn query_span(&self, sql: &str) -> tracing::Span {
        let target = format!("{}:{}", self.config.host, self.config.port);
        tracing::info_span!(
            "mysql.query",
            db.system = "mysql",
            db.statement = %telemetry::sanitize(sql),
            otel.name = %telemetry::span_name(sql, Some(&target)),
        )
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> &str {
        self.facade.server_version()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Build a client-side prepared statement (textual `?` substitution,
    /// no round trip to the server).
    pub fn prepare_client(&self, sql: impl Into<String>) -> ClientPreparedStatement {
        ClientPreparedStatement::new(sql)
    }

    /// `COM_QUERY`: run `sql` (with `params` interpolated via
    /// client-side substitution, when non-empty) and return whatever
    /// result set it produced, or an empty one for a statement with no
    /// rows.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, Error> {
        self.ensure_alive()?;
        let _span = self.query_span(sql).entered();
        let rendered = Self::render(sql, params);
        let result = text_statement::execute_query(&mut self.facade, &rendered);
        let outcome = self.guard(result)?;
        match outcome {
            QueryOutcome::ResultSet(rs) => Ok(rs),
            QueryOutcome::Ok(_) => Ok(ResultSet::new(Vec::new(), Vec::new())),
        }
    }

    /// `COM_QUERY` for statements with no result set; returns the
    /// server's reported affected-row count.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        self.ensure_alive()?;
        let _span = self.query_span(sql).entered();
        let rendered = Self::render(sql, params);
        let result = text_statement::execute_query(&mut self.facade, &rendered);
        let outcome = self.guard(result)?;
        match outcome {
            QueryOutcome::Ok(ok) => Ok(ok.affected_rows),
            QueryOutcome::ResultSet(rs) => Ok(rs.len() as u64),
        }
    }

    /// `COM_QUERY` for an `INSERT`, returning the generated
    /// `last_insert_id`.
    pub fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64, Error> {
        self.ensure_alive()?;
        let _span = self.query_span(sql).entered();
        let rendered = Self::render(sql, params);
        let result = text_statement::execute_query(&mut self.facade, &rendered);
        let outcome = self.guard(result)?;
        match outcome {
            QueryOutcome::Ok(ok) => Ok(ok.last_insert_id as i64),
            QueryOutcome::ResultSet(_) => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Execution,
                message: "statement returned a result set; expected an INSERT".into(),
                sqlstate: None,
                vendor_code: None,
                sql: Some(sql.to_string()),
                params: None,
            })),
        }
    }

    fn render(sql: &str, params: &[Value]) -> String {
        if params.is_empty() {
            sql.to_string()
        } else {
            types::interpolate_params(sql, params)
        }
    }

    /// Run `sql_template` once per row of `rows`. When the template
    /// contains an `INSERT ... VALUES (...)` clause, the whole batch
    /// collapses into a single multi-row `INSERT` (returning
    /// `client_prepared::SUCCESS_NO_INFO` per row, since the server
    /// reports one aggregate count for the statement). Otherwise the
    /// rows are joined into one `;`-separated multi-statement string,
    /// sent with `CLIENT_MULTI_STATEMENTS` toggled on for the duration
    /// (restored off even if the batch fails partway through).
    pub fn execute_batch(&mut self, sql_template: &str, rows: &[Vec<Value>]) -> Result<Vec<i64>, Error> {
        self.ensure_alive()?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let _span = self.query_span(sql_template).entered();

        if let Some((collapsed_sql, counts)) = client_prepared::collapse_insert_batch(sql_template, rows) {
            let result = text_statement::execute_query(&mut self.facade, &collapsed_sql);
            self.guard(result)?;
            return Ok(counts);
        }

        let multi_sql = client_prepared::split_multi_statement_batch(sql_template, rows);
        let enable_result = self.facade.com_set_option(true);
        self.guard(enable_result)?;

        let send_result = self.send_multi_query(&multi_sql);
        let outcome = self.guard(send_result);

        let disable_result = self.facade.com_set_option(false);
        self.guard(disable_result)?;

        outcome
    }

    fn send_multi_query(&mut self, multi_sql: &str) -> Result<Vec<i64>, Error> {
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::with_capacity(1 + multi_sql.len());
        writer.write_u8(Command::Query as u8);
        writer.write_bytes(multi_sql.as_bytes());
        self.facade.send(writer.as_bytes())?;

        let mut counts = Vec::new();
        loop {
            let (payload, _) = self.facade.receive()?;
            if payload.is_empty() {
                return Err(protocol_error("empty response in multi-statement batch"));
            }
            match PacketType::from_first_byte(payload[0], payload.len() as u32) {
                PacketType::Error => return Err(query_error_from_payload(&payload, Some(multi_sql))),
                PacketType::Ok => {
                    let mut reader = PacketReader::new(&payload);
                    let ok = reader
                        .parse_ok_packet()
                        .ok_or_else(|| protocol_error("malformed OK packet"))?;
                    counts.push(ok.affected_rows as i64);
                    if ok.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS == 0 {
                        return Ok(counts);
                    }
                }
                _ => {
                    let mut reader = PacketReader::new(&payload);
                    let column_count = reader
                        .read_lenenc_int()
                        .ok_or_else(|| protocol_error("malformed result set header"))?
                        as usize;
                    let defs = self.facade.repeat_process(column_count, |data| {
                        types::parse_column_def(data)
                            .ok_or_else(|| protocol_error("malformed column definition packet"))
                    })?;
                    if !self.facade.deprecates_eof() {
                        self.facade.receive()?;
                    }
                    let (rows, terminator) = self.facade.read_until_eof(|data| {
                        Ok(text_statement_decode_row(data, &defs))
                    })?;
                    counts.push(rows.len() as i64);
                    if terminator.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS == 0 {
                        return Ok(counts);
                    }
                }
            }
        }
    }

    /// `COM_STMT_PREPARE`.
    pub fn prepare(&mut self, sql: &str) -> Result<ServerPreparedStatement, Error> {
        self.ensure_alive()?;
        let result = ServerPreparedStatement::prepare(&mut self.facade, sql);
        self.guard(result)
    }

    /// `COM_STMT_EXECUTE`.
    pub fn execute_prepared(
        &mut self,
        stmt: &ServerPreparedStatement,
        params: &[Value],
    ) -> Result<StmtExecuteOutcome, Error> {
        self.ensure_alive()?;
        let result = stmt.execute(&mut self.facade, params);
        self.guard(result)
    }

    /// `COM_STMT_CLOSE`.
    pub fn close_prepared(&mut self, stmt: &mut ServerPreparedStatement) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = stmt.close(&mut self.facade);
        self.guard(result)
    }

    /// `COM_STMT_RESET`.
    pub fn reset_prepared(&mut self, stmt: &mut ServerPreparedStatement) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = stmt.reset(&mut self.facade);
        self.guard(result)
    }

    fn send_simple_command(&mut self, command: Command, payload: &[u8]) -> Result<OkPacket, Error> {
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::with_capacity(1 + payload.len());
        writer.write_u8(command as u8);
        writer.write_bytes(payload);
        self.facade.send(writer.as_bytes())?;

        let (response, _) = self.facade.receive()?;
        let first = response.first().copied().unwrap_or(0xFF);
        match PacketType::from_first_byte(first, response.len() as u32) {
            PacketType::Ok => {
                let mut reader = PacketReader::new(&response);
                reader
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))
            }
            PacketType::Error => Err(query_error_from_payload(&response, None)),
            _ => Err(protocol_error("unexpected response to command")),
        }
    }

    /// `COM_PING`.
    pub fn ping(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self.send_simple_command(Command::Ping, &[]).map(|_| ());
        self.guard(result)
    }

    /// `COM_INIT_DB`.
    pub fn init_db(&mut self, name: &str) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self
            .send_simple_command(Command::InitDb, name.as_bytes())
            .map(|_| ());
        self.guard(result)
    }

    /// Switch the active database, under the caller's preferred term
    /// for MySQL's single-level namespace. Both send `COM_INIT_DB`.
    pub fn set_catalog(&mut self, name: &str) -> Result<(), Error> {
        self.init_db(name)
    }

    pub fn set_schema(&mut self, name: &str) -> Result<(), Error> {
        self.init_db(name)
    }

    /// `COM_RESET_CONNECTION`: clears session state (temp tables,
    /// prepared statements, transaction state) while keeping the TCP
    /// connection and authentication. Resets `autocommit` to the
    /// server's default (on) to match.
    pub fn reset_connection(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self
            .send_simple_command(Command::ResetConnection, &[])
            .map(|_| ());
        let result = self.guard(result);
        if result.is_ok() {
            self.autocommit = true;
        }
        result
    }

    /// `COM_SET_OPTION`: toggle `CLIENT_MULTI_STATEMENTS`.
    pub fn set_option(&mut self, enable_multi_statements: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self.facade.com_set_option(enable_multi_statements);
        self.guard(result)
    }

    /// `COM_STATISTICS`: a short, human-readable server status line.
    /// Unlike every other command, the response has no `OK`/`ERR`
    /// framing — it's the raw string.
    pub fn statistics(&mut self) -> Result<String, Error> {
        self.ensure_alive()?;
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::Statistics as u8);
        let send_result = self.facade.send(writer.as_bytes());
        self.guard(send_result)?;
        let recv_result = self.facade.receive();
        let (response, _) = self.guard(recv_result)?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// `COM_QUIT`. Best-effort: the server never replies, and any write
    /// failure here is not worth surfacing to a caller that is closing
    /// the connection anyway.
    pub fn close(mut self) -> Result<(), Error> {
        if self.poisoned {
            return Ok(());
        }
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::Quit as u8);
        let _ = self.facade.send(writer.as_bytes());
        Ok(())
    }

    /// A bounded liveness probe: `COM_PING` under a caller-supplied
    /// timeout, catching any error (including the timeout itself)
    /// without poisoning the connection — a transient hiccup here isn't
    /// grounds for tearing the connection down.
    pub fn is_valid(&mut self, timeout: Duration) -> bool
    where
        Self: HasTimeoutOverride,
    {
        if self.poisoned {
            return false;
        }
        self.override_timeouts(Some(timeout));
        let alive = self.ping_uncounted().is_ok();
        let restore = self.config_timeout();
        self.override_timeouts(restore);
        alive
    }

    fn ping_uncounted(&mut self) -> Result<(), Error> {
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::Ping as u8);
        self.facade.send(writer.as_bytes())?;
        let (response, _) = self.facade.receive()?;
        let first = response.first().copied().unwrap_or(0xFF);
        match PacketType::from_first_byte(first, response.len() as u32) {
            PacketType::Ok => Ok(()),
            _ => Err(protocol_error("unexpected response to COM_PING")),
        }
    }

    fn config_timeout(&self) -> Option<Duration> {
        self.config.read_timeout.or(Some(self.config.connect_timeout))
    }

    // --- Transaction control --------------------------------------------

    pub fn set_autocommit(&mut self, enabled: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        if self.autocommit == enabled {
            return Ok(());
        }
        self.execute(&format!("SET autocommit={}", u8::from(enabled)), &[])?;
        self.autocommit = enabled;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.execute("COMMIT", &[])?;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.execute("ROLLBACK", &[])?;
        Ok(())
    }

    pub fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), Error> {
        self.ensure_alive()?;
        self.execute(
            &format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
            &[],
        )?;
        Ok(())
    }

    pub fn set_read_only(&mut self, read_only: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        let mode = if read_only { "READ ONLY" } else { "READ WRITE" };
        self.execute(&format!("SET SESSION TRANSACTION {mode}"), &[])?;
        Ok(())
    }
}

fn text_statement_decode_row(data: &[u8], columns: &[crate::types::ColumnDef]) -> crate::row::Row {
    let mut reader = PacketReader::new(data);
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if reader.peek() == Some(0xFB) {
            reader.read_u8();
            values.push(Value::Null);
            continue;
        }
        match reader.read_lenenc_bytes() {
            Some(bytes) => values.push(types::decode_text_value(
                column.column_type,
                &bytes,
                column.is_unsigned(),
            )),
            None => values.push(Value::Null),
        }
    }
    let names = columns.iter().map(|c| c.name.clone()).collect();
    crate::row::Row::new(names, values)
}

/// A seam so `is_valid` can override socket timeouts on the real
/// `Transport` connection without making every generic `S` support it —
/// in-memory test transports (`Cursor`) have no timeouts to override.
pub trait HasTimeoutOverride {
    fn override_timeouts(&mut self, dur: Option<Duration>);
}

impl HasTimeoutOverride for MySqlConnection<Transport> {
    fn override_timeouts(&mut self, dur: Option<Duration>) {
        self.set_socket_timeouts(dur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities;
    use std::io::Cursor;

    fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![
            (payload.len() & 0xFF) as u8,
            ((payload.len() >> 8) & 0xFF) as u8,
            ((payload.len() >> 16) & 0xFF) as u8,
            seq,
        ];
        out.extend_from_slice(payload);
        out
    }

    fn conn_over(bytes: Vec<u8>) -> MySqlConnection<Cursor<Vec<u8>>> {
        let socket = PacketSocket::new(Cursor::new(bytes));
        let facade = ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.33".into());
        MySqlConnection {
            facade,
            config: MySqlConfig::new(),
            connection_id: 1,
            autocommit: true,
            poisoned: false,
        }
    }

    #[test]
    fn execute_returns_affected_rows() {
        let mut bytes = Vec::new();
        bytes.extend(packet(1, &[0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00]));
        let mut conn = conn_over(bytes);
        let affected = conn.execute("DELETE FROM t WHERE id = ?", &[Value::Int(1)]).unwrap();
        assert_eq!(affected, 3);
    }

    #[test]
    fn insert_rejects_result_set_response() {
        let mut bytes = Vec::new();
        bytes.extend(packet(1, &[0x01]));
        bytes.extend(packet(2, &{
            let mut w = PacketWriter::new();
            w.write_lenenc_string("def");
            w.write_lenenc_string("d");
            w.write_lenenc_string("t");
            w.write_lenenc_string("t");
            w.write_lenenc_string("id");
            w.write_lenenc_string("id");
            w.write_lenenc_int(0x0c);
            w.write_u16_le(33);
            w.write_u32_le(11);
            w.write_u8(crate::types::FieldType::Long as u8);
            w.write_u16_le(0);
            w.write_u8(0);
            w.into_bytes()
        }));
        bytes.extend(packet(3, &[0xFE, 0x00, 0x00, 0x02, 0x00]));
        bytes.extend(packet(4, &[0xFE, 0x00, 0x00, 0x02, 0x00]));
        let mut conn = conn_over(bytes);
        let err = conn.insert("SELECT id FROM t", &[]).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn protocol_error_poisons_connection() {
        // A packet claiming a 10-byte payload that the stream doesn't
        // actually contain: `PacketSocket::receive` surfaces this as a
        // `Connection` error (EOF mid-read), which this connection
        // treats the same as a protocol violation for poisoning
        // purposes.
        let bytes = vec![0x0A, 0x00, 0x00, 0x01, 0x00];
        let mut conn = conn_over(bytes);
        assert!(conn.execute("SELECT 1", &[]).is_err());
        assert!(conn.is_poisoned());
        assert!(matches!(conn.execute("SELECT 1", &[]), Err(Error::Closed(_))));
    }

    #[test]
    fn query_error_does_not_poison_connection() {
        let mut bytes = Vec::new();
        let mut err_payload = vec![0xFF, 0x19, 0x04, b'#'];
        err_payload.extend_from_slice(b"42000");
        err_payload.extend_from_slice(b"bad syntax");
        bytes.extend(packet(1, &err_payload));
        let mut conn = conn_over(bytes);
        assert!(conn.execute("SELECT BAD", &[]).is_err());
        assert!(!conn.is_poisoned());
    }

    #[test]
    fn set_autocommit_is_a_no_op_when_already_matching() {
        let mut conn = conn_over(Vec::new());
        assert!(conn.autocommit());
        conn.set_autocommit(true).unwrap();
    }

    #[test]
    fn execute_batch_collapses_inserts_into_one_statement() {
        let mut bytes = Vec::new();
        bytes.extend(packet(1, &[0x00, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00]));
        let mut conn = conn_over(bytes);
        let rows = vec![
            vec![Value::Int(1), Value::Text("a".into())],
            vec![Value::Int(2), Value::Text("b".into())],
        ];
        let counts = conn
            .execute_batch("INSERT INTO t (a, b) VALUES (?, ?)", &rows)
            .unwrap();
        assert_eq!(counts, vec![client_prepared::SUCCESS_NO_INFO; 2]);
    }
}
