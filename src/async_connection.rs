//! The asynchronous connection orchestrator: the same connect/auth/command
//! surface as [`crate::connection`], driven over `asupersync`'s
//! cancel-correct primitives instead of blocking `std::io`.
//!
//! Shares every piece of pure protocol logic with the sync connection —
//! [`auth_phase`], [`crate::protocol::handshake`], [`crate::types`],
//! [`crate::client_prepared`] — and drives it with [`AsyncPacketSocket`]
//! instead of `PacketSocket`. Only the I/O-driving choreography (dial,
//! handshake exchange, command round trips) is duplicated, not the
//! decision logic underneath it.
//!
//! Unlike the teacher's async connection, full `caching_sha2_password`
//! authentication (RSA public key request plus OAEP encryption) works
//! here even without TLS: `auth_phase` has no I/O of its own to
//! duplicate, so the async path gets the same full-auth support the
//! sync path has for free, rather than refusing and demanding TLS.
//!
//! No TLS support: there is no async TLS stream in this crate's
//! dependency stack, so an async connection is always plaintext.
//! `MySqlConfig::ssl_mode` is consulted for nothing here; a caller that
//! sets it to anything but `Disable` on an async connection gets a
//! plaintext connection anyway.

use std::net::SocketAddr;

use asupersync::io::{AsyncRead, AsyncWrite};
use asupersync::net::TcpStream;
use asupersync::{Cx, Outcome};

use crate::auth::caching_sha2;
use crate::auth_phase::{self, AuthAction};
use crate::client_prepared::{self, ClientPreparedStatement};
use crate::config::MySqlConfig;
use crate::connection::IsolationLevel;
use crate::error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, QueryErrorKind,
};
use crate::facade::AsyncProtocolFacade;
use crate::protocol::handshake::{self, HandshakeResponseFields};
use crate::protocol::{
    self, Command, OkPacket, PacketReader, PacketType, PacketWriter, server_status,
};
use crate::result_set::ResultSet;
use crate::server_prepared;
use crate::socket::AsyncPacketSocket;
use crate::telemetry;
use crate::text_statement;
use crate::types::{self, ColumnDef};
use crate::value::Value;

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

/// An async MySQL connection: one command in flight at a time, enforced
/// by `&mut self`. Generic over the transport so tests can drive the
/// whole command surface against an in-memory mock stream, the async
/// counterpart to how [`crate::connection::MySqlConnection`] tests
/// against a `Cursor`; `connect()` always produces a
/// `MySqlAsyncConnection<TcpStream>` (aliased as plain
/// `MySqlAsyncConnection`).
pub struct MySqlAsyncConnection<S = TcpStream> {
    facade: AsyncProtocolFacade<S>,
    config: MySqlConfig,
    connection_id: u32,
    autocommit: bool,
    poisoned: bool,
}

impl MySqlAsyncConnection<TcpStream> {
    /// Dial `config.socket_addr()`, perform the initial handshake and
    /// authenticate. There is no TLS upgrade on this path.
    pub async fn connect(_cx: &Cx, config: MySqlConfig) -> Outcome<Self, Error> {
        match Self::connect_inner(config).await {
            Ok(conn) => Outcome::Ok(conn),
            Err(e) => Outcome::Err(e),
        }
    }

    async fn connect_inner(config: MySqlConfig) -> Result<Self, Error> {
        let addr_str = config.socket_addr();
        let addr: SocketAddr = addr_str.parse().map_err(|e| {
            connect_error(
                ConnectionErrorKind::Connect,
                format!("invalid socket address {addr_str}: {e}"),
            )
        })?;

        let stream = TcpStream::connect_timeout(addr, config.connect_timeout)
            .await
            .map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                io_connect_error(kind, "failed to connect", e)
            })?;
        let _ = stream.set_nodelay(true);

        let mut socket = AsyncPacketSocket::new(stream);
        let (payload, _) = socket.receive().await?;
        let initial = handshake::parse_initial_handshake(&payload)
            .ok_or_else(|| protocol_error("malformed or unsupported initial handshake packet"))?;

        let client_caps = config.capability_flags() & initial.capabilities;
        let mut nonce = initial.auth_plugin_data.clone();
        let mut plugin_name = initial.auth_plugin_name.clone();

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
        socket.send(&response).await?;

        let status_flags =
            Self::drive_auth(&mut socket, &config, password, &mut plugin_name, &mut nonce).await?;

        let facade = AsyncProtocolFacade::new(socket, client_caps, initial.server_version.clone());
        let mut conn = Self {
            facade,
            config,
            connection_id: initial.connection_id,
            autocommit: status_flags & server_status::SERVER_STATUS_AUTOCOMMIT != 0,
            poisoned: false,
        };

        for (key, value) in conn.config.server_variables.clone() {
            conn.execute(&format!("SET SESSION {key} = {value}"), &[]).await?;
        }

        Ok(conn)
    }

    /// Drive the post-handshake-response auth exchange to completion,
    /// following `AuthSwitchRequest`s and `AuthMoreData` packets. There
    /// is no TLS on this transport, so full `caching_sha2_password`
    /// auth always goes through the RSA public-key exchange rather than
    /// a cleartext reply.
    async fn drive_auth(
        socket: &mut AsyncPacketSocket<TcpStream>,
        config: &MySqlConfig,
        password: &str,
        plugin_name: &mut String,
        nonce: &mut Vec<u8>,
    ) -> Result<u16, Error> {
        loop {
            let (payload, _) = socket.receive().await?;
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
                    socket.send(&response).await?;
                }
                0x01 => {
                    let action = auth_phase::handle_more_data(&payload[1..], false)?;
                    match action {
                        AuthAction::Reply(bytes) if !bytes.is_empty() => socket.send(&bytes).await?,
                        AuthAction::Reply(_) => {
                            // FAST_AUTH_SUCCESS: nothing to send, loop back for the OK.
                        }
                        AuthAction::RequestPublicKey => {
                            if !config.allow_public_key_retrieval {
                                return Err(connect_error(
                                    ConnectionErrorKind::Authentication,
                                    "server requested full authentication and allow_public_key_retrieval is disabled",
                                ));
                            }
                            socket.send(&[caching_sha2::REQUEST_PUBLIC_KEY]).await?;
                        }
                        AuthAction::EncryptWithRsaKey { public_key_pem } => {
                            let encrypted =
                                auth_phase::encrypt_full_auth_password(password, nonce, &public_key_pem)?;
                            socket.send(&encrypted).await?;
                        }
                        AuthAction::Done => {}
                    }
                }
                _ => return Err(protocol_error("unexpected packet during authentication")),
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MySqlAsyncConnection<S> {
    fn ensure_alive(&self) -> Result<(), Error> {
        if self.poisoned {
            Err(Error::Closed("MySqlAsyncConnection"))
        } else {
            Ok(())
        }
    }

    /// Mark the connection poisoned on protocol violations or transport
    /// failures (never on an ordinary server `ERR`), mirroring
    /// `MySqlConnection::guard`.
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

    fn render(sql: &str, params: &[Value]) -> String {
        if params.is_empty() {
            sql.to_string()
        } else {
            types::interpolate_params(sql, params)
        }
    }

    async fn read_column_definitions(&mut self, count: usize) -> Result<Vec<ColumnDef>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let defs = self
            .facade
            .repeat_process(count, |data| {
                types::parse_column_def(data)
                    .ok_or_else(|| protocol_error("malformed column definition packet"))
            })
            .await?;
        if !self.facade.deprecates_eof() {
            self.facade.receive().await?;
        }
        Ok(defs)
    }

    async fn run_query(&mut self, sql: &str) -> Result<text_statement::QueryOutcome, Error> {
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::with_capacity(1 + sql.len());
        writer.write_u8(Command::Query as u8);
        writer.write_bytes(sql.as_bytes());
        self.facade.send(writer.as_bytes()).await?;

        let (header, _) = self.facade.receive().await?;
        if header.is_empty() {
            return Err(protocol_error("empty COM_QUERY response"));
        }

        match PacketType::from_first_byte(header[0], header.len() as u32) {
            PacketType::Error => Err(query_error_from_payload(&header, Some(sql))),
            PacketType::Ok => {
                let mut reader = PacketReader::new(&header);
                let ok = reader
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))?;
                Ok(text_statement::QueryOutcome::Ok(ok))
            }
            PacketType::LocalInfile => Err(protocol_error(
                "LOCAL INFILE requests are not supported by this client",
            )),
            _ => {
                let mut reader = PacketReader::new(&header);
                let column_count = reader
                    .read_lenenc_int()
                    .ok_or_else(|| protocol_error("malformed result set header"))?
                    as usize;

                let columns = self.read_column_definitions(column_count).await?;
                let (rows, _terminator) = self
                    .facade
                    .read_until_eof(|data| Ok(text_statement::decode_text_row(data, &columns)))
                    .await?;
                Ok(text_statement::QueryOutcome::ResultSet(ResultSet::new(
                    columns, rows,
                )))
            }
        }
    }

    /// `COM_QUERY`: run `sql` (with `params` interpolated via
    /// client-side substitution, when non-empty) and return whatever
    /// result set it produced, or an empty one for a statement with no
    /// rows.
    pub async fn query(&mut self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<ResultSet, Error> {
        let _ = cx;
        match self.query_inner(sql, params).await {
            Ok(rs) => Outcome::Ok(rs),
            Err(e) => Outcome::Err(e),
        }
    }

    async fn query_inner(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, Error> {
        self.ensure_alive()?;
        let _span = self.query_span(sql).entered();
        let rendered = Self::render(sql, params);
        let result = self.run_query(&rendered).await;
        match self.guard(result)? {
            text_statement::QueryOutcome::ResultSet(rs) => Ok(rs),
            text_statement::QueryOutcome::Ok(_) => Ok(ResultSet::new(Vec::new(), Vec::new())),
        }
    }

    /// `COM_QUERY` for statements with no result set; returns the
    /// server's reported affected-row count.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        self.ensure_alive()?;
        let _span = self.query_span(sql).entered();
        let rendered = Self::render(sql, params);
        let result = self.run_query(&rendered).await;
        match self.guard(result)? {
            text_statement::QueryOutcome::Ok(ok) => Ok(ok.affected_rows),
            text_statement::QueryOutcome::ResultSet(rs) => Ok(rs.len() as u64),
        }
    }

    /// `COM_QUERY` for an `INSERT`, returning the generated
    /// `last_insert_id`.
    pub async fn insert(&mut self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<i64, Error> {
        let _ = cx;
        match self.insert_inner(sql, params).await {
            Ok(id) => Outcome::Ok(id),
            Err(e) => Outcome::Err(e),
        }
    }

    async fn insert_inner(&mut self, sql: &str, params: &[Value]) -> Result<i64, Error> {
        self.ensure_alive()?;
        let _span = self.query_span(sql).entered();
        let rendered = Self::render(sql, params);
        let result = self.run_query(&rendered).await;
        match self.guard(result)? {
            text_statement::QueryOutcome::Ok(ok) => Ok(ok.last_insert_id as i64),
            text_statement::QueryOutcome::ResultSet(_) => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Execution,
                message: "statement returned a result set; expected an INSERT".into(),
                sqlstate: None,
                vendor_code: None,
                sql: Some(sql.to_string()),
                params: None,
            })),
        }
    }

    /// Run `sql_template` once per row of `rows`, exactly as
    /// `MySqlConnection::execute_batch`: a collapsed multi-row `INSERT`
    /// when possible, otherwise a `;`-joined multi-statement batch under
    /// a temporary `CLIENT_MULTI_STATEMENTS` toggle.
    pub async fn execute_batch(
        &mut self,
        sql_template: &str,
        rows: &[Vec<Value>],
    ) -> Result<Vec<i64>, Error> {
        self.ensure_alive()?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let _span = self.query_span(sql_template).entered();

        if let Some((collapsed_sql, counts)) = client_prepared::collapse_insert_batch(sql_template, rows) {
            let result = self.run_query(&collapsed_sql).await;
            self.guard(result)?;
            return Ok(counts);
        }

        let multi_sql = client_prepared::split_multi_statement_batch(sql_template, rows);
        let enable_result = self.facade.com_set_option(true).await;
        self.guard(enable_result)?;

        let send_result = self.send_multi_query(&multi_sql).await;
        let outcome = self.guard(send_result);

        let disable_result = self.facade.com_set_option(false).await;
        self.guard(disable_result)?;

        outcome
    }

    async fn send_multi_query(&mut self, multi_sql: &str) -> Result<Vec<i64>, Error> {
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::with_capacity(1 + multi_sql.len());
        writer.write_u8(Command::Query as u8);
        writer.write_bytes(multi_sql.as_bytes());
        self.facade.send(writer.as_bytes()).await?;

        let mut counts = Vec::new();
        loop {
            let (payload, _) = self.facade.receive().await?;
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
                    let columns = self.read_column_definitions(column_count).await?;
                    let (rows, terminator) = self
                        .facade
                        .read_until_eof(|data| Ok(text_statement::decode_text_row(data, &columns)))
                        .await?;
                    counts.push(rows.len() as i64);
                    if terminator.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS == 0 {
                        return Ok(counts);
                    }
                }
            }
        }
    }

    /// `COM_STMT_PREPARE`.
    pub async fn prepare(&mut self, sql: &str) -> Result<AsyncServerPreparedStatement, Error> {
        self.ensure_alive()?;
        self.facade.reset_sequence_id();
        let packet = protocol::build_stmt_prepare_packet(sql, 0);
        let result = self.run_prepare(sql, packet).await;
        self.guard(result)
    }

    async fn run_prepare(
        &mut self,
        sql: &str,
        packet: Vec<u8>,
    ) -> Result<AsyncServerPreparedStatement, Error> {
        self.facade.send(&server_prepared::payload_of(packet)).await?;

        let (payload, _) = self.facade.receive().await?;
        if payload.first().copied() == Some(0xFF) {
            return Err(query_error_from_payload(&payload, Some(sql)));
        }
        let ok = protocol::parse_stmt_prepare_ok(&payload)
            .ok_or_else(|| protocol_error("malformed COM_STMT_PREPARE_OK packet"))?;

        let params = self.read_column_definitions(ok.num_params as usize).await?;
        let columns = self.read_column_definitions(ok.num_columns as usize).await?;

        Ok(AsyncServerPreparedStatement {
            statement_id: ok.statement_id,
            sql: sql.to_string(),
            params,
            columns,
            closed: false,
        })
    }

    /// `COM_STMT_EXECUTE`.
    pub async fn execute_prepared(
        &mut self,
        stmt: &AsyncServerPreparedStatement,
        params: &[Value],
    ) -> Result<server_prepared::StmtExecuteOutcome, Error> {
        self.ensure_alive()?;
        let result = self.run_execute_prepared(stmt, params).await;
        self.guard(result)
    }

    async fn run_execute_prepared(
        &mut self,
        stmt: &AsyncServerPreparedStatement,
        params: &[Value],
    ) -> Result<server_prepared::StmtExecuteOutcome, Error> {
        if stmt.closed {
            return Err(Error::Closed("AsyncServerPreparedStatement"));
        }
        if params.len() != stmt.params.len() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::BadParameter,
                message: format!(
                    "expected {} parameters, got {}",
                    stmt.params.len(),
                    params.len()
                ),
                sqlstate: None,
                vendor_code: None,
                sql: Some(stmt.sql.clone()),
                params: Some(params.to_vec()),
            }));
        }

        self.facade.reset_sequence_id();
        let packet = protocol::build_stmt_execute_packet(stmt.statement_id, params, None, 0);
        self.facade.send(&server_prepared::payload_of(packet)).await?;

        let (header, _) = self.facade.receive().await?;
        if header.is_empty() {
            return Err(protocol_error("empty COM_STMT_EXECUTE response"));
        }
        match PacketType::from_first_byte(header[0], header.len() as u32) {
            PacketType::Error => Err(query_error_from_payload(&header, Some(&stmt.sql))),
            PacketType::Ok => {
                let mut reader = PacketReader::new(&header);
                let ok = reader
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))?;
                Ok(server_prepared::StmtExecuteOutcome::Ok(ok))
            }
            _ => {
                let mut reader = PacketReader::new(&header);
                let column_count = reader
                    .read_lenenc_int()
                    .ok_or_else(|| protocol_error("malformed result set header"))?
                    as usize;
                let columns = self.read_column_definitions(column_count).await?;
                let (rows, _terminator) = self
                    .facade
                    .read_until_eof(|data| Ok(server_prepared::decode_binary_row(data, &columns)))
                    .await?;
                Ok(server_prepared::StmtExecuteOutcome::ResultSet(ResultSet::new(
                    columns, rows,
                )))
            }
        }
    }

    /// `COM_STMT_CLOSE`. Idempotent, like its sync counterpart.
    pub async fn close_prepared(&mut self, stmt: &mut AsyncServerPreparedStatement) -> Result<(), Error> {
        self.ensure_alive()?;
        if stmt.closed {
            return Ok(());
        }
        self.facade.reset_sequence_id();
        let packet = protocol::build_stmt_close_packet(stmt.statement_id, 0);
        let result = self.facade.send(&server_prepared::payload_of(packet)).await;
        self.guard(result)?;
        stmt.closed = true;
        Ok(())
    }

    /// `COM_STMT_RESET`.
    pub async fn reset_prepared(&mut self, stmt: &mut AsyncServerPreparedStatement) -> Result<(), Error> {
        self.ensure_alive()?;
        if stmt.closed {
            return Err(Error::Closed("AsyncServerPreparedStatement"));
        }
        self.facade.reset_sequence_id();
        let packet = protocol::build_stmt_reset_packet(stmt.statement_id, 0);
        let result = self.run_reset(packet).await;
        self.guard(result)
    }

    async fn run_reset(&mut self, packet: Vec<u8>) -> Result<(), Error> {
        self.facade.send(&server_prepared::payload_of(packet)).await?;
        let (payload, _) = self.facade.receive().await?;
        let first = payload.first().copied().unwrap_or(0xFF);
        match PacketType::from_first_byte(first, payload.len() as u32) {
            PacketType::Ok => Ok(()),
            PacketType::Error => Err(query_error_from_payload(&payload, None)),
            _ => Err(protocol_error("unexpected response to COM_STMT_RESET")),
        }
    }

    async fn send_simple_command(&mut self, command: Command, payload: &[u8]) -> Result<OkPacket, Error> {
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::with_capacity(1 + payload.len());
        writer.write_u8(command as u8);
        writer.write_bytes(payload);
        self.facade.send(writer.as_bytes()).await?;

        let (response, _) = self.facade.receive().await?;
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
    pub async fn ping(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let _ = cx;
        let result = self.send_simple_command(Command::Ping, &[]).await.map(|_| ());
        match self.guard(result) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        }
    }

    /// `COM_INIT_DB`.
    pub async fn init_db(&mut self, name: &str) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self
            .send_simple_command(Command::InitDb, name.as_bytes())
            .await
            .map(|_| ());
        self.guard(result)
    }

    /// Switch the active database, under the caller's preferred term for
    /// MySQL's single-level namespace. Both send `COM_INIT_DB`.
    pub async fn set_catalog(&mut self, name: &str) -> Result<(), Error> {
        self.init_db(name).await
    }

    pub async fn set_schema(&mut self, name: &str) -> Result<(), Error> {
        self.init_db(name).await
    }

    /// `COM_RESET_CONNECTION`.
    pub async fn reset_connection(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self
            .send_simple_command(Command::ResetConnection, &[])
            .await
            .map(|_| ());
        let result = self.guard(result);
        if result.is_ok() {
            self.autocommit = true;
        }
        result
    }

    /// `COM_SET_OPTION`: toggle `CLIENT_MULTI_STATEMENTS`.
    pub async fn set_option(&mut self, enable_multi_statements: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        let result = self.facade.com_set_option(enable_multi_statements).await;
        self.guard(result)
    }

    /// `COM_STATISTICS`: a short, human-readable server status line with
    /// no `OK`/`ERR` framing.
    pub async fn statistics(&mut self) -> Result<String, Error> {
        self.ensure_alive()?;
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::Statistics as u8);
        let send_result = self.facade.send(writer.as_bytes()).await;
        self.guard(send_result)?;
        let recv_result = self.facade.receive().await;
        let (response, _) = self.guard(recv_result)?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// `COM_QUIT`. Best-effort, like its sync counterpart.
    pub async fn close(mut self, cx: &Cx) -> Result<(), Error> {
        let _ = cx;
        if self.poisoned {
            return Ok(());
        }
        self.facade.reset_sequence_id();
        let mut writer = PacketWriter::new();
        writer.write_u8(Command::Quit as u8);
        let _ = self.facade.send(writer.as_bytes()).await;
        Ok(())
    }

    // --- Transaction control --------------------------------------------

    pub async fn set_autocommit(&mut self, enabled: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        if self.autocommit == enabled {
            return Ok(());
        }
        self.execute(&format!("SET autocommit={}", u8::from(enabled)), &[]).await?;
        self.autocommit = enabled;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.execute("COMMIT", &[]).await?;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.execute("ROLLBACK", &[]).await?;
        Ok(())
    }

    pub async fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), Error> {
        self.ensure_alive()?;
        self.execute(
            &format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
            &[],
        )
        .await?;
        Ok(())
    }

    pub async fn set_read_only(&mut self, read_only: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        let mode = if read_only { "READ ONLY" } else { "READ WRITE" };
        self.execute(&format!("SET SESSION TRANSACTION {mode}"), &[]).await?;
        Ok(())
    }
}

/// A server-side prepared statement over an async connection. Mirrors
/// [`crate::server_prepared::ServerPreparedStatement`]'s lifecycle;
/// lives here rather than in `server_prepared` since its methods drive
/// an [`AsyncProtocolFacade`] instead of a blocking one, but it reuses
/// that module's binary row decoder and packet-header stripping.
#[derive(Debug)]
pub struct AsyncServerPreparedStatement {
    statement_id: u32,
    sql: String,
    params: Vec<ColumnDef>,
    columns: Vec<ColumnDef>,
    closed: bool,
}

impl AsyncServerPreparedStatement {
    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.columns
    }
}
