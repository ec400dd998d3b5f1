//! Server-side prepared statements: `COM_STMT_PREPARE` →
//! `COM_STMT_EXECUTE` (binary-encoded parameters, binary result rows) →
//! `COM_STMT_CLOSE`. The server does the parsing once and hands back a
//! statement id; every subsequent execute just streams parameter bytes
//! against it.
//!
//! `protocol::prepared` already owns the wire encoding (packet builders,
//! `StmtPrepareOk`, the binary parameter codec). Its builders return a
//! complete packet (header included) rather than a bare payload, so
//! this module strips the 4-byte header before handing the bytes to
//! [`ProtocolFacade::send`], which frames its own — the builders are
//! always called with `sequence_id = 0` in lockstep with a freshly
//! reset facade, so the header they attach matches what the facade
//! would have produced anyway.

use std::io::{Read, Write};

use crate::error::{Error, ProtocolError, QueryError, QueryErrorKind};
use crate::facade::ProtocolFacade;
use crate::protocol::{self, OkPacket, PacketReader, PacketType, PreparedStatement, StmtPrepareOk};
use crate::result_set::ResultSet;
use crate::row::Row;
use crate::types::{self, ColumnDef, FieldType};
use crate::value::Value;

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

fn query_error_from_payload(payload: &[u8]) -> Error {
    let mut reader = PacketReader::new(payload);
    match reader.parse_err_packet() {
        Some(err) => Error::Query(QueryError {
            kind: QueryErrorKind::Execution,
            message: err.error_message,
            sqlstate: Some(err.sql_state),
            vendor_code: Some(err.error_code),
            sql: None,
            params: None,
        }),
        None => protocol_error("malformed error packet"),
    }
}

/// Strip the 4-byte packet header a `protocol::prepared` builder
/// already attached, returning the bare payload for `ProtocolFacade::send`.
pub(crate) fn payload_of(packet: Vec<u8>) -> Vec<u8> {
    packet.into_iter().skip(4).collect()
}

/// What `COM_STMT_EXECUTE` produced: a binary-protocol result set, or
/// an OK packet (affected rows / last insert id) for a non-`SELECT`.
#[derive(Debug)]
pub enum StmtExecuteOutcome {
    ResultSet(ResultSet),
    Ok(OkPacket),
}

/// A prepared statement living on the server, identified by its
/// statement id. `close` is idempotent — a statement already closed
/// (or never successfully prepared) simply has nothing to send.
#[derive(Debug)]
pub struct ServerPreparedStatement {
    inner: PreparedStatement,
    closed: bool,
}

impl ServerPreparedStatement {
    /// `COM_STMT_PREPARE`: send the SQL template, then read the param
    /// and column definition lists the server describes it with.
    pub fn prepare<S: Read + Write>(
        facade: &mut ProtocolFacade<S>,
        sql: &str,
    ) -> Result<Self, Error> {
        facade.reset_sequence_id();
        let packet = protocol::build_stmt_prepare_packet(sql, 0);
        facade.send(&payload_of(packet))?;

        let (payload, _) = facade.receive()?;
        if payload.first().copied() == Some(0xFF) {
            return Err(query_error_from_payload(&payload));
        }
        let ok: StmtPrepareOk = protocol::parse_stmt_prepare_ok(&payload)
            .ok_or_else(|| protocol_error("malformed COM_STMT_PREPARE_OK packet"))?;

        let params = Self::read_definitions(facade, ok.num_params as usize)?;
        let columns = Self::read_definitions(facade, ok.num_columns as usize)?;

        Ok(Self {
            inner: PreparedStatement::new(ok.statement_id, sql.to_string(), params, columns),
            closed: false,
        })
    }

    fn read_definitions<S: Read + Write>(
        facade: &mut ProtocolFacade<S>,
        count: usize,
    ) -> Result<Vec<ColumnDef>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let defs = facade.repeat_process(count, |data| {
            types::parse_column_def(data)
                .ok_or_else(|| protocol_error("malformed column definition packet"))
        })?;
        if !facade.deprecates_eof() {
            facade.receive()?;
        }
        Ok(defs)
    }

    pub fn statement_id(&self) -> u32 {
        self.inner.statement_id
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    pub fn param_count(&self) -> usize {
        self.inner.param_count()
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.inner.columns
    }

    /// `COM_STMT_EXECUTE`: bind `params` positionally and run the
    /// statement. Returns a fully materialized [`ResultSet`] for a
    /// `SELECT`, or the terminal `OK` packet otherwise.
    pub fn execute<S: Read + Write>(
        &self,
        facade: &mut ProtocolFacade<S>,
        params: &[Value],
    ) -> Result<StmtExecuteOutcome, Error> {
        if self.closed {
            return Err(Error::Closed("ServerPreparedStatement"));
        }
        if params.len() != self.param_count() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::BadParameter,
                message: format!(
                    "expected {} parameters, got {}",
                    self.param_count(),
                    params.len()
                ),
                sqlstate: None,
                vendor_code: None,
                sql: Some(self.inner.sql.clone()),
                params: Some(params.to_vec()),
            }));
        }

        facade.reset_sequence_id();
        let packet = protocol::build_stmt_execute_packet(self.inner.statement_id, params, None, 0);
        facade.send(&payload_of(packet))?;

        let (header, _) = facade.receive()?;
        if header.is_empty() {
            return Err(protocol_error("empty COM_STMT_EXECUTE response"));
        }
        match PacketType::from_first_byte(header[0], header.len() as u32) {
            PacketType::Error => Err(query_error_from_payload(&header)),
            PacketType::Ok => {
                let mut reader = PacketReader::new(&header);
                let ok = reader
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))?;
                Ok(StmtExecuteOutcome::Ok(ok))
            }
            _ => {
                let mut reader = PacketReader::new(&header);
                let column_count = reader
                    .read_lenenc_int()
                    .ok_or_else(|| protocol_error("malformed result set header"))?
                    as usize;
                let columns = Self::read_definitions(facade, column_count)?;
                let (rows, _terminator) =
                    facade.read_until_eof(|data| Ok(decode_binary_row(data, &columns)))?;
                Ok(StmtExecuteOutcome::ResultSet(ResultSet::new(
                    columns, rows,
                )))
            }
        }
    }

    /// `COM_STMT_CLOSE`. The server never replies to this command;
    /// calling it more than once (or on a statement never prepared
    /// successfully) is a no-op.
    pub fn close<S: Read + Write>(&mut self, facade: &mut ProtocolFacade<S>) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        facade.reset_sequence_id();
        let packet = protocol::build_stmt_close_packet(self.inner.statement_id, 0);
        facade.send(&payload_of(packet))?;
        self.closed = true;
        Ok(())
    }

    /// `COM_STMT_RESET`: clear any buffered parameter data / cursor
    /// from a previous execute without discarding the prepared plan.
    pub fn reset<S: Read + Write>(&mut self, facade: &mut ProtocolFacade<S>) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed("ServerPreparedStatement"));
        }
        facade.reset_sequence_id();
        let packet = protocol::build_stmt_reset_packet(self.inner.statement_id, 0);
        facade.send(&payload_of(packet))?;
        let (payload, _) = facade.receive()?;
        let first = payload.first().copied().unwrap_or(0xFF);
        match PacketType::from_first_byte(first, payload.len() as u32) {
            PacketType::Ok => Ok(()),
            PacketType::Error => Err(query_error_from_payload(&payload)),
            _ => Err(protocol_error("unexpected response to COM_STMT_RESET")),
        }
    }
}

/// Decode one binary-protocol result row: `{0x00, null_bitmap, values...}`
/// with the null bitmap's `+2` bit offset (bits 0 and 1 are reserved).
pub(crate) fn decode_binary_row(data: &[u8], columns: &[ColumnDef]) -> Row {
    let mut reader = PacketReader::new(data);
    reader.skip(1);
    let bitmap_len = (columns.len() + 2 + 7) / 8;
    let bitmap = reader.read_bytes(bitmap_len).unwrap_or(&[]);

    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let bit = i + 2;
        let is_null = bitmap
            .get(bit / 8)
            .is_some_and(|b| b & (1 << (bit % 8)) != 0);
        if is_null {
            values.push(Value::Null);
            continue;
        }
        values.push(read_binary_field(&mut reader, col));
    }

    let names = columns.iter().map(|c| c.name.clone()).collect();
    Row::new(names, values)
}

/// Read one non-NULL binary field, consuming exactly as many bytes as
/// its column type dictates — fixed width for numerics, a 1-byte
/// length prefix (0/4/7/11 or 0/8/12) for temporal types, and
/// length-encoding for everything else.
fn read_binary_field(reader: &mut PacketReader, col: &ColumnDef) -> Value {
    let field_type = col.column_type;
    let is_unsigned = col.is_unsigned();
    let bytes: Vec<u8> = match field_type {
        FieldType::Tiny => reader.read_bytes(1).map_or_else(|| vec![0u8], <[u8]>::to_vec),
        FieldType::Short | FieldType::Year => reader
            .read_bytes(2)
            .map_or_else(|| vec![0u8; 2], <[u8]>::to_vec),
        FieldType::Long | FieldType::Int24 => reader
            .read_bytes(4)
            .map_or_else(|| vec![0u8; 4], <[u8]>::to_vec),
        FieldType::LongLong | FieldType::Double => reader
            .read_bytes(8)
            .map_or_else(|| vec![0u8; 8], <[u8]>::to_vec),
        FieldType::Float => reader
            .read_bytes(4)
            .map_or_else(|| vec![0u8; 4], <[u8]>::to_vec),
        FieldType::Date
        | FieldType::NewDate
        | FieldType::Time
        | FieldType::Time2
        | FieldType::DateTime
        | FieldType::Timestamp
        | FieldType::DateTime2
        | FieldType::Timestamp2 => {
            let len = reader.read_u8().unwrap_or(0) as usize;
            reader.read_bytes(len).map_or_else(Vec::new, <[u8]>::to_vec)
        }
        _ => reader.read_lenenc_bytes().unwrap_or_default(),
    };
    types::decode_binary_value(field_type, &bytes, is_unsigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities;
    use crate::socket::PacketSocket;
    use std::io::Cursor;

    fn facade_over(bytes: Vec<u8>) -> ProtocolFacade<Cursor<Vec<u8>>> {
        let socket = PacketSocket::new(Cursor::new(bytes));
        ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.0".into())
    }

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

    fn column_def_payload(name: &str, column_type: FieldType, flags: u16) -> Vec<u8> {
        let mut writer = crate::protocol::PacketWriter::new();
        writer.write_lenenc_string("def");
        writer.write_lenenc_string("schema");
        writer.write_lenenc_string("table");
        writer.write_lenenc_string("table");
        writer.write_lenenc_string(name);
        writer.write_lenenc_string(name);
        writer.write_lenenc_int(0x0c);
        writer.write_u16_le(33);
        writer.write_u32_le(11);
        writer.write_u8(column_type as u8);
        writer.write_u16_le(flags);
        writer.write_u8(0);
        writer.into_bytes()
    }

    #[test]
    fn prepare_reads_param_and_column_defs() {
        // facade_over negotiates DEFAULT_CLIENT_FLAGS, which sets
        // CLIENT_DEPRECATE_EOF, so neither the param-def nor the
        // column-def phase carries an intermediate EOF packet.
        let mut bytes = Vec::new();
        // COM_STMT_PREPARE_OK: stmt id 7, 1 column, 1 param
        bytes.extend(packet(
            0,
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
        ));
        bytes.extend(packet(
            1,
            &column_def_payload("id", FieldType::Long, 0),
        ));
        bytes.extend(packet(
            2,
            &column_def_payload("name", FieldType::VarString, 0),
        ));

        let mut facade = facade_over(bytes);
        let stmt = ServerPreparedStatement::prepare(&mut facade, "SELECT name FROM t WHERE id = ?")
            .unwrap();
        assert_eq!(stmt.statement_id(), 7);
        assert_eq!(stmt.param_count(), 1);
        assert_eq!(stmt.column_defs().len(), 1);
        assert_eq!(stmt.column_defs()[0].name, "name");
    }

    #[test]
    fn execute_returns_ok_for_non_select() {
        let mut bytes = Vec::new();
        bytes.extend(packet(0, &[0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]));
        let mut facade = facade_over(bytes);
        let stmt = ServerPreparedStatement {
            inner: PreparedStatement::new(1, "DELETE FROM t WHERE id = ?".into(), vec![], vec![]),
            closed: false,
        };
        match stmt.execute(&mut facade, &[]).unwrap() {
            StmtExecuteOutcome::Ok(ok) => assert_eq!(ok.affected_rows, 1),
            StmtExecuteOutcome::ResultSet(_) => panic!("expected OK packet"),
        }
    }

    #[test]
    fn execute_rejects_wrong_param_count() {
        let mut facade = facade_over(Vec::new());
        let param = column_def_payload("id", FieldType::Long, 0);
        let stmt = ServerPreparedStatement {
            inner: PreparedStatement::new(
                1,
                "SELECT 1 WHERE id = ?".into(),
                vec![types::parse_column_def(&param).unwrap()],
                vec![],
            ),
            closed: false,
        };
        let err = stmt.execute(&mut facade, &[]).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn decode_binary_row_respects_null_bitmap() {
        let columns = vec![
            types::parse_column_def(&column_def_payload("a", FieldType::Long, 0)).unwrap(),
            types::parse_column_def(&column_def_payload("b", FieldType::VarString, 0)).unwrap(),
        ];
        // header 0x00, bitmap (1 byte, bit for column b at index1+2=3 set => 0x08),
        // column a = 42 (i32 LE), column b is NULL so no bytes follow.
        let mut data = vec![0x00, 0x08];
        data.extend_from_slice(&42i32.to_le_bytes());
        let row = decode_binary_row(&data, &columns);
        assert_eq!(row.get_by_name("a").unwrap(), &Value::Int(42));
        assert_eq!(row.get_by_name("b").unwrap(), &Value::Null);
    }
}
