//! `COM_QUERY`: the text protocol. Every row comes back as strings
//! (even for numeric/temporal columns), decoded per-column by
//! [`crate::types::decode_text_value`].
//!
//! This module only knows how to run one piece of SQL text and get a
//! result back. `client_prepared` renders placeholder substitution
//! into that text; `connection`/`async_connection` call both in
//! sequence (and, for batched client-prepared statements, wrap the
//! exchange in `COM_SET_OPTION`).

use std::io::{Read, Write};

use crate::error::{Error, ProtocolError, QueryError, QueryErrorKind};
use crate::facade::ProtocolFacade;
use crate::protocol::{Command, OkPacket, PacketReader, PacketType, PacketWriter};
use crate::result_set::ResultSet;
use crate::row::Row;
use crate::types::{self, ColumnDef};
use crate::value::Value;

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
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

/// What `COM_QUERY` produced: a text-protocol result set, or the
/// terminal `OK` packet for a statement with no result set.
#[derive(Debug)]
pub enum QueryOutcome {
    ResultSet(ResultSet),
    Ok(OkPacket),
}

/// Send `sql` as a single `COM_QUERY` and decode whatever comes back.
pub fn execute_query<S: Read + Write>(
    facade: &mut ProtocolFacade<S>,
    sql: &str,
) -> Result<QueryOutcome, Error> {
    facade.reset_sequence_id();
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::Query as u8);
    writer.write_bytes(sql.as_bytes());
    facade.send(writer.as_bytes())?;

    let (header, _) = facade.receive()?;
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
            Ok(QueryOutcome::Ok(ok))
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

            let columns = read_column_definitions(facade, column_count)?;
            let (rows, _terminator) =
                facade.read_until_eof(|data| Ok(decode_text_row(data, &columns)))?;
            Ok(QueryOutcome::ResultSet(ResultSet::new(columns, rows)))
        }
    }
}

fn read_column_definitions<S: Read + Write>(
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

/// Decode one text-protocol row: each value is either the NULL marker
/// (`0xFB`) or a length-encoded string, regardless of the column's
/// declared type.
pub(crate) fn decode_text_row(data: &[u8], columns: &[ColumnDef]) -> Row {
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
    let column_names = columns.iter().map(|c| c.name.clone()).collect();
    Row::new(column_names, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PacketWriter, capabilities};
    use crate::socket::PacketSocket;
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

    fn column_def_packet(name: &str) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_lenenc_string("def");
        w.write_lenenc_string("testdb");
        w.write_lenenc_string("t");
        w.write_lenenc_string("t");
        w.write_lenenc_string(name);
        w.write_lenenc_string(name);
        w.write_lenenc_int(0x0c);
        w.write_u16_le(45);
        w.write_u32_le(255);
        w.write_u8(crate::types::FieldType::VarString as u8);
        w.write_u16_le(0);
        w.write_u8(0);
        w.into_bytes()
    }

    #[test]
    fn executes_query_with_no_result_set() {
        let mut bytes = Vec::new();
        bytes.extend(packet(1, &[0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]));
        let socket = PacketSocket::new(Cursor::new(bytes));
        let mut facade = ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.0".into());
        let outcome = execute_query(&mut facade, "DELETE FROM t").unwrap();
        match outcome {
            QueryOutcome::Ok(ok) => assert_eq!(ok.affected_rows, 1),
            QueryOutcome::ResultSet(_) => panic!("expected OK packet"),
        }
    }

    #[test]
    fn executes_query_with_result_set() {
        // DEFAULT_CLIENT_FLAGS negotiates CLIENT_DEPRECATE_EOF, so the
        // column-definition phase carries no intermediate EOF packet
        // (read_column_definitions only reads one when it's absent from
        // the capability set) — the column def is immediately followed
        // by the row, then the terminator.
        let mut bytes = Vec::new();
        bytes.extend(packet(1, &[0x01])); // 1 column
        bytes.extend(packet(2, &column_def_packet("name")));
        let row = {
            let mut w = PacketWriter::new();
            w.write_lenenc_string("alice");
            w.into_bytes()
        };
        bytes.extend(packet(3, &row));
        bytes.extend(packet(4, &[0xFE, 0x00, 0x00, 0x02, 0x00])); // EOF terminator

        let socket = PacketSocket::new(Cursor::new(bytes));
        let mut facade = ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.0".into());
        let outcome = execute_query(&mut facade, "SELECT name FROM t").unwrap();
        match outcome {
            QueryOutcome::ResultSet(rs) => {
                assert_eq!(rs.len(), 1);
                assert_eq!(rs.column_defs()[0].name, "name");
            }
            QueryOutcome::Ok(_) => panic!("expected result set"),
        }
    }

    #[test]
    fn read_until_eof_decodes_binary_rows_without_mistaking_them_for_the_terminator() {
        // A server-side prepared SELECT's binary rows always start with
        // the 0x00 row marker, which must never be mistaken for the
        // deprecate-EOF terminator (header 0xFE) — otherwise every
        // binary result set under default capabilities would come back
        // empty.
        use crate::server_prepared::decode_binary_row;
        use crate::types::FieldType;

        let column = crate::types::ColumnDef {
            catalog: "def".into(),
            schema: "testdb".into(),
            table: "t".into(),
            org_table: "t".into(),
            name: "n".into(),
            org_name: "n".into(),
            charset: 45,
            column_length: 11,
            column_type: FieldType::Long,
            flags: 0,
            decimals: 0,
        };

        // header 0x00, null bitmap (1 column, bit offset +2 -> 1 byte,
        // no nulls set), column value = 42 as i32 LE.
        let mut binary_row = vec![0x00, 0x00];
        binary_row.extend_from_slice(&42i32.to_le_bytes());

        let mut bytes = Vec::new();
        bytes.extend(packet(0, &binary_row));
        bytes.extend(packet(1, &[0xFE, 0x00, 0x00, 0x02, 0x00])); // EOF/OK terminator

        let socket = PacketSocket::new(Cursor::new(bytes));
        let mut facade = ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.0".into());
        let columns = [column];
        let (rows, _terminator) = facade
            .read_until_eof(|data| Ok(decode_binary_row(data, &columns)))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("n").unwrap(), &Value::Int(42));
    }

    #[test]
    fn query_error_carries_sql_text() {
        let mut bytes = Vec::new();
        let mut err_payload = vec![0xFF, 0x44, 0x04, b'#'];
        err_payload.extend_from_slice(b"42000");
        err_payload.extend_from_slice(b"bad syntax");
        bytes.extend(packet(1, &err_payload));
        let socket = PacketSocket::new(Cursor::new(bytes));
        let mut facade = ProtocolFacade::new(socket, capabilities::DEFAULT_CLIENT_FLAGS, "8.0.0".into());
        let err = execute_query(&mut facade, "SELECT BAD").unwrap_err();
        match err {
            Error::Query(e) => assert_eq!(e.sql.as_deref(), Some("SELECT BAD")),
            _ => panic!("expected query error"),
        }
    }
}
